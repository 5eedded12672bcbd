use cadai_config::{AutomationBackend, AutomationConfig};
use cadai_engine::client::AutomationClient;
use cadai_engine::native::native_connector;
use cadai_engine::offline::{DisabledConnector, OfflineConnector};
use cadai_engine::session::Connector;
use tracing::{info, warn};

/// 按配置选择连接器并尝试连接。连接失败时返回未连接的客户端，后续绘图操作均为空操作。
pub fn connect_client(config: &AutomationConfig) -> AutomationClient {
    let connector: Box<dyn Connector> = match config.backend {
        AutomationBackend::Native => native_connector(),
        AutomationBackend::Offline => Box::new(OfflineConnector::new()),
        AutomationBackend::Disabled => Box::new(DisabledConnector),
    };
    let mut client = AutomationClient::new(config.prog_ids.iter().cloned());
    if client.connect(connector.as_ref()) {
        info!(
            backend = ?config.backend,
            prog_id = client.connected_via().unwrap_or_default(),
            "自动化会话已建立"
        );
    } else {
        warn!(backend = ?config.backend, "未能连接 CAD 应用，绘图命令将不会生效");
    }
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn default_backend_without_application_stays_disconnected() {
        let client = connect_client(&AutomationConfig::default());
        assert!(!client.is_connected());
        assert!(client.connected_via().is_none());
    }

    #[test]
    fn offline_backend_connects_with_first_candidate() {
        let config = AutomationConfig {
            backend: AutomationBackend::Offline,
            ..AutomationConfig::default()
        };
        let client = connect_client(&config);
        assert!(client.is_connected());
        assert_eq!(client.connected_via(), Some("AutoCAD.Application"));
    }

    #[test]
    fn disabled_backend_stays_disconnected() {
        let config = AutomationConfig {
            backend: AutomationBackend::Disabled,
            ..AutomationConfig::default()
        };
        let client = connect_client(&config);
        assert!(!client.is_connected());
    }
}
