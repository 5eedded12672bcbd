use std::path::PathBuf;

use cadai_config::{AppConfig, ConfigError};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

enum Mode {
    Interactive,
    UpdateCache,
    Prompt(String),
}

fn main() {
    let mut args = std::env::args().skip(1);
    let mut mode = Mode::Interactive;
    let mut config_override: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--update-cache" => mode = Mode::UpdateCache,
            "--prompt" => {
                let Some(text) = args.next() else {
                    eprintln!("`--prompt` 需要提供请求文本");
                    std::process::exit(1);
                };
                mode = Mode::Prompt(text);
            }
            "--config" => {
                let Some(path) = args.next() else {
                    eprintln!("`--config` 需要提供配置文件路径");
                    std::process::exit(1);
                };
                config_override = Some(PathBuf::from(path));
            }
            other => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
        }
    }

    let (config, config_error) = match load_configuration(config_override) {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    init_logging(&config);
    if let Some(err) = config_error {
        report_config_error(&err);
    }
    info!("启动 CAD AI 绘图助手");

    let result = match mode {
        Mode::Interactive => cadai_frontend::run_interactive(&config),
        Mode::UpdateCache => {
            info!(path = %config.cache.path.display(), "仅刷新图纸缓存");
            cadai_frontend::snapshot_cache(&config)
        }
        Mode::Prompt(text) => cadai_frontend::run_once(&config, &text),
    };
    if let Err(err) = result {
        error!(error = %err, "绘图助手异常退出");
        std::process::exit(1);
    }
}

/// 加载指定路径或自动发现的配置。错误由调用方在日志初始化之后报告。
fn load_configuration(override_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    match override_path {
        Some(path) => AppConfig::from_file(&path),
        None => AppConfig::discover(),
    }
}

fn report_config_error(err: &ConfigError) {
    match err {
        ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
            warn!(path = %path.display(), error = %err, "加载配置失败，使用内建默认值");
        }
        ConfigError::Context { .. } => {
            warn!(error = %err, "加载配置失败，使用内建默认值");
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
