pub mod command;
pub mod native;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum AutomationError {
        #[error("not connected to a CAD application")]
        NotConnected,
        #[error("no application identifiers configured")]
        NoCandidates,
        #[error("failed to attach via {prog_id}: {reason}")]
        AttachFailed { prog_id: String, reason: String },
        #[error("{operation} failed: {reason}")]
        CallFailed {
            operation: &'static str,
            reason: String,
        },
        #[error("unknown system variable {0}")]
        UnknownVariable(String),
        #[error("entity {handle} could not be read: {reason}")]
        EntityUnreadable { handle: String, reason: String },
    }
}

pub mod session {
    use cadai_core::entity::{EntityHandle, EntityRecord};
    use cadai_core::geometry::{Point3, Vector3};
    use cadai_core::variable::VariableValue;

    use crate::errors::AutomationError;

    /// 对运行中 CAD 应用的会话能力抽象：活动文档及其模型空间。
    /// 原生句柄类型不会越过该边界。
    pub trait CadSession {
        fn add_line(&mut self, start: Point3, end: Point3) -> Result<EntityHandle, AutomationError>;

        fn add_circle(
            &mut self,
            center: Point3,
            radius: f64,
        ) -> Result<EntityHandle, AutomationError>;

        fn add_point(&mut self, point: Point3) -> Result<EntityHandle, AutomationError>;

        /// 角度单位为弧度。
        fn add_arc(
            &mut self,
            center: Point3,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        ) -> Result<EntityHandle, AutomationError>;

        /// `fit_points` 为展开后的连续坐标 `[x0, y0, z0, x1, ...]`。
        fn add_spline(
            &mut self,
            fit_points: &[f64],
            start_tangent: Vector3,
            end_tangent: Vector3,
        ) -> Result<EntityHandle, AutomationError>;

        /// 向活动文档发送原始命令字符串（已包含结束符）。
        fn send_command(&mut self, command: &str) -> Result<(), AutomationError>;

        /// 遍历模型空间一次。外层错误表示集合本身不可访问，内层错误只影响单个实体。
        fn model_space(&self) -> Result<Vec<Result<EntityRecord, AutomationError>>, AutomationError>;

        fn get_variable(&self, name: &str) -> Result<VariableValue, AutomationError>;
    }

    /// 按应用标识尝试附加到正在运行的实例。
    pub trait Connector {
        fn attach(&self, prog_id: &str) -> Result<Box<dyn CadSession>, AutomationError>;
    }
}

pub mod client {
    use std::fmt;

    use cadai_core::entity::{EntityHandle, EntityRecord};
    use cadai_core::geometry::{Point3, Vector3, flatten_points};
    use cadai_core::variable::VariableValue;
    use tracing::{debug, info, warn};

    use crate::errors::AutomationError;
    use crate::session::{CadSession, Connector};

    /// 原始命令的结束符，相当于在命令行按下回车。
    pub const COMMAND_TERMINATOR: &str = " ";
    pub const TRIM_COMMAND: &str = "_TRIM";

    /// 自动化客户端：持有会话句柄，并对每个绘图操作做连接守卫与错误吞并。
    /// 操作返回 `None`/`false` 即表示“操作未发生”。
    pub struct AutomationClient {
        prog_ids: Vec<String>,
        session: Option<Box<dyn CadSession>>,
        connected_via: Option<String>,
    }

    impl AutomationClient {
        pub fn new<I, S>(prog_ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                prog_ids: prog_ids.into_iter().map(Into::into).collect(),
                session: None,
                connected_via: None,
            }
        }

        /// 按候选顺序尝试附加，第一个成功者胜出。全部失败时保持未连接状态。
        pub fn connect(&mut self, connector: &dyn Connector) -> bool {
            if self.prog_ids.is_empty() {
                warn!(error = %AutomationError::NoCandidates, "无法连接 CAD 应用");
                return false;
            }

            let mut last_error: Option<AutomationError> = None;
            for prog_id in &self.prog_ids {
                debug!(prog_id = %prog_id, "尝试连接 CAD 应用");
                match connector.attach(prog_id) {
                    Ok(session) => {
                        info!(prog_id = %prog_id, "已连接 CAD 应用");
                        self.session = Some(session);
                        self.connected_via = Some(prog_id.clone());
                        return true;
                    }
                    Err(err) => {
                        debug!(prog_id = %prog_id, error = %err, "连接尝试失败");
                        last_error = Some(err);
                    }
                }
            }

            if let Some(err) = last_error {
                warn!(error = %err, "无法连接任何 CAD 应用，请确认应用已打开且存在活动图纸");
            }
            false
        }

        #[inline]
        pub fn is_connected(&self) -> bool {
            self.session.is_some()
        }

        /// 成功连接时使用的应用标识。
        #[inline]
        pub fn connected_via(&self) -> Option<&str> {
            self.connected_via.as_deref()
        }

        #[inline]
        pub fn prog_ids(&self) -> &[String] {
            &self.prog_ids
        }

        pub fn add_line(&mut self, start: Point3, end: Point3) -> Option<EntityHandle> {
            self.guarded("add_line", |session| session.add_line(start, end))
        }

        pub fn add_circle(&mut self, center: Point3, radius: f64) -> Option<EntityHandle> {
            self.guarded("add_circle", |session| session.add_circle(center, radius))
        }

        pub fn add_point(&mut self, point: Point3) -> Option<EntityHandle> {
            self.guarded("add_point", |session| session.add_point(point))
        }

        pub fn add_arc(
            &mut self,
            center: Point3,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        ) -> Option<EntityHandle> {
            self.guarded("add_arc", |session| {
                session.add_arc(center, radius, start_angle, end_angle)
            })
        }

        /// 样条以拟合点创建，两端切向均为零向量。
        pub fn add_spline(&mut self, points: &[Point3]) -> Option<EntityHandle> {
            let fit_points = flatten_points(points);
            self.guarded("add_spline", |session| {
                session.add_spline(&fit_points, Vector3::ZERO, Vector3::ZERO)
            })
        }

        /// 发送原始命令，自动追加结束符。失败只记录日志。
        pub fn send_command(&mut self, command: &str) -> bool {
            let line = format!("{command}{COMMAND_TERMINATOR}");
            self.guarded("send_command", |session| session.send_command(&line))
                .is_some()
        }

        pub fn trim(&mut self) -> bool {
            info!("发送 TRIM 命令");
            self.send_command(TRIM_COMMAND)
        }

        pub fn model_space(
            &self,
        ) -> Result<Vec<Result<EntityRecord, AutomationError>>, AutomationError> {
            match &self.session {
                Some(session) => session.model_space(),
                None => Err(AutomationError::NotConnected),
            }
        }

        pub fn get_variable(&self, name: &str) -> Result<VariableValue, AutomationError> {
            match &self.session {
                Some(session) => session.get_variable(name),
                None => Err(AutomationError::NotConnected),
            }
        }

        fn guarded<T>(
            &mut self,
            operation: &'static str,
            call: impl FnOnce(&mut dyn CadSession) -> Result<T, AutomationError>,
        ) -> Option<T> {
            let Some(session) = self.session.as_deref_mut() else {
                debug!(operation, "未连接，跳过操作");
                return None;
            };
            match call(session) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(operation, error = %err, "自动化调用失败");
                    None
                }
            }
        }
    }

    impl fmt::Debug for AutomationClient {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("AutomationClient")
                .field("prog_ids", &self.prog_ids)
                .field("connected_via", &self.connected_via)
                .finish()
        }
    }

}

pub mod offline {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use cadai_core::entity::{
        ACDB_ARC, ACDB_CIRCLE, ACDB_LINE, ACDB_POINT, ACDB_SPLINE, COLOR_BYLAYER, EntityCommon,
        EntityHandle, EntityKind, EntityRecord, LINETYPE_BYLAYER,
    };
    use cadai_core::geometry::{Point3, Vector3};
    use cadai_core::variable::VariableValue;
    use tracing::{debug, info};

    use crate::errors::AutomationError;
    use crate::session::{CadSession, Connector};

    const FIRST_HANDLE: u64 = 0x2A0;
    const DEFAULT_LAYER: &str = "0";

    /// 进程内离线绘图会话：实现完整的会话契约，但不依赖任何外部应用。
    /// 仅在显式选择 `offline` 后端（演示、测试）时使用。
    #[derive(Debug)]
    pub struct OfflineSession {
        prog_id: String,
        entities: Vec<EntityRecord>,
        next_handle: u64,
        current_layer: String,
        variables: BTreeMap<String, VariableValue>,
        command_log: Vec<String>,
    }

    impl OfflineSession {
        pub fn new(prog_id: impl Into<String>) -> Self {
            let mut variables = BTreeMap::new();
            variables.insert("LIMMIN".to_string(), VariableValue::Point(vec![0.0, 0.0]));
            variables.insert(
                "LIMMAX".to_string(),
                VariableValue::Point(vec![420.0, 297.0]),
            );
            variables.insert(
                "CLAYER".to_string(),
                VariableValue::Text(DEFAULT_LAYER.to_string()),
            );
            Self {
                prog_id: prog_id.into(),
                entities: Vec::new(),
                next_handle: FIRST_HANDLE,
                current_layer: DEFAULT_LAYER.to_string(),
                variables,
                command_log: Vec::new(),
            }
        }

        /// 切换后续实体所在图层。
        pub fn set_current_layer(&mut self, layer: impl Into<String>) {
            let layer = layer.into();
            self.variables
                .insert("CLAYER".to_string(), VariableValue::Text(layer.clone()));
            self.current_layer = layer;
        }

        pub fn set_variable(&mut self, name: impl Into<String>, value: VariableValue) {
            self.variables.insert(name.into(), value);
        }

        /// 直接插入一条实体记录，便于构造任意类型（含未知类型）的文档。
        pub fn insert_record(&mut self, object_name: &str, kind: EntityKind) -> EntityHandle {
            self.push(object_name, kind)
        }

        pub fn entities(&self) -> &[EntityRecord] {
            &self.entities
        }

        pub fn command_log(&self) -> &[String] {
            &self.command_log
        }

        fn push(&mut self, object_name: &str, kind: EntityKind) -> EntityHandle {
            let handle = EntityHandle::new(format!("{:X}", self.next_handle));
            self.next_handle += 1;
            self.entities.push(EntityRecord {
                common: EntityCommon {
                    handle: handle.clone(),
                    object_name: object_name.to_string(),
                    layer: self.current_layer.clone(),
                    color: COLOR_BYLAYER,
                    linetype: LINETYPE_BYLAYER.to_string(),
                },
                kind,
            });
            debug!(handle = %handle, object_name, "离线会话新增实体");
            handle
        }

        fn check_radius(operation: &'static str, radius: f64) -> Result<(), AutomationError> {
            if radius.is_finite() && radius > 0.0 {
                Ok(())
            } else {
                Err(AutomationError::CallFailed {
                    operation,
                    reason: format!("invalid radius {radius}"),
                })
            }
        }
    }

    impl CadSession for OfflineSession {
        fn add_line(&mut self, start: Point3, end: Point3) -> Result<EntityHandle, AutomationError> {
            let kind = EntityKind::Line {
                start,
                end,
                length: start.distance(end),
                angle: start.planar_angle_to(end),
            };
            Ok(self.push(ACDB_LINE, kind))
        }

        fn add_circle(
            &mut self,
            center: Point3,
            radius: f64,
        ) -> Result<EntityHandle, AutomationError> {
            Self::check_radius("AddCircle", radius)?;
            Ok(self.push(ACDB_CIRCLE, EntityKind::Circle { center, radius }))
        }

        fn add_point(&mut self, point: Point3) -> Result<EntityHandle, AutomationError> {
            Ok(self.push(ACDB_POINT, EntityKind::Point { position: point }))
        }

        fn add_arc(
            &mut self,
            center: Point3,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
        ) -> Result<EntityHandle, AutomationError> {
            Self::check_radius("AddArc", radius)?;
            let kind = EntityKind::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                start: center.polar(radius, start_angle),
                end: center.polar(radius, end_angle),
            };
            Ok(self.push(ACDB_ARC, kind))
        }

        fn add_spline(
            &mut self,
            fit_points: &[f64],
            start_tangent: Vector3,
            end_tangent: Vector3,
        ) -> Result<EntityHandle, AutomationError> {
            if fit_points.len() % 3 != 0 || fit_points.len() < 6 {
                return Err(AutomationError::CallFailed {
                    operation: "AddSpline",
                    reason: format!(
                        "expected at least two 3D fit points, got {} values",
                        fit_points.len()
                    ),
                });
            }
            debug!(
                start_tangent = ?start_tangent.to_array(),
                end_tangent = ?end_tangent.to_array(),
                "离线会话创建样条"
            );
            let points = fit_points
                .chunks_exact(3)
                .map(|c| Point3::new(c[0], c[1], c[2]))
                .collect();
            Ok(self.push(ACDB_SPLINE, EntityKind::Spline { fit_points: points }))
        }

        fn send_command(&mut self, command: &str) -> Result<(), AutomationError> {
            info!(prog_id = %self.prog_id, command = command.trim_end(), "离线会话接收原始命令");
            self.command_log.push(command.to_string());
            Ok(())
        }

        fn model_space(
            &self,
        ) -> Result<Vec<Result<EntityRecord, AutomationError>>, AutomationError> {
            Ok(self.entities.iter().cloned().map(Ok).collect())
        }

        fn get_variable(&self, name: &str) -> Result<VariableValue, AutomationError> {
            self.variables
                .get(&name.to_ascii_uppercase())
                .cloned()
                .ok_or_else(|| AutomationError::UnknownVariable(name.to_string()))
        }
    }

    /// 生成离线会话的连接器。可限定只响应部分应用标识，用于模拟版本回退。
    #[derive(Debug, Default)]
    pub struct OfflineConnector {
        accepted: Option<Vec<String>>,
        seed: RefCell<Option<OfflineSession>>,
    }

    impl OfflineConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn accepting<I, S>(prog_ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                accepted: Some(prog_ids.into_iter().map(Into::into).collect()),
                seed: RefCell::new(None),
            }
        }

        /// 下一次成功附加时交出预先准备好的会话，而非空白文档。
        pub fn with_session(self, session: OfflineSession) -> Self {
            *self.seed.borrow_mut() = Some(session);
            self
        }

        fn accepts(&self, prog_id: &str) -> bool {
            match &self.accepted {
                Some(ids) => ids.iter().any(|id| id == prog_id),
                None => true,
            }
        }
    }

    impl Connector for OfflineConnector {
        fn attach(&self, prog_id: &str) -> Result<Box<dyn CadSession>, AutomationError> {
            if !self.accepts(prog_id) {
                return Err(AutomationError::AttachFailed {
                    prog_id: prog_id.to_string(),
                    reason: "no running instance registered".to_string(),
                });
            }
            let session = self
                .seed
                .borrow_mut()
                .take()
                .unwrap_or_else(|| OfflineSession::new(prog_id));
            Ok(Box::new(session))
        }
    }

    /// 永远无法附加的连接器，所有绘图操作随之成为空操作。
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DisabledConnector;

    impl Connector for DisabledConnector {
        fn attach(&self, prog_id: &str) -> Result<Box<dyn CadSession>, AutomationError> {
            Err(AutomationError::AttachFailed {
                prog_id: prog_id.to_string(),
                reason: "automation disabled".to_string(),
            })
        }
    }

}
