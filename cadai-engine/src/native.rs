//! 原生自动化桥。
//!
//! 平台无关部分负责把实体属性（按 ActiveX 属性名读取）转换为 [`EntityRecord`]；
//! Windows 上由 [`com`] 子模块通过 COM `IDispatch` 附加到正在运行的 AutoCAD。

#[cfg(windows)]
mod com;

use cadai_core::entity::{
    ACDB_ARC, ACDB_CIRCLE, ACDB_LINE, ACDB_MTEXT, ACDB_POINT, ACDB_POLYLINE, ACDB_SPLINE,
    ACDB_TEXT, COLOR_BYLAYER, EntityCommon, EntityHandle, EntityKind, EntityRecord,
    LINETYPE_BYLAYER,
};
use cadai_core::geometry::Point3;

use crate::errors::AutomationError;
use crate::session::Connector;

#[cfg(windows)]
pub use com::{ComConnector, ComSession};

/// 按属性名读取单个实体的属性。属性不存在或类型不符时返回 `None`。
pub trait EntityProperties {
    fn text(&self, name: &str) -> Option<String>;
    fn real(&self, name: &str) -> Option<f64>;
    fn integer(&self, name: &str) -> Option<i64>;
    fn reals(&self, name: &str) -> Option<Vec<f64>>;

    fn point(&self, name: &str) -> Option<Point3> {
        self.reals(name).and_then(|values| Point3::from_slice(&values))
    }
}

/// 读取实体的公共属性与几何数据。
///
/// 缺少句柄、类型名，或已知类型缺少必需几何属性时返回
/// [`AutomationError::EntityUnreadable`]；未识别的类型记为 [`EntityKind::Unknown`]。
pub fn read_entity(props: &dyn EntityProperties) -> Result<EntityRecord, AutomationError> {
    let handle = props
        .text("Handle")
        .ok_or_else(|| AutomationError::EntityUnreadable {
            handle: "?".to_string(),
            reason: "missing Handle".to_string(),
        })?;
    let object_name = props
        .text("ObjectName")
        .ok_or_else(|| AutomationError::EntityUnreadable {
            handle: handle.clone(),
            reason: "missing ObjectName".to_string(),
        })?;

    let kind = read_kind(&object_name, props).ok_or_else(|| AutomationError::EntityUnreadable {
        handle: handle.clone(),
        reason: format!("incomplete geometry for {object_name}"),
    })?;

    Ok(EntityRecord {
        common: EntityCommon {
            handle: EntityHandle::new(handle),
            layer: props.text("Layer").unwrap_or_else(|| "0".to_string()),
            color: props
                .integer("Color")
                .and_then(|color| i32::try_from(color).ok())
                .unwrap_or(COLOR_BYLAYER),
            linetype: props
                .text("Linetype")
                .unwrap_or_else(|| LINETYPE_BYLAYER.to_string()),
            object_name,
        },
        kind,
    })
}

fn read_kind(object_name: &str, props: &dyn EntityProperties) -> Option<EntityKind> {
    let kind = match object_name {
        ACDB_LINE => {
            let start = props.point("StartPoint")?;
            let end = props.point("EndPoint")?;
            EntityKind::Line {
                start,
                end,
                length: props.real("Length").unwrap_or_else(|| start.distance(end)),
                angle: props
                    .real("Angle")
                    .unwrap_or_else(|| start.planar_angle_to(end)),
            }
        }
        ACDB_CIRCLE => EntityKind::Circle {
            center: props.point("Center")?,
            radius: props.real("Radius")?,
        },
        ACDB_ARC => {
            let center = props.point("Center")?;
            let radius = props.real("Radius")?;
            let start_angle = props.real("StartAngle")?;
            let end_angle = props.real("EndAngle")?;
            EntityKind::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                start: props
                    .point("StartPoint")
                    .unwrap_or_else(|| center.polar(radius, start_angle)),
                end: props
                    .point("EndPoint")
                    .unwrap_or_else(|| center.polar(radius, end_angle)),
            }
        }
        ACDB_POINT => EntityKind::Point {
            position: props.point("Coordinates")?,
        },
        ACDB_SPLINE => {
            let values = props
                .reals("FitPoints")
                .filter(|values| !values.is_empty())
                .or_else(|| props.reals("ControlPoints"))?;
            EntityKind::Spline {
                fit_points: values
                    .chunks_exact(3)
                    .map(|c| Point3::new(c[0], c[1], c[2]))
                    .collect(),
            }
        }
        ACDB_TEXT | ACDB_MTEXT => EntityKind::Text {
            insertion: props.point("InsertionPoint")?,
            content: props.text("TextString").unwrap_or_default(),
        },
        ACDB_POLYLINE => EntityKind::Polyline {
            coordinates: props.reals("Coordinates")?,
        },
        _ => EntityKind::Unknown,
    };
    Some(kind)
}

/// 当前平台的原生连接器。非 Windows 平台上永远无法附加。
pub fn native_connector() -> Box<dyn Connector> {
    #[cfg(windows)]
    {
        Box::new(ComConnector::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(UnavailableConnector)
    }
}

#[cfg(not(windows))]
#[derive(Debug, Default, Clone, Copy)]
struct UnavailableConnector;

#[cfg(not(windows))]
impl Connector for UnavailableConnector {
    fn attach(
        &self,
        prog_id: &str,
    ) -> Result<Box<dyn crate::session::CadSession>, AutomationError> {
        Err(AutomationError::AttachFailed {
            prog_id: prog_id.to_string(),
            reason: "native automation requires Windows COM".to_string(),
        })
    }
}
