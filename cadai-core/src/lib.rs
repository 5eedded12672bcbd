pub mod geometry {
    use glam::DVec3;
    use serde::{Deserialize, Serialize};

    /// 三维点，内部以 `glam::DVec3` 表示。序列化为 `[x, y, z]`，与自动化接口的坐标数组一致。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        /// 从数值切片构造点：接受三个分量，或两个分量（z 补 0）。其余长度返回 `None`。
        pub fn from_slice(values: &[f64]) -> Option<Self> {
            match *values {
                [x, y] => Some(Self::new(x, y, 0.0)),
                [x, y, z] => Some(Self::new(x, y, z)),
                _ => None,
            }
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn to_array(self) -> [f64; 3] {
            self.0.to_array()
        }

        #[inline]
        pub fn distance(self, other: Point3) -> f64 {
            self.0.distance(other.0)
        }

        /// 平面内由当前点指向 `other` 的角度，范围 `[0, 2π)`。
        pub fn planar_angle_to(self, other: Point3) -> f64 {
            let delta = other.0 - self.0;
            normalize_angle(delta.y.atan2(delta.x))
        }

        /// 以当前点为圆心，沿平面角度 `angle` 偏移 `radius`。
        pub fn polar(self, radius: f64, angle: f64) -> Point3 {
            Point3::new(
                self.x() + radius * angle.cos(),
                self.y() + radius * angle.sin(),
                self.z(),
            )
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 三维向量，目前用于样条端点切向。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        pub const ZERO: Vector3 = Vector3(DVec3::ZERO);

        #[inline]
        pub fn to_array(self) -> [f64; 3] {
            self.0.to_array()
        }
    }

    /// 将点序列展开为连续的数值序列 `[x0, y0, z0, x1, ...]`。
    pub fn flatten_points(points: &[Point3]) -> Vec<f64> {
        points.iter().flat_map(|point| point.to_array()).collect()
    }

    pub fn normalize_angle(angle: f64) -> f64 {
        let mut result = angle % std::f64::consts::TAU;
        if result < 0.0 {
            result += std::f64::consts::TAU;
        }
        result
    }
}

pub mod entity {
    use std::fmt;

    use serde::{Deserialize, Serialize};

    use crate::geometry::Point3;

    pub const ACDB_LINE: &str = "AcDbLine";
    pub const ACDB_CIRCLE: &str = "AcDbCircle";
    pub const ACDB_ARC: &str = "AcDbArc";
    pub const ACDB_POINT: &str = "AcDbPoint";
    pub const ACDB_SPLINE: &str = "AcDbSpline";
    pub const ACDB_TEXT: &str = "AcDbText";
    pub const ACDB_MTEXT: &str = "AcDbMText";
    pub const ACDB_POLYLINE: &str = "AcDbPolyline";

    /// ACI 颜色 256 表示随层（ByLayer）。
    pub const COLOR_BYLAYER: i32 = 256;
    pub const LINETYPE_BYLAYER: &str = "ByLayer";

    /// 实体句柄，即 CAD 文档内的十六进制标识字符串。
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EntityHandle(String);

    impl EntityHandle {
        pub fn new(raw: impl Into<String>) -> Self {
            Self(raw.into())
        }

        #[inline]
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for EntityHandle {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// 所有实体共有的属性。
    #[derive(Debug, Clone, PartialEq)]
    pub struct EntityCommon {
        pub handle: EntityHandle,
        pub object_name: String,
        pub layer: String,
        pub color: i32,
        pub linetype: String,
    }

    /// 按实体种类区分的几何数据。角度单位为弧度。
    #[derive(Debug, Clone, PartialEq)]
    pub enum EntityKind {
        Line {
            start: Point3,
            end: Point3,
            length: f64,
            angle: f64,
        },
        Circle {
            center: Point3,
            radius: f64,
        },
        Arc {
            center: Point3,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
            start: Point3,
            end: Point3,
        },
        Point {
            position: Point3,
        },
        Spline {
            fit_points: Vec<Point3>,
        },
        Text {
            insertion: Point3,
            content: String,
        },
        /// 轻量多段线，坐标为 `[x0, y0, x1, y1, ...]`。
        Polyline {
            coordinates: Vec<f64>,
        },
        Unknown,
    }

    impl EntityKind {
        pub fn start_end(&self) -> Option<(Point3, Point3)> {
            match self {
                EntityKind::Line { start, end, .. } | EntityKind::Arc { start, end, .. } => {
                    Some((*start, *end))
                }
                _ => None,
            }
        }

        pub fn center(&self) -> Option<Point3> {
            match self {
                EntityKind::Circle { center, .. } | EntityKind::Arc { center, .. } => {
                    Some(*center)
                }
                _ => None,
            }
        }

        pub fn insertion(&self) -> Option<Point3> {
            match self {
                EntityKind::Text { insertion, .. } => Some(*insertion),
                _ => None,
            }
        }

        pub fn coordinate_list(&self) -> Option<Vec<f64>> {
            match self {
                EntityKind::Point { position } => Some(position.to_array().to_vec()),
                EntityKind::Spline { fit_points } => {
                    Some(crate::geometry::flatten_points(fit_points))
                }
                EntityKind::Polyline { coordinates } => Some(coordinates.clone()),
                _ => None,
            }
        }
    }

    /// 实体快照：公共属性 + 种类相关数据。
    #[derive(Debug, Clone, PartialEq)]
    pub struct EntityRecord {
        pub common: EntityCommon,
        pub kind: EntityKind,
    }

    impl EntityRecord {
        #[inline]
        pub fn handle(&self) -> &EntityHandle {
            &self.common.handle
        }

        #[inline]
        pub fn object_name(&self) -> &str {
            &self.common.object_name
        }

        #[inline]
        pub fn layer(&self) -> &str {
            &self.common.layer
        }
    }

    /// 序列化后的坐标载荷，至多填充一组字段；无可用坐标时序列化为 `{}`。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Coordinates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub start: Option<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub end: Option<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub center: Option<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub insertion: Option<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub coordinates: Option<Vec<f64>>,
    }

    impl Coordinates {
        pub fn is_empty(&self) -> bool {
            *self == Coordinates::default()
        }
    }

    /// 依次探测起止点、圆心、插入点、坐标列表，返回第一个可用的坐标形式。
    pub fn extract_coordinates(kind: &EntityKind) -> Coordinates {
        if let Some((start, end)) = kind.start_end() {
            return Coordinates {
                start: Some(start.to_array()),
                end: Some(end.to_array()),
                ..Coordinates::default()
            };
        }
        if let Some(center) = kind.center() {
            return Coordinates {
                center: Some(center.to_array()),
                ..Coordinates::default()
            };
        }
        if let Some(insertion) = kind.insertion() {
            return Coordinates {
                insertion: Some(insertion.to_array()),
                ..Coordinates::default()
            };
        }
        if let Some(coordinates) = kind.coordinate_list() {
            return Coordinates {
                coordinates: Some(coordinates),
                ..Coordinates::default()
            };
        }
        Coordinates::default()
    }
}

pub mod variable {
    use serde::{Deserialize, Serialize};

    /// 文档系统变量的值（如 `LIMMIN`、`LIMMAX`）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum VariableValue {
        Integer(i64),
        Real(f64),
        Text(String),
        Point(Vec<f64>),
    }

    impl VariableValue {
        /// 取前两个分量作为平面点。
        pub fn as_point2(&self) -> Option<[f64; 2]> {
            match self {
                VariableValue::Point(values) if values.len() >= 2 => Some([values[0], values[1]]),
                _ => None,
            }
        }
    }
}

pub mod cache {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serialize};

    use crate::entity::{Coordinates, EntityKind, EntityRecord, extract_coordinates};

    /// 缓存文件中的单个实体记录，字段布局保持扁平，种类相关字段按需出现。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct CachedEntity {
        pub handle: String,
        pub object_name: String,
        pub layer: String,
        pub color: i32,
        pub linetype: String,
        #[serde(default)]
        pub coordinates: Coordinates,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub length: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub angle: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub radius: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub center: Option<[f64; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub start_angle: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub end_angle: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub text: Option<String>,
    }

    impl From<&EntityRecord> for CachedEntity {
        fn from(record: &EntityRecord) -> Self {
            let common = &record.common;
            let mut cached = CachedEntity {
                handle: common.handle.as_str().to_string(),
                object_name: common.object_name.clone(),
                layer: common.layer.clone(),
                color: common.color,
                linetype: common.linetype.clone(),
                coordinates: extract_coordinates(&record.kind),
                length: None,
                angle: None,
                radius: None,
                center: None,
                start_angle: None,
                end_angle: None,
                text: None,
            };
            match &record.kind {
                EntityKind::Line { length, angle, .. } => {
                    cached.length = Some(*length);
                    cached.angle = Some(*angle);
                }
                EntityKind::Circle { center, radius } => {
                    cached.radius = Some(*radius);
                    cached.center = Some(center.to_array());
                }
                EntityKind::Arc {
                    radius,
                    start_angle,
                    end_angle,
                    ..
                } => {
                    cached.radius = Some(*radius);
                    cached.start_angle = Some(*start_angle);
                    cached.end_angle = Some(*end_angle);
                }
                EntityKind::Text { content, .. } => {
                    cached.text = Some(content.clone());
                }
                _ => {}
            }
            cached
        }
    }

    /// 图形界限（`LIMMIN` / `LIMMAX`）。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct DrawingBounds {
        pub min: [f64; 2],
        pub max: [f64; 2],
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Summary {
        #[serde(default)]
        pub total_entities: usize,
        #[serde(default)]
        pub by_type: BTreeMap<String, usize>,
        #[serde(default)]
        pub by_layer: BTreeMap<String, usize>,
        #[serde(default)]
        pub bounds: Option<DrawingBounds>,
    }

    impl Summary {
        /// 纯聚合：统计总数、按类型与按图层计数，界限由调用方提供。
        pub fn from_entities(entities: &[CachedEntity], bounds: Option<DrawingBounds>) -> Self {
            let mut summary = Summary {
                total_entities: entities.len(),
                bounds,
                ..Summary::default()
            };
            for entity in entities {
                *summary
                    .by_type
                    .entry(entity.object_name.clone())
                    .or_insert(0) += 1;
                *summary.by_layer.entry(entity.layer.clone()).or_insert(0) += 1;
            }
            summary
        }
    }

    /// 解析缓存时间戳：RFC 3339，或不带时区的 ISO 8601 本地时间（如 `2024-05-01T12:30:45.123456`）。
    pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        if let Ok(time) = DateTime::parse_from_rfc3339(text) {
            return Ok(time.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")?;
        Ok(match Local.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => naive.and_utc(),
        })
    }

    fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|text| parse_timestamp(&text).map_err(serde::de::Error::custom))
            .transpose()
    }

    /// 持久化的图纸快照。每次刷新整体覆盖。
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct CacheDocument {
        #[serde(default, deserialize_with = "deserialize_timestamp")]
        pub last_update: Option<DateTime<Utc>>,
        #[serde(default)]
        pub entities: Vec<CachedEntity>,
        #[serde(default)]
        pub summary: Summary,
    }
}
