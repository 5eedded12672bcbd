use std::cell::Cell;

use cadai_core::cache::DrawingBounds;
use cadai_core::entity::{
    ACDB_ARC, ACDB_CIRCLE, ACDB_LINE, COLOR_BYLAYER, EntityCommon, EntityHandle, EntityKind,
    EntityRecord, LINETYPE_BYLAYER,
};
use cadai_core::geometry::{Point3, Vector3};
use cadai_core::variable::VariableValue;
use cadai_engine::client::AutomationClient;
use cadai_engine::errors::AutomationError;
use cadai_engine::offline::{OfflineConnector, OfflineSession};
use cadai_engine::session::{CadSession, Connector};
use cadai_io::{DrawingCache, load_cache};
use serde_json::Value;

fn connect_with(session: OfflineSession) -> AutomationClient {
    let mut client = AutomationClient::new(["AutoCAD.Application"]);
    assert!(client.connect(&OfflineConnector::new().with_session(session)));
    client
}

fn populated_session(count: usize) -> OfflineSession {
    let mut session = OfflineSession::new("AutoCAD.Application");
    for i in 0..count {
        let offset = i as f64;
        match i % 3 {
            0 => {
                session
                    .add_line(
                        Point3::new(offset, 0.0, 0.0),
                        Point3::new(offset + 10.0, 10.0, 0.0),
                    )
                    .unwrap();
            }
            1 => {
                session.set_current_layer("GEOM");
                session
                    .add_circle(Point3::new(offset, 5.0, 0.0), 2.5)
                    .unwrap();
            }
            _ => {
                session.set_current_layer("ANNOT");
                session
                    .add_arc(Point3::new(0.0, offset, 0.0), 1.5, 0.0, 1.0)
                    .unwrap();
            }
        }
    }
    session
}

#[test]
fn load_after_update_round_trips_for_various_sizes() {
    for count in [0usize, 1, 7] {
        let client = connect_with(populated_session(count));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawing_cache.json");

        let mut cache = DrawingCache::with_path(&client, &path);
        let written = cache.update_cache().expect("update cache").clone();
        assert_eq!(written.entities.len(), count);
        assert_eq!(written.summary.total_entities, count);

        let loaded = load_cache(&path).expect("load cache");
        assert_eq!(loaded, written, "round trip mismatch for {count} entities");
    }
}

#[test]
fn cache_file_uses_flat_record_layout() {
    let client = connect_with(populated_session(3));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drawing_cache.json");
    DrawingCache::with_path(&client, &path)
        .update_cache()
        .expect("update cache");

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\n  \"entities\""), "expected indented JSON");
    let json: Value = serde_json::from_str(&raw).unwrap();

    let line = &json["entities"][0];
    assert_eq!(line["object_name"], ACDB_LINE);
    assert_eq!(line["layer"], "0");
    assert_eq!(line["color"], COLOR_BYLAYER);
    assert!(line["coordinates"]["start"].is_array());
    assert!(line["length"].is_number());

    let circle = &json["entities"][1];
    assert_eq!(circle["object_name"], ACDB_CIRCLE);
    assert!(circle["coordinates"]["center"].is_array());
    assert_eq!(circle["radius"], 2.5);

    let arc = &json["entities"][2];
    assert_eq!(arc["object_name"], ACDB_ARC);
    assert!(arc["coordinates"]["start"].is_array());
    assert!(arc["coordinates"].get("center").is_none());
    assert!(arc["start_angle"].is_number());

    assert_eq!(json["summary"]["by_layer"]["GEOM"], 1);
    assert_eq!(json["summary"]["by_type"][ACDB_LINE], 1);
    assert_eq!(json["summary"]["bounds"]["max"], serde_json::json!([420.0, 297.0]));
}

#[test]
fn update_replaces_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drawing_cache.json");

    let big = connect_with(populated_session(5));
    DrawingCache::with_path(&big, &path)
        .update_cache()
        .unwrap();

    let small = connect_with(populated_session(1));
    DrawingCache::with_path(&small, &path)
        .update_cache()
        .unwrap();

    let loaded = load_cache(&path).unwrap();
    assert_eq!(loaded.entities.len(), 1);
    assert_eq!(loaded.summary.total_entities, 1);
}

#[test]
fn unreadable_limits_degrade_to_null_bounds() {
    let mut session = populated_session(2);
    session.set_variable("LIMMAX", VariableValue::Text("corrupt".to_string()));
    let client = connect_with(session);

    let cache = DrawingCache::new(&client);
    let entities = cache.collect_all_entities();
    let summary = cache.generate_summary(&entities);
    assert_eq!(summary.total_entities, 2);
    assert!(summary.bounds.is_none());
}

#[test]
fn empty_document_summary_keeps_bounds() {
    let client = connect_with(OfflineSession::new("AutoCAD.Application"));
    let cache = DrawingCache::new(&client);
    let summary = cache.generate_summary(&[]);
    assert_eq!(summary.total_entities, 0);
    assert!(summary.by_type.is_empty());
    assert!(summary.by_layer.is_empty());
    assert_eq!(
        summary.bounds,
        Some(DrawingBounds {
            min: [0.0, 0.0],
            max: [420.0, 297.0],
        })
    );
}

/// 第二个实体读取失败的模型空间。
struct FlakySession {
    reads: Cell<usize>,
}

impl CadSession for FlakySession {
    fn add_line(&mut self, _: Point3, _: Point3) -> Result<EntityHandle, AutomationError> {
        unreachable!()
    }

    fn add_circle(&mut self, _: Point3, _: f64) -> Result<EntityHandle, AutomationError> {
        unreachable!()
    }

    fn add_point(&mut self, _: Point3) -> Result<EntityHandle, AutomationError> {
        unreachable!()
    }

    fn add_arc(&mut self, _: Point3, _: f64, _: f64, _: f64) -> Result<EntityHandle, AutomationError> {
        unreachable!()
    }

    fn add_spline(
        &mut self,
        _: &[f64],
        _: Vector3,
        _: Vector3,
    ) -> Result<EntityHandle, AutomationError> {
        unreachable!()
    }

    fn send_command(&mut self, _: &str) -> Result<(), AutomationError> {
        Ok(())
    }

    fn model_space(&self) -> Result<Vec<Result<EntityRecord, AutomationError>>, AutomationError> {
        self.reads.set(self.reads.get() + 1);
        let record = |handle: &str, object_name: &str| EntityRecord {
            common: EntityCommon {
                handle: EntityHandle::new(handle),
                object_name: object_name.to_string(),
                layer: "0".to_string(),
                color: COLOR_BYLAYER,
                linetype: LINETYPE_BYLAYER.to_string(),
            },
            kind: EntityKind::Unknown,
        };
        Ok(vec![
            Ok(record("A1", "AcDbHatch")),
            Err(AutomationError::EntityUnreadable {
                handle: "A2".to_string(),
                reason: "proxy object".to_string(),
            }),
            Ok(record("A3", "AcDbMText")),
        ])
    }

    fn get_variable(&self, name: &str) -> Result<VariableValue, AutomationError> {
        Err(AutomationError::UnknownVariable(name.to_string()))
    }
}

struct FlakyConnector;

impl Connector for FlakyConnector {
    fn attach(&self, _: &str) -> Result<Box<dyn CadSession>, AutomationError> {
        Ok(Box::new(FlakySession {
            reads: Cell::new(0),
        }))
    }
}

#[test]
fn unreadable_entity_is_skipped_not_fatal() {
    let mut client = AutomationClient::new(["AutoCAD.Application"]);
    assert!(client.connect(&FlakyConnector));

    let cache = DrawingCache::new(&client);
    let entities = cache.collect_all_entities();
    let handles: Vec<&str> = entities.iter().map(|e| e.handle.as_str()).collect();
    assert_eq!(handles, vec!["A1", "A3"]);
    assert!(entities[0].coordinates.is_empty());

    let summary = cache.generate_summary(&entities);
    assert_eq!(summary.total_entities, 2);
    assert!(summary.bounds.is_none());
}

#[test]
fn cache_with_offsetless_timestamp_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drawing_cache.json");
    std::fs::write(
        &path,
        r#"{
  "last_update": "2025-02-14T09:15:02.481516",
  "entities": [
    {
      "handle": "2F1",
      "object_name": "AcDbCircle",
      "layer": "0",
      "color": 256,
      "linetype": "ByLayer",
      "coordinates": {"center": [5.0, 5.0, 0.0]},
      "radius": 2.5,
      "center": [5.0, 5.0, 0.0]
    }
  ],
  "summary": {
    "total_entities": 1,
    "by_type": {"AcDbCircle": 1},
    "by_layer": {"0": 1},
    "bounds": {"min": [0.0, 0.0], "max": [420.0, 297.0]}
  }
}"#,
    )
    .unwrap();

    let document = load_cache(&path).expect("offsetless timestamp is accepted");
    assert!(document.last_update.is_some());
    assert_eq!(document.entities.len(), 1);
    assert_eq!(document.entities[0].radius, Some(2.5));
    assert_eq!(document.summary.by_type.get(ACDB_CIRCLE), Some(&1));
}
