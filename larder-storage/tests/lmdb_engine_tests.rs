//! Engine over a real LMDB environment.

use larder_test_utils::fixtures::{lmdb_engine, temp_dir};
use larder_test_utils::{drain_events, EventRecorder, StoreEvent};
use serde_json::json;

#[tokio::test]
async fn test_durable_value_survives_restart() {
    let dir = temp_dir();
    {
        let engine = lmdb_engine(&dir, 1, &["user"]);
        engine.write("user.profile.name", json!("Ann")).await.unwrap();
        engine.write("session", json!("volatile")).await.unwrap();
    }

    let engine = lmdb_engine(&dir, 1, &["user"]);
    assert_eq!(
        engine.read("user").await.unwrap(),
        Some(json!({"profile": {"name": "Ann"}}))
    );
    assert_eq!(engine.read("session").await.unwrap(), None);
}

#[tokio::test]
async fn test_schema_bump_recreates_collection() {
    let dir = temp_dir();
    {
        let engine = lmdb_engine(&dir, 1, &["user"]);
        engine.write("user", json!(1)).await.unwrap();
    }

    let engine = lmdb_engine(&dir, 2, &["user"]);
    assert_eq!(engine.read("user").await.unwrap(), None);
    engine.write("user", json!(2)).await.unwrap();
    assert_eq!(engine.read("user").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_clear_removes_durable_record() {
    let dir = temp_dir();
    let engine = lmdb_engine(&dir, 1, &["todos"]);
    let recorder = EventRecorder::attach(&engine, "todos").unwrap();

    engine.add("todos", json!("a")).await.unwrap();
    engine.add("todos", json!("b")).await.unwrap();
    assert_eq!(engine.read("todos").await.unwrap(), Some(json!(["a", "b"])));

    engine.clear("todos").await.unwrap();
    assert_eq!(engine.read("todos").await.unwrap(), None);
    assert_eq!(recorder.len(), 3);
}

#[tokio::test]
async fn test_init_announced_on_first_connect() {
    let dir = temp_dir();
    let engine = lmdb_engine(&dir, 1, &["user"]);
    let mut rx = engine.events();

    engine.write("session", json!(1)).await.unwrap();
    assert!(drain_events(&mut rx)
        .iter()
        .all(|e| !matches!(e, StoreEvent::Init)));

    engine.write("user", json!(1)).await.unwrap();
    let events = drain_events(&mut rx);
    assert_eq!(events.first(), Some(&StoreEvent::Init));
}
