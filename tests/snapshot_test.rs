use chrono::{TimeZone, Utc};
use sluice::models::{FieldValue, GroupId, Point};
use sluice::runtime::engine::stream_edge;
use sluice::runtime::task::{ExecutingTask, Task, TaskSnapshot, TaskType};
use sluice::services::{InMemoryTaskStore, Services, TaskStore};
use std::sync::Arc;
use std::time::Duration;

const SCRIPT: &str = "stream.from('cpu').window().period(10s).every(10s)\
    .alert().crit('value > 90').flapping().history(4).flapLow(0.25).flapHigh(0.5)";

fn point(seconds: i64, value: f64) -> Point {
    let mut p = Point {
        name: "cpu".to_string(),
        time: Utc.with_ymd_and_hms(2015, 10, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds),
        group: GroupId::nil(),
        tags: Default::default(),
        fields: Default::default(),
    };
    p.fields.insert("value".to_string(), FieldValue::Float(value));
    p
}

fn make_task(name: &str, interval: Duration) -> Task {
    let pipeline = sluice::dsl::parse_script(SCRIPT, TaskType::Stream).expect("parse failed");
    Task {
        name: name.to_string(),
        pipeline,
        task_type: TaskType::Stream,
        dbrps: Vec::new(),
        snapshot_interval: interval,
    }
}

#[tokio::test]
async fn test_snapshot_restore_round_trip() {
    // run a task far enough to accumulate window and flap state
    let mut et = ExecutingTask::new(
        Arc::new(Services::default()),
        make_task("round_trip", Duration::ZERO),
    )
    .expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");
    for i in 0..8 {
        let value = if i % 2 == 0 { 95.0 } else { 50.0 };
        tx.send_point(point(i, value)).await.expect("send failed");
    }
    drop(tx);
    et.wait().await;
    let first = et.snapshot().expect("snapshot failed");
    assert!(first.size() > 0, "stateful nodes must produce bytes");
    et.stop().await.expect("stop failed");

    // restoring the same topology and snapshotting again is bit-identical
    let mut restored = ExecutingTask::new(
        Arc::new(Services::default()),
        make_task("round_trip", Duration::ZERO),
    )
    .expect("link failed");
    let (tx, rx) = stream_edge();
    restored.start(vec![rx], Some(&first)).expect("start failed");
    let second = restored.snapshot().expect("snapshot failed");
    drop(tx);
    restored.stop().await.expect("stop failed");

    assert_eq!(
        first.node_snapshots.keys().collect::<Vec<_>>().len(),
        second.node_snapshots.len()
    );
    for (name, bytes) in &first.node_snapshots {
        assert_eq!(
            Some(bytes),
            second.node_snapshots.get(name),
            "state of {} must restore bit-identical",
            name
        );
    }
}

#[tokio::test]
async fn test_snapshot_with_missing_node_cold_starts() {
    let mut et = ExecutingTask::new(
        Arc::new(Services::default()),
        make_task("with_state", Duration::ZERO),
    )
    .expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");
    tx.send_point(point(0, 95.0)).await.expect("send failed");
    drop(tx);
    et.wait().await;
    let mut snapshot = et.snapshot().expect("snapshot failed");
    et.stop().await.expect("stop failed");

    // drop one node: the topology no longer matches and every node must
    // start cold
    let removed = snapshot
        .node_snapshots
        .remove("window2")
        .expect("window node present");
    assert!(!removed.is_empty());

    let mut cold = ExecutingTask::new(
        Arc::new(Services::default()),
        make_task("cold", Duration::ZERO),
    )
    .expect("link failed");
    let (tx, rx) = stream_edge();
    cold.start(vec![rx], Some(&snapshot)).expect("start failed");
    let after = cold.snapshot().expect("snapshot failed");
    drop(tx);
    cold.stop().await.expect("stop failed");

    // a cold window buffer serializes empty
    let fresh_window = after.node_snapshots.get("window2").expect("window node");
    let parsed: serde_json::Value = serde_json::from_slice(fresh_window).expect("valid json");
    assert_eq!(parsed["buffers"], serde_json::json!({}));
}

#[tokio::test]
async fn test_periodic_snapshotter_saves_to_store() {
    let store = Arc::new(InMemoryTaskStore::new());
    let services = Services {
        task_store: Some(store.clone() as Arc<dyn TaskStore>),
        ..Services::default()
    };
    let mut et = ExecutingTask::new(
        Arc::new(services),
        make_task("periodic", Duration::from_millis(20)),
    )
    .expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    // flap state always serializes non-empty, so a tick must save
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if store.get("periodic").is_some() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "snapshotter never saved"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let saved = store.get("periodic").expect("saved snapshot");
    assert!(saved.node_snapshots.contains_key("alert3"));

    // stop must await the snapshotter worker promptly
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), et.stop())
        .await
        .expect("stop timed out")
        .expect("stop failed");
}

#[tokio::test]
async fn test_no_snapshotter_without_interval() {
    let store = Arc::new(InMemoryTaskStore::new());
    let services = Services {
        task_store: Some(store.clone() as Arc<dyn TaskStore>),
        ..Services::default()
    };
    let mut et = ExecutingTask::new(Arc::new(services), make_task("manual", Duration::ZERO))
        .expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.get("manual").is_none(), "no periodic snapshots");
    drop(tx);
    et.stop().await.expect("stop failed");
}

#[test]
fn test_task_snapshot_serializes() {
    let mut snapshot = TaskSnapshot::default();
    snapshot
        .node_snapshots
        .insert("alert3".to_string(), vec![1, 2, 3]);
    let bytes = serde_json::to_vec(&snapshot).expect("serialize");
    let back: TaskSnapshot = serde_json::from_slice(&bytes).expect("deserialize");
    assert_eq!(back.node_snapshots.get("alert3"), Some(&vec![1, 2, 3]));
    assert_eq!(back.size(), 3);
}
