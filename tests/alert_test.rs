use chrono::{TimeZone, Utc};
use sluice::models::{FieldValue, GroupId, Point};
use sluice::nodes::alert::{AlertLevel, FlapState};
use sluice::runtime::engine::stream_edge;
use sluice::runtime::task::{ExecutingTask, Task, TaskType};
use sluice::services::Services;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Minimal HTTP sink: accepts POSTs, replies 200 and forwards each JSON
/// body to the returned channel.
async fn alert_sink() -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let body = loop {
                    let n = match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                        continue;
                    };
                    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                    let length: usize = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(0);
                    if buf.len() >= header_end + 4 + length {
                        break buf[header_end + 4..header_end + 4 + length].to_vec();
                    }
                };
                if let Ok(value) = serde_json::from_slice(&body) {
                    let _ = tx.send(value);
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            });
        }
    });
    (format!("http://{}/alert", addr), rx)
}

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

fn alert_task(name: &str, script: &str) -> ExecutingTask {
    let pipeline = sluice::dsl::parse_script(script, TaskType::Stream).expect("parse failed");
    let task = Task {
        name: name.to_string(),
        pipeline,
        task_type: TaskType::Stream,
        dbrps: Vec::new(),
        snapshot_interval: Duration::ZERO,
    };
    ExecutingTask::new(Arc::new(Services::default()), task).expect("link failed")
}

async fn recv_alert(rx: &mut mpsc::UnboundedReceiver<serde_json::Value>) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for alert")
        .expect("alert channel closed")
}

#[tokio::test]
async fn test_stream_alert_critical_dispatch() {
    let (url, mut alerts) = alert_sink().await;
    let script = format!("stream.from().alert().crit('value > 90').post('{}')", url);
    let mut et = alert_task("crit", &script);
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    tx.send_point(point(0, 95.0)).await.expect("send failed");
    tx.send_point(point(1, 50.0)).await.expect("send failed");
    drop(tx);
    et.wait().await;

    let payload = recv_alert(&mut alerts).await;
    assert_eq!(payload["level"], "CRITICAL");
    assert_eq!(payload["data"]["series"][0]["values"][0][1], 95.0);
    // the 50.0 point is below the threshold: exactly one dispatch
    assert!(alerts.try_recv().is_err(), "no second alert expected");
}

#[tokio::test]
async fn test_alert_highest_passing_level_wins() {
    let (url, mut alerts) = alert_sink().await;
    let script = format!(
        "stream.from().alert().info('value > 1').warn('value > 5').crit('value > 9').post('{}')",
        url
    );
    let mut et = alert_task("levels", &script);
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    tx.send_point(point(0, 7.0)).await.expect("send failed");
    drop(tx);
    et.wait().await;

    let payload = recv_alert(&mut alerts).await;
    assert_eq!(payload["level"], "WARNING");
}

#[tokio::test]
async fn test_alert_predicate_error_keeps_accumulated_level() {
    let (url, mut alerts) = alert_sink().await;
    // info passes, crit references a missing field and errors out: the
    // accumulated level (INFO) is dispatched
    let script = format!(
        "stream.from().alert().info('value > 1').crit('missing > 1').post('{}')",
        url
    );
    let mut et = alert_task("err_level", &script);
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    tx.send_point(point(0, 7.0)).await.expect("send failed");
    drop(tx);
    et.wait().await;

    let payload = recv_alert(&mut alerts).await;
    assert_eq!(payload["level"], "INFO");
}

#[tokio::test]
async fn test_batch_alert_dispatches_whole_batch_once() {
    let (url, mut alerts) = alert_sink().await;
    // window makes batches of 5 points; the first point over the
    // threshold triggers one dispatch carrying the entire batch
    let script = format!(
        "stream.from().window().period(10s).every(10s).alert().crit('value > 3').post('{}')",
        url
    );
    let mut et = alert_task("batchy", &script);
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    for i in 0..=5 {
        tx.send_point(point(i * 2, i as f64)).await.expect("send failed");
    }
    drop(tx);
    et.wait().await;

    let payload = recv_alert(&mut alerts).await;
    assert_eq!(payload["level"], "CRITICAL");
    let values = payload["data"]["series"][0]["values"]
        .as_array()
        .expect("values array");
    assert_eq!(values.len(), 5, "payload carries the whole batch");
    assert!(alerts.try_recv().is_err(), "one dispatch per batch");
}

#[tokio::test]
async fn test_flapping_suppresses_dispatch() {
    let (url, mut alerts) = alert_sink().await;
    let script = format!(
        "stream.from().alert().crit('value > 90')\
         .flapping().history(3).flapLow(0.25).flapHigh(0.5).post('{}')",
        url
    );
    let mut et = alert_task("flappy", &script);
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    // rapid oscillation: the first critical point dispatches, then the
    // level starts flapping and later criticals are dropped
    for (i, v) in [95.0, 50.0, 95.0, 50.0, 95.0].iter().enumerate() {
        tx.send_point(point(i as i64, *v)).await.expect("send failed");
    }
    drop(tx);
    et.wait().await;

    recv_alert(&mut alerts).await;
    assert!(
        alerts.try_recv().is_err(),
        "flapping must suppress later dispatches"
    );
}

#[test]
fn test_alert_config_rejected() {
    // history below 2
    let err = {
        let pipeline = sluice::dsl::parse_script(
            "stream.from().alert().crit('value > 1').flapping().history(1)",
            TaskType::Stream,
        )
        .expect("parse failed");
        let task = Task {
            name: "bad_history".to_string(),
            pipeline,
            task_type: TaskType::Stream,
            dbrps: Vec::new(),
            snapshot_interval: Duration::ZERO,
        };
        ExecutingTask::new(Arc::new(Services::default()), task)
            .err()
            .expect("history < 2 must be rejected")
    };
    assert!(err.to_string().contains("history"));

    // thresholds outside [0, 1]
    let pipeline = sluice::dsl::parse_script(
        "stream.from().alert().crit('value > 1').flapping().flapHigh(1.5)",
        TaskType::Stream,
    )
    .expect("parse failed");
    let task = Task {
        name: "bad_thresholds".to_string(),
        pipeline,
        task_type: TaskType::Stream,
        dbrps: Vec::new(),
        snapshot_interval: Duration::ZERO,
    };
    let err = ExecutingTask::new(Arc::new(Services::default()), task)
        .err()
        .expect("thresholds must be rejected");
    assert!(err.to_string().contains("between 0 and 1"));
}

#[test]
fn test_flap_detection_scenario() {
    // history 4, thresholds low 0.25 high 0.5
    let mut flap = FlapState::new(4);
    let mut p = 0.0;
    for level in [
        AlertLevel::NoAlert,
        AlertLevel::Critical,
        AlertLevel::NoAlert,
        AlertLevel::Critical,
    ] {
        p = flap.update(level, 0.25, 0.5);
    }
    assert!(flap.flapping, "oscillation must start flapping");
    assert!((p - 1.0).abs() < 0.1, "score near 1.0, got {}", p);

    // steady NoAlert input drives the score below low and clears the flag
    for _ in 0..4 {
        p = flap.update(AlertLevel::NoAlert, 0.25, 0.5);
    }
    assert!(!flap.flapping, "steady input must clear flapping, p={}", p);
    assert!(p < 0.25);
}

#[test]
fn test_flap_score_monotonic_in_changes() {
    // for a fixed history, a differing level never scores below the
    // same-level alternative on that tick
    let histories = [
        vec![AlertLevel::NoAlert, AlertLevel::Critical, AlertLevel::NoAlert],
        vec![AlertLevel::Warning; 5],
        vec![
            AlertLevel::Info,
            AlertLevel::Info,
            AlertLevel::Critical,
            AlertLevel::NoAlert,
        ],
    ];
    for history in histories {
        let mut base = FlapState::new(history.len().max(2));
        for level in &history {
            base.update(*level, 0.0, 1.0);
        }
        let last = *history.last().expect("non-empty");
        let mut same = base.clone();
        let mut diff = base.clone();
        let p_same = same.update(last, 0.0, 1.0);
        let p_diff = diff.update(AlertLevel::Critical.max(last), 0.0, 1.0);
        assert!(
            p_diff >= p_same,
            "history {:?}: p_diff {} < p_same {}",
            history,
            p_diff,
            p_same
        );
    }
}
