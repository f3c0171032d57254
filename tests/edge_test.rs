use chrono::{TimeZone, Utc};
use sluice::models::{FieldValue, GroupId, Point};
use sluice::pipeline::EdgeType;
use sluice::runtime::edge::{edge, Message};
use std::time::Duration;

fn point(value: f64) -> Point {
    let mut p = Point {
        name: "cpu".to_string(),
        time: Utc.with_ymd_and_hms(2015, 10, 1, 0, 0, 0).unwrap(),
        group: GroupId::nil(),
        tags: Default::default(),
        fields: Default::default(),
    };
    p.fields.insert("value".to_string(), FieldValue::Float(value));
    p
}

#[tokio::test]
async fn test_edge_is_fifo() {
    let (tx, mut rx) = edge(EdgeType::Stream, "test");
    for i in 0..100 {
        tx.send_point(point(i as f64)).await.expect("send failed");
    }
    for i in 0..100 {
        let p = rx.next_point().await.expect("recv failed");
        assert_eq!(
            p.fields.get("value"),
            Some(&FieldValue::Float(i as f64)),
            "payload {} out of order",
            i
        );
    }
}

#[tokio::test]
async fn test_edge_eof_after_close_and_drain() {
    let (tx, mut rx) = edge(EdgeType::Stream, "test");
    tx.send_point(point(1.0)).await.expect("send failed");
    tx.send_point(point(2.0)).await.expect("send failed");
    drop(tx);
    // buffered payloads still arrive after close
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_none());
    // EOF is sticky
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_edge_rejects_wrong_payload_type() {
    let (tx, _rx) = edge(EdgeType::Batch, "test");
    let err = tx
        .send(Message::Point(point(1.0)))
        .await
        .expect_err("point over a batch edge should fail");
    assert!(err.to_string().contains("batch"));
}

#[tokio::test]
async fn test_edge_send_fails_when_receiver_gone() {
    let (tx, rx) = edge(EdgeType::Stream, "test");
    drop(rx);
    assert!(tx.send_point(point(1.0)).await.is_err());
}

#[tokio::test]
async fn test_edge_write_blocks_when_full() {
    let (tx, mut rx) = edge(EdgeType::Stream, "test");
    // fill the buffer to capacity
    for i in 0..sluice::runtime::edge::EDGE_BUFFER_SIZE {
        tx.send_point(point(i as f64)).await.expect("send failed");
    }
    // the next write must block until the consumer drains
    let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send_point(point(-1.0)));
    assert!(blocked.await.is_err(), "write into a full edge must block");
    rx.next_point().await.expect("drain failed");
    tokio::time::timeout(Duration::from_secs(1), tx.send_point(point(-1.0)))
        .await
        .expect("write should proceed after a drain")
        .expect("send failed");
}
