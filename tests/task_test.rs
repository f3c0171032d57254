use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sluice::errors::EngineError;
use sluice::models::{Batch, FieldValue, GroupId, Point};
use sluice::runtime::edge::Message;
use sluice::runtime::engine::{stream_edge, Engine};
use sluice::runtime::task::{Dbrp, ExecutingTask, Task, TaskType};
use sluice::services::{QueryService, Services, UdfHandler};
use std::sync::Arc;
use std::time::Duration;

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

fn stream_task(name: &str, script: &str) -> Task {
    let pipeline = sluice::dsl::parse_script(script, TaskType::Stream).expect("parse failed");
    Task {
        name: name.to_string(),
        pipeline,
        task_type: TaskType::Stream,
        dbrps: Vec::new(),
        snapshot_interval: Duration::ZERO,
    }
}

struct EmptyQueries;

#[async_trait]
impl QueryService for EmptyQueries {
    async fn query(&self, _q: &str) -> Result<Vec<Batch>> {
        Ok(Vec::new())
    }

    async fn write_points(
        &self,
        _database: &str,
        _retention_policy: &str,
        _points: Vec<Point>,
    ) -> Result<()> {
        Ok(())
    }
}

fn batch_task(name: &str, db: &str, allowed: Vec<Dbrp>) -> ExecutingTask {
    let script = format!(
        "batch.query('SELECT mean(value) FROM cpu').every(1m).database('{}').retentionPolicy('default')",
        db
    );
    let pipeline = sluice::dsl::parse_script(&script, TaskType::Batch).expect("parse failed");
    let task = Task {
        name: name.to_string(),
        pipeline,
        task_type: TaskType::Batch,
        dbrps: allowed,
        snapshot_interval: Duration::ZERO,
    };
    let services = Services {
        query: Some(Arc::new(EmptyQueries)),
        ..Services::default()
    };
    ExecutingTask::new(Arc::new(services), task).expect("link failed")
}

#[tokio::test]
async fn test_stream_task_end_to_end() {
    let task = stream_task(
        "cpu_avg",
        "stream.from('cpu').window().period(10s).every(10s)\
         .reduce('avg').field('value').as('avg').httpOut('avg')",
    );
    let mut et = ExecutingTask::new(Arc::new(Services::default()), task).expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    // points at 2s intervals; value mirrors the offset
    for i in 0..=10 {
        tx.send_point(point(i * 2, (i * 2) as f64))
            .await
            .expect("send failed");
    }
    drop(tx);
    et.wait().await;
    et.err().expect("no node error expected");

    // the second window covers (10s, 20s]: values 12..20, mean 16
    let output = et.get_output("avg").expect("output registered");
    let result = output.result();
    let series = &result["series"][0];
    assert_eq!(series["columns"][1], "avg");
    assert_eq!(series["values"][0][1], 16.0);
}

#[tokio::test]
async fn test_task_filters_by_measurement() {
    let task = stream_task("mem_only", "stream.from('mem').httpOut('latest')");
    let mut et = ExecutingTask::new(Arc::new(Services::default()), task).expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");

    tx.send_point(point(0, 1.0)).await.expect("send failed");
    drop(tx);
    et.wait().await;

    let result = et.get_output("latest").expect("output registered").result();
    assert_eq!(
        result["series"].as_array().map(Vec::len),
        Some(0),
        "cpu point must not pass a mem filter"
    );
}

#[tokio::test]
async fn test_get_output_unknown_name() {
    let task = stream_task("plain", "stream.from().httpOut('latest')");
    let et = ExecutingTask::new(Arc::new(Services::default()), task).expect("link failed");
    let err = et.get_output("nope").expect_err("unknown output");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::UnknownOutput(_))
    ));
}

#[tokio::test]
async fn test_wrong_task_type() {
    let task = stream_task("streamy", "stream.from().httpOut('latest')");
    let et = ExecutingTask::new(Arc::new(Services::default()), task).expect("link failed");
    for err in [
        et.start_batching().expect_err("stream task cannot batch"),
        et.batch_count().map(|_| ()).expect_err("stream task has no batch count"),
        et.batch_queries(Utc::now(), Utc::now())
            .map(|_| ())
            .expect_err("stream task has no batch queries"),
    ] {
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::WrongTaskType)
        ));
    }
}

#[tokio::test]
async fn test_batch_dbrp_access_control() {
    // allowed dbrp: batching starts
    let et = batch_task(
        "allowed",
        "telegraf",
        vec![Dbrp {
            db: "telegraf".to_string(),
            rp: "default".to_string(),
        }],
    );
    assert_eq!(et.batch_count().expect("count"), 1);
    et.start_batching().expect("allowed dbrp must start");

    // dbrp outside the allowed set: rejected before batching begins
    let et = batch_task(
        "forbidden",
        "secrets",
        vec![Dbrp {
            db: "telegraf".to_string(),
            rp: "default".to_string(),
        }],
    );
    let err = et.start_batching().expect_err("dbrp must be rejected");
    assert!(err.to_string().contains("not allowed"));
}

#[tokio::test]
async fn test_batch_queries_are_time_bounded() {
    let et = batch_task(
        "bounded",
        "telegraf",
        vec![Dbrp {
            db: "telegraf".to_string(),
            rp: "default".to_string(),
        }],
    );
    let start = Utc.with_ymd_and_hms(2015, 10, 1, 0, 0, 0).unwrap();
    let stop = start + chrono::Duration::minutes(3);
    let queries = et.batch_queries(start, stop).expect("queries");
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].len(), 3, "one query per every step");
    assert!(queries[0][0].contains("WHERE time >= '2015-10-01T00:00:00+00:00'"));
    assert!(queries[0][0].contains("AND time < '2015-10-01T00:01:00+00:00'"));
}

#[tokio::test]
async fn test_stop_wakes_blocked_reads() {
    let task = stream_task("idle", "stream.from().window().period(10s).alert().crit('value > 90')");
    let mut et = ExecutingTask::new(Arc::new(Services::default()), task).expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");
    // no input ever arrives; stop must still return promptly
    tokio::time::timeout(Duration::from_secs(5), et.stop())
        .await
        .expect("stop timed out")
        .expect("stop failed");
    drop(tx);
}

#[tokio::test]
async fn test_link_rejects_type_mismatch() {
    use sluice::pipeline::Pipeline;
    let mut pipeline = Pipeline::stream();
    // reduce wants a batch edge, the stream source provides points
    pipeline.source().reduce("avg").field("value");
    let task = Task {
        name: "broken".to_string(),
        pipeline,
        task_type: TaskType::Stream,
        dbrps: Vec::new(),
        snapshot_interval: Duration::ZERO,
    };
    let err = ExecutingTask::new(Arc::new(Services::default()), task)
        .err()
        .expect("link must fail");
    assert!(err.to_string().contains("provides"));
}

struct DoubleValue;

#[async_trait]
impl UdfHandler for DoubleValue {
    async fn process(&self, msg: Message) -> Result<Vec<Message>> {
        match msg {
            Message::Point(mut p) => {
                if let Some(FieldValue::Float(v)) = p.fields.get("value").cloned() {
                    p.fields
                        .insert("value".to_string(), FieldValue::Float(v * 2.0));
                }
                Ok(vec![Message::Point(p)])
            }
            other => Ok(vec![other]),
        }
    }
}

#[tokio::test]
async fn test_udf_node_transforms_points() {
    let task = stream_task("doubled", "stream.from().udf('double').httpOut('doubled')");
    let services = Services {
        udfs: [(
            "double".to_string(),
            Arc::new(DoubleValue) as Arc<dyn UdfHandler>,
        )]
        .into_iter()
        .collect(),
        ..Services::default()
    };
    let mut et = ExecutingTask::new(Arc::new(services), task).expect("link failed");
    let (tx, rx) = stream_edge();
    et.start(vec![rx], None).expect("start failed");
    tx.send_point(point(0, 21.0)).await.expect("send failed");
    drop(tx);
    et.wait().await;

    let result = et.get_output("doubled").expect("output").result();
    assert_eq!(result["series"][0]["values"][0][1], 42.0);
}

#[tokio::test]
async fn test_udf_requires_registered_handler() {
    let task = stream_task("nohandler", "stream.from().udf('missing').httpOut('x')");
    let err = ExecutingTask::new(Arc::new(Services::default()), task)
        .err()
        .expect("link must fail");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Config(_))
    ));
}

#[tokio::test]
async fn test_engine_registers_udf_handlers() {
    let mut engine = Engine::new();
    engine
        .register_udf("double", Arc::new(DoubleValue))
        .expect("register failed");
    let task = engine
        .define_task(
            "udf_task",
            "stream.from().udf('double').httpOut('x')",
            TaskType::Stream,
            Vec::new(),
            Duration::ZERO,
        )
        .expect("define failed");
    let (tx, rx) = stream_edge();
    engine.start_task(task, vec![rx], None).expect("start failed");
    drop(tx);
    engine.stop_task("udf_task").await.expect("stop failed");
}

#[tokio::test]
async fn test_engine_lifecycle() {
    let engine = Engine::new();
    let task = engine
        .define_task(
            "lifecycle",
            "stream.from().httpOut('latest')",
            TaskType::Stream,
            Vec::new(),
            Duration::ZERO,
        )
        .expect("define failed");
    let (tx, rx) = stream_edge();
    engine.start_task(task, vec![rx], None).expect("start failed");
    assert!(engine.is_executing("lifecycle"));

    let dot = engine.executing_dot("lifecycle").expect("edot");
    assert!(dot.starts_with("digraph lifecycle {"));

    drop(tx);
    engine.stop_task("lifecycle").await.expect("stop failed");
    assert!(!engine.is_executing("lifecycle"));
}
