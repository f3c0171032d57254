use chrono::Duration;
use sluice::dsl::parse_script;
use sluice::pipeline::NodeConfig;
use sluice::runtime::task::TaskType;

#[test]
fn test_parse_stream_chain() {
    let script = "var x = stream.from().window().period(10s)\nx.alert().crit('value > 90')";
    let p = parse_script(script, TaskType::Stream).expect("parse failed");
    // stream0, stream1 (from), window2, alert3
    assert_eq!(p.len(), 4);
    match &p.get(2).config {
        NodeConfig::Window(w) => assert_eq!(w.period, Some(Duration::seconds(10))),
        other => panic!("expected window, got {:?}", other),
    }
    match &p.get(3).config {
        NodeConfig::Alert(a) => assert_eq!(a.crit.as_deref(), Some("value > 90")),
        other => panic!("expected alert, got {:?}", other),
    }
    assert_eq!(p.parents(3), &[2]);
}

#[test]
fn test_parse_var_binding_resumes_chain() {
    let script = "\
var base = stream.from('cpu').groupBy('host')
base.where('usage > 50').httpOut('hot')
base.alert().crit('usage > 90').post('http://localhost:9092/alert')
";
    let p = parse_script(script, TaskType::Stream).expect("parse failed");
    // both statements chain off the groupBy node
    let group_by = 2;
    assert_eq!(p.children(group_by).len(), 2);
    match &p.get(1).config {
        NodeConfig::Stream(s) => assert_eq!(s.from.as_deref(), Some("cpu")),
        other => panic!("expected stream, got {:?}", other),
    }
}

#[test]
fn test_parse_alert_properties() {
    let script = "stream.from().alert()\
.info('v > 1').warn('v > 5').crit('v > 9')\
.history(4).flapLow(0.25).flapHigh(0.5).flapping()\
.post('http://localhost:9092/alert')\
.email('alerts@example.com').to('oncall@example.com').subject('alert')";
    let p = parse_script(script, TaskType::Stream).expect("parse failed");
    match &p.get(2).config {
        NodeConfig::Alert(a) => {
            assert_eq!(a.info.as_deref(), Some("v > 1"));
            assert_eq!(a.warn.as_deref(), Some("v > 5"));
            assert_eq!(a.crit.as_deref(), Some("v > 9"));
            assert!(a.use_flapping);
            assert_eq!(a.history, 4);
            assert_eq!(a.flap_low, 0.25);
            assert_eq!(a.flap_high, 0.5);
            assert_eq!(a.post.as_deref(), Some("http://localhost:9092/alert"));
            assert_eq!(a.from.as_deref(), Some("alerts@example.com"));
            assert_eq!(a.to, vec!["oncall@example.com".to_string()]);
            assert_eq!(a.subject.as_deref(), Some("alert"));
        }
        other => panic!("expected alert, got {:?}", other),
    }
}

#[test]
fn test_parse_batch_script() {
    let script = "batch.query('SELECT mean(value) FROM cpu')\
.every(1m).database('telegraf').retentionPolicy('default')";
    let p = parse_script(script, TaskType::Batch).expect("parse failed");
    match &p.get(1).config {
        NodeConfig::Batch(b) => {
            assert_eq!(b.every, Some(Duration::minutes(1)));
            assert_eq!(b.database, "telegraf");
        }
        other => panic!("expected batch, got {:?}", other),
    }
}

#[test]
fn test_parse_union_of_bound_variables() {
    let script = "\
var a = stream.from('cpu')
var b = stream.from('mem')
a.union(b).httpOut('all')
";
    let p = parse_script(script, TaskType::Stream).expect("parse failed");
    let union = 3;
    assert_eq!(p.parents(union), &[1, 2]);
}

#[test]
fn test_parse_errors_carry_position() {
    // wrong source for the task type
    assert!(parse_script("batch.query('q')", TaskType::Stream).is_err());
    // unknown method
    let err = parse_script("stream.frobnicate()", TaskType::Stream)
        .expect_err("unknown method should fail");
    assert!(err.to_string().contains("frobnicate"));
    // property on the wrong node kind
    assert!(parse_script("stream.from().period(10s)", TaskType::Stream).is_err());
    // undefined variable
    assert!(parse_script("x.window()", TaskType::Stream).is_err());
    // bad argument type
    assert!(parse_script("stream.from().window().period('10s')", TaskType::Stream).is_err());
}

#[test]
fn test_parse_comments_are_skipped() {
    let script = "\
// ingest everything
stream.from()
    // and cache the latest value
    .httpOut('latest')
";
    let p = parse_script(script, TaskType::Stream).expect("parse failed");
    assert_eq!(p.len(), 3);
}
