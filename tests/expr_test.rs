use sluice::expr::{compile, ReturnType, StatefulExpr, Value};
use sluice::models::{FieldValue, Fields, Tags};

fn record(pairs: &[(&str, f64)]) -> (Fields, Tags) {
    let mut fields = Fields::new();
    for (k, v) in pairs {
        fields.insert(k.to_string(), FieldValue::Float(*v));
    }
    (fields, Tags::new())
}

fn eval_bool(src: &str, fields: &Fields, tags: &Tags) -> bool {
    let tree = compile(src, ReturnType::Bool).expect("compile failed");
    StatefulExpr::new(tree)
        .eval_bool(fields, tags)
        .expect("eval failed")
}

#[test]
fn test_comparisons() {
    let (fields, tags) = record(&[("value", 95.0)]);
    assert!(eval_bool("value > 90", &fields, &tags));
    assert!(!eval_bool("value > 99", &fields, &tags));
    assert!(eval_bool("\"value\" >= 95", &fields, &tags));
    assert!(eval_bool("value == 95.0", &fields, &tags));
    assert!(eval_bool("value != 3", &fields, &tags));
    assert!(eval_bool("value < 100 AND value > 0", &fields, &tags));
    assert!(eval_bool("value > 100 OR value > 90", &fields, &tags));
    assert!(eval_bool("!(value > 100)", &fields, &tags));
    assert!(eval_bool("TRUE", &fields, &tags));
    assert!(!eval_bool("FALSE", &fields, &tags));
}

#[test]
fn test_arithmetic() {
    let (fields, tags) = record(&[("a", 6.0), ("b", 4.0)]);
    assert!(eval_bool("a + b == 10", &fields, &tags));
    assert!(eval_bool("a - b == 2", &fields, &tags));
    assert!(eval_bool("a * b == 24", &fields, &tags));
    assert!(eval_bool("a / b == 1.5", &fields, &tags));
    assert!(eval_bool("-b < 0", &fields, &tags));
    // precedence: multiplication binds tighter than addition
    assert!(eval_bool("a + b * 2 == 14", &fields, &tags));
    assert!(eval_bool("(a + b) * 2 == 20", &fields, &tags));
}

#[test]
fn test_durations() {
    let (fields, tags) = record(&[]);
    assert!(eval_bool("10s < 1m", &fields, &tags));
    assert!(eval_bool("1m + 30s == 90s", &fields, &tags));
    assert!(eval_bool("1h - 30m == 30m", &fields, &tags));
}

#[test]
fn test_regex_match() {
    let mut fields = Fields::new();
    fields.insert(
        "host".to_string(),
        FieldValue::Str("server-042".to_string()),
    );
    let tags = Tags::new();
    assert!(eval_bool(r#"host =~ /^server-\d+$/"#, &fields, &tags));
    assert!(!eval_bool(r#"host =~ /^db-/"#, &fields, &tags));
    assert!(eval_bool(r#"host !~ /^db-/"#, &fields, &tags));
}

#[test]
fn test_references_resolve_fields_then_tags() {
    let mut fields = Fields::new();
    fields.insert("region".to_string(), FieldValue::Str("field".to_string()));
    let mut tags = Tags::new();
    tags.insert("region".to_string(), "tag".to_string());
    tags.insert("dc".to_string(), "east".to_string());
    // fields shadow tags
    assert!(eval_bool("\"region\" == 'field'", &fields, &tags));
    // tags fill in what fields lack
    assert!(eval_bool("\"dc\" == 'east'", &fields, &tags));
}

#[test]
fn test_missing_reference_is_error() {
    let (fields, tags) = record(&[("value", 1.0)]);
    let tree = compile("missing > 0", ReturnType::Bool).expect("compile failed");
    let err = StatefulExpr::new(tree)
        .eval_bool(&fields, &tags)
        .expect_err("missing reference should fail");
    assert!(err.to_string().contains("missing"));
}

#[test]
fn test_return_type_checked() {
    assert!(compile("1 + 2", ReturnType::Bool).is_err());
    assert!(compile("value > 0", ReturnType::Bool).is_ok());
    assert!(compile("1 > 2", ReturnType::Number).is_err());
}

#[test]
fn test_short_circuit() {
    // the right side would error on the missing reference, but the left
    // side decides first
    let (fields, tags) = record(&[("value", 1.0)]);
    assert!(eval_bool("value > 0 OR missing > 0", &fields, &tags));
    assert!(!eval_bool("value < 0 AND missing > 0", &fields, &tags));
}

#[test]
fn test_stateful_count() {
    let (fields, tags) = record(&[]);
    let tree = compile("count()", ReturnType::Number).expect("compile failed");
    let mut expr = StatefulExpr::new(tree);
    for want in 1..=3 {
        let got = expr.eval(&fields, &tags).expect("eval failed");
        assert_eq!(got, Value::Int(want));
    }
}

#[test]
fn test_stateful_sigma_is_per_instance() {
    let tree = compile("sigma(value)", ReturnType::Number).expect("compile failed");
    let mut a = StatefulExpr::new(tree.clone());
    let mut b = StatefulExpr::new(tree);
    // steady values keep sigma at zero
    for _ in 0..5 {
        let (fields, tags) = record(&[("value", 10.0)]);
        let got = a.eval(&fields, &tags).expect("eval failed");
        assert_eq!(got, Value::Float(0.0));
    }
    // an outlier deviates from the running mean, on the instance that
    // saw the history only
    let (fields, tags) = record(&[("value", 100.0)]);
    let deviated = a.eval(&fields, &tags).expect("eval failed");
    assert!(deviated.as_f64().expect("numeric") > 1.0);
    let fresh = b.eval(&fields, &tags).expect("eval failed");
    assert_eq!(fresh, Value::Float(0.0));
}

#[test]
fn test_math_functions() {
    let (fields, tags) = record(&[("v", -4.0)]);
    assert!(eval_bool("abs(v) == 4", &fields, &tags));
    assert!(eval_bool("sqrt(abs(v)) == 2", &fields, &tags));
    assert!(eval_bool("floor(2.7) == 2", &fields, &tags));
    assert!(eval_bool("ceil(2.1) == 3", &fields, &tags));
}

#[test]
fn test_division_by_zero_is_error() {
    let (fields, tags) = record(&[("v", 1.0)]);
    let tree = compile("v / 0", ReturnType::Number).expect("compile failed");
    assert!(StatefulExpr::new(tree).eval(&fields, &tags).is_err());
}
