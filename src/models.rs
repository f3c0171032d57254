use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Fields = BTreeMap<String, FieldValue>;
pub type Tags = BTreeMap<String, String>;

/// A single field value carried on a point.
///
/// Untagged, with Int ahead of Float so integer JSON round-trips as an
/// integer and snapshot bytes stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// Stable identifier for the tag subset a payload belongs to.
///
/// Derived once where grouping happens and carried on every payload so
/// downstream nodes can partition work without re-deriving tag subsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct GroupId(pub String);

impl GroupId {
    /// Nil group: payload belongs to no particular tag subset.
    pub fn nil() -> Self {
        GroupId(String::new())
    }

    /// Build a group id from the given dimensions of a tag set.
    /// Dimensions are sorted so the id is stable across tag orderings.
    pub fn from_dims(name: &str, tags: &Tags, dims: &[String]) -> Self {
        let mut sorted: Vec<&String> = dims.iter().collect();
        sorted.sort();
        let mut id = String::from(name);
        for dim in sorted {
            id.push(',');
            id.push_str(dim);
            id.push('=');
            if let Some(v) = tags.get(dim) {
                id.push_str(v);
            }
        }
        GroupId(id)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single time-series point flowing over a stream edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub name: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub group: GroupId,
    #[serde(default)]
    pub tags: Tags,
    pub fields: Fields,
}

/// Time and fields of one row within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFields {
    pub time: DateTime<Utc>,
    pub fields: Fields,
}

/// An ordered collection of rows sharing a name, group and tag set,
/// flowing over a batch edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    #[serde(default)]
    pub group: GroupId,
    #[serde(default)]
    pub tags: Tags,
    pub points: Vec<TimeFields>,
}

impl Point {
    /// Wrap this point as a single-row batch, preserving identity.
    pub fn into_batch(self) -> Batch {
        Batch {
            name: self.name,
            group: self.group,
            tags: self.tags,
            points: vec![TimeFields {
                time: self.time,
                fields: self.fields,
            }],
        }
    }
}

/// Serialize a batch as a query-result object: one series with a `time`
/// column followed by the field names in sorted order.
pub fn batch_to_result(b: &Batch) -> serde_json::Value {
    let mut columns: Vec<String> = vec!["time".to_string()];
    if let Some(first) = b.points.first() {
        columns.extend(first.fields.keys().cloned());
    }
    let values: Vec<serde_json::Value> = b
        .points
        .iter()
        .map(|tf| {
            let mut row = vec![serde_json::json!(tf.time.to_rfc3339())];
            for col in columns.iter().skip(1) {
                row.push(match tf.fields.get(col) {
                    Some(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                    None => serde_json::Value::Null,
                });
            }
            serde_json::Value::Array(row)
        })
        .collect();
    serde_json::json!({
        "series": [{
            "name": b.name,
            "tags": b.tags,
            "columns": columns,
            "values": values,
        }]
    })
}
