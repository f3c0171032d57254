use crate::errors::EngineError;
use crate::models::{FieldValue, Point};
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, MapConfig, ReduceConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

fn map_func(name: &str) -> Option<fn(f64) -> f64> {
    match name {
        "abs" => Some(f64::abs),
        "log" => Some(f64::ln),
        "sqrt" => Some(f64::sqrt),
        "floor" => Some(f64::floor),
        "ceil" => Some(f64::ceil),
        _ => None,
    }
}

/// Applies a math function to one field of every point in a batch.
pub struct MapNode {
    core: NodeCore,
    func: fn(f64) -> f64,
    field: String,
    as_name: String,
}

impl MapNode {
    pub fn new(name: String, config: MapConfig) -> Result<Self> {
        let func = map_func(&config.func).ok_or_else(|| {
            EngineError::Config(format!("unknown map function {:?}", config.func))
        })?;
        if config.field.is_empty() {
            return Err(EngineError::Config("map field is required".to_string()).into());
        }
        let as_name = config.as_name.unwrap_or_else(|| config.field.clone());
        Ok(MapNode {
            core: NodeCore::new(name, EdgeType::Batch, EdgeType::Batch),
            func,
            field: config.field,
            as_name,
        })
    }
}

#[async_trait]
impl Node for MapNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let (func, field, as_name) = (self.func, self.field.clone(), self.as_name.clone());
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("map has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                let mut b = match msg {
                    Message::Batch(b) => b,
                    Message::Point(_) => continue,
                };
                for tf in &mut b.points {
                    if let Some(v) = tf.fields.get(&field).and_then(FieldValue::as_f64) {
                        tf.fields.insert(as_name.clone(), FieldValue::Float(func(v)));
                    }
                }
                if !send_all(&outs, &Message::Batch(b), &stop).await? {
                    break;
                }
            }
            Ok(())
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReduceFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl ReduceFunc {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(ReduceFunc::Count),
            "sum" => Some(ReduceFunc::Sum),
            "avg" | "mean" => Some(ReduceFunc::Avg),
            "min" => Some(ReduceFunc::Min),
            "max" => Some(ReduceFunc::Max),
            _ => None,
        }
    }

    fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            ReduceFunc::Count => values.len() as f64,
            ReduceFunc::Sum => values.iter().sum(),
            ReduceFunc::Avg => values.iter().sum::<f64>() / values.len() as f64,
            ReduceFunc::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            ReduceFunc::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Reduces every batch to a single point carrying the aggregate of one
/// field, stamped with the batch's last point time.
pub struct ReduceNode {
    core: NodeCore,
    func: ReduceFunc,
    field: String,
    as_name: String,
}

impl ReduceNode {
    pub fn new(name: String, config: ReduceConfig) -> Result<Self> {
        let func = ReduceFunc::parse(&config.func).ok_or_else(|| {
            EngineError::Config(format!("unknown reduce function {:?}", config.func))
        })?;
        if config.field.is_empty() {
            return Err(EngineError::Config("reduce field is required".to_string()).into());
        }
        let as_name = config.as_name.unwrap_or_else(|| config.func.clone());
        Ok(ReduceNode {
            core: NodeCore::new(name, EdgeType::Batch, EdgeType::Stream),
            func,
            field: config.field,
            as_name,
        })
    }
}

#[async_trait]
impl Node for ReduceNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let (func, field, as_name) = (self.func, self.field.clone(), self.as_name.clone());
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("reduce has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                let b = match msg {
                    Message::Batch(b) => b,
                    Message::Point(_) => continue,
                };
                let values: Vec<f64> = b
                    .points
                    .iter()
                    .filter_map(|tf| tf.fields.get(&field).and_then(FieldValue::as_f64))
                    .collect();
                let (Some(value), Some(last)) = (func.apply(&values), b.points.last()) else {
                    continue;
                };
                let mut point = Point {
                    name: b.name.clone(),
                    time: last.time,
                    group: b.group.clone(),
                    tags: b.tags.clone(),
                    fields: Default::default(),
                };
                point
                    .fields
                    .insert(as_name.clone(), FieldValue::Float(value));
                if !send_all(&outs, &Message::Point(point), &stop).await? {
                    break;
                }
            }
            Ok(())
        });
        Ok(())
    }
}
