use crate::models::{FieldValue, GroupId, Point, TimeFields};
use crate::nodes::send_all;
use crate::pipeline::{DerivativeConfig, EdgeType};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore, SnapshotFn};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DerivativeState {
    // previous observation per group
    prev: BTreeMap<GroupId, (DateTime<Utc>, f64)>,
}

/// Emits the rate of change of a field between consecutive points per
/// group, scaled by `unit`. Non-monotonic time resets the group and is
/// logged.
pub struct DerivativeNode {
    core: NodeCore,
    field: String,
    as_name: String,
    unit: Duration,
    state: Arc<Mutex<DerivativeState>>,
}

impl DerivativeNode {
    pub fn new(name: String, wants: EdgeType, config: DerivativeConfig) -> Result<Self> {
        let as_name = config.as_name.unwrap_or_else(|| config.field.clone());
        Ok(DerivativeNode {
            core: NodeCore::new(name, wants, wants),
            field: config.field,
            as_name,
            unit: config.unit.unwrap_or_else(|| Duration::seconds(1)),
            state: Arc::new(Mutex::new(DerivativeState::default())),
        })
    }
}

/// Derivative of one observation against the stored previous one.
/// Returns None for the first observation of a group or a time reversal.
fn derive(
    state: &mut DerivativeState,
    node: &str,
    group: &GroupId,
    time: DateTime<Utc>,
    value: f64,
    unit: Duration,
) -> Option<f64> {
    let prev = state.prev.insert(group.clone(), (time, value));
    let (pt, pv) = prev?;
    let elapsed = time - pt;
    if elapsed <= Duration::zero() {
        warn!(node = %node, "non-monotonic point time, resetting derivative");
        return None;
    }
    let scale = unit.num_nanoseconds()? as f64 / elapsed.num_nanoseconds()? as f64;
    Some((value - pv) * scale)
}

#[async_trait]
impl Node for DerivativeNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, snapshot: Option<Vec<u8>>) -> Result<()> {
        if let Some(bytes) = snapshot.filter(|b| !b.is_empty()) {
            *self.state.lock().expect("derivative state lock") = serde_json::from_slice(&bytes)?;
        }
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let state = self.state.clone();
        let field = self.field.clone();
        let as_name = self.as_name.clone();
        let unit = self.unit;
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("derivative has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                let out_msg = {
                    let mut state = state.lock().expect("derivative state lock");
                    match msg {
                        Message::Point(p) => {
                            let value = match p.fields.get(&field).and_then(FieldValue::as_f64) {
                                Some(v) => v,
                                None => continue,
                            };
                            match derive(&mut state, &name, &p.group, p.time, value, unit) {
                                Some(d) => {
                                    let mut out = Point {
                                        name: p.name,
                                        time: p.time,
                                        group: p.group,
                                        tags: p.tags,
                                        fields: BTreeMap::new(),
                                    };
                                    out.fields.insert(as_name.clone(), FieldValue::Float(d));
                                    Some(Message::Point(out))
                                }
                                None => None,
                            }
                        }
                        Message::Batch(mut b) => {
                            let mut points = Vec::with_capacity(b.points.len().saturating_sub(1));
                            for tf in b.points.drain(..) {
                                let value = match tf.fields.get(&field).and_then(FieldValue::as_f64)
                                {
                                    Some(v) => v,
                                    None => continue,
                                };
                                if let Some(d) =
                                    derive(&mut state, &name, &b.group, tf.time, value, unit)
                                {
                                    let mut fields = BTreeMap::new();
                                    fields.insert(as_name.clone(), FieldValue::Float(d));
                                    points.push(TimeFields {
                                        time: tf.time,
                                        fields,
                                    });
                                }
                            }
                            if points.is_empty() {
                                None
                            } else {
                                b.points = points;
                                Some(Message::Batch(b))
                            }
                        }
                    }
                };
                if let Some(m) = out_msg {
                    if !send_all(&outs, &m, &stop).await? {
                        break;
                    }
                }
            }
            Ok(())
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(
            &*self.state.lock().expect("derivative state lock"),
        )?)
    }

    fn snapshot_fn(&self) -> SnapshotFn {
        let state = self.state.clone();
        Arc::new(move || {
            Ok(serde_json::to_vec(
                &*state.lock().expect("derivative state lock"),
            )?)
        })
    }
}
