use crate::errors::EngineError;
use crate::models::{Batch, GroupId, Tags, TimeFields};
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, WindowConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore, SnapshotFn};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Per-group buffer of points awaiting the next window boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowBuffer {
    name: String,
    tags: Tags,
    points: Vec<TimeFields>,
    next_emit: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WindowState {
    buffers: BTreeMap<GroupId, WindowBuffer>,
}

/// Buffers points per group and emits a batch covering `period`, sliding
/// every `every`. Window boundaries track point time, not wall time.
pub struct WindowNode {
    core: NodeCore,
    period: Duration,
    every: Duration,
    state: Arc<Mutex<WindowState>>,
}

impl WindowNode {
    pub fn new(name: String, config: WindowConfig) -> Result<Self> {
        let period = config
            .period
            .ok_or_else(|| EngineError::Config("window period is required".to_string()))?;
        if period <= Duration::zero() {
            return Err(EngineError::Config("window period must be positive".to_string()).into());
        }
        let every = config.every.unwrap_or(period);
        Ok(WindowNode {
            core: NodeCore::new(name, EdgeType::Stream, EdgeType::Batch),
            period,
            every,
            state: Arc::new(Mutex::new(WindowState::default())),
        })
    }
}

/// Ingest one point; batches that became complete are returned for
/// emission outside the state lock.
fn ingest(
    state: &mut WindowState,
    p: crate::models::Point,
    period: Duration,
    every: Duration,
) -> Vec<Batch> {
    let buf = state
        .buffers
        .entry(p.group.clone())
        .or_insert_with(|| WindowBuffer {
            name: p.name.clone(),
            tags: p.tags.clone(),
            points: Vec::new(),
            next_emit: p.time + every,
        });
    let time = p.time;
    buf.points.push(TimeFields {
        time,
        fields: p.fields,
    });
    let mut ready = Vec::new();
    while buf.next_emit <= time {
        let edge = buf.next_emit;
        let from = edge - period;
        let points: Vec<TimeFields> = buf
            .points
            .iter()
            .filter(|tf| tf.time > from && tf.time <= edge)
            .cloned()
            .collect();
        ready.push(Batch {
            name: buf.name.clone(),
            group: p.group.clone(),
            tags: buf.tags.clone(),
            points,
        });
        buf.next_emit = edge + every;
        let evict_before = buf.next_emit - period;
        buf.points.retain(|tf| tf.time > evict_before);
    }
    ready
}

#[async_trait]
impl Node for WindowNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, snapshot: Option<Vec<u8>>) -> Result<()> {
        if let Some(bytes) = snapshot.filter(|b| !b.is_empty()) {
            *self.state.lock().expect("window state lock") = serde_json::from_slice(&bytes)?;
        }
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let state = self.state.clone();
        let (period, every) = (self.period, self.every);
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("window has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                let p = match msg {
                    Message::Point(p) => p,
                    Message::Batch(_) => continue,
                };
                let ready = {
                    let mut state = state.lock().expect("window state lock");
                    ingest(&mut state, p, period, every)
                };
                for batch in ready {
                    if !send_all(&outs, &Message::Batch(batch), &stop).await? {
                        return Ok(());
                    }
                }
            }
            Ok(())
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(
            &*self.state.lock().expect("window state lock"),
        )?)
    }

    fn snapshot_fn(&self) -> SnapshotFn {
        let state = self.state.clone();
        Arc::new(move || {
            Ok(serde_json::to_vec(
                &*state.lock().expect("window state lock"),
            )?)
        })
    }
}
