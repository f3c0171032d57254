use crate::errors::EngineError;
use crate::models::GroupId;
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, SampleConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore, SnapshotFn};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SampleState {
    counts: BTreeMap<GroupId, i64>,
    last: BTreeMap<GroupId, DateTime<Utc>>,
}

/// Passes every Nth payload per group, or one payload per duration per
/// group. Everything else is dropped by design.
pub struct SampleNode {
    core: NodeCore,
    n: Option<i64>,
    duration: Option<Duration>,
    state: Arc<Mutex<SampleState>>,
}

impl SampleNode {
    pub fn new(name: String, wants: EdgeType, config: SampleConfig) -> Result<Self> {
        match (config.n, config.duration) {
            (Some(n), None) if n > 0 => {}
            (None, Some(d)) if d > Duration::zero() => {}
            _ => {
                return Err(EngineError::Config(
                    "sample needs a positive count or duration".to_string(),
                )
                .into())
            }
        }
        Ok(SampleNode {
            core: NodeCore::new(name, wants, wants),
            n: config.n,
            duration: config.duration,
            state: Arc::new(Mutex::new(SampleState::default())),
        })
    }
}

fn keep(
    state: &mut SampleState,
    group: &GroupId,
    time: DateTime<Utc>,
    n: Option<i64>,
    duration: Option<Duration>,
) -> bool {
    if let Some(n) = n {
        let count = state.counts.entry(group.clone()).or_insert(0);
        let keep = *count % n == 0;
        *count += 1;
        return keep;
    }
    let duration = duration.expect("sample mode");
    match state.last.get(group) {
        Some(last) if time - *last < duration => false,
        _ => {
            state.last.insert(group.clone(), time);
            true
        }
    }
}

#[async_trait]
impl Node for SampleNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, snapshot: Option<Vec<u8>>) -> Result<()> {
        if let Some(bytes) = snapshot.filter(|b| !b.is_empty()) {
            *self.state.lock().expect("sample state lock") = serde_json::from_slice(&bytes)?;
        }
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let state = self.state.clone();
        let (n, duration) = (self.n, self.duration);
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("sample has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                let kept = {
                    let mut state = state.lock().expect("sample state lock");
                    match &msg {
                        Message::Point(p) => keep(&mut state, &p.group, p.time, n, duration),
                        Message::Batch(b) => {
                            let time = b
                                .points
                                .first()
                                .map(|tf| tf.time)
                                .unwrap_or(DateTime::<Utc>::MIN_UTC);
                            keep(&mut state, &b.group, time, n, duration)
                        }
                    }
                };
                if kept && !send_all(&outs, &msg, &stop).await? {
                    break;
                }
            }
            Ok(())
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(
            &*self.state.lock().expect("sample state lock"),
        )?)
    }

    fn snapshot_fn(&self) -> SnapshotFn {
        let state = self.state.clone();
        Arc::new(move || {
            Ok(serde_json::to_vec(
                &*state.lock().expect("sample state lock"),
            )?)
        })
    }
}
