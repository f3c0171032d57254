use crate::errors::EngineError;
use crate::models::{FieldValue, GroupId, Point};
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, StatsConfig};
use crate::runtime::edge::Message;
use crate::runtime::node::{Node, NodeCore, OutEdges, SnapshotFn};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct StatsState {
    // emitted count carried over from before the last restart
    base: i64,
}

/// Emits a point with the observed node's emitted-payload count on a
/// fixed interval. Data arriving on its input edge is drained and
/// discarded; its close ends the worker.
pub struct StatsNode {
    core: NodeCore,
    interval: std::time::Duration,
    observed: OutEdges,
    state: Arc<Mutex<StatsState>>,
}

impl StatsNode {
    pub fn new(
        name: String,
        wants: EdgeType,
        config: StatsConfig,
        observed: OutEdges,
    ) -> Result<Self> {
        let interval = config
            .interval
            .and_then(|d| d.to_std().ok())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                EngineError::Config("stats interval must be a positive duration".to_string())
            })?;
        Ok(StatsNode {
            core: NodeCore::new(name, wants, EdgeType::Stream),
            interval,
            observed,
            state: Arc::new(Mutex::new(StatsState::default())),
        })
    }
}

fn observed_emitted(observed: &OutEdges) -> i64 {
    observed
        .lock()
        .expect("out edges lock")
        .iter()
        .map(|(_, s)| s.collected.load(Ordering::Relaxed))
        .sum()
}

#[async_trait]
impl Node for StatsNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, snapshot: Option<Vec<u8>>) -> Result<()> {
        if let Some(bytes) = snapshot.filter(|b| !b.is_empty()) {
            *self.state.lock().expect("stats state lock") = serde_json::from_slice(&bytes)?;
        }
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let observed = self.observed.clone();
        let state = self.state.clone();
        let interval = self.interval;
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("stats has no input"))?;
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    msg = input.recv() => {
                        if msg.is_none() {
                            return Ok(());
                        }
                        // observed data itself is not forwarded
                    }
                    _ = ticker.tick() => {
                        let emitted =
                            state.lock().expect("stats state lock").base + observed_emitted(&observed);
                        let mut point = Point {
                            name: name.clone(),
                            time: chrono::Utc::now(),
                            group: GroupId::nil(),
                            tags: Default::default(),
                            fields: Default::default(),
                        };
                        point.fields.insert("emitted".to_string(), FieldValue::Int(emitted));
                        if !send_all(&outs, &Message::Point(point), &stop).await? {
                            return Ok(());
                        }
                    }
                    _ = stop.changed() => return Ok(()),
                }
            }
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let total = StatsState {
            base: self.state.lock().expect("stats state lock").base
                + observed_emitted(&self.observed),
        };
        Ok(serde_json::to_vec(&total)?)
    }

    fn snapshot_fn(&self) -> SnapshotFn {
        let state = self.state.clone();
        let observed = self.observed.clone();
        Arc::new(move || {
            let total = StatsState {
                base: state.lock().expect("stats state lock").base + observed_emitted(&observed),
            };
            Ok(serde_json::to_vec(&total)?)
        })
    }
}
