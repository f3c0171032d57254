use crate::errors::EngineError;
use crate::nodes::send_all;
use crate::pipeline::{BatchConfig, EdgeType};
use crate::runtime::edge::Message;
use crate::runtime::node::{Node, NodeCore};
use crate::runtime::task::Dbrp;
use crate::services::QueryService;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;

/// Root of a batch task. Owns no queries itself; its batch children
/// generate data. The worker idles until the task stops.
pub struct SourceBatchNode {
    core: NodeCore,
}

impl SourceBatchNode {
    pub fn new(name: String) -> Self {
        SourceBatchNode {
            core: NodeCore::new(name, EdgeType::Batch, EdgeType::Batch),
        }
    }
}

#[async_trait]
impl Node for SourceBatchNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (_ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        self.core.spawn(async move {
            // children query on their own; hold the edges open until stop
            let _outs = outs;
            let _ = stop.changed().await;
            Ok(())
        });
        Ok(())
    }
}

/// Periodically runs its configured query against the time-series
/// database and emits the resulting batches. Querying begins only once
/// the task triggers batching, after the DBRP access check.
pub struct BatchNode {
    core: NodeCore,
    config: BatchConfig,
    every: chrono::Duration,
    interval: std::time::Duration,
    query: Arc<dyn QueryService>,
    trigger_tx: watch::Sender<bool>,
    trigger_rx: watch::Receiver<bool>,
}

impl BatchNode {
    pub fn new(
        name: String,
        config: BatchConfig,
        query: Option<Arc<dyn QueryService>>,
    ) -> Result<Self> {
        if config.query.is_empty() {
            return Err(EngineError::Config("batch query is required".to_string()).into());
        }
        let every = config
            .every
            .filter(|d| *d > chrono::Duration::zero())
            .ok_or_else(|| {
                EngineError::Config("batch every must be a positive duration".to_string())
            })?;
        let interval = every.to_std().map_err(|_| {
            EngineError::Config("batch every must be a positive duration".to_string())
        })?;
        let query = query.ok_or_else(|| {
            EngineError::Config("batch tasks require a query service".to_string())
        })?;
        let (trigger_tx, trigger_rx) = watch::channel(false);
        Ok(BatchNode {
            core: NodeCore::new(name, EdgeType::Batch, EdgeType::Batch),
            config,
            every,
            interval,
            query,
            trigger_tx,
            trigger_rx,
        })
    }

    /// The database and retention policy this node queries.
    pub fn dbrp(&self) -> Dbrp {
        Dbrp {
            db: self.config.database.clone(),
            rp: self.config.retention_policy.clone(),
        }
    }

    /// The concrete queries this node would run between start and stop,
    /// one per `every` step.
    pub fn queries(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> Vec<String> {
        let mut queries = Vec::new();
        let mut t = start;
        while t < stop {
            let next = t + self.every;
            queries.push(bound_query(&self.config.query, t, next.min(stop)));
            t = next;
        }
        queries
    }

    /// Release the worker into its query loop.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.send(true);
    }
}

fn bound_query(base: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        "{} WHERE time >= '{}' AND time < '{}'",
        base,
        from.to_rfc3339(),
        to.to_rfc3339()
    )
}

#[async_trait]
impl Node for BatchNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let mut trigger = self.trigger_rx.clone();
        let base = self.config.query.clone();
        let every = self.every;
        let interval = self.interval;
        let service = self.query.clone();
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            // no data flows from the source; the edge only ties lifetimes
            drop(ins);
            tokio::select! {
                _ = trigger.changed() => {}
                _ = stop.changed() => return Ok(()),
            }
            let mut last = Utc::now() - every;
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let q = bound_query(&base, last, now);
                        match service.query(&q).await {
                            Ok(batches) => {
                                for b in batches {
                                    if !send_all(&outs, &Message::Batch(b), &stop).await? {
                                        return Ok(());
                                    }
                                }
                            }
                            Err(e) => {
                                error!(node = %name, error = %e, "batch query failed");
                            }
                        }
                        last = now;
                    }
                    _ = stop.changed() => return Ok(()),
                }
            }
        });
        Ok(())
    }

    fn as_batch(&self) -> Option<&BatchNode> {
        Some(self)
    }
}
