use crate::models::Point;
use crate::pipeline::{EdgeType, InfluxDbOutConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore};
use crate::services::QueryService;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Terminal node writing every payload back to the time-series database.
/// Write failures are logged; the node keeps consuming.
pub struct InfluxDbOutNode {
    core: NodeCore,
    config: InfluxDbOutConfig,
    query: Arc<dyn QueryService>,
}

impl InfluxDbOutNode {
    pub fn new(
        name: String,
        wants: EdgeType,
        config: InfluxDbOutConfig,
        query: Option<Arc<dyn QueryService>>,
    ) -> Result<Self> {
        let query = query.ok_or_else(|| {
            crate::errors::EngineError::Config(
                "influxdb_out requires a query service".to_string(),
            )
        })?;
        Ok(InfluxDbOutNode {
            core: NodeCore::new(name, wants, wants),
            config,
            query,
        })
    }
}

#[async_trait]
impl Node for InfluxDbOutNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let config = self.config.clone();
        let query = self.query.clone();
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            drop(outs);
            let mut input = ins
                .pop()
                .ok_or_else(|| anyhow!("influxdb_out has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                let points: Vec<Point> = match msg {
                    Message::Point(mut p) => {
                        if let Some(m) = &config.measurement {
                            p.name = m.clone();
                        }
                        vec![p]
                    }
                    Message::Batch(b) => b
                        .points
                        .iter()
                        .map(|tf| Point {
                            name: config.measurement.clone().unwrap_or_else(|| b.name.clone()),
                            time: tf.time,
                            group: b.group.clone(),
                            tags: b.tags.clone(),
                            fields: tf.fields.clone(),
                        })
                        .collect(),
                };
                if let Err(e) = query
                    .write_points(&config.database, &config.retention_policy, points)
                    .await
                {
                    error!(node = %name, error = %e, "failed to write points");
                }
            }
            Ok(())
        });
        Ok(())
    }
}
