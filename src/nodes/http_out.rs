use crate::models::{batch_to_result, GroupId};
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, HttpOutConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Latest result per group, registered under the node's endpoint name on
/// the executing task. Read-only for consumers; the node's worker is the
/// only writer.
#[derive(Debug, Default)]
pub struct HttpOutCache {
    data: RwLock<BTreeMap<GroupId, serde_json::Value>>,
}

impl HttpOutCache {
    /// All cached series merged into a single result object.
    pub fn result(&self) -> serde_json::Value {
        let data = self.data.read().expect("http out cache lock");
        let series: Vec<serde_json::Value> = data
            .values()
            .filter_map(|v| v.get("series"))
            .filter_map(|s| s.as_array())
            .flatten()
            .cloned()
            .collect();
        serde_json::json!({ "series": series })
    }

    fn update(&self, group: GroupId, value: serde_json::Value) {
        self.data
            .write()
            .expect("http out cache lock")
            .insert(group, value);
    }
}

/// Caches the latest result per group under a named output and forwards
/// everything downstream unchanged.
pub struct HttpOutNode {
    core: NodeCore,
    cache: Arc<HttpOutCache>,
}

impl HttpOutNode {
    pub fn new(name: String, wants: EdgeType, _config: HttpOutConfig) -> Self {
        HttpOutNode {
            core: NodeCore::new(name, wants, wants),
            cache: Arc::new(HttpOutCache::default()),
        }
    }

    pub fn cache(&self) -> Arc<HttpOutCache> {
        self.cache.clone()
    }
}

#[async_trait]
impl Node for HttpOutNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let cache = self.cache.clone();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("http_out has no input"))?;
            while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                match &msg {
                    Message::Point(p) => {
                        let batch = p.clone().into_batch();
                        cache.update(batch.group.clone(), batch_to_result(&batch));
                    }
                    Message::Batch(b) => {
                        cache.update(b.group.clone(), batch_to_result(b));
                    }
                }
                if !send_all(&outs, &msg, &stop).await? {
                    break;
                }
            }
            Ok(())
        });
        Ok(())
    }
}
