use crate::nodes::{merge_inputs, send_all};
use crate::pipeline::{EdgeType, StreamConfig};
use crate::runtime::edge::Message;
use crate::runtime::node::{Node, NodeCore};
use anyhow::Result;
use async_trait::async_trait;

/// Pass-through fan-out of live points. With a `from` filter only points
/// of that measurement pass.
pub struct StreamNode {
    core: NodeCore,
    config: StreamConfig,
}

impl StreamNode {
    pub fn new(name: String, config: StreamConfig) -> Self {
        StreamNode {
            core: NodeCore::new(name, EdgeType::Stream, EdgeType::Stream),
            config,
        }
    }
}

#[async_trait]
impl Node for StreamNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (ins, outs) = self.core.take_io();
        let stop = self.core.stop_rx();
        let from = self.config.from.clone();
        self.core.spawn(async move {
            let mut inputs = merge_inputs(ins, &stop);
            while let Some((_, msg)) = inputs.recv().await {
                if let Message::Point(ref p) = msg {
                    if from.as_deref().is_some_and(|m| m != p.name) {
                        continue;
                    }
                    if !send_all(&outs, &msg, &stop).await? {
                        break;
                    }
                }
            }
            Ok(())
        });
        Ok(())
    }
}
