use crate::nodes::{merge_inputs, send_all};
use crate::pipeline::EdgeType;
use crate::runtime::node::{Node, NodeCore};
use anyhow::Result;
use async_trait::async_trait;

/// Interleaves all parents with no time order.
pub struct UnionNode {
    core: NodeCore,
}

impl UnionNode {
    pub fn new(name: String, wants: EdgeType) -> Self {
        UnionNode {
            core: NodeCore::new(name, wants, wants),
        }
    }
}

#[async_trait]
impl Node for UnionNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (ins, outs) = self.core.take_io();
        let stop = self.core.stop_rx();
        self.core.spawn(async move {
            let mut inputs = merge_inputs(ins, &stop);
            while let Some((_, msg)) = inputs.recv().await {
                if !send_all(&outs, &msg, &stop).await? {
                    break;
                }
            }
            Ok(())
        });
        Ok(())
    }
}
