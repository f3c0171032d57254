use crate::nodes::send_all;
use crate::pipeline::EdgeType;
use crate::runtime::edge::recv_or_stop;
use crate::runtime::node::{Node, NodeCore};
use crate::services::UdfHandler;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Forwards payloads through a handler registered on the engine by name.
/// Handler failures are logged and the offending payload is dropped.
pub struct UdfNode {
    core: NodeCore,
    handler: Arc<dyn UdfHandler>,
}

impl UdfNode {
    pub fn new(name: String, wants: EdgeType, handler: Arc<dyn UdfHandler>) -> Self {
        UdfNode {
            core: NodeCore::new(name, wants, wants),
            handler,
        }
    }
}

#[async_trait]
impl Node for UdfNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let handler = self.handler.clone();
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("udf has no input"))?;
            'recv: while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                match handler.process(msg).await {
                    Ok(results) => {
                        for out_msg in results {
                            if !send_all(&outs, &out_msg, &stop).await? {
                                break 'recv;
                            }
                        }
                    }
                    Err(e) => {
                        error!(node = %name, error = %e, "udf handler failed");
                    }
                }
            }
            Ok(())
        });
        Ok(())
    }
}
