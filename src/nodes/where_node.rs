use crate::expr::{compile, ReturnType, StatefulExpr};
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, WhereConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::error;

/// Filters payloads by a predicate. A predicate evaluation error is
/// logged and the record is dropped; the node keeps running.
pub struct WhereNode {
    core: NodeCore,
    predicate: Option<StatefulExpr>,
}

impl WhereNode {
    pub fn new(name: String, wants: EdgeType, config: WhereConfig) -> Result<Self> {
        let tree = compile(&config.predicate, ReturnType::Bool)?;
        Ok(WhereNode {
            core: NodeCore::new(name, wants, wants),
            predicate: Some(StatefulExpr::new(tree)),
        })
    }
}

#[async_trait]
impl Node for WhereNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let mut predicate = self
            .predicate
            .take()
            .ok_or_else(|| anyhow!("where node already started"))?;
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("where has no input"))?;
            while let Some(mut msg) = recv_or_stop(&mut input, &mut stop).await {
                match &mut msg {
                    Message::Point(p) => match predicate.eval_bool(&p.fields, &p.tags) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            error!(node = %name, error = %e, "error evaluating predicate");
                            continue;
                        }
                    },
                    Message::Batch(b) => {
                        let tags = b.tags.clone();
                        b.points.retain(|tf| {
                            match predicate.eval_bool(&tf.fields, &tags) {
                                Ok(keep) => keep,
                                Err(e) => {
                                    error!(node = %name, error = %e, "error evaluating predicate");
                                    false
                                }
                            }
                        });
                        if b.points.is_empty() {
                            continue;
                        }
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
