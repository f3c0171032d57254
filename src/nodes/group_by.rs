use crate::models::{GroupId, Tags};
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, GroupByConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Re-derives the group of every payload from the configured tag
/// dimensions, dropping all other tags.
pub struct GroupByNode {
    core: NodeCore,
    config: GroupByConfig,
}

impl GroupByNode {
    pub fn new(name: String, wants: EdgeType, config: GroupByConfig) -> Self {
        GroupByNode {
            core: NodeCore::new(name, wants, wants),
            config,
        }
    }
}

fn project(tags: &Tags, dims: &[String]) -> Tags {
    tags.iter()
        .filter(|(k, _)| dims.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl Node for GroupByNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let dims = self.config.dims.clone();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("group_by has no input"))?;
            while let Some(mut msg) = recv_or_stop(&mut input, &mut stop).await {
                match &mut msg {
                    Message::Point(p) => {
                        p.group = GroupId::from_dims(&p.name, &p.tags, &dims);
                        p.tags = project(&p.tags, &dims);
                    }
                    Message::Batch(b) => {
                        b.group = GroupId::from_dims(&b.name, &b.tags, &dims);
                        b.tags = project(&b.tags, &dims);
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
