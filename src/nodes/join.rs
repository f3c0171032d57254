use crate::models::{Batch, Fields, GroupId, Point, TimeFields};
use crate::nodes::{merge_inputs, send_all};
use crate::pipeline::EdgeType;
use crate::runtime::edge::Message;
use crate::runtime::node::{Node, NodeCore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Pairs payloads from two parents on (time, group) and merges their
/// fields, prefixed with the originating parent's node name. Payloads
/// that never find a partner are dropped when the inputs close.
pub struct JoinNode {
    core: NodeCore,
}

impl JoinNode {
    pub fn new(name: String, wants: EdgeType) -> Self {
        JoinNode {
            core: NodeCore::new(name, wants, wants),
        }
    }
}

fn prefix_fields<'a>(
    prefix: &'a str,
    fields: &'a Fields,
) -> impl Iterator<Item = (String, crate::models::FieldValue)> + 'a {
    fields
        .iter()
        .map(move |(k, v)| (format!("{}.{}", prefix, k), v.clone()))
}

fn join_points(prefixes: &[String; 2], left: &Point, right: &Point) -> Point {
    let mut fields = Fields::new();
    fields.extend(prefix_fields(&prefixes[0], &left.fields));
    fields.extend(prefix_fields(&prefixes[1], &right.fields));
    let mut tags = right.tags.clone();
    tags.extend(left.tags.clone());
    Point {
        name: left.name.clone(),
        time: left.time,
        group: left.group.clone(),
        tags,
        fields,
    }
}

fn join_batches(prefixes: &[String; 2], left: &Batch, right: &Batch) -> Batch {
    let mut rows: BTreeMap<DateTime<Utc>, Fields> = BTreeMap::new();
    for tf in &left.points {
        rows.entry(tf.time)
            .or_default()
            .extend(prefix_fields(&prefixes[0], &tf.fields));
    }
    for tf in &right.points {
        rows.entry(tf.time)
            .or_default()
            .extend(prefix_fields(&prefixes[1], &tf.fields));
    }
    let mut tags = right.tags.clone();
    tags.extend(left.tags.clone());
    Batch {
        name: left.name.clone(),
        group: left.group.clone(),
        tags,
        points: rows
            .into_iter()
            .map(|(time, fields)| TimeFields { time, fields })
            .collect(),
    }
}

#[async_trait]
impl Node for JoinNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (ins, outs) = self.core.take_io();
        let stop = self.core.stop_rx();
        if ins.len() != 2 {
            return Err(anyhow!("join requires exactly two parents"));
        }
        // field prefixes come from the parent node names baked into the
        // edge names
        let prefixes: [String; 2] = [
            ins[0].name().split("->").next().unwrap_or("left").to_string(),
            ins[1].name().split("->").next().unwrap_or("right").to_string(),
        ];
        self.core.spawn(async move {
            let mut inputs = merge_inputs(ins, &stop);
            let mut pending_points: HashMap<(DateTime<Utc>, GroupId), [Option<Point>; 2]> =
                HashMap::new();
            let mut pending_batches: [HashMap<GroupId, VecDeque<Batch>>; 2] =
                [HashMap::new(), HashMap::new()];
            while let Some((idx, msg)) = inputs.recv().await {
                match msg {
                    Message::Point(p) => {
                        let key = (p.time, p.group.clone());
                        let slot = pending_points.entry(key.clone()).or_default();
                        slot[idx] = Some(p);
                        if slot.iter().all(Option::is_some) {
                            let slot = pending_points.remove(&key).expect("pending entry");
                            let joined = join_points(
                                &prefixes,
                                slot[0].as_ref().expect("left point"),
                                slot[1].as_ref().expect("right point"),
                            );
                            if !send_all(&outs, &Message::Point(joined), &stop).await? {
                                break;
                            }
                        }
                    }
                    Message::Batch(b) => {
                        let other = 1 - idx;
                        let group = b.group.clone();
                        if let Some(partner) = pending_batches[other]
                            .get_mut(&group)
                            .and_then(VecDeque::pop_front)
                        {
                            let (left, right) = if idx == 0 {
                                (&b, &partner)
                            } else {
                                (&partner, &b)
                            };
                            let joined = join_batches(&prefixes, left, right);
                            if !send_all(&outs, &Message::Batch(joined), &stop).await? {
                                break;
                            }
                        } else {
                            pending_batches[idx].entry(group).or_default().push_back(b);
                        }
                    }
                }
            }
            Ok(())
        });
        Ok(())
    }
}
