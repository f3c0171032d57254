use crate::errors::EngineError;
use crate::nodes;
use crate::nodes::http_out::HttpOutCache;
use crate::pipeline::{NodeConfig, Pipeline};
use crate::runtime::edge::EdgeReceiver;
use crate::runtime::node::{Node, SnapshotFn};
use crate::services::Services;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The type of a task: whether its source ingests live points or batched
/// query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Stream,
    Batch,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Stream => write!(f, "stream"),
            TaskType::Batch => write!(f, "batch"),
        }
    }
}

/// Database and retention policy pair scoping allowed batch queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dbrp {
    pub db: String,
    pub rp: String,
}

impl fmt::Display for Dbrp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{:?}", self.db, self.rp)
    }
}

/// The complete definition of a task: its name, pipeline, type, allowed
/// DBRPs and snapshot interval.
pub struct Task {
    pub name: String,
    pub pipeline: Pipeline,
    pub task_type: TaskType,
    pub dbrps: Vec<Dbrp>,
    pub snapshot_interval: Duration,
}

impl Task {
    pub fn dot(&self) -> String {
        self.pipeline.dot(&self.name)
    }
}

/// Opaque per-node state captured on a schedule to permit warm restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub node_snapshots: HashMap<String, Vec<u8>>,
}

impl TaskSnapshot {
    pub fn size(&self) -> usize {
        self.node_snapshots.values().map(Vec::len).sum()
    }
}

/// A task materialized into runnable nodes and ready for execution.
///
/// Linking walks the pipeline in topological order, instantiates the
/// runtime node for each declarative node and wires typed edges from
/// parents to children. The executing task exclusively owns its nodes
/// for its lifetime.
pub struct ExecutingTask {
    pub task: Task,
    services: Arc<Services>,
    nodes: Vec<Box<dyn Node>>,
    outputs: HashMap<String, Arc<HttpOutCache>>,
    snapshot_stop: Option<watch::Sender<bool>>,
    snapshot_handle: Option<JoinHandle<()>>,
}

impl ExecutingTask {
    /// Link the task's pipeline into runtime nodes.
    pub fn new(services: Arc<Services>, task: Task) -> Result<Self> {
        let mut et = ExecutingTask {
            task,
            services,
            nodes: Vec::new(),
            outputs: HashMap::new(),
            snapshot_stop: None,
            snapshot_handle: None,
        };
        et.link()?;
        Ok(et)
    }

    fn link(&mut self) -> Result<()> {
        let pipeline = self.task.pipeline.clone();
        pipeline.walk(|pn| {
            let mut node = self.create_node(pn)?;
            for pid in pipeline.parents(pn.id) {
                // parents precede children in walk order, so the parent
                // runtime node already exists at its pipeline index
                let parent = self
                    .nodes
                    .get_mut(*pid)
                    .ok_or_else(|| EngineError::Link(format!("unlinked parent {}", pid)))?;
                parent.link_child(node.as_mut())?;
            }
            if node.core().in_count() != pipeline.parents(pn.id).len() {
                return Err(EngineError::Link(format!(
                    "{} has {} input edges for {} parents",
                    node.name(),
                    node.core().in_count(),
                    pipeline.parents(pn.id).len()
                ))
                .into());
            }
            self.nodes.push(node);
            Ok(())
        })
    }

    /// Instantiate the runtime node for a declarative node.
    fn create_node(&mut self, pn: &crate::pipeline::PipeNode) -> Result<Box<dyn Node>> {
        let name = pn.name();
        let node: Box<dyn Node> = match &pn.config {
            NodeConfig::Stream(c) => Box::new(nodes::stream::StreamNode::new(name, c.clone())),
            NodeConfig::SourceBatch => Box::new(nodes::batch::SourceBatchNode::new(name)),
            NodeConfig::Batch(c) => Box::new(nodes::batch::BatchNode::new(
                name,
                c.clone(),
                self.services.query.clone(),
            )?),
            NodeConfig::Window(c) => Box::new(nodes::window::WindowNode::new(name, c.clone())?),
            NodeConfig::HttpOut(c) => {
                let node = nodes::http_out::HttpOutNode::new(name, pn.wants, c.clone());
                let cache = node.cache();
                self.outputs.insert(c.endpoint.clone(), cache);
                Box::new(node)
            }
            NodeConfig::InfluxDbOut(c) => Box::new(nodes::influxdb_out::InfluxDbOutNode::new(
                name,
                pn.wants,
                c.clone(),
                self.services.query.clone(),
            )?),
            NodeConfig::Map(c) => Box::new(nodes::map_reduce::MapNode::new(name, c.clone())?),
            NodeConfig::Reduce(c) => Box::new(nodes::map_reduce::ReduceNode::new(name, c.clone())?),
            NodeConfig::Alert(c) => Box::new(nodes::alert::AlertNode::new(
                name,
                pn.wants,
                c.clone(),
                self.services.smtp.clone(),
            )?),
            NodeConfig::GroupBy(c) => {
                Box::new(nodes::group_by::GroupByNode::new(name, pn.wants, c.clone()))
            }
            NodeConfig::Union => Box::new(nodes::union::UnionNode::new(name, pn.wants)),
            NodeConfig::Join => Box::new(nodes::join::JoinNode::new(name, pn.wants)),
            NodeConfig::Eval(c) => Box::new(nodes::eval::EvalNode::new(name, pn.wants, c.clone())?),
            NodeConfig::Where(c) => {
                Box::new(nodes::where_node::WhereNode::new(name, pn.wants, c.clone())?)
            }
            NodeConfig::Sample(c) => {
                Box::new(nodes::sample::SampleNode::new(name, pn.wants, c.clone())?)
            }
            NodeConfig::Derivative(c) => {
                Box::new(nodes::derivative::DerivativeNode::new(name, pn.wants, c.clone())?)
            }
            NodeConfig::Udf(c) => {
                let handler = self.services.udfs.get(&c.name).cloned().ok_or_else(|| {
                    EngineError::Config(format!("no udf handler registered for {:?}", c.name))
                })?;
                Box::new(nodes::udf::UdfNode::new(name, pn.wants, handler))
            }
            NodeConfig::Stats(c) => {
                let parent = self
                    .task
                    .pipeline
                    .parents(pn.id)
                    .first()
                    .copied()
                    .ok_or_else(|| EngineError::Link("stats node has no parent".to_string()))?;
                let observed = self.nodes[parent].core().out_edges_handle();
                Box::new(nodes::stats::StatsNode::new(name, pn.wants, c.clone(), observed)?)
            }
        };
        Ok(node)
    }

    /// Start every node, feeding the source from the given external
    /// edges. A snapshot is used only when it covers every node name;
    /// otherwise the task cold-starts.
    pub fn start(&mut self, ins: Vec<EdgeReceiver>, snapshot: Option<&TaskSnapshot>) -> Result<()> {
        for edge in ins {
            self.nodes[0].add_parent_edge(edge);
        }
        let valid_snapshot = match snapshot {
            Some(s) => {
                let complete = self
                    .nodes
                    .iter()
                    .all(|n| s.node_snapshots.contains_key(n.name()));
                if !complete {
                    warn!(
                        task = %self.task.name,
                        "task pipeline changed, not using snapshot"
                    );
                }
                complete
            }
            None => false,
        };
        for n in &mut self.nodes {
            let bytes = if valid_snapshot {
                snapshot.and_then(|s| s.node_snapshots.get(n.name()).cloned())
            } else {
                None
            };
            n.start(bytes)?;
        }
        if self.task.snapshot_interval > Duration::ZERO {
            let (tx, rx) = watch::channel(false);
            let sources: Vec<(String, SnapshotFn)> = self
                .nodes
                .iter()
                .map(|n| (n.name().to_string(), n.snapshot_fn()))
                .collect();
            self.snapshot_stop = Some(tx);
            self.snapshot_handle = Some(tokio::spawn(run_snapshotter(
                self.task.name.clone(),
                self.task.snapshot_interval,
                sources,
                self.services.task_store.clone(),
                rx,
            )));
        }
        info!(task = %self.task.name, "task started");
        Ok(())
    }

    /// Stop the snapshotter and every node, returning the last node
    /// error observed, if any. Synchronous in effect: returns only after
    /// every worker has exited.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.snapshot_stop.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.snapshot_handle.take() {
            let _ = handle.await;
        }
        let mut err = None;
        for n in &mut self.nodes {
            n.stop().await;
            if let Some(e) = n.err() {
                err = Some(e);
            }
        }
        info!(task = %self.task.name, "task stopped");
        match err {
            Some(e) => Err(anyhow!(e)),
            None => Ok(()),
        }
    }

    /// Wait for every worker to finish on its own (all inputs closed),
    /// without forcing a stop.
    pub async fn wait(&mut self) {
        for n in &mut self.nodes {
            n.join().await;
        }
    }

    /// First node error in reverse walk order.
    pub fn err(&self) -> Result<()> {
        for n in self.nodes.iter().rev() {
            if let Some(e) = n.err() {
                return Err(anyhow!(e));
            }
        }
        Ok(())
    }

    /// Capture the restorable state of every node.
    pub fn snapshot(&self) -> Result<TaskSnapshot> {
        let mut snapshot = TaskSnapshot::default();
        for n in &self.nodes {
            snapshot
                .node_snapshots
                .insert(n.name().to_string(), n.snapshot()?);
        }
        Ok(snapshot)
    }

    /// A registered output by name.
    pub fn get_output(&self, name: &str) -> Result<Arc<HttpOutCache>> {
        self.outputs
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownOutput(name.to_string()).into())
    }

    /// Instruct the batch source to start querying and emitting batches.
    /// Rejected unless every queried DBRP is in the task's allowed set.
    pub fn start_batching(&self) -> Result<()> {
        let batches = self.batch_nodes()?;
        self.check_dbrps(&batches)?;
        for b in batches {
            b.trigger();
        }
        Ok(())
    }

    pub fn batch_count(&self) -> Result<usize> {
        Ok(self.batch_nodes()?.len())
    }

    /// The queries each batch node would run between start and stop.
    pub fn batch_queries(
        &self,
        start: chrono::DateTime<chrono::Utc>,
        stop: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Vec<String>>> {
        let batches = self.batch_nodes()?;
        self.check_dbrps(&batches)?;
        Ok(batches.iter().map(|b| b.queries(start, stop)).collect())
    }

    fn batch_nodes(&self) -> Result<Vec<&nodes::batch::BatchNode>> {
        if self.task.task_type != TaskType::Batch {
            return Err(EngineError::WrongTaskType.into());
        }
        Ok(self.nodes.iter().filter_map(|n| n.as_batch()).collect())
    }

    fn check_dbrps(&self, batches: &[&nodes::batch::BatchNode]) -> Result<()> {
        let allowed: HashSet<&Dbrp> = self.task.dbrps.iter().collect();
        for b in batches {
            let dbrp = b.dbrp();
            if !allowed.contains(&dbrp) {
                return Err(anyhow!(
                    "batch query is not allowed to request data from {}",
                    dbrp
                ));
            }
        }
        Ok(())
    }

    /// Graphviz rendering with execution counts on the edges.
    pub fn edot(&self) -> String {
        let mut buf = String::new();
        buf.push_str("digraph ");
        buf.push_str(&self.task.name);
        buf.push_str(" {\n");
        for n in &self.nodes {
            n.edot(&mut buf);
        }
        buf.push('}');
        buf
    }
}

/// Periodic snapshot worker: splay, then capture on every tick and hand
/// non-empty snapshots to the task store.
async fn run_snapshotter(
    task_name: String,
    interval: Duration,
    sources: Vec<(String, SnapshotFn)>,
    store: Option<Arc<dyn crate::services::TaskStore>>,
    mut stop: watch::Receiver<bool>,
) {
    // splay snapshot events across the interval
    let splay = interval.mul_f64(rand::random::<f64>());
    tokio::select! {
        _ = tokio::time::sleep(splay) => {}
        _ = stop.changed() => return,
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut snapshot = TaskSnapshot::default();
                let mut failed = false;
                for (name, capture) in &sources {
                    match capture() {
                        Ok(bytes) => {
                            snapshot.node_snapshots.insert(name.clone(), bytes);
                        }
                        Err(e) => {
                            error!(task = %task_name, node = %name, error = %e, "failed to snapshot task");
                            failed = true;
                            break;
                        }
                    }
                }
                if failed || snapshot.size() == 0 {
                    continue;
                }
                if let Some(store) = &store {
                    if let Err(e) = store.save_snapshot(&task_name, &snapshot).await {
                        error!(task = %task_name, error = %e, "failed to save task snapshot");
                    }
                }
            }
            _ = stop.changed() => return,
        }
    }
}
