use crate::errors::EngineError;
use crate::pipeline::EdgeType;
use crate::runtime::edge::{edge, EdgeReceiver, EdgeSender, EdgeStats};
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

/// Lifecycle of a runtime node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Running,
    Stopped,
}

/// State and terminal error of a node, shared with its worker.
#[derive(Debug)]
pub struct NodeStatus {
    name: String,
    state: Mutex<NodeState>,
    err: Mutex<Option<String>>,
}

impl NodeStatus {
    fn new(name: String) -> Arc<Self> {
        Arc::new(NodeStatus {
            name,
            state: Mutex::new(NodeState::Created),
            err: Mutex::new(None),
        })
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock().expect("node state lock")
    }

    fn set_state(&self, s: NodeState) {
        *self.state.lock().expect("node state lock") = s;
    }

    pub fn err(&self) -> Option<String> {
        self.err.lock().expect("node err lock").clone()
    }

    /// Record the worker's result and transition to Stopped.
    fn finish(&self, res: Result<()>) {
        if let Err(e) = res {
            error!(node = %self.name, error = %e, "node worker failed");
            *self.err.lock().expect("node err lock") = Some(format!("{:#}", e));
        }
        self.set_state(NodeState::Stopped);
    }
}

/// Closure capturing a node's snapshot state, handed to the task
/// snapshotter so it can capture state without holding the node itself.
pub type SnapshotFn = Arc<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;

/// Shared view of a node's output edges: child name plus counters per
/// edge. The stats node holds its parent's handle and sums the counters
/// on every tick.
pub type OutEdges = Arc<Mutex<Vec<(String, Arc<EdgeStats>)>>>;

/// Shared plumbing owned by every runtime node: identity, edge ends, the
/// stop signal and the worker handle. Input and output edges are taken by
/// the worker at start.
pub struct NodeCore {
    name: String,
    wants: EdgeType,
    provides: EdgeType,
    ins: Vec<EdgeReceiver>,
    outs: Vec<EdgeSender>,
    // child name and stats per output edge, retained for edot and stats
    out_edges: OutEdges,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    status: Arc<NodeStatus>,
    handle: Option<JoinHandle<()>>,
}

impl NodeCore {
    pub fn new(name: String, wants: EdgeType, provides: EdgeType) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let status = NodeStatus::new(name.clone());
        NodeCore {
            name,
            wants,
            provides,
            ins: Vec::new(),
            outs: Vec::new(),
            out_edges: Arc::new(Mutex::new(Vec::new())),
            stop_tx,
            stop_rx,
            status,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wants(&self) -> EdgeType {
        self.wants
    }

    pub fn provides(&self) -> EdgeType {
        self.provides
    }

    pub fn status(&self) -> Arc<NodeStatus> {
        self.status.clone()
    }

    pub fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn add_parent_edge(&mut self, edge: EdgeReceiver) {
        self.ins.push(edge);
    }

    /// Create a typed edge to the child, rejecting a wants/provides
    /// mismatch.
    pub fn link_child(&mut self, child: &mut dyn Node) -> Result<()> {
        if child.wants() != self.provides {
            return Err(EngineError::Link(format!(
                "{} provides {} but {} wants {}",
                self.name,
                self.provides,
                child.name(),
                child.wants()
            ))
            .into());
        }
        let (tx, rx) = edge(self.provides, format!("{}->{}", self.name, child.name()));
        self.out_edges
            .lock()
            .expect("out edges lock")
            .push((child.name().to_string(), tx.stats()));
        self.outs.push(tx);
        child.add_parent_edge(rx);
        Ok(())
    }

    pub fn out_edges_handle(&self) -> OutEdges {
        self.out_edges.clone()
    }

    /// Hand the edge ends to the worker. Called exactly once, at start.
    pub fn take_io(&mut self) -> (Vec<EdgeReceiver>, Vec<EdgeSender>) {
        (
            std::mem::take(&mut self.ins),
            std::mem::take(&mut self.outs),
        )
    }

    pub fn in_count(&self) -> usize {
        self.ins.len()
    }

    /// Spawn the node's worker. The future's result is recorded as the
    /// node's terminal error; output edges close when the future drops
    /// its senders.
    pub fn spawn<Fut>(&mut self, fut: Fut)
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let status = self.status.clone();
        status.set_state(NodeState::Running);
        self.handle = Some(tokio::spawn(async move {
            let res = fut.await;
            status.finish(res);
        }));
    }

    /// Wait for the worker to exit on its own, without signaling a stop.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Signal the worker and wait for it to exit. Idempotent; blocked
    /// edge reads wake via the stop signal.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if self.status.state() != NodeState::Stopped {
            self.status.set_state(NodeState::Stopped);
        }
    }

    /// Payloads this node has pushed to its children.
    pub fn emitted(&self) -> i64 {
        self.out_edges
            .lock()
            .expect("out edges lock")
            .iter()
            .map(|(_, s)| s.collected.load(Ordering::Relaxed))
            .sum()
    }

    pub fn edot(&self, buf: &mut String) {
        use std::fmt::Write as _;
        for (child, stats) in self.out_edges.lock().expect("out edges lock").iter() {
            let _ = writeln!(
                buf,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                self.name,
                child,
                stats.collected.load(Ordering::Relaxed)
            );
        }
    }
}

/// The uniform runtime node contract. One implementation per catalog
/// kind; the linker dispatches on the declarative kind and the executing
/// task drives the lifecycle.
#[async_trait]
pub trait Node: Send {
    fn core(&self) -> &NodeCore;
    fn core_mut(&mut self) -> &mut NodeCore;

    /// Spawn the worker, restoring from the given snapshot bytes.
    fn start(&mut self, snapshot: Option<Vec<u8>>) -> Result<()>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn wants(&self) -> EdgeType {
        self.core().wants()
    }

    fn provides(&self) -> EdgeType {
        self.core().provides()
    }

    async fn stop(&mut self) {
        self.core_mut().stop().await;
    }

    /// Wait for the worker to finish draining, without forcing a stop.
    async fn join(&mut self) {
        self.core_mut().join().await;
    }

    fn err(&self) -> Option<String> {
        self.core().status.err()
    }

    fn state(&self) -> NodeState {
        self.core().status.state()
    }

    /// Opaque bytes capturing this node's restorable state. Stateless
    /// kinds return empty bytes.
    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Capture closure for the periodic snapshotter.
    fn snapshot_fn(&self) -> SnapshotFn {
        Arc::new(|| Ok(Vec::new()))
    }

    fn link_child(&mut self, child: &mut dyn Node) -> Result<()> {
        self.core_mut().link_child(child)
    }

    fn add_parent_edge(&mut self, edge: EdgeReceiver) {
        self.core_mut().add_parent_edge(edge);
    }

    fn emitted(&self) -> i64 {
        self.core().emitted()
    }

    fn edot(&self, buf: &mut String) {
        self.core().edot(buf);
    }

    /// Downcast hook for the batch source machinery; the executing task
    /// uses it to collect queries and trigger batching.
    fn as_batch(&self) -> Option<&crate::nodes::batch::BatchNode> {
        None
    }
}
