pub mod builder;
pub mod node;

pub use builder::NodeHandle;
pub use node::{
    AlertConfig, BatchConfig, DerivativeConfig, EdgeType, EvalConfig, GroupByConfig,
    HttpOutConfig, InfluxDbOutConfig, MapConfig, NodeConfig, ReduceConfig, SampleConfig,
    StatsConfig, StreamConfig, UdfConfig, WhereConfig, WindowConfig,
};

use std::collections::HashMap;
use std::fmt::Write as _;

pub type NodeId = usize;

/// A declarative pipeline node: identity, kind-specific configuration and
/// the edge types it consumes and produces.
#[derive(Debug, Clone)]
pub struct PipeNode {
    pub id: NodeId,
    pub config: NodeConfig,
    pub wants: EdgeType,
    pub provides: EdgeType,
}

impl PipeNode {
    /// Node names are the kind tag plus the integer id, unique within a
    /// pipeline by construction.
    pub fn name(&self) -> String {
        format!("{}{}", self.config.kind_name(), self.id)
    }
}

/// A declarative DAG of processing nodes with exactly one source.
///
/// Parent/child relations live in two index maps keyed by node id; nodes
/// themselves hold no cross-references. Insertion order is creation
/// order, and children are always created after their parents, so walking
/// the node list in order visits parents strictly before children.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    nodes: Vec<PipeNode>,
    parents_of: HashMap<NodeId, Vec<NodeId>>,
    children_of: HashMap<NodeId, Vec<NodeId>>,
}

impl Pipeline {
    /// New pipeline rooted at a stream source.
    pub fn stream() -> Self {
        let mut p = Pipeline::default();
        p.push(NodeConfig::Stream(StreamConfig::default()), &[]);
        p
    }

    /// New pipeline rooted at a batch source.
    pub fn batch() -> Self {
        let mut p = Pipeline::default();
        p.push(NodeConfig::SourceBatch, &[]);
        p
    }

    fn push(&mut self, config: NodeConfig, parents: &[NodeId]) -> NodeId {
        let id = self.nodes.len();
        let parent_provides = parents
            .first()
            .map(|p| self.nodes[*p].provides)
            .unwrap_or(EdgeType::Stream);
        let (wants, provides) = config.edge_types(parent_provides);
        self.nodes.push(PipeNode {
            id,
            config,
            wants,
            provides,
        });
        self.parents_of.insert(id, parents.to_vec());
        self.children_of.insert(id, Vec::new());
        for p in parents {
            self.children_of.get_mut(p).expect("parent exists").push(id);
        }
        id
    }

    /// Append a child of the given parents. Used by the builder handles
    /// and the script parser.
    pub fn add_child(&mut self, parents: &[NodeId], config: NodeConfig) -> NodeId {
        self.push(config, parents)
    }

    /// Handle to the pipeline's single source, always node 0.
    pub fn source(&mut self) -> NodeHandle<'_> {
        NodeHandle::new(self, 0)
    }

    /// Handle to an existing node, for continuing a chain from a bound
    /// variable.
    pub fn node(&mut self, id: NodeId) -> NodeHandle<'_> {
        assert!(id < self.nodes.len(), "no node {}", id);
        NodeHandle::new(self, id)
    }

    pub fn get(&self, id: NodeId) -> &PipeNode {
        &self.nodes[id]
    }

    pub fn config_mut(&mut self, id: NodeId) -> &mut NodeConfig {
        &mut self.nodes[id].config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        self.parents_of.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children_of.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Visit every node, parents before children, siblings in insertion
    /// order.
    pub fn walk<F>(&self, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(&PipeNode) -> anyhow::Result<()>,
    {
        for n in &self.nodes {
            f(n)?;
        }
        Ok(())
    }

    /// Graphviz rendering of the node graph.
    pub fn dot(&self, name: &str) -> String {
        let mut buf = String::new();
        let _ = writeln!(buf, "digraph {} {{", name);
        for n in &self.nodes {
            for child in self.children(n.id) {
                let _ = writeln!(
                    buf,
                    "  \"{}\" -> \"{}\";",
                    n.name(),
                    self.nodes[*child].name()
                );
            }
        }
        buf.push('}');
        buf
    }
}
