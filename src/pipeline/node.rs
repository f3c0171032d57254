use chrono::Duration;

/// Payload type carried by an edge, checked when nodes are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Stream,
    Batch,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::Stream => write!(f, "stream"),
            EdgeType::Batch => write!(f, "batch"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Only pass points of this measurement; empty passes everything.
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    pub query: String,
    pub every: Option<Duration>,
    pub database: String,
    pub retention_policy: String,
}

#[derive(Debug, Clone, Default)]
pub struct WindowConfig {
    pub period: Option<Duration>,
    pub every: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpOutConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Default)]
pub struct InfluxDbOutConfig {
    pub database: String,
    pub retention_policy: String,
    pub measurement: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    pub func: String,
    pub field: String,
    pub as_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReduceConfig {
    pub func: String,
    pub field: String,
    pub as_name: Option<String>,
}

/// Alert node configuration: level predicates, handler endpoints and flap
/// detection parameters.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub info: Option<String>,
    pub warn: Option<String>,
    pub crit: Option<String>,
    pub post: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub use_flapping: bool,
    pub flap_low: f64,
    pub flap_high: f64,
    pub history: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            info: None,
            warn: None,
            crit: None,
            post: None,
            from: None,
            to: Vec::new(),
            subject: None,
            use_flapping: false,
            flap_low: 0.25,
            flap_high: 0.5,
            history: crate::nodes::alert::DEFAULT_FLAP_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupByConfig {
    pub dims: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EvalConfig {
    pub expr: String,
    pub as_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WhereConfig {
    pub predicate: String,
}

#[derive(Debug, Clone, Default)]
pub struct SampleConfig {
    /// Pass every Nth payload; exclusive with `duration`.
    pub n: Option<i64>,
    /// Pass at most one payload per duration per group.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct DerivativeConfig {
    pub field: String,
    pub unit: Option<Duration>,
    pub as_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UdfConfig {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatsConfig {
    pub interval: Option<Duration>,
}

/// The closed node catalog. New kinds require editing this enum and the
/// linker's dispatch; there is no open extension at the engine level.
#[derive(Debug, Clone)]
pub enum NodeConfig {
    Stream(StreamConfig),
    SourceBatch,
    Batch(BatchConfig),
    Window(WindowConfig),
    HttpOut(HttpOutConfig),
    InfluxDbOut(InfluxDbOutConfig),
    Map(MapConfig),
    Reduce(ReduceConfig),
    Alert(AlertConfig),
    GroupBy(GroupByConfig),
    Union,
    Join,
    Eval(EvalConfig),
    Where(WhereConfig),
    Sample(SampleConfig),
    Derivative(DerivativeConfig),
    Udf(UdfConfig),
    Stats(StatsConfig),
}

impl NodeConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeConfig::Stream(_) => "stream",
            NodeConfig::SourceBatch => "source_batch",
            NodeConfig::Batch(_) => "batch",
            NodeConfig::Window(_) => "window",
            NodeConfig::HttpOut(_) => "http_out",
            NodeConfig::InfluxDbOut(_) => "influxdb_out",
            NodeConfig::Map(_) => "map",
            NodeConfig::Reduce(_) => "reduce",
            NodeConfig::Alert(_) => "alert",
            NodeConfig::GroupBy(_) => "group_by",
            NodeConfig::Union => "union",
            NodeConfig::Join => "join",
            NodeConfig::Eval(_) => "eval",
            NodeConfig::Where(_) => "where",
            NodeConfig::Sample(_) => "sample",
            NodeConfig::Derivative(_) => "derivative",
            NodeConfig::Udf(_) => "udf",
            NodeConfig::Stats(_) => "stats",
        }
    }

    /// The (wants, provides) edge types for this kind given the parent's
    /// provides type. Polymorphic kinds consume and produce their
    /// parent's type.
    pub fn edge_types(&self, parent_provides: EdgeType) -> (EdgeType, EdgeType) {
        match self {
            NodeConfig::Stream(_) => (EdgeType::Stream, EdgeType::Stream),
            NodeConfig::SourceBatch => (EdgeType::Batch, EdgeType::Batch),
            NodeConfig::Batch(_) => (EdgeType::Batch, EdgeType::Batch),
            NodeConfig::Window(_) => (EdgeType::Stream, EdgeType::Batch),
            NodeConfig::Map(_) => (EdgeType::Batch, EdgeType::Batch),
            NodeConfig::Reduce(_) => (EdgeType::Batch, EdgeType::Stream),
            NodeConfig::Stats(_) => (parent_provides, EdgeType::Stream),
            _ => (parent_provides, parent_provides),
        }
    }
}
