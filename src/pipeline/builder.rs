use crate::pipeline::node::*;
use crate::pipeline::{NodeId, Pipeline};
use chrono::Duration;

/// Chaining handle over one pipeline node.
///
/// Child-creating methods append a new node and return a handle to it;
/// property methods mutate the current node's configuration and return
/// the same handle. `id()` extracts the node id so a chain can be
/// resumed later via `Pipeline::node`.
pub struct NodeHandle<'a> {
    p: &'a mut Pipeline,
    id: NodeId,
}

impl<'a> NodeHandle<'a> {
    pub(crate) fn new(p: &'a mut Pipeline, id: NodeId) -> Self {
        NodeHandle { p, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn child(self, config: NodeConfig) -> NodeHandle<'a> {
        let id = self.p.add_child(&[self.id], config);
        NodeHandle { p: self.p, id }
    }

    fn child_with(self, other: NodeId, config: NodeConfig) -> NodeHandle<'a> {
        let id = self.p.add_child(&[self.id, other], config);
        NodeHandle { p: self.p, id }
    }

    // --- Child-creating methods ---

    pub fn from(self, measurement: Option<&str>) -> NodeHandle<'a> {
        self.child(NodeConfig::Stream(StreamConfig {
            from: measurement.map(str::to_string),
        }))
    }

    pub fn query(self, q: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Batch(BatchConfig {
            query: q.to_string(),
            ..BatchConfig::default()
        }))
    }

    pub fn window(self) -> NodeHandle<'a> {
        self.child(NodeConfig::Window(WindowConfig::default()))
    }

    pub fn http_out(self, endpoint: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::HttpOut(HttpOutConfig {
            endpoint: endpoint.to_string(),
        }))
    }

    pub fn influxdb_out(self) -> NodeHandle<'a> {
        self.child(NodeConfig::InfluxDbOut(InfluxDbOutConfig::default()))
    }

    pub fn map(self, func: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Map(MapConfig {
            func: func.to_string(),
            ..MapConfig::default()
        }))
    }

    pub fn reduce(self, func: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Reduce(ReduceConfig {
            func: func.to_string(),
            ..ReduceConfig::default()
        }))
    }

    pub fn alert(self) -> NodeHandle<'a> {
        self.child(NodeConfig::Alert(AlertConfig::default()))
    }

    pub fn group_by(self, dim: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::GroupBy(GroupByConfig {
            dims: vec![dim.to_string()],
        }))
    }

    pub fn union(self, other: NodeId) -> NodeHandle<'a> {
        self.child_with(other, NodeConfig::Union)
    }

    pub fn join(self, other: NodeId) -> NodeHandle<'a> {
        self.child_with(other, NodeConfig::Join)
    }

    pub fn eval(self, expr: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Eval(EvalConfig {
            expr: expr.to_string(),
            as_name: None,
        }))
    }

    pub fn where_filter(self, predicate: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Where(WhereConfig {
            predicate: predicate.to_string(),
        }))
    }

    pub fn sample_n(self, n: i64) -> NodeHandle<'a> {
        self.child(NodeConfig::Sample(SampleConfig {
            n: Some(n),
            duration: None,
        }))
    }

    pub fn sample_every(self, d: Duration) -> NodeHandle<'a> {
        self.child(NodeConfig::Sample(SampleConfig {
            n: None,
            duration: Some(d),
        }))
    }

    pub fn derivative(self, field: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Derivative(DerivativeConfig {
            field: field.to_string(),
            ..DerivativeConfig::default()
        }))
    }

    pub fn udf(self, name: &str) -> NodeHandle<'a> {
        self.child(NodeConfig::Udf(UdfConfig {
            name: name.to_string(),
        }))
    }

    pub fn stats(self, interval: Duration) -> NodeHandle<'a> {
        self.child(NodeConfig::Stats(StatsConfig {
            interval: Some(interval),
        }))
    }

    // --- Property methods ---

    fn with_config(self, f: impl FnOnce(&mut NodeConfig)) -> Self {
        f(self.p.config_mut(self.id));
        self
    }

    pub fn period(self, d: Duration) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Window(w) = c {
                w.period = Some(d);
            }
        })
    }

    pub fn every(self, d: Duration) -> Self {
        self.with_config(|c| match c {
            NodeConfig::Window(w) => w.every = Some(d),
            NodeConfig::Batch(b) => b.every = Some(d),
            _ => {}
        })
    }

    pub fn database(self, db: &str) -> Self {
        self.with_config(|c| match c {
            NodeConfig::Batch(b) => b.database = db.to_string(),
            NodeConfig::InfluxDbOut(o) => o.database = db.to_string(),
            _ => {}
        })
    }

    pub fn retention_policy(self, rp: &str) -> Self {
        self.with_config(|c| match c {
            NodeConfig::Batch(b) => b.retention_policy = rp.to_string(),
            NodeConfig::InfluxDbOut(o) => o.retention_policy = rp.to_string(),
            _ => {}
        })
    }

    pub fn measurement(self, m: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::InfluxDbOut(o) = c {
                o.measurement = Some(m.to_string());
            }
        })
    }

    pub fn field(self, field: &str) -> Self {
        self.with_config(|c| match c {
            NodeConfig::Map(m) => m.field = field.to_string(),
            NodeConfig::Reduce(r) => r.field = field.to_string(),
            _ => {}
        })
    }

    pub fn as_name(self, name: &str) -> Self {
        self.with_config(|c| match c {
            NodeConfig::Map(m) => m.as_name = Some(name.to_string()),
            NodeConfig::Reduce(r) => r.as_name = Some(name.to_string()),
            NodeConfig::Eval(e) => e.as_name = Some(name.to_string()),
            NodeConfig::Derivative(d) => d.as_name = Some(name.to_string()),
            _ => {}
        })
    }

    pub fn unit(self, d: Duration) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Derivative(dv) = c {
                dv.unit = Some(d);
            }
        })
    }

    pub fn info(self, predicate: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.info = Some(predicate.to_string());
            }
        })
    }

    pub fn warn(self, predicate: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.warn = Some(predicate.to_string());
            }
        })
    }

    pub fn crit(self, predicate: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.crit = Some(predicate.to_string());
            }
        })
    }

    pub fn post(self, url: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.post = Some(url.to_string());
            }
        })
    }

    pub fn email(self, from: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.from = Some(from.to_string());
            }
        })
    }

    pub fn to(self, addr: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.to.push(addr.to_string());
            }
        })
    }

    pub fn subject(self, s: &str) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.subject = Some(s.to_string());
            }
        })
    }

    pub fn flapping(self) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.use_flapping = true;
            }
        })
    }

    pub fn flap_low(self, v: f64) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.flap_low = v;
            }
        })
    }

    pub fn flap_high(self, v: f64) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.flap_high = v;
            }
        })
    }

    pub fn history(self, h: usize) -> Self {
        self.with_config(|c| {
            if let NodeConfig::Alert(a) = c {
                a.history = h;
            }
        })
    }
}
