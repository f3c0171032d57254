use crate::dsl::lexer::{self, Lexer, Token, TokenKind};
use crate::errors::EngineError;
use crate::pipeline::{NodeConfig, NodeId, Pipeline};
use crate::pipeline::node::*;
use crate::runtime::task::TaskType;
use std::collections::HashMap;

/// Parse a task script into its declarative pipeline.
///
/// The script is a sequence of statements, each a chain of method calls
/// off the task source (`stream` or `batch`) or off a variable bound with
/// `var`:
///
/// ```text
/// var x = stream.from().window().period(10s).every(10s)
/// x.map('avg').field('value').alert().crit('value > 90')
/// ```
pub fn parse_script(src: &str, task_type: TaskType) -> Result<Pipeline, EngineError> {
    let mut p = ScriptParser::new(src, task_type)?;
    p.program()?;
    Ok(p.pipeline)
}

/// A literal method argument.
enum Arg {
    Int(i64),
    Float(f64),
    Dur(chrono::Duration),
    Str(String),
    Ident(String),
}

struct ScriptParser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    task_type: TaskType,
    pipeline: Pipeline,
    bindings: HashMap<String, NodeId>,
}

impl<'a> ScriptParser<'a> {
    fn new(src: &'a str, task_type: TaskType) -> Result<Self, EngineError> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        let pipeline = match task_type {
            TaskType::Stream => Pipeline::stream(),
            TaskType::Batch => Pipeline::batch(),
        };
        Ok(ScriptParser {
            lexer,
            current,
            task_type,
            pipeline,
            bindings: HashMap::new(),
        })
    }

    fn advance(&mut self) -> Result<Token, EngineError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, EngineError> {
        if self.current.kind == kind {
            self.advance()
        } else {
            Err(self.unexpected(&format!("expected {:?}", kind)))
        }
    }

    fn unexpected(&self, msg: &str) -> EngineError {
        EngineError::Parse {
            pos: self.current.pos,
            msg: format!("{}, found {:?}", msg, self.current.kind),
        }
    }

    fn program(&mut self) -> Result<(), EngineError> {
        while self.current.kind != TokenKind::Eof {
            self.statement()?;
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<(), EngineError> {
        if self.current.kind == TokenKind::Var {
            self.advance()?;
            let name = self.expect(TokenKind::Ident)?;
            self.expect(TokenKind::Asgn)?;
            let node = self.chain()?;
            self.bindings.insert(name.literal, node);
            Ok(())
        } else {
            self.chain()?;
            Ok(())
        }
    }

    fn chain(&mut self) -> Result<NodeId, EngineError> {
        let head = self.expect(TokenKind::Ident)?;
        let mut node = match head.literal.as_str() {
            "stream" => {
                if self.task_type != TaskType::Stream {
                    return Err(EngineError::Parse {
                        pos: head.pos,
                        msg: "stream source in a batch task".to_string(),
                    });
                }
                0
            }
            "batch" => {
                if self.task_type != TaskType::Batch {
                    return Err(EngineError::Parse {
                        pos: head.pos,
                        msg: "batch source in a stream task".to_string(),
                    });
                }
                0
            }
            name => *self.bindings.get(name).ok_or(EngineError::Parse {
                pos: head.pos,
                msg: format!("undefined variable {}", name),
            })?,
        };
        while self.current.kind == TokenKind::Dot {
            self.advance()?;
            let method = self.expect(TokenKind::Ident)?;
            self.expect(TokenKind::LParen)?;
            let args = self.args()?;
            self.expect(TokenKind::RParen)?;
            node = self.apply(node, &method, args)?;
        }
        Ok(node)
    }

    fn args(&mut self) -> Result<Vec<Arg>, EngineError> {
        let mut args = Vec::new();
        while self.current.kind != TokenKind::RParen {
            let tok = self.advance()?;
            let arg = match tok.kind {
                TokenKind::Number => {
                    if tok.literal.contains('.') {
                        Arg::Float(tok.literal.parse().map_err(|_| EngineError::Parse {
                            pos: tok.pos,
                            msg: format!("invalid number {}", tok.literal),
                        })?)
                    } else {
                        Arg::Int(tok.literal.parse().map_err(|_| EngineError::Parse {
                            pos: tok.pos,
                            msg: format!("invalid number {}", tok.literal),
                        })?)
                    }
                }
                TokenKind::Duration => Arg::Dur(lexer::parse_duration(&tok.literal)?),
                TokenKind::Str => Arg::Str(lexer::unquote_string(&tok.literal)),
                TokenKind::Reference => Arg::Str(lexer::unquote_reference(&tok.literal)),
                TokenKind::Ident => Arg::Ident(tok.literal),
                other => {
                    return Err(EngineError::Parse {
                        pos: tok.pos,
                        msg: format!("invalid method argument {:?}", other),
                    })
                }
            };
            args.push(arg);
        }
        Ok(args)
    }

    fn err(&self, tok: &Token, msg: impl Into<String>) -> EngineError {
        EngineError::Parse {
            pos: tok.pos,
            msg: msg.into(),
        }
    }

    fn arg_str(&self, method: &Token, args: &[Arg]) -> Result<String, EngineError> {
        match args {
            [Arg::Str(s)] => Ok(s.clone()),
            _ => Err(self.err(method, format!(".{}() expects one string", method.literal))),
        }
    }

    fn arg_dur(&self, method: &Token, args: &[Arg]) -> Result<chrono::Duration, EngineError> {
        match args {
            [Arg::Dur(d)] => Ok(*d),
            _ => Err(self.err(method, format!(".{}() expects a duration", method.literal))),
        }
    }

    fn arg_float(&self, method: &Token, args: &[Arg]) -> Result<f64, EngineError> {
        match args {
            [Arg::Float(f)] => Ok(*f),
            [Arg::Int(i)] => Ok(*i as f64),
            _ => Err(self.err(method, format!(".{}() expects a number", method.literal))),
        }
    }

    fn arg_int(&self, method: &Token, args: &[Arg]) -> Result<i64, EngineError> {
        match args {
            [Arg::Int(i)] => Ok(*i),
            _ => Err(self.err(method, format!(".{}() expects an integer", method.literal))),
        }
    }

    fn arg_none(&self, method: &Token, args: &[Arg]) -> Result<(), EngineError> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(self.err(method, format!(".{}() takes no arguments", method.literal)))
        }
    }

    fn arg_node(&self, method: &Token, args: &[Arg]) -> Result<NodeId, EngineError> {
        match args {
            [Arg::Ident(name)] => self.bindings.get(name).copied().ok_or_else(|| {
                self.err(method, format!("undefined variable {}", name))
            }),
            _ => Err(self.err(
                method,
                format!(".{}() expects a bound variable", method.literal),
            )),
        }
    }

    /// Apply one chained method: either create a child node or set a
    /// property on the current one.
    fn apply(&mut self, node: NodeId, method: &Token, args: Vec<Arg>) -> Result<NodeId, EngineError> {
        let m = method.literal.as_str();
        match m {
            // --- child-creating methods ---
            "from" => {
                let from = match args.as_slice() {
                    [] => None,
                    [Arg::Str(s)] => Some(s.clone()),
                    _ => return Err(self.err(method, ".from() expects at most one string")),
                };
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::Stream(StreamConfig { from })))
            }
            "query" => {
                let q = self.arg_str(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::Batch(BatchConfig {
                        query: q,
                        ..BatchConfig::default()
                    }),
                ))
            }
            "window" => {
                self.arg_none(method, &args)?;
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::Window(WindowConfig::default())))
            }
            "groupBy" => {
                let dims: Vec<String> = args
                    .iter()
                    .map(|a| match a {
                        Arg::Str(s) => Ok(s.clone()),
                        _ => Err(self.err(method, ".groupBy() expects strings")),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::GroupBy(GroupByConfig { dims })))
            }
            "where" => {
                let predicate = self.arg_str(method, &args)?;
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::Where(WhereConfig { predicate })))
            }
            "eval" => {
                let expr = self.arg_str(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::Eval(EvalConfig {
                        expr,
                        as_name: None,
                    }),
                ))
            }
            "alert" => {
                self.arg_none(method, &args)?;
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::Alert(AlertConfig::default())))
            }
            "httpOut" => {
                let endpoint = self.arg_str(method, &args)?;
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::HttpOut(HttpOutConfig { endpoint })))
            }
            "influxDBOut" => {
                self.arg_none(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::InfluxDbOut(InfluxDbOutConfig::default()),
                ))
            }
            "map" => {
                let func = self.arg_str(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::Map(MapConfig {
                        func,
                        ..MapConfig::default()
                    }),
                ))
            }
            "reduce" => {
                let func = self.arg_str(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::Reduce(ReduceConfig {
                        func,
                        ..ReduceConfig::default()
                    }),
                ))
            }
            "sample" => {
                let config = match args.as_slice() {
                    [Arg::Int(n)] => SampleConfig {
                        n: Some(*n),
                        duration: None,
                    },
                    [Arg::Dur(d)] => SampleConfig {
                        n: None,
                        duration: Some(*d),
                    },
                    _ => {
                        return Err(
                            self.err(method, ".sample() expects a count or a duration")
                        )
                    }
                };
                Ok(self.pipeline.add_child(&[node], NodeConfig::Sample(config)))
            }
            "derivative" => {
                let field = self.arg_str(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::Derivative(DerivativeConfig {
                        field,
                        ..DerivativeConfig::default()
                    }),
                ))
            }
            "union" => {
                let other = self.arg_node(method, &args)?;
                Ok(self.pipeline.add_child(&[node, other], NodeConfig::Union))
            }
            "join" => {
                let other = self.arg_node(method, &args)?;
                Ok(self.pipeline.add_child(&[node, other], NodeConfig::Join))
            }
            "udf" => {
                let name = self.arg_str(method, &args)?;
                Ok(self
                    .pipeline
                    .add_child(&[node], NodeConfig::Udf(UdfConfig { name })))
            }
            "stats" => {
                let interval = self.arg_dur(method, &args)?;
                Ok(self.pipeline.add_child(
                    &[node],
                    NodeConfig::Stats(StatsConfig {
                        interval: Some(interval),
                    }),
                ))
            }

            // --- property methods ---
            "period" => {
                let d = self.arg_dur(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Window(w) => {
                        w.period = Some(d);
                        true
                    }
                    _ => false,
                })
            }
            "every" => {
                let d = self.arg_dur(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Window(w) => {
                        w.every = Some(d);
                        true
                    }
                    NodeConfig::Batch(b) => {
                        b.every = Some(d);
                        true
                    }
                    _ => false,
                })
            }
            "database" => {
                let db = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Batch(b) => {
                        b.database = db.clone();
                        true
                    }
                    NodeConfig::InfluxDbOut(o) => {
                        o.database = db.clone();
                        true
                    }
                    _ => false,
                })
            }
            "retentionPolicy" => {
                let rp = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Batch(b) => {
                        b.retention_policy = rp.clone();
                        true
                    }
                    NodeConfig::InfluxDbOut(o) => {
                        o.retention_policy = rp.clone();
                        true
                    }
                    _ => false,
                })
            }
            "measurement" => {
                let mname = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::InfluxDbOut(o) => {
                        o.measurement = Some(mname.clone());
                        true
                    }
                    _ => false,
                })
            }
            "field" => {
                let f = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Map(mc) => {
                        mc.field = f.clone();
                        true
                    }
                    NodeConfig::Reduce(r) => {
                        r.field = f.clone();
                        true
                    }
                    _ => false,
                })
            }
            "as" => {
                let name = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Map(mc) => {
                        mc.as_name = Some(name.clone());
                        true
                    }
                    NodeConfig::Reduce(r) => {
                        r.as_name = Some(name.clone());
                        true
                    }
                    NodeConfig::Eval(e) => {
                        e.as_name = Some(name.clone());
                        true
                    }
                    NodeConfig::Derivative(d) => {
                        d.as_name = Some(name.clone());
                        true
                    }
                    _ => false,
                })
            }
            "unit" => {
                let d = self.arg_dur(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Derivative(dv) => {
                        dv.unit = Some(d);
                        true
                    }
                    _ => false,
                })
            }
            "info" | "warn" | "crit" => {
                let predicate = self.arg_str(method, &args)?;
                let which = m.to_string();
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        match which.as_str() {
                            "info" => a.info = Some(predicate.clone()),
                            "warn" => a.warn = Some(predicate.clone()),
                            _ => a.crit = Some(predicate.clone()),
                        }
                        true
                    }
                    _ => false,
                })
            }
            "post" => {
                let url = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.post = Some(url.clone());
                        true
                    }
                    _ => false,
                })
            }
            "email" => {
                let from = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.from = Some(from.clone());
                        true
                    }
                    _ => false,
                })
            }
            "to" => {
                let addr = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.to.push(addr.clone());
                        true
                    }
                    _ => false,
                })
            }
            "subject" => {
                let s = self.arg_str(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.subject = Some(s.clone());
                        true
                    }
                    _ => false,
                })
            }
            "flapping" => {
                self.arg_none(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.use_flapping = true;
                        true
                    }
                    _ => false,
                })
            }
            "flapLow" => {
                let v = self.arg_float(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.flap_low = v;
                        true
                    }
                    _ => false,
                })
            }
            "flapHigh" => {
                let v = self.arg_float(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.flap_high = v;
                        true
                    }
                    _ => false,
                })
            }
            "history" => {
                let h = self.arg_int(method, &args)?;
                self.set(node, method, |c| match c {
                    NodeConfig::Alert(a) => {
                        a.history = h as usize;
                        true
                    }
                    _ => false,
                })
            }
            _ => Err(self.err(method, format!("unknown method .{}()", m))),
        }
    }

    fn set(
        &mut self,
        node: NodeId,
        method: &Token,
        f: impl FnOnce(&mut NodeConfig) -> bool,
    ) -> Result<NodeId, EngineError> {
        let kind = self.pipeline.get(node).config.kind_name();
        if f(self.pipeline.config_mut(node)) {
            Ok(node)
        } else {
            Err(self.err(
                method,
                format!(".{}() is not valid on a {} node", method.literal, kind),
            ))
        }
    }
}
