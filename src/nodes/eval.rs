use crate::expr::{compile, ReturnType, StatefulExpr, Value};
use crate::models::FieldValue;
use crate::nodes::send_all;
use crate::pipeline::{EdgeType, EvalConfig};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::error;

/// Evaluates an expression per point and stores the result as a new
/// field. An evaluation error is logged and the record passes through
/// unchanged.
pub struct EvalNode {
    core: NodeCore,
    expr: Option<StatefulExpr>,
    as_name: String,
}

impl EvalNode {
    pub fn new(name: String, wants: EdgeType, config: EvalConfig) -> Result<Self> {
        let tree = compile(&config.expr, ReturnType::Number)?;
        Ok(EvalNode {
            core: NodeCore::new(name, wants, wants),
            expr: Some(StatefulExpr::new(tree)),
            as_name: config.as_name.unwrap_or_else(|| "eval".to_string()),
        })
    }
}

fn to_field(v: Value) -> FieldValue {
    match v {
        Value::Int(i) => FieldValue::Int(i),
        Value::Float(f) => FieldValue::Float(f),
        Value::Bool(b) => FieldValue::Bool(b),
        Value::Str(s) => FieldValue::Str(s),
        Value::Duration(d) => FieldValue::Int(d.num_nanoseconds().unwrap_or(i64::MAX)),
    }
}

#[async_trait]
impl Node for EvalNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, _snapshot: Option<Vec<u8>>) -> Result<()> {
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let mut expr = self
            .expr
            .take()
            .ok_or_else(|| anyhow!("eval node already started"))?;
        let as_name = self.as_name.clone();
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            let mut input = ins.pop().ok_or_else(|| anyhow!("eval has no input"))?;
            while let Some(mut msg) = recv_or_stop(&mut input, &mut stop).await {
                match &mut msg {
                    Message::Point(p) => match expr.eval(&p.fields, &p.tags) {
                        Ok(v) => {
                            p.fields.insert(as_name.clone(), to_field(v));
                        }
                        Err(e) => {
                            error!(node = %name, error = %e, "error evaluating expression");
                        }
                    },
                    Message::Batch(b) => {
                        let tags = b.tags.clone();
                        for tf in &mut b.points {
                            match expr.eval(&tf.fields, &tags) {
                                Ok(v) => {
                                    tf.fields.insert(as_name.clone(), to_field(v));
                                }
                                Err(e) => {
                                    error!(node = %name, error = %e, "error evaluating expression");
                                }
                            }
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
