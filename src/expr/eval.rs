use crate::expr::functions::Functions;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::models::{FieldValue, Fields, Tags};
use anyhow::{anyhow, bail, Result};

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Duration(chrono::Duration),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Duration(_) => "duration",
        }
    }
}

impl From<&FieldValue> for Value {
    fn from(v: &FieldValue) -> Self {
        match v {
            FieldValue::Float(f) => Value::Float(*f),
            FieldValue::Int(i) => Value::Int(*i),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Str(s) => Value::Str(s.clone()),
        }
    }
}

/// A compiled expression paired with its own function registry.
///
/// Functions like `sigma` keep per-instance accumulator state, so a
/// StatefulExpr must not be shared across nodes; each node compiles its
/// own.
pub struct StatefulExpr {
    root: Expr,
    funcs: Functions,
}

impl StatefulExpr {
    pub fn new(root: Expr) -> Self {
        StatefulExpr {
            root,
            funcs: Functions::new(),
        }
    }

    /// Evaluate against a record. References resolve against fields
    /// first, then tags; a missing reference is an error.
    pub fn eval(&mut self, fields: &Fields, tags: &Tags) -> Result<Value> {
        eval_expr(&self.root, fields, tags, &mut self.funcs)
    }

    pub fn eval_bool(&mut self, fields: &Fields, tags: &Tags) -> Result<bool> {
        match self.eval(fields, tags)? {
            Value::Bool(b) => Ok(b),
            other => bail!("expression returned {}, expected bool", other.type_name()),
        }
    }
}

fn eval_expr(e: &Expr, fields: &Fields, tags: &Tags, funcs: &mut Functions) -> Result<Value> {
    match e {
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Duration(d) => Ok(Value::Duration(*d)),
        Expr::Regex(_) => bail!("regex literal outside of a match expression"),
        Expr::Reference(name) => {
            if let Some(v) = fields.get(name) {
                Ok(Value::from(v))
            } else if let Some(t) = tags.get(name) {
                Ok(Value::Str(t.clone()))
            } else {
                Err(anyhow!("undefined reference {:?}", name))
            }
        }
        Expr::Call(name, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(eval_expr(a, fields, tags, funcs)?);
            }
            funcs.call(name, &vals)
        }
        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, fields, tags, funcs)?;
            match (op, v) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (UnaryOp::Neg, Value::Duration(d)) => Ok(Value::Duration(-d)),
                (op, v) => bail!("invalid operand {} for {:?}", v.type_name(), op),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, fields, tags, funcs),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    fields: &Fields,
    tags: &Tags,
    funcs: &mut Functions,
) -> Result<Value> {
    // AND/OR short-circuit: the right side is not evaluated when the left
    // side decides
    if let BinaryOp::And | BinaryOp::Or = op {
        let l = eval_expr(lhs, fields, tags, funcs)?
            .as_bool()
            .ok_or_else(|| anyhow!("logical operand is not a bool"))?;
        return match (op, l) {
            (BinaryOp::And, false) => Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => Ok(Value::Bool(true)),
            _ => {
                let r = eval_expr(rhs, fields, tags, funcs)?
                    .as_bool()
                    .ok_or_else(|| anyhow!("logical operand is not a bool"))?;
                Ok(Value::Bool(r))
            }
        };
    }

    // regex match compares a string against the regex literal
    if let BinaryOp::RegexMatch | BinaryOp::RegexNotMatch = op {
        let s = match eval_expr(lhs, fields, tags, funcs)? {
            Value::Str(s) => s,
            other => bail!("regex match on {}, expected string", other.type_name()),
        };
        let re = match rhs {
            Expr::Regex(re) => re,
            _ => bail!("right side of a regex match must be a regex literal"),
        };
        let matched = re.is_match(&s);
        return Ok(Value::Bool(if op == BinaryOp::RegexMatch {
            matched
        } else {
            !matched
        }));
    }

    let l = eval_expr(lhs, fields, tags, funcs)?;
    let r = eval_expr(rhs, fields, tags, funcs)?;
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, l, r),
        BinaryOp::Eq => Ok(Value::Bool(compare_eq(&l, &r)?)),
        BinaryOp::Neq => Ok(Value::Bool(!compare_eq(&l, &r)?)),
        BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte => {
            let ord = compare_ord(&l, &r)?;
            Ok(Value::Bool(match op {
                BinaryOp::Gt => ord == std::cmp::Ordering::Greater,
                BinaryOp::Gte => ord != std::cmp::Ordering::Less,
                BinaryOp::Lt => ord == std::cmp::Ordering::Less,
                _ => ord != std::cmp::Ordering::Greater,
            }))
        }
        _ => unreachable!("handled above"),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            if op == BinaryOp::Div && b == 0 {
                bail!("division by zero");
            }
            Ok(Value::Int(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => a / b,
            }))
        }
        (Value::Duration(a), Value::Duration(b)) => match op {
            BinaryOp::Add => Ok(Value::Duration(a + b)),
            BinaryOp::Sub => Ok(Value::Duration(a - b)),
            _ => bail!("durations only support + and -"),
        },
        (l, r) => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => bail!(
                    "invalid operands {} and {} for {:?}",
                    l.type_name(),
                    r.type_name(),
                    op
                ),
            };
            if op == BinaryOp::Div && b == 0.0 {
                bail!("division by zero");
            }
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => a / b,
            }))
        }
    }
}

fn compare_eq(l: &Value, r: &Value) -> Result<bool> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Duration(a), Value::Duration(b)) => Ok(a == b),
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(a == b),
            _ => bail!(
                "cannot compare {} with {}",
                l.type_name(),
                r.type_name()
            ),
        },
    }
}

fn compare_ord(l: &Value, r: &Value) -> Result<std::cmp::Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => Ok(a.cmp(b)),
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| anyhow!("cannot order NaN")),
            _ => bail!(
                "cannot compare {} with {}",
                l.type_name(),
                r.type_name()
            ),
        },
    }
}
