pub mod eval;
pub mod functions;
pub mod parser;

pub use eval::{StatefulExpr, Value};
pub use functions::Functions;
pub use parser::{compile, ReturnType};

use regex::Regex;

/// Binary operators of the predicate expression grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    RegexMatch,
    RegexNotMatch,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A compiled expression tree. Parsed once at task construction and
/// evaluated many times against point records.
#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Duration(chrono::Duration),
    Str(String),
    Bool(bool),
    Reference(String),
    Regex(Regex),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}
