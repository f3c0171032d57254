use crate::expr::eval::Value;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// A function callable from expressions. Stateful implementations keep
/// running accumulators, so a registry instance belongs to exactly one
/// compiled expression.
pub trait ExprFunc: Send {
    fn call(&mut self, args: &[Value]) -> Result<Value>;
}

/// Registry of the built-in expression functions. Constructed per
/// StatefulExpr; never shared.
pub struct Functions {
    funcs: HashMap<&'static str, Box<dyn ExprFunc>>,
}

impl Functions {
    pub fn new() -> Self {
        let mut funcs: HashMap<&'static str, Box<dyn ExprFunc>> = HashMap::new();
        funcs.insert("abs", Box::new(Math(f64::abs)));
        funcs.insert("log", Box::new(Math(f64::ln)));
        funcs.insert("sqrt", Box::new(Math(f64::sqrt)));
        funcs.insert("floor", Box::new(Math(f64::floor)));
        funcs.insert("ceil", Box::new(Math(f64::ceil)));
        funcs.insert("count", Box::new(Count { n: 0 }));
        funcs.insert("sigma", Box::new(Sigma {
            n: 0.0,
            mean: 0.0,
            m2: 0.0,
        }));
        Functions { funcs }
    }

    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        match self.funcs.get_mut(name) {
            Some(f) => f.call(args),
            None => Err(anyhow!("unknown function {}", name)),
        }
    }
}

impl Default for Functions {
    fn default() -> Self {
        Functions::new()
    }
}

fn numeric_arg(name: &str, args: &[Value]) -> Result<f64> {
    match args {
        [v] => v
            .as_f64()
            .ok_or_else(|| anyhow!("{} expects a numeric argument", name)),
        _ => Err(anyhow!("{} expects exactly one argument", name)),
    }
}

struct Math(fn(f64) -> f64);

impl ExprFunc for Math {
    fn call(&mut self, args: &[Value]) -> Result<Value> {
        Ok(Value::Float((self.0)(numeric_arg("math function", args)?)))
    }
}

/// Running count of evaluations.
struct Count {
    n: i64,
}

impl ExprFunc for Count {
    fn call(&mut self, _args: &[Value]) -> Result<Value> {
        self.n += 1;
        Ok(Value::Int(self.n))
    }
}

/// Number of standard deviations the argument is away from the running
/// mean, Welford's update.
struct Sigma {
    n: f64,
    mean: f64,
    m2: f64,
}

impl ExprFunc for Sigma {
    fn call(&mut self, args: &[Value]) -> Result<Value> {
        let x = numeric_arg("sigma", args)?;
        self.n += 1.0;
        let delta = x - self.mean;
        self.mean += delta / self.n;
        self.m2 += delta * (x - self.mean);
        if self.n < 2.0 {
            return Ok(Value::Float(0.0));
        }
        let stddev = (self.m2 / (self.n - 1.0)).sqrt();
        if stddev == 0.0 {
            Ok(Value::Float(0.0))
        } else {
            Ok(Value::Float((x - self.mean).abs() / stddev))
        }
    }
}
