// src/builtin/float.rs

//! Float arithmetic. A result that is not a finite number fails the task.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builtin::LIBRARY;
use crate::dataflow::function::Function;
use crate::dataflow::literal::Literal;
use crate::dataflow::vtype::{Field, Type};

type UnOp = fn(f64) -> Result<f64, String>;
type BinOp = fn(f64, f64) -> Result<f64, String>;

fn arg(args: &BTreeMap<String, Literal>, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Literal::as_f64)
        .ok_or_else(|| format!("input '{key}' is not a number"))
}

fn finite(name: &str, c: f64) -> Result<BTreeMap<String, Literal>, String> {
    if !c.is_finite() {
        return Err(format!("{name}: result is not a finite number"));
    }
    Ok(BTreeMap::from([("c".to_string(), Literal::Float(c))]))
}

fn unary(name: &'static str, description: &str, op: UnOp) -> Arc<Function> {
    Function::builder(LIBRARY, name)
        .describe(description)
        .input(Field::new("a", Type::float()))
        .output(Field::new("c", Type::float()))
        .simple(move |args| finite(name, op(arg(args, "a")?)?))
        .build()
}

fn binary(name: &'static str, description: &str, op: BinOp) -> Arc<Function> {
    Function::builder(LIBRARY, name)
        .describe(description)
        .input(Field::new("a", Type::float()))
        .input(Field::new("b", Type::float()))
        .output(Field::new("c", Type::float()))
        .simple(move |args| finite(name, op(arg(args, "a")?, arg(args, "b")?)?))
        .build()
}

pub(crate) fn functions() -> Vec<Arc<Function>> {
    vec![
        binary("add", "c = a + b", |a, b| Ok(a + b)),
        binary("sub", "c = a - b", |a, b| Ok(a - b)),
        binary("mul", "c = a * b", |a, b| Ok(a * b)),
        binary("div", "c = a / b", |a, b| {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(a / b)
            }
        }),
        binary("pow", "c = a ^ b", |a, b| Ok(a.powf(b))),
        unary("sqrt", "c = square root of a", |a| {
            if a < 0.0 {
                Err(format!("square root of negative number {a}"))
            } else {
                Ok(a.sqrt())
            }
        }),
        unary("exp", "c = e ^ a", |a| Ok(a.exp())),
        unary("log", "c = natural logarithm of a", |a| {
            if a <= 0.0 {
                Err(format!("logarithm of non-positive number {a}"))
            } else {
                Ok(a.ln())
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::function::Controller;

    fn call(name: &str, args: &[(&str, f64)]) -> Result<f64, String> {
        let f = functions()
            .into_iter()
            .find(|f| f.name() == name)
            .unwrap();
        let Controller::Simple(body) = f.controller() else {
            panic!("{name} is not a simple controller");
        };
        let args = args
            .iter()
            .map(|(k, v)| (k.to_string(), Literal::Float(*v)))
            .collect();
        body(&args).map(|out| out["c"].as_f64().unwrap())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(call("add", &[("a", 1.0), ("b", 2.0)]), Ok(3.0));
        assert_eq!(call("sub", &[("a", 1.0), ("b", 2.0)]), Ok(-1.0));
        assert_eq!(call("mul", &[("a", 1.5), ("b", 2.0)]), Ok(3.0));
        assert_eq!(call("div", &[("a", 3.0), ("b", 2.0)]), Ok(1.5));
        assert_eq!(call("pow", &[("a", 2.0), ("b", 10.0)]), Ok(1024.0));
        assert_eq!(call("sqrt", &[("a", 6.25)]), Ok(2.5));
        assert_eq!(call("exp", &[("a", 0.0)]), Ok(1.0));
        assert_eq!(call("log", &[("a", 1.0)]), Ok(0.0));
    }

    #[test]
    fn domain_errors_fail_the_call() {
        assert!(call("div", &[("a", 1.0), ("b", 0.0)]).is_err());
        assert!(call("sqrt", &[("a", -1.0)]).unwrap_err().contains("negative"));
        assert!(call("log", &[("a", 0.0)]).unwrap_err().contains("non-positive"));
        assert!(call("log", &[("a", -2.0)]).is_err());
        assert!(call("pow", &[("a", -8.0), ("b", 0.5)]).unwrap_err().contains("finite"));
        assert!(call("exp", &[("a", 1000.0)]).unwrap_err().contains("finite"));
    }

    #[test]
    fn missing_operand_is_reported() {
        let err = call("pow", &[("a", 2.0)]).unwrap_err();
        assert!(err.contains("'b'"), "{err}");
    }
}
