//! A small function library for driving projects in tests.
//!
//! - `t:identity`: `in.x` to `out.x`, in process.
//! - `t:label`: the same for strings.
//! - `t:job`: emits one `mdrun` command, then publishes `out.y = 2 * in.x`
//!   once the command finished cleanly.
//! - `t:first_wins`: emits `in.n` commands; the first one to finish wins
//!   and the rest are cancelled.
//! - `t:sum`: `out.x = in.a + in.b`, in process.
//! - `t:pair`: network of two chained identities.
//! - `t:dangling`, `t:crossed`: networks whose bodies cannot be wired,
//!   one naming a missing child, one joining an int to a string.

use std::collections::BTreeMap;
use std::sync::Arc;

use copernicus::command::Command;
use copernicus::command::resource::CORES;
use copernicus::dataflow::function::{Function, FunctionRegistry, Library, NetworkDef};
use copernicus::dataflow::literal::Literal;
use copernicus::dataflow::run::{FunctionRunOutput, NewConnection, NewInstance};
use copernicus::dataflow::vtype::{Field, Type};

pub const LIBRARY: &str = "t";

fn identity() -> Arc<Function> {
    Function::builder(LIBRARY, "identity")
        .input(Field::new("x", Type::int()))
        .output(Field::new("x", Type::int()))
        .simple(|args| {
            let x = args.get("x").cloned().ok_or("x missing")?;
            Ok(BTreeMap::from([("x".to_string(), x)]))
        })
        .build()
}

fn label() -> Arc<Function> {
    Function::builder(LIBRARY, "label")
        .input(Field::new("x", Type::string()))
        .output(Field::new("x", Type::string()))
        .simple(|args| {
            let x = args.get("x").cloned().ok_or("x missing")?;
            Ok(BTreeMap::from([("x".to_string(), x)]))
        })
        .build()
}

fn sum() -> Arc<Function> {
    Function::builder(LIBRARY, "sum")
        .input(Field::new("a", Type::int()))
        .input(Field::new("b", Type::int()))
        .output(Field::new("x", Type::int()))
        .simple(|args| match (args.get("a"), args.get("b")) {
            (Some(Literal::Int(a)), Some(Literal::Int(b))) => {
                Ok(BTreeMap::from([("x".to_string(), Literal::Int(a + b))]))
            }
            _ => Err("a and b are required".into()),
        })
        .build()
}

fn job() -> Arc<Function> {
    Function::builder(LIBRARY, "job")
        .input(Field::new("x", Type::int()))
        .output(Field::new("y", Type::int()))
        .extended(|input| {
            let Some(done) = input.commands.first() else {
                return Ok(FunctionRunOutput::new()
                    .command(Command::new("mdrun").with_min_required(CORES, 1)));
            };
            if done.return_code != Some(0) {
                return Err(format!("mdrun exited with {:?}", done.return_code));
            }
            let x = match input.input("x") {
                Some(Literal::Int(x)) => *x,
                _ => return Err("x missing".into()),
            };
            Ok(FunctionRunOutput::new().output("y", Literal::Int(2 * x)))
        })
        .build()
}

fn first_wins() -> Arc<Function> {
    Function::builder(LIBRARY, "first_wins")
        .input(Field::new("n", Type::int()))
        .output(Field::new("winner", Type::string()))
        .extended(|input| {
            if let Some(done) = input.commands.first() {
                return Ok(FunctionRunOutput::new()
                    .cancel_prev()
                    .output("winner", Literal::String(done.id.to_string())));
            }
            let n = match input.input("n") {
                Some(Literal::Int(n)) => *n,
                _ => return Err("n missing".into()),
            };
            Ok((0..n).fold(FunctionRunOutput::new(), |out, i| {
                out.command(
                    Command::new("mdrun")
                        .with_args([format!("-part={i}")])
                        .with_min_required(CORES, 1),
                )
            }))
        })
        .build()
}

fn conn(src: &str, dst: &str) -> NewConnection {
    NewConnection {
        src: Some(src.to_string()),
        dst: dst.to_string(),
        value: None,
    }
}

fn child(id: &str, function: &str) -> NewInstance {
    NewInstance {
        id: id.into(),
        function: function.into(),
    }
}

fn pair() -> Arc<Function> {
    Function::builder(LIBRARY, "pair")
        .input(Field::new("x", Type::int()))
        .output(Field::new("x", Type::int()))
        .network(NetworkDef {
            instances: vec![child("first", "t:identity"), child("second", "t:identity")],
            connections: vec![
                conn("self:ext_in.x", "first:in.x"),
                conn("first:out.x", "second:in.x"),
                conn("second:out.x", "self:ext_out.x"),
            ],
        })
        .build()
}

fn dangling() -> Arc<Function> {
    Function::builder(LIBRARY, "dangling")
        .input(Field::new("x", Type::int()))
        .network(NetworkDef {
            instances: vec![child("first", "t:identity")],
            connections: vec![
                conn("self:ext_in.x", "first:in.x"),
                conn("first:out.x", "missing:in.x"),
            ],
        })
        .build()
}

fn crossed() -> Arc<Function> {
    Function::builder(LIBRARY, "crossed")
        .network(NetworkDef {
            instances: vec![child("num", "t:identity"), child("text", "t:label")],
            connections: vec![conn("num:out.x", "text:in.x")],
        })
        .build()
}

pub fn library() -> Library {
    [
        identity(),
        label(),
        sum(),
        job(),
        first_wins(),
        pair(),
        dangling(),
        crossed(),
    ]
        .into_iter()
        .fold(Library::new(LIBRARY), Library::with_function)
}

/// Built-ins plus the test library.
pub fn registry() -> Arc<FunctionRegistry> {
    let reg = FunctionRegistry::with_builtins();
    reg.register(library());
    Arc::new(reg)
}
