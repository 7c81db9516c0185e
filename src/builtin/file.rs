// src/builtin/file.rs

//! File builtins. Both write into the task's output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builtin::LIBRARY;
use crate::dataflow::function::{Function, FunctionFlags};
use crate::dataflow::literal::Literal;
use crate::dataflow::run::{FunctionRunInput, FunctionRunOutput};
use crate::dataflow::vtype::{Field, Type};

/// Array element type read by `toFile`.
pub const FLOAT_ARRAY: &str = "float_array";

pub(crate) fn float_array() -> Arc<Type> {
    Type::array(FLOAT_ARRAY, Type::float())
}

fn output_dir(input: &FunctionRunInput) -> Result<PathBuf, String> {
    let dir = input
        .env
        .output_dir
        .as_deref()
        .map(PathBuf::from)
        .ok_or("no output directory for this run")?;
    fs::create_dir_all(&dir).map_err(|e| format!("creating {}: {e}", dir.display()))?;
    Ok(dir)
}

/// Input file `key`, resolved against the project base.
fn input_path(input: &FunctionRunInput, key: &str) -> Result<PathBuf, String> {
    match input.input(key) {
        Some(Literal::File(p)) => Ok(Path::new(&input.env.base_dir).join(p)),
        _ => Err(format!("input '{key}' is not a file")),
    }
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("reading {}: {e}", path.display()))
}

fn write(path: &Path, data: &[u8]) -> Result<(), String> {
    fs::write(path, data).map_err(|e| format!("writing {}: {e}", path.display()))
}

fn file_output(id: &str, path: &Path) -> FunctionRunOutput {
    FunctionRunOutput::new().output(id, Literal::File(path.display().to_string()))
}

/// `c` holds the contents of `a` followed by those of `b`, and keeps the
/// extension of `a`.
fn cat(input: &FunctionRunInput) -> Result<FunctionRunOutput, String> {
    let a = input_path(input, "a")?;
    let b = input_path(input, "b")?;
    let ext = a
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dat".to_string());
    let mut data = read(&a)?;
    data.extend(read(&b)?);
    let out = output_dir(input)?.join(format!("cat.{ext}"));
    write(&out, &data)?;
    Ok(file_output("c", &out))
}

/// `b` lists the elements of `a`, one per line.
fn to_file(input: &FunctionRunInput) -> Result<FunctionRunOutput, String> {
    let items: &[Literal] = match input.input("a") {
        Some(Literal::Array(items)) => items.as_slice(),
        Some(Literal::Null) | None => &[],
        Some(other) => return Err(format!("input 'a' is not an array: {other}")),
    };
    let text: String = items.iter().map(|v| format!("{v}\n")).collect();
    let out = output_dir(input)?.join("var.dat");
    write(&out, text.as_bytes())?;
    Ok(file_output("b", &out))
}

fn writes_output() -> FunctionFlags {
    FunctionFlags {
        needs_output_dir: true,
        ..FunctionFlags::default()
    }
}

pub(crate) fn functions() -> Vec<Arc<Function>> {
    vec![
        Function::builder(LIBRARY, "cat")
            .describe("c = a followed by b")
            .input(Field::new("a", Type::file()))
            .input(Field::new("b", Type::file()))
            .output(Field::new("c", Type::file()))
            .flags(writes_output())
            .extended(cat)
            .build(),
        Function::builder(LIBRARY, "toFile")
            .describe("b = the elements of a, one per line")
            .input(Field::new("a", float_array()))
            .output(Field::new("b", Type::file()))
            .flags(writes_output())
            .extended(to_file)
            .build(),
    ]
}
