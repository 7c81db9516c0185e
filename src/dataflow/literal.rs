// src/dataflow/literal.rs

//! Detached value data, used wherever a value leaves the graph: transaction
//! operations, controller input/output documents, persistence.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataflow::vtype::{BaseKind, Members, Type};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Literal {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Path of a file, relative to the project base or absolute.
    File(String),
    Record(BTreeMap<String, Literal>),
    Array(Vec<Literal>),
    Dict(BTreeMap<String, Literal>),
}

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) | Literal::File(s) => Some(s),
            _ => None,
        }
    }

    /// Convert this literal so that it fits `ty`, or explain why it can't.
    ///
    /// Ints widen to floats, strings become file paths for file types, and a
    /// map literal may fill a dict.
    pub fn coerce_to(self, ty: &Type) -> Result<Literal, String> {
        match (self, ty.base()) {
            (Literal::Null, _) => Ok(Literal::Null),
            (Literal::Bool(b), BaseKind::Bool) => Ok(Literal::Bool(b)),
            (Literal::Int(i), BaseKind::Int) => Ok(Literal::Int(i)),
            (Literal::Int(i), BaseKind::Float) => Ok(Literal::Float(i as f64)),
            (Literal::Float(f), BaseKind::Float) => Ok(Literal::Float(f)),
            (Literal::String(s), BaseKind::String) => Ok(Literal::String(s)),
            (Literal::String(s) | Literal::File(s), BaseKind::File) => Ok(Literal::File(s)),
            (Literal::Record(map), BaseKind::Record) => {
                let mut out = BTreeMap::new();
                for (name, lit) in map {
                    let field = ty
                        .field(&name)
                        .ok_or_else(|| format!("type '{}' has no field '{}'", ty.name(), name))?;
                    out.insert(name, lit.coerce_to(&field.ty)?);
                }
                Ok(Literal::Record(out))
            }
            (Literal::Array(items), BaseKind::Array) => {
                let elem = element_of(ty)?;
                items
                    .into_iter()
                    .map(|lit| lit.coerce_to(elem))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Literal::Array)
            }
            (Literal::Dict(map) | Literal::Record(map), BaseKind::Dict) => {
                let elem = element_of(ty)?;
                let mut out = BTreeMap::new();
                for (key, lit) in map {
                    out.insert(key, lit.coerce_to(elem)?);
                }
                Ok(Literal::Dict(out))
            }
            (lit, _) => Err(format!(
                "{} literal does not fit type '{}'",
                lit.kind_name(),
                ty
            )),
        }
    }

    /// Interpret a literal given in a declared source type, e.g. the string
    /// `"3.5"` given as `float`.
    pub fn from_source_type(self, source: &Type) -> Result<Literal, String> {
        let Literal::String(text) = self else {
            return self.coerce_to(source);
        };
        let text = text.trim();
        match source.base() {
            BaseKind::Bool => match text.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Literal::Bool(true)),
                "false" | "0" | "no" => Ok(Literal::Bool(false)),
                other => Err(format!("'{other}' is not a bool")),
            },
            BaseKind::Int => text
                .parse()
                .map(Literal::Int)
                .map_err(|_| format!("'{text}' is not an int")),
            BaseKind::Float => text
                .parse()
                .map(Literal::Float)
                .map_err(|_| format!("'{text}' is not a float")),
            BaseKind::String => Ok(Literal::String(text.to_string())),
            BaseKind::File => Ok(Literal::File(text.to_string())),
            kind => Err(format!("cannot read a {} from a string", kind.name())),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::String(_) => "string",
            Literal::File(_) => "file",
            Literal::Record(_) => "record",
            Literal::Array(_) => "array",
            Literal::Dict(_) => "dict",
        }
    }
}

fn element_of(ty: &Type) -> Result<&std::sync::Arc<Type>, String> {
    match ty.members() {
        Members::Array(elem) | Members::Dict(elem) => Ok(elem),
        _ => Err(format!("type '{}' has no element type", ty.name())),
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::File(p) => write!(f, "file:{p}"),
            Literal::Record(map) | Literal::Dict(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Literal::Array(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}
