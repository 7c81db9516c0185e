// src/dataflow/item_path.rs

//! Item-path addressing: `instance[:instance…]:direction.item[0][key]`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{CpcError, Result};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap_or_else(|e| panic!("bad name regex: {e}"))
});

/// Reserved instance name for a network's own IO.
pub const SELF_NAME: &str = "self";

/// Whether `name` may be used as an instance or project name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// One step inside a value tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKey {
    Field(String),
    Index(usize),
    Key(String),
    /// `[+]`: one past the end of an array.
    Append,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Field(name) => write!(f, ".{name}"),
            ItemKey::Index(i) => write!(f, "[{i}]"),
            ItemKey::Key(k) => write!(f, "[{k}]"),
            ItemKey::Append => f.write_str("[+]"),
        }
    }
}

/// Direction token as written in a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    SubIn,
    SubOut,
    ExtIn,
    ExtOut,
}

impl Direction {
    fn parse(s: &str) -> Option<Direction> {
        match s {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            "sub_in" => Some(Direction::SubIn),
            "sub_out" => Some(Direction::SubOut),
            "ext_in" => Some(Direction::ExtIn),
            "ext_out" => Some(Direction::ExtOut),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::SubIn => "sub_in",
            Direction::SubOut => "sub_out",
            Direction::ExtIn => "ext_in",
            Direction::ExtOut => "ext_out",
        }
    }
}

/// One of the four IO trees owned by an active instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoSlot {
    In,
    Out,
    SubIn,
    SubOut,
}

impl IoSlot {
    pub const ALL: [IoSlot; 4] = [IoSlot::In, IoSlot::Out, IoSlot::SubIn, IoSlot::SubOut];

    /// Inputs trigger `handle_new_input` on their owner when written.
    pub fn is_input(self) -> bool {
        matches!(self, IoSlot::In | IoSlot::SubIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IoSlot::In => "in",
            IoSlot::Out => "out",
            IoSlot::SubIn => "sub_in",
            IoSlot::SubOut => "sub_out",
        }
    }
}

impl Direction {
    /// Map a direction to the IO tree it addresses. `is_self` is true when
    /// the path names `self`, where `in`/`out` mean the subnet side and
    /// `ext_in`/`ext_out` the externally visible side.
    pub fn resolve(self, is_self: bool) -> Result<IoSlot> {
        match (self, is_self) {
            (Direction::In, false) => Ok(IoSlot::In),
            (Direction::Out, false) => Ok(IoSlot::Out),
            (Direction::SubIn, _) => Ok(IoSlot::SubIn),
            (Direction::SubOut, _) => Ok(IoSlot::SubOut),
            (Direction::In, true) => Ok(IoSlot::SubIn),
            (Direction::Out, true) => Ok(IoSlot::SubOut),
            (Direction::ExtIn, true) => Ok(IoSlot::In),
            (Direction::ExtOut, true) => Ok(IoSlot::Out),
            (Direction::ExtIn | Direction::ExtOut, false) => Err(CpcError::domain(format!(
                "'{}' only applies to '{}'",
                self.as_str(),
                SELF_NAME
            ))),
        }
    }
}

/// A parsed item path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPath {
    pub instances: Vec<String>,
    pub direction: Direction,
    pub items: Vec<ItemKey>,
}

impl ItemPath {
    pub fn parse(path: &str) -> Result<ItemPath> {
        let parts: Vec<&str> = path.split(':').collect();
        if parts.len() < 2 {
            return Err(CpcError::domain(format!(
                "item path '{path}' must name an instance and a direction"
            )));
        }
        let (last, names) = parts.split_last().ok_or_else(|| CpcError::domain("empty item path"))?;
        for name in names {
            if !is_valid_name(name) {
                return Err(CpcError::domain(format!(
                    "invalid instance name '{name}' in item path '{path}'"
                )));
            }
        }

        let split = last.find(['.', '[']).unwrap_or(last.len());
        let (dir, rest) = last.split_at(split);
        let direction = Direction::parse(dir).ok_or_else(|| {
            CpcError::domain(format!("unknown direction '{dir}' in item path '{path}'"))
        })?;

        Ok(ItemPath {
            instances: names.iter().map(|s| s.to_string()).collect(),
            direction,
            items: parse_items(rest)?,
        })
    }

    pub fn is_self(&self) -> bool {
        self.instances.last().map(String::as_str) == Some(SELF_NAME)
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instances.join(":"), self.direction.as_str())?;
        for key in &self.items {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Parse an item list such as `.x.y[0][name]` or `x[+]`.
///
/// A leading field may omit its dot.
pub fn parse_items(s: &str) -> Result<Vec<ItemKey>> {
    let mut keys = Vec::new();
    let mut chars = s.char_indices().peekable();
    let mut field = String::new();
    let mut in_field = !s.is_empty() && !s.starts_with(['.', '[']);

    let flush = |field: &mut String, keys: &mut Vec<ItemKey>| -> Result<()> {
        if field.is_empty() {
            return Err(CpcError::domain(format!("empty field name in '{s}'")));
        }
        keys.push(ItemKey::Field(std::mem::take(field)));
        Ok(())
    };

    while let Some((_, c)) = chars.next() {
        match c {
            '.' => {
                if in_field {
                    flush(&mut field, &mut keys)?;
                }
                in_field = true;
            }
            '[' => {
                if in_field {
                    flush(&mut field, &mut keys)?;
                    in_field = false;
                }
                let mut sub = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    sub.push(c);
                }
                if !closed {
                    return Err(CpcError::domain(format!("unclosed '[' in '{s}'")));
                }
                keys.push(subscript_key(&sub));
            }
            ']' => return Err(CpcError::domain(format!("unexpected ']' in '{s}'"))),
            c => {
                if !in_field {
                    return Err(CpcError::domain(format!(
                        "unexpected '{c}' after subscript in '{s}'"
                    )));
                }
                field.push(c);
            }
        }
    }
    if in_field {
        flush(&mut field, &mut keys)?;
    }
    Ok(keys)
}

fn subscript_key(sub: &str) -> ItemKey {
    let sub = sub.trim();
    if sub == "+" {
        return ItemKey::Append;
    }
    if let Ok(i) = sub.parse::<usize>() {
        return ItemKey::Index(i);
    }
    let unquoted = sub
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| sub.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(sub);
    ItemKey::Key(unquoted.to_string())
}

/// Render keys as an item list (`x.y[0]`), without a leading dot.
pub fn format_items(keys: &[ItemKey]) -> String {
    let mut out = String::new();
    for key in keys {
        out.push_str(&key.to_string());
    }
    out.strip_prefix('.').map(str::to_string).unwrap_or(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_path() {
        let p = ItemPath::parse("a:in.x").unwrap();
        assert_eq!(p.instances, vec!["a"]);
        assert_eq!(p.direction, Direction::In);
        assert_eq!(p.items, vec![ItemKey::Field("x".into())]);
    }

    #[test]
    fn parses_nested_instances_and_subscripts() {
        let p = ItemPath::parse("outer:inner:out.runs[2][name].value").unwrap();
        assert_eq!(p.instances, vec!["outer", "inner"]);
        assert_eq!(
            p.items,
            vec![
                ItemKey::Field("runs".into()),
                ItemKey::Index(2),
                ItemKey::Key("name".into()),
                ItemKey::Field("value".into()),
            ]
        );
        assert_eq!(p.to_string(), "outer:inner:out.runs[2][name].value");
    }

    #[test]
    fn whole_record_path_has_no_items() {
        let p = ItemPath::parse("self:ext_in").unwrap();
        assert!(p.is_self());
        assert!(p.items.is_empty());
    }

    #[test]
    fn append_subscript() {
        assert_eq!(
            parse_items("xs[+]").unwrap(),
            vec![ItemKey::Field("xs".into()), ItemKey::Append]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(ItemPath::parse("a").is_err());
        assert!(ItemPath::parse("a:sideways.x").is_err());
        assert!(ItemPath::parse("a:in.x[0").is_err());
        assert!(ItemPath::parse("1a:in.x").is_err());
        assert!(parse_items("x..y").is_err());
    }

    #[test]
    fn ext_directions_only_for_self() {
        assert_eq!(Direction::ExtIn.resolve(true).unwrap(), IoSlot::In);
        assert_eq!(Direction::In.resolve(true).unwrap(), IoSlot::SubIn);
        assert!(Direction::ExtOut.resolve(false).is_err());
    }

    #[test]
    fn format_items_drops_leading_dot() {
        let keys = parse_items("a.b[3]").unwrap();
        assert_eq!(format_items(&keys), "a.b[3]");
    }
}
