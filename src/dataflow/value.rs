// src/dataflow/value.rs

//! Typed value trees.
//!
//! Children are owned by their parent. Connection points attached to a tree
//! live in the project's ACP arena and address nodes by key path, so values
//! carry no back-references.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dataflow::file_list::{FileHandle, FileList};
use crate::dataflow::item_path::ItemKey;
use crate::dataflow::literal::Literal;
use crate::dataflow::vtype::{BaseKind, Type};

#[derive(Debug)]
pub enum ValueData {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    File(FileHandle),
    Record(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

#[derive(Debug)]
struct Staged {
    literal: Literal,
    seq: u64,
}

#[derive(Debug)]
pub struct Value {
    ty: Arc<Type>,
    data: ValueData,
    seq_nr: u64,
    updated: bool,
    staged: Option<Box<Staged>>,
}

impl Value {
    pub fn new(ty: Arc<Type>) -> Value {
        let data = match ty.base() {
            BaseKind::Record => ValueData::Record(BTreeMap::new()),
            BaseKind::Array => ValueData::Array(Vec::new()),
            BaseKind::Dict => ValueData::Dict(BTreeMap::new()),
            _ => ValueData::Null,
        };
        Value {
            ty,
            data,
            seq_nr: 0,
            updated: false,
            staged: None,
        }
    }

    /// Rebuild a node from stored parts. Children of compound data must
    /// already carry their own types.
    pub(crate) fn from_parts(ty: Arc<Type>, data: ValueData, seq_nr: u64, updated: bool) -> Value {
        Value {
            ty,
            data,
            seq_nr,
            updated,
            staged: None,
        }
    }

    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn seq_nr(&self) -> u64 {
        self.seq_nr
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn is_null(&self) -> bool {
        matches!(self.data, ValueData::Null)
    }

    pub fn get(&self, keys: &[ItemKey]) -> Option<&Value> {
        let mut cur = self;
        for key in keys {
            cur = cur.child(key)?;
        }
        Some(cur)
    }

    pub fn child(&self, key: &ItemKey) -> Option<&Value> {
        match (&self.data, key) {
            (ValueData::Record(map), ItemKey::Field(name)) => map.get(name),
            (ValueData::Dict(map), ItemKey::Key(k) | ItemKey::Field(k)) => map.get(k),
            (ValueData::Array(items), ItemKey::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    /// Iterate `(key, child)` pairs of a compound node.
    pub fn children(&self) -> Vec<(ItemKey, &Value)> {
        match &self.data {
            ValueData::Record(map) => map
                .iter()
                .map(|(k, v)| (ItemKey::Field(k.clone()), v))
                .collect(),
            ValueData::Dict(map) => map.iter().map(|(k, v)| (ItemKey::Key(k.clone()), v)).collect(),
            ValueData::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (ItemKey::Index(i), v))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Walk to `keys`, materialising missing record fields, dict entries and
    /// array slots on the way.
    pub fn ensure(&mut self, keys: &[ItemKey]) -> Result<&mut Value, String> {
        let mut cur = self;
        for key in keys {
            cur = cur.ensure_child(key)?;
        }
        Ok(cur)
    }

    fn ensure_child(&mut self, key: &ItemKey) -> Result<&mut Value, String> {
        let member = self
            .ty
            .member(key)
            .ok_or_else(|| format!("type '{}' has no member {}", self.ty, key))?;
        if matches!(self.data, ValueData::Null) {
            self.data = Value::new(Arc::clone(&self.ty)).data;
        }
        match (&mut self.data, key) {
            (ValueData::Record(map), ItemKey::Field(name)) => {
                Ok(map.entry(name.clone()).or_insert_with(|| Value::new(member)))
            }
            (ValueData::Dict(map), ItemKey::Key(k) | ItemKey::Field(k)) => {
                Ok(map.entry(k.clone()).or_insert_with(|| Value::new(member)))
            }
            (ValueData::Array(items), ItemKey::Index(i)) => {
                while items.len() <= *i {
                    items.push(Value::new(Arc::clone(&member)));
                }
                Ok(&mut items[*i])
            }
            (ValueData::Array(items), ItemKey::Append) => {
                items.push(Value::new(member));
                let last = items.len() - 1;
                Ok(&mut items[last])
            }
            _ => Err(format!("cannot address {} inside a {}", key, self.ty)),
        }
    }

    /// Detached copy of the payload. Null record fields are left out.
    pub fn to_literal(&self) -> Literal {
        match &self.data {
            ValueData::Null => Literal::Null,
            ValueData::Bool(b) => Literal::Bool(*b),
            ValueData::Int(i) => Literal::Int(*i),
            ValueData::Float(f) => Literal::Float(*f),
            ValueData::String(s) => Literal::String(s.clone()),
            ValueData::File(h) => Literal::File(h.path()),
            ValueData::Record(map) => Literal::Record(
                map.iter()
                    .filter(|(_, v)| !v.is_empty_payload())
                    .map(|(k, v)| (k.clone(), v.to_literal()))
                    .collect(),
            ),
            ValueData::Array(items) => Literal::Array(items.iter().map(Value::to_literal).collect()),
            ValueData::Dict(map) => Literal::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_literal()))
                    .collect(),
            ),
        }
    }

    /// Like [`to_literal`](Self::to_literal) but also pins every referenced
    /// file so it outlives later overwrites of this value.
    pub fn snapshot(&self, pins: &mut Vec<FileHandle>) -> Literal {
        self.collect_files(pins);
        self.to_literal()
    }

    fn collect_files(&self, pins: &mut Vec<FileHandle>) {
        match &self.data {
            ValueData::File(h) => pins.push(h.clone()),
            _ => {
                for (_, child) in self.children() {
                    child.collect_files(pins);
                }
            }
        }
    }

    fn is_empty_payload(&self) -> bool {
        match &self.data {
            ValueData::Null => true,
            ValueData::Record(map) => map.values().all(Value::is_empty_payload),
            _ => false,
        }
    }

    /// Every non-optional field carries a concrete value.
    pub fn has_required_values(&self) -> bool {
        match &self.data {
            ValueData::Null => false,
            ValueData::Record(map) => self.ty.fields().iter().all(|field| {
                match map.get(&field.name) {
                    Some(child) if !child.is_empty_payload() => child.has_required_values(),
                    _ => field.optional,
                }
            }),
            _ => true,
        }
    }

    /// Write `lit` at `keys` with sequence number `seq`.
    ///
    /// Returns `Ok(false)` when the target is newer than `seq` (stale
    /// write); nothing changes in that case.
    pub fn write_at(
        &mut self,
        keys: &[ItemKey],
        lit: Literal,
        seq: u64,
        files: &Arc<FileList>,
    ) -> Result<bool, String> {
        match keys.split_first() {
            None => {
                if seq < self.seq_nr {
                    return Ok(false);
                }
                let lit = lit.coerce_to(&self.ty)?;
                self.assign(lit, seq, files);
                Ok(true)
            }
            Some((key, rest)) => {
                let written = self.ensure_child(key)?.write_at(rest, lit, seq, files)?;
                if written {
                    self.mark(seq);
                }
                Ok(written)
            }
        }
    }

    fn mark(&mut self, seq: u64) {
        self.updated = true;
        self.seq_nr = self.seq_nr.max(seq);
    }

    /// Overwrite this node with an already type-checked literal.
    fn assign(&mut self, lit: Literal, seq: u64, files: &Arc<FileList>) {
        match lit {
            Literal::Null => match &mut self.data {
                ValueData::Record(map) => {
                    for child in map.values_mut() {
                        child.assign(Literal::Null, seq, files);
                    }
                }
                ValueData::Array(items) => items.clear(),
                ValueData::Dict(map) => map.clear(),
                data => *data = ValueData::Null,
            },
            Literal::Bool(b) => self.data = ValueData::Bool(b),
            Literal::Int(i) => self.data = ValueData::Int(i),
            Literal::Float(f) => self.data = ValueData::Float(f),
            Literal::String(s) => self.data = ValueData::String(s),
            Literal::File(path) => {
                // attach the new record before the old handle is dropped
                let handle = files.acquire(&path);
                let _old = std::mem::replace(&mut self.data, ValueData::File(handle));
            }
            Literal::Record(fields) => {
                for (name, lit) in fields {
                    if let Ok(child) = self.ensure_child(&ItemKey::Field(name)) {
                        child.assign(lit, seq, files);
                    }
                }
            }
            Literal::Array(items) => {
                let len = items.len();
                for (i, lit) in items.into_iter().enumerate() {
                    if let Ok(child) = self.ensure_child(&ItemKey::Index(i)) {
                        child.assign(lit, seq, files);
                    }
                }
                if let ValueData::Array(existing) = &mut self.data {
                    existing.truncate(len);
                }
            }
            Literal::Dict(entries) => {
                if let ValueData::Dict(existing) = &mut self.data {
                    existing.retain(|k, _| entries.contains_key(k));
                }
                for (key, lit) in entries {
                    if let Ok(child) = self.ensure_child(&ItemKey::Key(key)) {
                        child.assign(lit, seq, files);
                    }
                }
            }
        }
        self.mark(seq);
    }

    /// Put `lit` in the staging slot at `keys`. Stale writes are dropped
    /// (`Ok(false)`).
    pub fn stage_at(&mut self, keys: &[ItemKey], lit: Literal, seq: u64) -> Result<bool, String> {
        let node = self.ensure(keys)?;
        if seq < node.seq_nr {
            return Ok(false);
        }
        let literal = lit.coerce_to(&node.ty)?;
        node.staged = Some(Box::new(Staged { literal, seq }));
        Ok(true)
    }

    /// Apply every staged write in this tree. Returns the paths written.
    pub fn promote_staged(&mut self, files: &Arc<FileList>) -> Vec<Vec<ItemKey>> {
        let mut written = Vec::new();
        self.promote_into(&mut Vec::new(), files, &mut written);
        written
    }

    fn promote_into(
        &mut self,
        prefix: &mut Vec<ItemKey>,
        files: &Arc<FileList>,
        written: &mut Vec<Vec<ItemKey>>,
    ) -> Option<u64> {
        let mut max_seq = None;
        if let Some(staged) = self.staged.take() {
            if staged.seq >= self.seq_nr {
                self.assign(staged.literal, staged.seq, files);
                written.push(prefix.clone());
                max_seq = Some(staged.seq);
            }
        }
        let keys: Vec<ItemKey> = self.children().into_iter().map(|(k, _)| k).collect();
        for key in keys {
            prefix.push(key.clone());
            if let Some(child) = self.child_mut(&key) {
                if let Some(seq) = child.promote_into(prefix, files, written) {
                    max_seq = Some(max_seq.map_or(seq, |m: u64| m.max(seq)));
                }
            }
            prefix.pop();
        }
        if let Some(seq) = max_seq {
            self.mark(seq);
        }
        max_seq
    }

    /// Drop every staged write in this tree.
    pub fn discard_staged(&mut self) {
        self.staged = None;
        match &mut self.data {
            ValueData::Record(map) | ValueData::Dict(map) => {
                map.values_mut().for_each(Value::discard_staged)
            }
            ValueData::Array(items) => items.iter_mut().for_each(Value::discard_staged),
            _ => {}
        }
    }

    fn child_mut(&mut self, key: &ItemKey) -> Option<&mut Value> {
        match (&mut self.data, key) {
            (ValueData::Record(map), ItemKey::Field(name)) => map.get_mut(name),
            (ValueData::Dict(map), ItemKey::Key(k) | ItemKey::Field(k)) => map.get_mut(k),
            (ValueData::Array(items), ItemKey::Index(i)) => items.get_mut(*i),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, keys: &[ItemKey]) -> Option<&mut Value> {
        let mut cur = self;
        for key in keys {
            cur = cur.child_mut(key)?;
        }
        Some(cur)
    }

    /// Reset `updated` on this node and all descendants.
    pub fn clear_updated(&mut self) {
        self.updated = false;
        match &mut self.data {
            ValueData::Record(map) | ValueData::Dict(map) => {
                map.values_mut().for_each(Value::clear_updated)
            }
            ValueData::Array(items) => items.iter_mut().for_each(Value::clear_updated),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::vtype::Field;
    use crate::fs::mock::MockFileSystem;

    fn files() -> Arc<FileList> {
        FileList::new("/p", Arc::new(MockFileSystem::new()))
    }

    fn io_type() -> Arc<Type> {
        Type::record(
            "in",
            vec![
                Field::new("x", Type::int()),
                Field::new("label", Type::string()).optional(),
                Field::new("xs", Type::array("array", Type::float())).optional(),
            ],
        )
    }

    fn key(name: &str) -> ItemKey {
        ItemKey::Field(name.to_string())
    }

    #[test]
    fn write_bumps_seq_and_marks_ancestors() {
        let files = files();
        let mut v = Value::new(io_type());
        assert!(v.write_at(&[key("x")], Literal::Int(7), 3, &files).unwrap());
        assert_eq!(v.get(&[key("x")]).unwrap().to_literal(), Literal::Int(7));
        assert_eq!(v.seq_nr(), 3);
        assert!(v.is_updated());
        assert!(v.get(&[key("x")]).unwrap().is_updated());
    }

    #[test]
    fn stale_write_is_ignored() {
        let files = files();
        let mut v = Value::new(io_type());
        v.write_at(&[key("x")], Literal::Int(1), 5, &files).unwrap();
        assert!(!v.write_at(&[key("x")], Literal::Int(2), 4, &files).unwrap());
        assert_eq!(v.get(&[key("x")]).unwrap().to_literal(), Literal::Int(1));
        assert_eq!(v.get(&[key("x")]).unwrap().seq_nr(), 5);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let files = files();
        let mut v = Value::new(io_type());
        let err = v
            .write_at(&[key("x")], Literal::String("no".into()), 1, &files)
            .unwrap_err();
        assert!(err.contains("does not fit"));
        assert!(v.write_at(&[key("nope")], Literal::Int(1), 1, &files).is_err());
    }

    #[test]
    fn required_values_ignore_optional_fields() {
        let files = files();
        let mut v = Value::new(io_type());
        assert!(!v.has_required_values());
        v.write_at(&[key("x")], Literal::Int(0), 1, &files).unwrap();
        assert!(v.has_required_values());
    }

    #[test]
    fn staged_writes_apply_only_on_promote() {
        let files = files();
        let mut v = Value::new(io_type());
        assert!(v.stage_at(&[key("x")], Literal::Int(9), 2).unwrap());
        assert!(v.get(&[key("x")]).unwrap().is_null());
        let written = v.promote_staged(&files);
        assert_eq!(written, vec![vec![key("x")]]);
        assert_eq!(v.get(&[key("x")]).unwrap().to_literal(), Literal::Int(9));
        assert_eq!(v.seq_nr(), 2);
    }

    #[test]
    fn discarded_stage_leaves_value_untouched() {
        let files = files();
        let mut v = Value::new(io_type());
        v.write_at(&[key("x")], Literal::Int(1), 1, &files).unwrap();
        v.stage_at(&[key("x")], Literal::Int(2), 2).unwrap();
        v.discard_staged();
        assert!(v.promote_staged(&files).is_empty());
        assert_eq!(v.get(&[key("x")]).unwrap().to_literal(), Literal::Int(1));
    }

    #[test]
    fn array_assignment_truncates_and_appends() {
        let files = files();
        let mut v = Value::new(io_type());
        let xs = Literal::Array(vec![Literal::Float(1.0), Literal::Int(2)]);
        v.write_at(&[key("xs")], xs, 1, &files).unwrap();
        v.write_at(&[key("xs"), ItemKey::Append], Literal::Float(3.0), 2, &files)
            .unwrap();
        assert_eq!(
            v.get(&[key("xs")]).unwrap().to_literal(),
            Literal::Array(vec![Literal::Float(1.0), Literal::Float(2.0), Literal::Float(3.0)])
        );
        v.write_at(&[key("xs")], Literal::Array(vec![Literal::Float(0.5)]), 3, &files)
            .unwrap();
        assert_eq!(
            v.get(&[key("xs")]).unwrap().to_literal(),
            Literal::Array(vec![Literal::Float(0.5)])
        );
    }

    #[test]
    fn clear_updated_is_recursive() {
        let files = files();
        let mut v = Value::new(io_type());
        v.write_at(&[key("x")], Literal::Int(1), 1, &files).unwrap();
        v.clear_updated();
        assert!(!v.is_updated());
        assert!(!v.get(&[key("x")]).unwrap().is_updated());
    }

    #[test]
    fn file_reassignment_releases_old_record() {
        let files = files();
        let ty = Type::record("r", vec![Field::new("f", Type::file())]);
        let mut v = Value::new(ty);
        v.write_at(&[key("f")], Literal::File("a.dat".into()), 1, &files)
            .unwrap();
        assert_eq!(files.refcount("a.dat"), 1);
        v.write_at(&[key("f")], Literal::File("b.dat".into()), 2, &files)
            .unwrap();
        assert_eq!(files.refcount("a.dat"), 0);
        assert_eq!(files.refcount("b.dat"), 1);
    }
}
