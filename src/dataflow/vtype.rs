// src/dataflow/vtype.rs

//! Value schemas.
//!
//! A [`Type`] is immutable and shared behind `Arc`. User-declared subtypes
//! keep a pointer to their parent so that subtype checks walk the chain.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataflow::item_path::ItemKey;

/// Base variant of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseKind {
    Bool,
    Int,
    Float,
    String,
    File,
    Record,
    Array,
    Dict,
}

impl BaseKind {
    pub fn is_compound(self) -> bool {
        matches!(self, BaseKind::Record | BaseKind::Array | BaseKind::Dict)
    }

    pub fn name(self) -> &'static str {
        match self {
            BaseKind::Bool => "bool",
            BaseKind::Int => "int",
            BaseKind::Float => "float",
            BaseKind::String => "string",
            BaseKind::File => "file",
            BaseKind::Record => "record",
            BaseKind::Array => "array",
            BaseKind::Dict => "dict",
        }
    }
}

/// A named member of a record type.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Arc<Type>,
    pub optional: bool,
    pub constant: bool,
    pub description: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Arc<Type>) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            constant: false,
            description: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum Members {
    Scalar,
    File {
        extension: Option<String>,
        mime: Option<String>,
    },
    Record(Vec<Field>),
    Array(Arc<Type>),
    Dict(Arc<Type>),
}

#[derive(Debug, Clone)]
pub struct Type {
    name: String,
    base: BaseKind,
    parent: Option<Arc<Type>>,
    description: Option<String>,
    members: Members,
}

impl Type {
    fn scalar(base: BaseKind) -> Arc<Type> {
        Arc::new(Type {
            name: base.name().to_string(),
            base,
            parent: None,
            description: None,
            members: Members::Scalar,
        })
    }

    pub fn bool() -> Arc<Type> {
        Self::scalar(BaseKind::Bool)
    }

    pub fn int() -> Arc<Type> {
        Self::scalar(BaseKind::Int)
    }

    pub fn float() -> Arc<Type> {
        Self::scalar(BaseKind::Float)
    }

    pub fn string() -> Arc<Type> {
        Self::scalar(BaseKind::String)
    }

    pub fn file() -> Arc<Type> {
        Self::file_with(None, None)
    }

    pub fn file_with(extension: Option<String>, mime: Option<String>) -> Arc<Type> {
        Arc::new(Type {
            name: "file".to_string(),
            base: BaseKind::File,
            parent: None,
            description: None,
            members: Members::File { extension, mime },
        })
    }

    pub fn record(name: impl Into<String>, fields: Vec<Field>) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base: BaseKind::Record,
            parent: None,
            description: None,
            members: Members::Record(fields),
        })
    }

    pub fn array(name: impl Into<String>, elem: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base: BaseKind::Array,
            parent: None,
            description: None,
            members: Members::Array(elem),
        })
    }

    pub fn dict(name: impl Into<String>, elem: Arc<Type>) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base: BaseKind::Dict,
            parent: None,
            description: None,
            members: Members::Dict(elem),
        })
    }

    /// Declare a named subtype that shares `parent`'s members.
    pub fn subtype(
        name: impl Into<String>,
        parent: &Arc<Type>,
        description: Option<String>,
    ) -> Arc<Type> {
        Arc::new(Type {
            name: name.into(),
            base: parent.base,
            parent: Some(Arc::clone(parent)),
            description,
            members: parent.members.clone(),
        })
    }

    /// The implicit `msg` record every function output carries.
    pub fn msg_record() -> Arc<Type> {
        Type::record(
            "msg",
            vec![
                Field::new("error", Type::string()).optional(),
                Field::new("warning", Type::string()).optional(),
            ],
        )
    }

    pub fn with_description(self: Arc<Self>, text: impl Into<String>) -> Arc<Type> {
        let mut ty = (*self).clone();
        ty.description = Some(text.into());
        Arc::new(ty)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> BaseKind {
        self.base
    }

    pub fn parent(&self) -> Option<&Arc<Type>> {
        self.parent.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn members(&self) -> &Members {
        &self.members
    }

    /// Fields of a record type; empty for everything else.
    pub fn fields(&self) -> &[Field] {
        match &self.members {
            Members::Record(fields) => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn element(&self) -> Option<&Arc<Type>> {
        match &self.members {
            Members::Array(elem) | Members::Dict(elem) => Some(elem),
            _ => None,
        }
    }

    /// A copy of this record type with one more field.
    pub fn with_field(&self, field: Field) -> Arc<Type> {
        let mut ty = self.clone();
        if let Members::Record(fields) = &mut ty.members {
            fields.retain(|f| f.name != field.name);
            fields.push(field);
        }
        Arc::new(ty)
    }

    /// Type of the member addressed by `key`.
    pub fn member(&self, key: &ItemKey) -> Option<Arc<Type>> {
        match (&self.members, key) {
            (Members::Record(fields), ItemKey::Field(name)) => fields
                .iter()
                .find(|f| &f.name == name)
                .map(|f| Arc::clone(&f.ty)),
            (Members::Array(elem), ItemKey::Index(_) | ItemKey::Append) => Some(Arc::clone(elem)),
            (Members::Dict(elem), ItemKey::Key(_) | ItemKey::Field(_)) => Some(Arc::clone(elem)),
            _ => None,
        }
    }

    /// Type reached by walking `keys` from this type.
    pub fn descend(self: &Arc<Self>, keys: &[ItemKey]) -> Option<Arc<Type>> {
        let mut cur = Arc::clone(self);
        for key in keys {
            cur = cur.member(key)?;
        }
        Some(cur)
    }

    pub fn is_subtype_of(&self, other: &Type) -> bool {
        let mut cur = Some(self);
        while let Some(t) = cur {
            if t.name == other.name && t.base == other.base {
                return true;
            }
            cur = t.parent.as_deref();
        }
        false
    }

    /// Whether a value of type `src` can flow into a slot of this type.
    pub fn accepts(&self, src: &Type) -> bool {
        if src.is_subtype_of(self) || self.is_subtype_of(src) {
            return true;
        }
        match (&self.members, &src.members) {
            (Members::Scalar, Members::Scalar) => {
                self.base == BaseKind::Float && src.base == BaseKind::Int
            }
            (Members::File { .. }, Members::File { .. }) => true,
            (Members::Record(dst_fields), Members::Record(src_fields)) => {
                let src_ok = src_fields.iter().all(|sf| {
                    dst_fields
                        .iter()
                        .find(|df| df.name == sf.name)
                        .is_some_and(|df| df.ty.accepts(&sf.ty))
                });
                let required_ok = dst_fields
                    .iter()
                    .filter(|df| !df.optional)
                    .all(|df| src_fields.iter().any(|sf| sf.name == df.name));
                src_ok && required_ok
            }
            (Members::Array(d), Members::Array(s)) | (Members::Dict(d), Members::Dict(s)) => {
                d.accepts(s)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.members {
            Members::Array(elem) if self.name == "array" => write!(f, "array<{}>", elem),
            Members::Dict(elem) if self.name == "dict" => write!(f, "dict<{}>", elem),
            _ => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_chain_is_walked() {
        let energy = Type::subtype("energy", &Type::float(), None);
        let kinetic = Type::subtype("kinetic", &energy, Some("kinetic energy".into()));
        assert!(kinetic.is_subtype_of(&energy));
        assert!(kinetic.is_subtype_of(&Type::float()));
        assert!(!energy.is_subtype_of(&kinetic));
        assert_eq!(kinetic.base(), BaseKind::Float);
    }

    #[test]
    fn float_accepts_int_but_not_string() {
        assert!(Type::float().accepts(&Type::int()));
        assert!(!Type::int().accepts(&Type::float()));
        assert!(!Type::string().accepts(&Type::int()));
    }

    #[test]
    fn unrelated_scalar_subtypes_do_not_mix() {
        let count = Type::subtype("count", &Type::int(), None);
        let index = Type::subtype("index", &Type::int(), None);
        assert!(!count.accepts(&index));
        assert!(Type::int().accepts(&count));
    }

    #[test]
    fn record_acceptance_checks_required_fields() {
        let dst = Type::record(
            "dst",
            vec![
                Field::new("x", Type::int()),
                Field::new("note", Type::string()).optional(),
            ],
        );
        let src_ok = Type::record("src", vec![Field::new("x", Type::int())]);
        let src_missing = Type::record("src2", vec![Field::new("note", Type::string())]);
        assert!(dst.accepts(&src_ok));
        assert!(!dst.accepts(&src_missing));
    }

    #[test]
    fn descend_through_compound_members() {
        let arr = Type::array("array", Type::int());
        let rec = Type::record("r", vec![Field::new("xs", arr)]);
        let found = rec
            .descend(&[ItemKey::Field("xs".into()), ItemKey::Index(3)])
            .unwrap();
        assert_eq!(found.base(), BaseKind::Int);
        assert!(rec.descend(&[ItemKey::Field("nope".into())]).is_none());
    }
}
