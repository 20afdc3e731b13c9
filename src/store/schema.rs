//! Label and relation schemas.
//!
//! A schema names a label or relation type, caches its dense id, and owns
//! the indexes and constraints attached to it. Cross-links inside the store
//! are integer ids; a schema never holds pointers back into the store.

use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::index::Index;

/// Dense label identifier. Assigned on first sight, never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub u16);

/// Dense relation-type identifier. Assigned on first sight, never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelTypeId(pub u16);

/// Dense attribute identifier. Assigned on first sight, never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttrId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Node,
    Relation,
}

#[derive(Debug)]
pub struct Schema {
    pub kind: SchemaKind,
    pub name: String,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
}

impl Schema {
    pub fn new(kind: SchemaKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// The first index whose leading field is `attr`, if any. The planner
    /// uses this to turn label scans plus equality/range filters into index
    /// scans.
    pub fn index_on(&self, attr: AttrId) -> Option<&Index> {
        self.indexes.iter().find(|idx| idx.leading_field() == Some(attr))
    }

    pub fn index_on_mut(&mut self, attr: AttrId) -> Option<&mut Index> {
        self.indexes.iter_mut().find(|idx| idx.leading_field() == Some(attr))
    }

    /// Exact-position match over the full field list.
    pub fn index_with_fields(&self, fields: &[AttrId]) -> Option<usize> {
        self.indexes.iter().position(|idx| idx.fields_are(fields))
    }

    pub fn has_indexes(&self) -> bool {
        !self.indexes.is_empty()
    }
}
