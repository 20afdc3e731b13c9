//! Secondary indexes shadowing the graph store.
//!
//! Two kinds share one interface: exact-match (equality and range over a
//! tuple of attributes) and full-text (tokenized search over weighted
//! fields). The store notifies the indexes of every mutation that touches
//! an indexed attribute or label; the planner consumes them through
//! [`ExactIndex::query_eq`] / [`ExactIndex::query_range`] and
//! [`FullTextIndex::query`].
//!
//! Index maintenance failures never abort the underlying write: the store
//! applies the entity mutation first and reindexes after.

pub mod exact;
pub mod fulltext;

pub use exact::ExactIndex;
pub use fulltext::{FtField, FullTextIndex};

use crate::store::entity::AttributeSet;
use crate::store::schema::AttrId;

/// An index attached to a schema.
#[derive(Debug)]
pub enum Index {
    Exact(ExactIndex),
    FullText(FullTextIndex),
}

impl Index {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Index::Exact(_) => "exact-match",
            Index::FullText(_) => "full-text",
        }
    }

    pub fn fields(&self) -> Vec<AttrId> {
        match self {
            Index::Exact(idx) => idx.fields().to_vec(),
            Index::FullText(idx) => idx.fields().iter().map(|f| f.attr).collect(),
        }
    }

    pub fn leading_field(&self) -> Option<AttrId> {
        self.fields().first().copied()
    }

    pub fn fields_are(&self, fields: &[AttrId]) -> bool {
        self.fields() == fields
    }

    /// Does a property diff on `attr` concern this index?
    pub fn covers(&self, attr: AttrId) -> bool {
        self.fields().contains(&attr)
    }

    pub fn index_entity(&mut self, id: u64, attrs: &AttributeSet) {
        match self {
            Index::Exact(idx) => idx.index_entity(id, attrs),
            Index::FullText(idx) => idx.index_entity(id, attrs),
        }
    }

    pub fn unindex_entity(&mut self, id: u64, attrs: &AttributeSet) {
        match self {
            Index::Exact(idx) => idx.unindex_entity(id, attrs),
            Index::FullText(idx) => idx.unindex_entity(id, attrs),
        }
    }

    /// Remove the entity under its old attributes, re-add under the new.
    pub fn reindex_entity(&mut self, id: u64, old: &AttributeSet, new: &AttributeSet) {
        self.unindex_entity(id, old);
        self.index_entity(id, new);
    }

    /// Drop everything and re-add the given entities. Used after bulk load
    /// and snapshot restore.
    pub fn rebuild<'a>(&mut self, entities: impl Iterator<Item = (u64, &'a AttributeSet)>) {
        match self {
            Index::Exact(idx) => idx.clear(),
            Index::FullText(idx) => idx.clear(),
        }
        for (id, attrs) in entities {
            self.index_entity(id, attrs);
        }
    }
}
