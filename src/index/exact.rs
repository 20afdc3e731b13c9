//! Exact-match index: equality and range lookup over an attribute tuple.
//!
//! Keys are structured tuples of property values ordered by
//! [`Value::total_cmp`], so composite keys need no string flattening or
//! sentinel separator. An entity is indexed only when every field of the
//! tuple is present on it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::model::Value;
use crate::store::entity::AttributeSet;
use crate::store::schema::AttrId;

/// A property value wrapped with the total order used by the index tree.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyAtom(pub Value);

impl Eq for KeyAtom {}

impl PartialOrd for KeyAtom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyAtom {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Composite key: one atom per indexed field, in field order.
pub type IndexKey = Vec<KeyAtom>;

#[derive(Debug, Default)]
pub struct ExactIndex {
    fields: Vec<AttrId>,
    map: BTreeMap<IndexKey, Vec<u64>>,
    entries: u64,
}

impl ExactIndex {
    pub fn new(fields: Vec<AttrId>) -> Self {
        Self { fields, map: BTreeMap::new(), entries: 0 }
    }

    pub fn fields(&self) -> &[AttrId] {
        &self.fields
    }

    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn key_for(&self, attrs: &AttributeSet) -> Option<IndexKey> {
        let mut key = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            key.push(KeyAtom(attrs.get(*field)?.clone()));
        }
        Some(key)
    }

    pub fn index_entity(&mut self, id: u64, attrs: &AttributeSet) {
        let Some(key) = self.key_for(attrs) else { return };
        let ids = self.map.entry(key).or_default();
        if !ids.contains(&id) {
            ids.push(id);
            self.entries += 1;
        }
    }

    pub fn unindex_entity(&mut self, id: u64, attrs: &AttributeSet) {
        let Some(key) = self.key_for(attrs) else { return };
        if let Some(ids) = self.map.get_mut(&key) {
            let before = ids.len();
            ids.retain(|x| *x != id);
            if ids.len() < before {
                self.entries -= 1;
            }
            if ids.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.entries = 0;
    }

    /// Entities whose key tuple equals `values` exactly.
    pub fn query_eq(&self, values: &[Value]) -> Vec<u64> {
        let key: IndexKey = values.iter().cloned().map(KeyAtom).collect();
        self.map.get(&key).cloned().unwrap_or_default()
    }

    /// Whether any entity other than `exclude` carries this key tuple.
    /// The uniqueness constraint probes with this before a write lands.
    pub fn occupied_by_other(&self, values: &[Value], exclude: Option<u64>) -> bool {
        self.query_eq(values)
            .iter()
            .any(|id| Some(*id) != exclude)
    }

    /// Entities whose *leading* field falls within the given bounds, in
    /// ascending key order (the ordering IndexScan promises downstream).
    pub fn query_range(
        &self,
        low: Bound<&Value>,
        high: Bound<&Value>,
    ) -> Vec<u64> {
        let mut out = Vec::new();
        for (key, ids) in self.map.iter() {
            let lead = &key[0].0;
            let above_low = match low {
                Bound::Unbounded => true,
                Bound::Included(v) => lead.total_cmp(v) != Ordering::Less,
                Bound::Excluded(v) => lead.total_cmp(v) == Ordering::Greater,
            };
            if !above_low {
                continue;
            }
            let below_high = match high {
                Bound::Unbounded => true,
                Bound::Included(v) => lead.total_cmp(v) != Ordering::Greater,
                Bound::Excluded(v) => lead.total_cmp(v) == Ordering::Less,
            };
            if !below_high {
                // keys are sorted by leading atom first; nothing further matches
                break;
            }
            out.extend_from_slice(ids);
        }
        out
    }
}
