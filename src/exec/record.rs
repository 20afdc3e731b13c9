//! Execution records and their layout.
//!
//! During enrichment every identifier in a query — user-written, synthetic
//! anonymous, or projection alias — is resolved to a slot index in a
//! [`RecordLayout`]. A [`Record`] is then just a boxed slice of values; the
//! operators address slots by index and never look names up on the hot
//! path.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::model::Value;

/// Name → slot mapping, fixed at plan time and shared by every record of a
/// query.
#[derive(Debug, Default, Clone)]
pub struct RecordLayout {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl RecordLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name, returning its slot. Idempotent: re-adding returns the
    /// existing slot.
    pub fn add(&mut self, name: &str) -> usize {
        if let Some(slot) = self.by_name.get(name) {
            return *slot;
        }
        let slot = self.names.len();
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), slot);
        slot
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One tuple flowing through the operator tree. Unbound slots hold NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    slots: Box<[Value]>,
}

impl Record {
    pub fn empty(layout: &Arc<RecordLayout>) -> Self {
        Self {
            slots: vec![Value::Null; layout.len()].into_boxed_slice(),
        }
    }

    pub fn get(&self, slot: usize) -> &Value {
        &self.slots[slot]
    }

    pub fn set(&mut self, slot: usize, value: Value) {
        self.slots[slot] = value;
    }

    pub fn take(&mut self, slot: usize) -> Value {
        std::mem::replace(&mut self.slots[slot], Value::Null)
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_layout_add_idempotent() {
        let mut layout = RecordLayout::new();
        let a = layout.add("a");
        let b = layout.add("b");
        assert_eq!(layout.add("a"), a);
        assert_ne!(a, b);
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.slot("b"), Some(b));
        assert_eq!(layout.slot("missing"), None);
    }

    #[test]
    fn test_record_slots() {
        let mut layout = RecordLayout::new();
        let a = layout.add("a");
        let layout = Arc::new(layout);
        let mut rec = Record::empty(&layout);
        assert_eq!(rec.get(a), &Value::Null);
        rec.set(a, Value::Int(7));
        assert_eq!(rec.get(a), &Value::Int(7));
        assert_eq!(rec.take(a), Value::Int(7));
        assert_eq!(rec.get(a), &Value::Null);
    }
}
