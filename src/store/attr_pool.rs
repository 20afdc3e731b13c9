//! Attribute pool — interned property names.
//!
//! Every property name used anywhere in a graph is interned once; entities
//! and indexes refer to attributes by `AttrId` and compare by id. Ids are
//! assigned in first-seen order and are stable for the lifetime of the
//! graph — they are never recycled.

use hashbrown::HashMap;

use super::schema::AttrId;

#[derive(Debug, Default, Clone)]
pub struct AttributePool {
    by_name: HashMap<String, AttrId>,
    // insertion-order list, doubles as the reverse mapping
    names: Vec<String>,
}

impl AttributePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `name`, assigning the next id on first sight.
    pub fn intern(&mut self, name: &str) -> AttrId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = AttrId(self.names.len() as u16);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Lookup without interning.
    pub fn id_of(&self, name: &str) -> Option<AttrId> {
        self.by_name.get(name).copied()
    }

    /// O(1) reverse lookup. An out-of-range id is a programmer error.
    pub fn name_of(&self, id: AttrId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// Names in id order, for snapshot encoding.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_intern_is_idempotent() {
        let mut pool = AttributePool::new();
        let a = pool.intern("name");
        let b = pool.intern("age");
        assert_eq!(pool.intern("name"), a);
        assert_eq!(pool.intern("age"), b);
        assert_ne!(a, b);
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut pool = AttributePool::new();
        let id = pool.intern("email");
        assert_eq!(pool.name_of(id), "email");
        assert_eq!(pool.id_of("email"), Some(id));
        assert_eq!(pool.id_of("missing"), None);
    }
}
