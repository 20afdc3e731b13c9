//! PropertyMap — the name → value mapping on materialized nodes and edges.

use super::Value;

/// A map of property names to values.
pub type PropertyMap = hashbrown::HashMap<String, Value>;

/// Build a PropertyMap from literal pairs; handy in tests and embedding code.
pub fn props(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> PropertyMap {
    pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}
