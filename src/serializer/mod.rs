//! Versioned binary snapshot of a graph store.
//!
//! Layout, in stream order:
//!
//! ```text
//! u32  version
//! str  graph name
//! u64  key count (number of phase payloads)
//! phase* — each a u8 tag followed by its payload:
//!   NODES          per node: id, label ids, property block
//!   DELETED_NODES  freed node ids
//!   EDGES          per edge: id, src, dst, relation, property block
//!   DELETED_EDGES  freed edge ids
//!   GRAPH_SCHEMA   attribute pool, node schemas, relation schemas —
//!                  each schema with its indexes (kind, language,
//!                  stopwords, fields with weight/nostem/phonetic) and
//!                  constraints (kind, status, fields)
//! ```
//!
//! Typed values are tag-prefixed: NULL=0, INT64=1, DOUBLE=2, STRING=3,
//! BOOL=4, ARRAY=5 (length-prefixed, recursive), POINT=6. Integers are
//! little-endian. Decoding rebuilds matrices through the regular restore
//! path, flushes, and re-populates every index.

pub mod decode;
pub mod encode;

pub use decode::decode;
pub use encode::encode;

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

pub(crate) const PHASE_NODES: u8 = 0;
pub(crate) const PHASE_DELETED_NODES: u8 = 1;
pub(crate) const PHASE_EDGES: u8 = 2;
pub(crate) const PHASE_DELETED_EDGES: u8 = 3;
pub(crate) const PHASE_GRAPH_SCHEMA: u8 = 4;

pub(crate) const VALUE_NULL: u8 = 0;
pub(crate) const VALUE_INT64: u8 = 1;
pub(crate) const VALUE_DOUBLE: u8 = 2;
pub(crate) const VALUE_STRING: u8 = 3;
pub(crate) const VALUE_BOOL: u8 = 4;
pub(crate) const VALUE_ARRAY: u8 = 5;
pub(crate) const VALUE_POINT: u8 = 6;

pub(crate) const INDEX_EXACT: u8 = 0;
pub(crate) const INDEX_FULLTEXT: u8 = 1;

pub(crate) const CONSTRAINT_UNIQUE: u8 = 0;
pub(crate) const CONSTRAINT_MANDATORY: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintKind;
    use crate::index::FtField;
    use crate::model::Value;
    use crate::store::GraphStore;

    fn build_store() -> GraphStore {
        let mut g = GraphStore::new();
        let person = g.intern_label("Person");
        let city = g.intern_label("City");
        let knows = g.intern_relation("KNOWS");
        let lives = g.intern_relation("LIVES_IN");
        let name = g.intern_attr("name");
        let age = g.intern_attr("age");
        let tags = g.intern_attr("tags");

        let a = g
            .create_node(&[person], vec![
                (name, Value::from("Roi")),
                (age, Value::Int(30)),
                (tags, Value::Array(vec![Value::Int(1), Value::from("x")])),
            ])
            .unwrap();
        let b = g.create_node(&[person], vec![(name, Value::from("Ailon"))]).unwrap();
        let c = g.create_node(&[city], vec![(name, Value::from("Haifa"))]).unwrap();
        let dead = g.create_node(&[person], vec![]).unwrap();

        g.create_edge(a, b, knows, vec![(age, Value::Double(2.5))]).unwrap();
        g.create_edge(a, b, knows, vec![]).unwrap(); // multi-edge
        g.create_edge(b, c, lives, vec![]).unwrap();

        g.delete_node(dead).unwrap();
        g.create_node_exact_index(person, vec![name]).unwrap();
        g.create_node_fulltext_index(
            city,
            vec![FtField { attr: name, weight: 2.0, nostem: true, phonetic: false }],
            "english",
            Some(vec!["der".into(), "die".into()]),
        )
        .unwrap();
        g.create_node_constraint(person, ConstraintKind::Unique(vec![name])).unwrap();
        g.flush();
        g
    }

    #[test]
    fn test_roundtrip_preserves_everything() {
        let original = build_store();
        let mut buf = Vec::new();
        encode(&original, "social", &mut buf).unwrap();

        let (name, restored) = decode(&mut buf.as_slice()).unwrap();
        assert_eq!(name, "social");

        // entities
        assert_eq!(restored.node_count(), original.node_count());
        assert_eq!(restored.edge_count(), original.edge_count());
        assert_eq!(restored.label_count(), original.label_count());
        assert_eq!(restored.relation_count(), original.relation_count());
        assert_eq!(restored.pool().count(), original.pool().count());

        // per-node deep equality
        for (id, node) in original.nodes().iter() {
            let restored_node = restored.nodes().get(id).expect("node survived");
            assert_eq!(restored_node, node);
        }
        for (id, edge) in original.edges().iter() {
            let restored_edge = restored.edges().get(id).expect("edge survived");
            assert_eq!(restored_edge, edge);
        }

        // adjacency and multi-edge state
        let person = restored.label_id("Person").unwrap();
        let knows = restored.relation_id("KNOWS").unwrap();
        assert_eq!(restored.label_node_count(person), original.label_node_count(person));
        assert_eq!(
            restored.rel_matrix(knows).nnz(),
            original.rel_matrix(knows).nnz()
        );
        assert_eq!(
            restored
                .edges_between(crate::model::NodeId(0), crate::model::NodeId(1), knows)
                .len(),
            2
        );

        // schema: indexes and constraints
        let schema = restored.node_schema(person);
        assert_eq!(schema.indexes.len(), 1);
        assert_eq!(schema.constraints.len(), 1);
        let city = restored.label_id("City").unwrap();
        let city_schema = restored.node_schema(city);
        assert_eq!(city_schema.indexes.len(), 1);

        // freed ids restore into the reuse pool
        let freed: Vec<u64> = restored.nodes().free_ids().collect();
        assert_eq!(freed, vec![3]);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut buf = Vec::new();
        encode(&GraphStore::new(), "g", &mut buf).unwrap();
        buf[0] = 0xEE;
        assert!(decode(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let mut buf = Vec::new();
        encode(&build_store(), "g", &mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(decode(&mut buf.as_slice()).is_err());
    }
}
