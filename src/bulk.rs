//! Bulk-load frame decoder.
//!
//! A frame carries nodes first, then edges, grouped by label and relation:
//!
//! ```text
//! u16 attribute count, attribute names     (resolves attribute ids)
//! u16 label count, label names
//! per label:    u64 node count, node rows
//! u16 relation count, relation names
//! per relation: u64 edge count, edge rows
//! ```
//!
//! A node row is `(attribute-count, (attribute-id, typed-value)*)`; an
//! edge row prefixes the same block with its endpoints, given as 0-based
//! positions of the nodes within this frame. Typed values use the
//! snapshot encoding.
//!
//! Loading goes through the regular store write path, so constraints are
//! enforced and indexes stay coherent; the store is flushed every
//! `flush_every` entities and once at the end.

use std::io::Read;

use tracing::info;

use crate::model::{NodeId, Value};
use crate::serializer::decode::{read_string, read_u16, read_u64, read_value};
use crate::store::{AttrId, GraphStore};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    pub nodes_created: u64,
    pub relationships_created: u64,
}

pub fn load<R: Read>(store: &mut GraphStore, input: &mut R, flush_every: u64) -> Result<BulkStats> {
    let mut stats = BulkStats::default();
    let mut since_flush = 0u64;
    let mut flush_tick = |store: &mut GraphStore, since: &mut u64| {
        *since += 1;
        if flush_every > 0 && *since >= flush_every {
            store.flush();
            *since = 0;
        }
    };

    // attribute table
    let attr_count = read_u16(input)?;
    let mut attrs: Vec<AttrId> = Vec::with_capacity(attr_count as usize);
    for _ in 0..attr_count {
        let name = read_string(input)?;
        attrs.push(store.intern_attr(&name));
    }
    let resolve_attr = |attrs: &[AttrId], raw: u16| -> Result<AttrId> {
        attrs.get(raw as usize).copied().ok_or_else(|| {
            Error::Semantic(format!("bulk frame references unknown attribute {raw}"))
        })
    };

    // nodes, grouped by label
    let label_count = read_u16(input)?;
    let mut labels = Vec::with_capacity(label_count as usize);
    for _ in 0..label_count {
        let name = read_string(input)?;
        labels.push(store.intern_label(&name));
    }
    let mut frame_nodes: Vec<NodeId> = Vec::new();
    for label in labels {
        let node_count = read_u64(input)?;
        for _ in 0..node_count {
            let props = read_row(input, &attrs, &resolve_attr)?;
            let id = store.create_node(&[label], props)?;
            frame_nodes.push(id);
            stats.nodes_created += 1;
            flush_tick(store, &mut since_flush);
        }
    }

    // edges, grouped by relation; endpoints are frame positions
    let relation_count = read_u16(input)?;
    let mut relations = Vec::with_capacity(relation_count as usize);
    for _ in 0..relation_count {
        let name = read_string(input)?;
        relations.push(store.intern_relation(name.as_str()));
    }
    for relation in relations {
        let edge_count = read_u64(input)?;
        for _ in 0..edge_count {
            let src = read_u64(input)?;
            let dst = read_u64(input)?;
            let src = *frame_nodes.get(src as usize).ok_or_else(|| {
                Error::Semantic(format!("bulk edge references unknown node position {src}"))
            })?;
            let dst = *frame_nodes.get(dst as usize).ok_or_else(|| {
                Error::Semantic(format!("bulk edge references unknown node position {dst}"))
            })?;
            let props = read_row(input, &attrs, &resolve_attr)?;
            store.create_edge(src, dst, relation, props)?;
            stats.relationships_created += 1;
            flush_tick(store, &mut since_flush);
        }
    }

    store.flush();
    info!(
        nodes = stats.nodes_created,
        edges = stats.relationships_created,
        "bulk load finished"
    );
    Ok(stats)
}

fn read_row<R: Read>(
    input: &mut R,
    attrs: &[AttrId],
    resolve: &impl Fn(&[AttrId], u16) -> Result<AttrId>,
) -> Result<Vec<(AttrId, Value)>> {
    let count = read_u16(input)?;
    let mut props = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = read_u16(input)?;
        let attr = resolve(attrs, raw)?;
        let value = read_value(input)?;
        props.push((attr, value));
    }
    Ok(props)
}

/// Frame writer used by tests and embedding tools that feed `load`.
pub mod frame {
    use std::io::Write;

    use crate::model::Value;
    use crate::serializer::encode::{write_string, write_u16, write_u64, write_value};
    use crate::Result;

    #[derive(Debug, Default)]
    pub struct FrameBuilder {
        attrs: Vec<String>,
        labels: Vec<(String, Vec<Vec<(u16, Value)>>)>,
        relations: Vec<(String, Vec<(u64, u64, Vec<(u16, Value)>)>)>,
    }

    impl FrameBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn attr(&mut self, name: &str) -> u16 {
            if let Some(pos) = self.attrs.iter().position(|a| a == name) {
                return pos as u16;
            }
            self.attrs.push(name.to_owned());
            (self.attrs.len() - 1) as u16
        }

        pub fn label(&mut self, name: &str) -> usize {
            if let Some(pos) = self.labels.iter().position(|(l, _)| l == name) {
                return pos;
            }
            self.labels.push((name.to_owned(), Vec::new()));
            self.labels.len() - 1
        }

        pub fn relation(&mut self, name: &str) -> usize {
            if let Some(pos) = self.relations.iter().position(|(r, _)| r == name) {
                return pos;
            }
            self.relations.push((name.to_owned(), Vec::new()));
            self.relations.len() - 1
        }

        /// Add a node row; returns its frame position for edge endpoints.
        pub fn node(&mut self, label: usize, props: Vec<(u16, Value)>) -> u64 {
            let position: u64 = self
                .labels
                .iter()
                .map(|(_, rows)| rows.len() as u64)
                .sum();
            self.labels[label].1.push(props);
            position
        }

        pub fn edge(&mut self, relation: usize, src: u64, dst: u64, props: Vec<(u16, Value)>) {
            self.relations[relation].1.push((src, dst, props));
        }

        pub fn finish<W: Write>(&self, out: &mut W) -> Result<()> {
            write_u16(out, self.attrs.len() as u16)?;
            for attr in &self.attrs {
                write_string(out, attr)?;
            }
            write_u16(out, self.labels.len() as u16)?;
            for (label, _) in &self.labels {
                write_string(out, label)?;
            }
            for (_, rows) in &self.labels {
                write_u64(out, rows.len() as u64)?;
                for row in rows {
                    write_row(out, row)?;
                }
            }
            write_u16(out, self.relations.len() as u16)?;
            for (relation, _) in &self.relations {
                write_string(out, relation)?;
            }
            for (_, rows) in &self.relations {
                write_u64(out, rows.len() as u64)?;
                for (src, dst, props) in rows {
                    write_u64(out, *src)?;
                    write_u64(out, *dst)?;
                    write_row(out, props)?;
                }
            }
            Ok(())
        }
    }

    fn write_row<W: Write>(out: &mut W, props: &[(u16, Value)]) -> Result<()> {
        write_u16(out, props.len() as u16)?;
        for (attr, value) in props {
            write_u16(out, *attr)?;
            write_value(out, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::frame::FrameBuilder;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bulk_load_nodes_and_edges() {
        let mut builder = FrameBuilder::new();
        let name = builder.attr("name");
        let weight = builder.attr("weight");
        let person = builder.label("Person");
        let knows = builder.relation("KNOWS");

        let a = builder.node(person, vec![(name, Value::from("Roi"))]);
        let b = builder.node(person, vec![(name, Value::from("Ailon"))]);
        builder.edge(knows, a, b, vec![(weight, Value::Double(0.5))]);

        let mut buf = Vec::new();
        builder.finish(&mut buf).unwrap();

        let mut store = GraphStore::new();
        let stats = load(&mut store, &mut buf.as_slice(), 1024).unwrap();
        assert_eq!(stats.nodes_created, 2);
        assert_eq!(stats.relationships_created, 1);
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert!(store.synced());

        let person = store.label_id("Person").unwrap();
        assert_eq!(store.label_node_count(person), 2);
        let node = store.materialize_node(NodeId(0)).unwrap();
        assert_eq!(node.get("name"), Some(&Value::from("Roi")));
    }

    #[test]
    fn test_bulk_bad_endpoint_rejected() {
        let mut builder = FrameBuilder::new();
        let person = builder.label("Person");
        let knows = builder.relation("KNOWS");
        builder.node(person, vec![]);
        builder.edge(knows, 0, 99, vec![]);

        let mut buf = Vec::new();
        builder.finish(&mut buf).unwrap();
        let mut store = GraphStore::new();
        assert!(load(&mut store, &mut buf.as_slice(), 0).is_err());
    }
}
