//! Snapshot decoder.
//!
//! Node and edge payloads arrive before the schema phase, so entity
//! records are buffered and installed once label/relation names are
//! known. Matrices rebuild through the regular restore path and are
//! flushed at the end; indexes re-populate from the restored records.

use std::io::{self, Read};

use crate::constraint::{Constraint, ConstraintKind, ConstraintStatus};
use crate::index::{ExactIndex, FtField, FullTextIndex, Index};
use crate::model::{EdgeId, NodeId, Value};
use crate::store::{AttrId, AttributeSet, GraphStore, LabelId, RelTypeId};
use crate::{Error, Result};

use super::*;

struct PendingNode {
    id: u64,
    labels: Vec<u16>,
    attrs: Vec<(u16, Value)>,
}

struct PendingEdge {
    id: u64,
    src: u64,
    dst: u64,
    relation: u16,
    attrs: Vec<(u16, Value)>,
}

/// Decode a snapshot stream into a fresh store. Returns the graph name.
pub fn decode<R: Read>(input: &mut R) -> Result<(String, GraphStore)> {
    let version = read_u32(input)?;
    if version != SNAPSHOT_VERSION {
        return Err(malformed(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
        )));
    }
    let name = read_string(input)?;
    let key_count = read_u64(input)?;

    let mut nodes: Vec<PendingNode> = Vec::new();
    let mut deleted_nodes: Vec<u64> = Vec::new();
    let mut edges: Vec<PendingEdge> = Vec::new();
    let mut deleted_edges: Vec<u64> = Vec::new();
    let mut store = GraphStore::new();
    let mut saw_schema = false;

    for _ in 0..key_count {
        match read_u8(input)? {
            PHASE_NODES => {
                let count = read_u64(input)?;
                for _ in 0..count {
                    let id = read_u64(input)?;
                    let label_count = read_u16(input)?;
                    let mut labels = Vec::with_capacity(label_count as usize);
                    for _ in 0..label_count {
                        labels.push(read_u16(input)?);
                    }
                    let attrs = read_attrs(input)?;
                    nodes.push(PendingNode { id, labels, attrs });
                }
            }
            PHASE_DELETED_NODES => {
                let count = read_u64(input)?;
                for _ in 0..count {
                    deleted_nodes.push(read_u64(input)?);
                }
            }
            PHASE_EDGES => {
                let count = read_u64(input)?;
                for _ in 0..count {
                    let id = read_u64(input)?;
                    let src = read_u64(input)?;
                    let dst = read_u64(input)?;
                    let relation = read_u16(input)?;
                    let attrs = read_attrs(input)?;
                    edges.push(PendingEdge { id, src, dst, relation, attrs });
                }
            }
            PHASE_DELETED_EDGES => {
                let count = read_u64(input)?;
                for _ in 0..count {
                    deleted_edges.push(read_u64(input)?);
                }
            }
            PHASE_GRAPH_SCHEMA => {
                decode_schema(input, &mut store)?;
                saw_schema = true;
            }
            other => return Err(malformed(format!("unknown phase tag {other}"))),
        }
    }

    if !saw_schema {
        return Err(malformed("snapshot has no schema phase".into()));
    }

    // install buffered entities now that ids resolve
    for node in nodes {
        let labels: Vec<LabelId> = node.labels.into_iter().map(LabelId).collect();
        for label in &labels {
            if label.0 as usize >= store.label_count() {
                return Err(malformed(format!("node {} references unknown label", node.id)));
            }
        }
        let attrs: AttributeSet = node
            .attrs
            .into_iter()
            .map(|(a, v)| (AttrId(a), v))
            .collect();
        store.restore_node(NodeId(node.id), &labels, attrs);
    }
    for edge in edges {
        if edge.relation as usize >= store.relation_count() {
            return Err(malformed(format!("edge {} references unknown relation", edge.id)));
        }
        let attrs: AttributeSet = edge
            .attrs
            .into_iter()
            .map(|(a, v)| (AttrId(a), v))
            .collect();
        store.restore_edge(
            EdgeId(edge.id),
            NodeId(edge.src),
            NodeId(edge.dst),
            RelTypeId(edge.relation),
            attrs,
        );
    }
    for id in deleted_nodes {
        store.restore_free_node(NodeId(id));
    }
    for id in deleted_edges {
        store.restore_free_edge(EdgeId(id));
    }

    store.flush();
    store.rebuild_indexes();
    Ok((name, store))
}

fn decode_schema<R: Read>(input: &mut R, store: &mut GraphStore) -> Result<()> {
    let attr_count = read_u16(input)?;
    for _ in 0..attr_count {
        let name = read_string(input)?;
        store.intern_attr(&name);
    }

    let label_count = read_u16(input)?;
    for _ in 0..label_count {
        let (name, indexes, constraints) = read_schema(input)?;
        let label = store.intern_label(&name);
        for index in indexes {
            store.attach_node_index(label, index);
        }
        for constraint in constraints {
            store.attach_node_constraint(label, constraint);
        }
    }

    let rel_count = read_u16(input)?;
    for _ in 0..rel_count {
        let (name, indexes, constraints) = read_schema(input)?;
        let relation = store.intern_relation(&name);
        for index in indexes {
            store.attach_rel_index(relation, index);
        }
        for constraint in constraints {
            store.attach_rel_constraint(relation, constraint);
        }
    }
    Ok(())
}

fn read_schema<R: Read>(input: &mut R) -> Result<(String, Vec<Index>, Vec<Constraint>)> {
    let name = read_string(input)?;

    let index_count = read_u8(input)?;
    let mut indexes = Vec::with_capacity(index_count as usize);
    for _ in 0..index_count {
        match read_u8(input)? {
            INDEX_EXACT => {
                let field_count = read_u16(input)?;
                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    fields.push(AttrId(read_u16(input)?));
                }
                indexes.push(Index::Exact(ExactIndex::new(fields)));
            }
            INDEX_FULLTEXT => {
                let language = read_string(input)?;
                let stopword_count = read_u16(input)?;
                let mut stopwords = Vec::with_capacity(stopword_count as usize);
                for _ in 0..stopword_count {
                    stopwords.push(read_string(input)?);
                }
                let field_count = read_u16(input)?;
                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    let attr = AttrId(read_u16(input)?);
                    let weight = read_f64(input)?;
                    let nostem = read_u8(input)? != 0;
                    let phonetic = read_u8(input)? != 0;
                    fields.push(FtField { attr, weight, nostem, phonetic });
                }
                indexes.push(Index::FullText(FullTextIndex::new(
                    fields,
                    language,
                    Some(stopwords),
                )));
            }
            other => return Err(malformed(format!("unknown index kind {other}"))),
        }
    }

    let constraint_count = read_u8(input)?;
    let mut constraints = Vec::with_capacity(constraint_count as usize);
    for _ in 0..constraint_count {
        let kind_tag = read_u8(input)?;
        let status = match read_u8(input)? {
            0 => ConstraintStatus::Pending,
            1 => ConstraintStatus::Active,
            2 => ConstraintStatus::Failed,
            other => return Err(malformed(format!("unknown constraint status {other}"))),
        };
        let field_count = read_u16(input)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(AttrId(read_u16(input)?));
        }
        let kind = match kind_tag {
            CONSTRAINT_UNIQUE => ConstraintKind::Unique(fields),
            CONSTRAINT_MANDATORY => ConstraintKind::Mandatory(fields),
            other => return Err(malformed(format!("unknown constraint kind {other}"))),
        };
        let mut constraint = Constraint::new(kind);
        constraint.status = status;
        constraints.push(constraint);
    }

    Ok((name, indexes, constraints))
}

fn read_attrs<R: Read>(input: &mut R) -> Result<Vec<(u16, Value)>> {
    let count = read_u16(input)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let attr = read_u16(input)?;
        let value = read_value(input)?;
        out.push((attr, value));
    }
    Ok(out)
}

pub(crate) fn read_value<R: Read>(input: &mut R) -> Result<Value> {
    Ok(match read_u8(input)? {
        VALUE_NULL => Value::Null,
        VALUE_INT64 => Value::Int(read_u64(input)? as i64),
        VALUE_DOUBLE => Value::Double(read_f64(input)?),
        VALUE_STRING => Value::String(read_string(input)?),
        VALUE_BOOL => Value::Bool(read_u8(input)? != 0),
        VALUE_ARRAY => {
            let len = read_u32(input)?;
            let mut items = Vec::with_capacity(len.min(1 << 20) as usize);
            for _ in 0..len {
                items.push(read_value(input)?);
            }
            Value::Array(items)
        }
        VALUE_POINT => Value::Point {
            latitude: read_f64(input)?,
            longitude: read_f64(input)?,
        },
        other => return Err(malformed(format!("unknown value tag {other}"))),
    })
}

fn malformed(message: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, message))
}

// little-endian primitives

pub(crate) fn read_u8<R: Read>(input: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(input: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(input: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_f64<R: Read>(input: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub(crate) fn read_string<R: Read>(input: &mut R) -> Result<String> {
    let len = read_u32(input)? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| malformed("invalid UTF-8 in string".into()))
}
