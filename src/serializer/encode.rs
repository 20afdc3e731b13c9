//! Snapshot encoder.

use std::io::Write;

use crate::constraint::{Constraint, ConstraintKind, ConstraintStatus};
use crate::index::Index;
use crate::model::Value;
use crate::store::{AttrId, GraphStore, Schema};
use crate::Result;

use super::*;

pub fn encode<W: Write>(store: &GraphStore, name: &str, out: &mut W) -> Result<()> {
    write_u32(out, SNAPSHOT_VERSION)?;
    write_string(out, name)?;
    write_u64(out, 5)?; // key count: one payload per phase

    // NODES
    write_u8(out, PHASE_NODES)?;
    write_u64(out, store.node_count())?;
    for (id, node) in store.nodes().iter() {
        write_u64(out, id)?;
        write_u16(out, node.labels.len() as u16)?;
        for label in &node.labels {
            write_u16(out, label.0)?;
        }
        write_attrs(out, node.attrs.iter())?;
    }

    // DELETED_NODES
    write_u8(out, PHASE_DELETED_NODES)?;
    let freed: Vec<u64> = store.nodes().free_ids().collect();
    write_u64(out, freed.len() as u64)?;
    for id in freed {
        write_u64(out, id)?;
    }

    // EDGES
    write_u8(out, PHASE_EDGES)?;
    write_u64(out, store.edge_count())?;
    for (id, edge) in store.edges().iter() {
        write_u64(out, id)?;
        write_u64(out, edge.src.0)?;
        write_u64(out, edge.dst.0)?;
        write_u16(out, edge.relation.0)?;
        write_attrs(out, edge.attrs.iter())?;
    }

    // DELETED_EDGES
    write_u8(out, PHASE_DELETED_EDGES)?;
    let freed: Vec<u64> = store.edges().free_ids().collect();
    write_u64(out, freed.len() as u64)?;
    for id in freed {
        write_u64(out, id)?;
    }

    // GRAPH_SCHEMA
    write_u8(out, PHASE_GRAPH_SCHEMA)?;
    write_u16(out, store.pool().count() as u16)?;
    for name in store.pool().names() {
        write_string(out, name)?;
    }
    write_u16(out, store.label_count() as u16)?;
    for schema in store.node_schemas() {
        write_schema(out, schema)?;
    }
    write_u16(out, store.relation_count() as u16)?;
    for schema in store.rel_schemas() {
        write_schema(out, schema)?;
    }

    Ok(())
}

fn write_schema<W: Write>(out: &mut W, schema: &Schema) -> Result<()> {
    write_string(out, &schema.name)?;

    write_u8(out, schema.indexes.len() as u8)?;
    for index in &schema.indexes {
        match index {
            Index::Exact(idx) => {
                write_u8(out, INDEX_EXACT)?;
                write_u16(out, idx.fields().len() as u16)?;
                for field in idx.fields() {
                    write_u16(out, field.0)?;
                }
            }
            Index::FullText(idx) => {
                write_u8(out, INDEX_FULLTEXT)?;
                write_string(out, idx.language())?;
                let stopwords = idx.stopwords();
                write_u16(out, stopwords.len() as u16)?;
                for word in &stopwords {
                    write_string(out, word)?;
                }
                write_u16(out, idx.fields().len() as u16)?;
                for field in idx.fields() {
                    write_u16(out, field.attr.0)?;
                    write_f64(out, field.weight)?;
                    write_u8(out, field.nostem as u8)?;
                    write_u8(out, field.phonetic as u8)?;
                }
            }
        }
    }

    write_u8(out, schema.constraints.len() as u8)?;
    for constraint in &schema.constraints {
        write_constraint(out, constraint)?;
    }
    Ok(())
}

fn write_constraint<W: Write>(out: &mut W, constraint: &Constraint) -> Result<()> {
    let (kind, fields) = match &constraint.kind {
        ConstraintKind::Unique(fields) => (CONSTRAINT_UNIQUE, fields),
        ConstraintKind::Mandatory(fields) => (CONSTRAINT_MANDATORY, fields),
    };
    write_u8(out, kind)?;
    write_u8(out, match constraint.status {
        ConstraintStatus::Pending => 0,
        ConstraintStatus::Active => 1,
        ConstraintStatus::Failed => 2,
    })?;
    write_u16(out, fields.len() as u16)?;
    for field in fields {
        write_u16(out, field.0)?;
    }
    Ok(())
}

fn write_attrs<'a, W: Write>(
    out: &mut W,
    attrs: impl ExactSizeIterator<Item = (AttrId, &'a Value)>,
) -> Result<()> {
    write_u16(out, attrs.len() as u16)?;
    for (attr, value) in attrs {
        write_u16(out, attr.0)?;
        write_value(out, value)?;
    }
    Ok(())
}

pub(crate) fn write_value<W: Write>(out: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Null => write_u8(out, VALUE_NULL)?,
        Value::Int(i) => {
            write_u8(out, VALUE_INT64)?;
            write_u64(out, *i as u64)?;
        }
        Value::Double(f) => {
            write_u8(out, VALUE_DOUBLE)?;
            write_f64(out, *f)?;
        }
        Value::String(s) => {
            write_u8(out, VALUE_STRING)?;
            write_string(out, s)?;
        }
        Value::Bool(b) => {
            write_u8(out, VALUE_BOOL)?;
            write_u8(out, *b as u8)?;
        }
        Value::Array(items) => {
            write_u8(out, VALUE_ARRAY)?;
            write_u32(out, items.len() as u32)?;
            for item in items {
                write_value(out, item)?;
            }
        }
        Value::Point { latitude, longitude } => {
            write_u8(out, VALUE_POINT)?;
            write_f64(out, *latitude)?;
            write_f64(out, *longitude)?;
        }
        // sub-entities never persist as property values
        Value::Node(_) | Value::Edge(_) | Value::Path(_) => {
            return Err(crate::Error::InternalInvariant(
                "graph entity reached the property encoder".into(),
            ));
        }
    }
    Ok(())
}

// little-endian primitives

pub(crate) fn write_u8<W: Write>(out: &mut W, v: u8) -> Result<()> {
    out.write_all(&[v])?;
    Ok(())
}

pub(crate) fn write_u16<W: Write>(out: &mut W, v: u16) -> Result<()> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(out: &mut W, v: u32) -> Result<()> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64<W: Write>(out: &mut W, v: u64) -> Result<()> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_f64<W: Write>(out: &mut W, v: f64) -> Result<()> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_string<W: Write>(out: &mut W, s: &str) -> Result<()> {
    write_u32(out, s.len() as u32)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}
