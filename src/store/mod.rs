//! # Graph store
//!
//! Owns everything: the attribute pool, node and edge records, label and
//! relation schemas (with their indexes and constraints), and the sparse
//! delta matrices encoding adjacency. Every cross-link inside the store is
//! a dense integer id — there are no pointer cycles and a single clear
//! owner per allocation.
//!
//! Matrix bookkeeping per mutation:
//!
//! - node create/delete touches one diagonal label matrix per label,
//! - edge create/delete touches its relation matrix, that matrix's
//!   transpose, and the relation-agnostic ADJ / ADJᵀ pair,
//! - a second edge between the same (src, dst, relation) upgrades the
//!   matrix entry to a multi-edge tag, with the id list kept in a side
//!   table.
//!
//! All structural updates are buffered through the delta layers; `flush`
//! folds them in dependency order and only then releases deleted ids for
//! reuse.

pub mod attr_pool;
pub mod delta;
pub mod entity;
pub mod schema;
pub mod sparse;

use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::constraint::{Constraint, ConstraintKind, ConstraintStatus};
use crate::index::{ExactIndex, FtField, FullTextIndex, Index};
use crate::model::{Edge, EdgeId, Node, NodeId, PropertyMap, Value};
use crate::{Error, Result};

pub use attr_pool::AttributePool;
pub use delta::DeltaMatrix;
pub use entity::{Arena, AttrWrite, AttributeSet, EdgeRecord, NodeRecord};
pub use schema::{AttrId, LabelId, RelTypeId, Schema, SchemaKind};
pub use sparse::{Semiring, SparseMatrix};

/// Relation-matrix payload. A pair connected by more than one edge of the
/// same relation carries `Many`, with the edge ids in the store's side
/// table keyed by (src, dst, relation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSlot {
    Single(EdgeId),
    Many,
}

/// Initial matrix dimension; grows geometrically with the node-id space.
const INITIAL_DIM: u64 = 16;

/// Placeholder id for constraint checks on entities that do not exist yet.
const NO_ENTITY: u64 = u64::MAX;

pub struct GraphStore {
    pool: AttributePool,
    nodes: Arena<NodeRecord>,
    edges: Arena<EdgeRecord>,

    node_schemas: Vec<Schema>,
    rel_schemas: Vec<Schema>,
    labels_by_name: HashMap<String, LabelId>,
    rels_by_name: HashMap<String, RelTypeId>,

    label_matrices: Vec<DeltaMatrix<bool>>,
    rel_matrices: Vec<DeltaMatrix<EdgeSlot>>,
    rel_matrices_t: Vec<DeltaMatrix<EdgeSlot>>,
    adj: DeltaMatrix<bool>,
    adj_t: DeltaMatrix<bool>,
    multi_edges: HashMap<(u64, u64, u16), Vec<EdgeId>>,

    dim: u64,
    schema_version: u64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            pool: AttributePool::new(),
            nodes: Arena::new(),
            edges: Arena::new(),
            node_schemas: Vec::new(),
            rel_schemas: Vec::new(),
            labels_by_name: HashMap::new(),
            rels_by_name: HashMap::new(),
            label_matrices: Vec::new(),
            rel_matrices: Vec::new(),
            rel_matrices_t: Vec::new(),
            adj: DeltaMatrix::new(INITIAL_DIM, INITIAL_DIM),
            adj_t: DeltaMatrix::new(INITIAL_DIM, INITIAL_DIM),
            multi_edges: HashMap::new(),
            dim: INITIAL_DIM,
            schema_version: 0,
        }
    }

    // ========================================================================
    // Naming
    // ========================================================================

    pub fn pool(&self) -> &AttributePool {
        &self.pool
    }

    pub fn intern_attr(&mut self, name: &str) -> AttrId {
        self.pool.intern(name)
    }

    pub fn attr_id(&self, name: &str) -> Option<AttrId> {
        self.pool.id_of(name)
    }

    pub fn attr_name(&self, id: AttrId) -> &str {
        self.pool.name_of(id)
    }

    pub fn intern_label(&mut self, name: &str) -> LabelId {
        if let Some(id) = self.labels_by_name.get(name) {
            return *id;
        }
        let id = LabelId(self.node_schemas.len() as u16);
        self.node_schemas.push(Schema::new(SchemaKind::Node, name));
        self.label_matrices.push(DeltaMatrix::new(self.dim, self.dim));
        self.labels_by_name.insert(name.to_owned(), id);
        self.schema_version += 1;
        id
    }

    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.labels_by_name.get(name).copied()
    }

    pub fn label_name(&self, id: LabelId) -> &str {
        &self.node_schemas[id.0 as usize].name
    }

    pub fn label_count(&self) -> usize {
        self.node_schemas.len()
    }

    pub fn intern_relation(&mut self, name: &str) -> RelTypeId {
        if let Some(id) = self.rels_by_name.get(name) {
            return *id;
        }
        let id = RelTypeId(self.rel_schemas.len() as u16);
        self.rel_schemas.push(Schema::new(SchemaKind::Relation, name));
        self.rel_matrices.push(DeltaMatrix::new(self.dim, self.dim));
        self.rel_matrices_t.push(DeltaMatrix::new(self.dim, self.dim));
        self.rels_by_name.insert(name.to_owned(), id);
        self.schema_version += 1;
        id
    }

    pub fn relation_id(&self, name: &str) -> Option<RelTypeId> {
        self.rels_by_name.get(name).copied()
    }

    pub fn relation_name(&self, id: RelTypeId) -> &str {
        &self.rel_schemas[id.0 as usize].name
    }

    pub fn relation_count(&self) -> usize {
        self.rel_schemas.len()
    }

    pub fn node_schema(&self, id: LabelId) -> &Schema {
        &self.node_schemas[id.0 as usize]
    }

    pub fn rel_schema(&self, id: RelTypeId) -> &Schema {
        &self.rel_schemas[id.0 as usize]
    }

    pub fn node_schemas(&self) -> &[Schema] {
        &self.node_schemas
    }

    pub fn rel_schemas(&self) -> &[Schema] {
        &self.rel_schemas
    }

    /// Bumped on every DDL change; the plan cache keys on it.
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    // ========================================================================
    // Capacity
    // ========================================================================

    fn ensure_capacity(&mut self, id: u64) {
        if id < self.dim {
            return;
        }
        let mut dim = self.dim.max(INITIAL_DIM);
        while dim <= id {
            dim *= 2;
        }
        debug!(old = self.dim, new = dim, "growing matrix dimension");
        for m in &mut self.label_matrices {
            m.resize(dim, dim);
        }
        for m in &mut self.rel_matrices {
            m.resize(dim, dim);
        }
        for m in &mut self.rel_matrices_t {
            m.resize(dim, dim);
        }
        self.adj.resize(dim, dim);
        self.adj_t.resize(dim, dim);
        self.dim = dim;
    }

    pub fn dim(&self) -> u64 {
        self.dim
    }

    // ========================================================================
    // Constraint checks (run before any mutation lands)
    // ========================================================================

    fn check_node_constraints(
        &self,
        entity_id: u64,
        labels: &[LabelId],
        attrs: &AttributeSet,
    ) -> Result<()> {
        for label in labels {
            let schema = &self.node_schemas[label.0 as usize];
            for constraint in &schema.constraints {
                if !constraint.is_active() {
                    continue;
                }
                let backing = match &constraint.kind {
                    ConstraintKind::Unique(fields) => schema
                        .index_with_fields(fields)
                        .and_then(|i| match &schema.indexes[i] {
                            Index::Exact(idx) => Some(idx),
                            Index::FullText(_) => None,
                        }),
                    ConstraintKind::Mandatory(_) => None,
                };
                constraint.check(entity_id, attrs, backing, &|a| {
                    self.pool.name_of(a).to_owned()
                })?;
            }
        }
        Ok(())
    }

    fn check_edge_constraints(
        &self,
        entity_id: u64,
        relation: RelTypeId,
        attrs: &AttributeSet,
    ) -> Result<()> {
        let schema = &self.rel_schemas[relation.0 as usize];
        for constraint in &schema.constraints {
            if !constraint.is_active() {
                continue;
            }
            let backing = match &constraint.kind {
                ConstraintKind::Unique(fields) => schema
                    .index_with_fields(fields)
                    .and_then(|i| match &schema.indexes[i] {
                        Index::Exact(idx) => Some(idx),
                        Index::FullText(_) => None,
                    }),
                ConstraintKind::Mandatory(_) => None,
            };
            constraint.check(entity_id, attrs, backing, &|a| {
                self.pool.name_of(a).to_owned()
            })?;
        }
        Ok(())
    }

    // ========================================================================
    // Node mutation
    // ========================================================================

    /// Create a node. All-or-nothing: constraints are checked against the
    /// prospective record before anything is written.
    pub fn create_node(
        &mut self,
        labels: &[LabelId],
        props: Vec<(AttrId, Value)>,
    ) -> Result<NodeId> {
        let attrs: AttributeSet = props.into_iter().collect();
        self.check_node_constraints(NO_ENTITY, labels, &attrs)?;

        let record = NodeRecord { labels: SmallVec::from_slice(labels), attrs };
        let id = self.nodes.alloc(record);
        self.ensure_capacity(id);
        for label in labels {
            self.label_matrices[label.0 as usize].set(id, id, true);
        }
        // writes land before index notification; an index failure never
        // aborts the store write
        let attrs = self.nodes.get(id).map(|r| r.attrs.clone()).unwrap_or_default();
        for label in labels {
            for index in &mut self.node_schemas[label.0 as usize].indexes {
                index.index_entity(id, &attrs);
            }
        }
        Ok(NodeId(id))
    }

    /// Delete a node and every incident edge. The node id joins the
    /// free-list at the next flush.
    pub fn delete_node(&mut self, id: NodeId) -> Result<u64> {
        let record = self
            .nodes
            .get(id.0)
            .cloned()
            .ok_or_else(|| Error::InternalInvariant(format!("delete of missing node {id}")))?;

        // incident edges: row of each relation matrix plus row of its
        // transpose (skipping self-loops on the incoming pass)
        let mut incident: Vec<EdgeId> = Vec::new();
        for r in 0..self.rel_matrices.len() {
            let rel = RelTypeId(r as u16);
            let outgoing: Vec<(u64, EdgeSlot)> =
                self.rel_matrices[r].row_iter(id.0).collect();
            for (dst, slot) in outgoing {
                self.collect_slot_edges(id.0, dst, rel, slot, &mut incident);
            }
            let incoming: Vec<(u64, EdgeSlot)> =
                self.rel_matrices_t[r].row_iter(id.0).collect();
            for (src, slot) in incoming {
                if src == id.0 {
                    continue;
                }
                self.collect_slot_edges(src, id.0, rel, slot, &mut incident);
            }
        }
        let edges_deleted = incident.len() as u64;
        for eid in incident {
            self.delete_edge(eid)?;
        }

        for label in &record.labels {
            self.label_matrices[label.0 as usize].clear(id.0, id.0);
        }
        for label in &record.labels {
            for index in &mut self.node_schemas[label.0 as usize].indexes {
                index.unindex_entity(id.0, &record.attrs);
            }
        }
        self.nodes.mark_deleted(id.0);
        Ok(edges_deleted)
    }

    fn collect_slot_edges(
        &self,
        src: u64,
        dst: u64,
        rel: RelTypeId,
        slot: EdgeSlot,
        out: &mut Vec<EdgeId>,
    ) {
        match slot {
            EdgeSlot::Single(e) => out.push(e),
            EdgeSlot::Many => {
                if let Some(ids) = self.multi_edges.get(&(src, dst, rel.0)) {
                    out.extend_from_slice(ids);
                }
            }
        }
    }

    pub fn add_node_label(&mut self, id: NodeId, label: LabelId) -> Result<bool> {
        let record = self
            .nodes
            .get(id.0)
            .ok_or_else(|| Error::InternalInvariant(format!("label add on missing node {id}")))?;
        if record.has_label(label) {
            return Ok(false);
        }
        let attrs = record.attrs.clone();
        self.check_node_constraints(id.0, &[label], &attrs)?;

        self.nodes.get_mut(id.0).expect("checked above").labels.push(label);
        self.label_matrices[label.0 as usize].set(id.0, id.0, true);
        for index in &mut self.node_schemas[label.0 as usize].indexes {
            index.index_entity(id.0, &attrs);
        }
        Ok(true)
    }

    pub fn remove_node_label(&mut self, id: NodeId, label: LabelId) -> Result<bool> {
        let Some(record) = self.nodes.get_mut(id.0) else {
            return Err(Error::InternalInvariant(format!("label remove on missing node {id}")));
        };
        let Some(pos) = record.labels.iter().position(|l| *l == label) else {
            return Ok(false);
        };
        record.labels.remove(pos);
        let attrs = record.attrs.clone();
        self.label_matrices[label.0 as usize].clear(id.0, id.0);
        for index in &mut self.node_schemas[label.0 as usize].indexes {
            index.unindex_entity(id.0, &attrs);
        }
        Ok(true)
    }

    /// Apply a property diff to a node. NULL values remove. Returns the
    /// number of effective writes.
    pub fn update_node_props(
        &mut self,
        id: NodeId,
        changes: &[(AttrId, Value)],
    ) -> Result<u64> {
        let record = self
            .nodes
            .get(id.0)
            .ok_or_else(|| Error::InternalInvariant(format!("update of missing node {id}")))?;
        let labels: SmallVec<[LabelId; 4]> = record.labels.clone();
        let old_attrs = record.attrs.clone();

        let mut new_attrs = old_attrs.clone();
        for (attr, value) in changes {
            new_attrs.set(*attr, value.clone());
        }
        self.check_node_constraints(id.0, &labels, &new_attrs)?;

        let mut writes = 0;
        {
            let record = self.nodes.get_mut(id.0).expect("checked above");
            for (attr, value) in changes {
                if !matches!(record.attrs.set(*attr, value.clone()), AttrWrite::NoOp) {
                    writes += 1;
                }
            }
        }

        let changed: Vec<AttrId> = changes.iter().map(|(a, _)| *a).collect();
        for label in &labels {
            for index in &mut self.node_schemas[label.0 as usize].indexes {
                if changed.iter().any(|a| index.covers(*a)) {
                    index.reindex_entity(id.0, &old_attrs, &new_attrs);
                }
            }
        }
        Ok(writes)
    }

    // ========================================================================
    // Edge mutation
    // ========================================================================

    pub fn create_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        relation: RelTypeId,
        props: Vec<(AttrId, Value)>,
    ) -> Result<EdgeId> {
        if self.nodes.get(src.0).is_none() || self.nodes.get(dst.0).is_none() {
            return Err(Error::InternalInvariant(format!(
                "edge endpoints must exist: ({src})-[:{}]->({dst})",
                self.relation_name(relation)
            )));
        }
        let attrs: AttributeSet = props.into_iter().collect();
        self.check_edge_constraints(NO_ENTITY, relation, &attrs)?;

        let id = EdgeId(self.edges.alloc(EdgeRecord {
            src,
            dst,
            relation,
            attrs,
        }));
        self.link_edge(id, src, dst, relation);

        let attrs = self.edges.get(id.0).map(|r| r.attrs.clone()).unwrap_or_default();
        for index in &mut self.rel_schemas[relation.0 as usize].indexes {
            index.index_entity(id.0, &attrs);
        }
        Ok(id)
    }

    /// Record an edge in the relation matrix, its transpose, and ADJ.
    /// Shared by the write path, the bulk loader, and the snapshot decoder.
    fn link_edge(&mut self, id: EdgeId, src: NodeId, dst: NodeId, relation: RelTypeId) {
        let r = relation.0 as usize;
        let (i, j) = (src.0, dst.0);
        match self.rel_matrices[r].get(i, j) {
            None => {
                self.rel_matrices[r].set(i, j, EdgeSlot::Single(id));
                self.rel_matrices_t[r].set(j, i, EdgeSlot::Single(id));
            }
            Some(EdgeSlot::Single(existing)) => {
                self.rel_matrices[r].set(i, j, EdgeSlot::Many);
                self.rel_matrices_t[r].set(j, i, EdgeSlot::Many);
                self.multi_edges.insert((i, j, relation.0), vec![existing, id]);
            }
            Some(EdgeSlot::Many) => {
                self.multi_edges
                    .get_mut(&(i, j, relation.0))
                    .expect("multi-edge tag without side table entry")
                    .push(id);
            }
        }
        self.adj.set(i, j, true);
        self.adj_t.set(j, i, true);
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        let record = self
            .edges
            .get(id.0)
            .cloned()
            .ok_or_else(|| Error::InternalInvariant(format!("delete of missing edge {id}")))?;
        let r = record.relation.0 as usize;
        let (i, j) = (record.src.0, record.dst.0);
        let key = (i, j, record.relation.0);

        match self.rel_matrices[r].get(i, j) {
            Some(EdgeSlot::Single(existing)) => {
                debug_assert_eq!(existing, id, "matrix entry does not match edge record");
                self.rel_matrices[r].clear(i, j);
                self.rel_matrices_t[r].clear(j, i);
            }
            Some(EdgeSlot::Many) => {
                let ids = self
                    .multi_edges
                    .get_mut(&key)
                    .expect("multi-edge tag without side table entry");
                ids.retain(|e| *e != id);
                if ids.len() == 1 {
                    // downgrade back to a single-edge entry
                    let remaining = ids[0];
                    self.multi_edges.remove(&key);
                    self.rel_matrices[r].set(i, j, EdgeSlot::Single(remaining));
                    self.rel_matrices_t[r].set(j, i, EdgeSlot::Single(remaining));
                }
            }
            None => {
                return Err(Error::InternalInvariant(format!(
                    "edge {id} missing from its relation matrix"
                )));
            }
        }

        // ADJ keeps (i, j) while any relation still connects the pair
        let still_connected = self
            .rel_matrices
            .iter()
            .any(|m| m.contains(i, j));
        if !still_connected {
            self.adj.clear(i, j);
            self.adj_t.clear(j, i);
        }

        for index in &mut self.rel_schemas[r].indexes {
            index.unindex_entity(id.0, &record.attrs);
        }
        self.edges.mark_deleted(id.0);
        Ok(())
    }

    pub fn update_edge_props(
        &mut self,
        id: EdgeId,
        changes: &[(AttrId, Value)],
    ) -> Result<u64> {
        let record = self
            .edges
            .get(id.0)
            .ok_or_else(|| Error::InternalInvariant(format!("update of missing edge {id}")))?;
        let relation = record.relation;
        let old_attrs = record.attrs.clone();

        let mut new_attrs = old_attrs.clone();
        for (attr, value) in changes {
            new_attrs.set(*attr, value.clone());
        }
        self.check_edge_constraints(id.0, relation, &new_attrs)?;

        let mut writes = 0;
        {
            let record = self.edges.get_mut(id.0).expect("checked above");
            for (attr, value) in changes {
                if !matches!(record.attrs.set(*attr, value.clone()), AttrWrite::NoOp) {
                    writes += 1;
                }
            }
        }

        let changed: Vec<AttrId> = changes.iter().map(|(a, _)| *a).collect();
        for index in &mut self.rel_schemas[relation.0 as usize].indexes {
            if changed.iter().any(|a| index.covers(*a)) {
                index.reindex_entity(id.0, &old_attrs, &new_attrs);
            }
        }
        Ok(writes)
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Fold every pending delta into the primary matrices and release
    /// deleted ids for reuse. Dependency order: labels, relations and
    /// their transposes, then the ADJ pair, then the id free-lists.
    pub fn flush(&mut self) {
        for m in &mut self.label_matrices {
            m.flush();
        }
        for m in &mut self.rel_matrices {
            m.flush();
        }
        for m in &mut self.rel_matrices_t {
            m.flush();
        }
        self.adj.flush();
        self.adj_t.flush();
        self.nodes.commit_free();
        self.edges.commit_free();
        debug!(nodes = self.nodes.live(), edges = self.edges.live(), "store flushed");
    }

    /// True when every matrix is synchronized.
    pub fn synced(&self) -> bool {
        self.label_matrices.iter().all(DeltaMatrix::synced)
            && self.rel_matrices.iter().all(DeltaMatrix::synced)
            && self.rel_matrices_t.iter().all(DeltaMatrix::synced)
            && self.adj.synced()
            && self.adj_t.synced()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id.0)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&EdgeRecord> {
        self.edges.get(id.0)
    }

    pub fn node_count(&self) -> u64 {
        self.nodes.live()
    }

    pub fn edge_count(&self) -> u64 {
        self.edges.live()
    }

    /// One past the highest node id ever allocated; scan cursors bound here.
    pub fn node_capacity(&self) -> u64 {
        self.nodes.capacity()
    }

    pub fn nodes(&self) -> &Arena<NodeRecord> {
        &self.nodes
    }

    pub fn edges(&self) -> &Arena<EdgeRecord> {
        &self.edges
    }

    /// Live node ids with the given label. Uses the diagonal matrix so the
    /// result respects pending deltas.
    pub fn label_nodes(&self, label: LabelId) -> Vec<NodeId> {
        self.label_matrices[label.0 as usize]
            .iter_logical()
            .into_iter()
            .filter(|(i, j, _)| i == j)
            .map(|(i, _, _)| NodeId(i))
            .collect()
    }

    pub fn label_node_count(&self, label: LabelId) -> u64 {
        self.label_matrices[label.0 as usize].nnz()
    }

    pub fn node_has_label(&self, id: NodeId, label: LabelId) -> bool {
        self.label_matrices[label.0 as usize].contains(id.0, id.0)
    }

    pub fn out_neighbors(&self, relation: Option<RelTypeId>, src: NodeId) -> Vec<NodeId> {
        match relation {
            Some(r) => self.rel_matrices[r.0 as usize]
                .row_iter(src.0)
                .map(|(j, _)| NodeId(j))
                .collect(),
            None => self.adj.row_iter(src.0).map(|(j, _)| NodeId(j)).collect(),
        }
    }

    pub fn in_neighbors(&self, relation: Option<RelTypeId>, dst: NodeId) -> Vec<NodeId> {
        match relation {
            Some(r) => self.rel_matrices_t[r.0 as usize]
                .row_iter(dst.0)
                .map(|(j, _)| NodeId(j))
                .collect(),
            None => self.adj_t.row_iter(dst.0).map(|(j, _)| NodeId(j)).collect(),
        }
    }

    /// Every edge of `relation` from `src` to `dst` (usually one; more
    /// under a multi-edge tag).
    pub fn edges_between(
        &self,
        src: NodeId,
        dst: NodeId,
        relation: RelTypeId,
    ) -> SmallVec<[EdgeId; 2]> {
        match self.rel_matrices[relation.0 as usize].get(src.0, dst.0) {
            None => SmallVec::new(),
            Some(EdgeSlot::Single(e)) => SmallVec::from_slice(&[e]),
            Some(EdgeSlot::Many) => self
                .multi_edges
                .get(&(src.0, dst.0, relation.0))
                .map(|v| SmallVec::from_slice(v))
                .unwrap_or_default(),
        }
    }

    /// Edges of any relation from `src` to `dst`.
    pub fn edges_between_any(&self, src: NodeId, dst: NodeId) -> Vec<EdgeId> {
        let mut out = Vec::new();
        for r in 0..self.rel_matrices.len() {
            out.extend(self.edges_between(src, dst, RelTypeId(r as u16)));
        }
        out
    }

    pub fn label_matrix(&self, label: LabelId) -> &DeltaMatrix<bool> {
        &self.label_matrices[label.0 as usize]
    }

    pub fn rel_matrix(&self, relation: RelTypeId) -> &DeltaMatrix<EdgeSlot> {
        &self.rel_matrices[relation.0 as usize]
    }

    pub fn rel_matrix_t(&self, relation: RelTypeId) -> &DeltaMatrix<EdgeSlot> {
        &self.rel_matrices_t[relation.0 as usize]
    }

    pub fn adj_matrix(&self) -> &DeltaMatrix<bool> {
        &self.adj
    }

    pub fn adj_matrix_t(&self) -> &DeltaMatrix<bool> {
        &self.adj_t
    }

    // ========================================================================
    // Materialization (records → DTOs)
    // ========================================================================

    pub fn materialize_node(&self, id: NodeId) -> Option<Node> {
        let record = self.nodes.get(id.0)?;
        let labels = record
            .labels
            .iter()
            .map(|l| self.label_name(*l).to_owned())
            .collect();
        let properties: PropertyMap = record
            .attrs
            .iter()
            .map(|(a, v)| (self.pool.name_of(a).to_owned(), v.clone()))
            .collect();
        Some(Node { id, labels, properties })
    }

    pub fn materialize_edge(&self, id: EdgeId) -> Option<Edge> {
        let record = self.edges.get(id.0)?;
        let properties: PropertyMap = record
            .attrs
            .iter()
            .map(|(a, v)| (self.pool.name_of(a).to_owned(), v.clone()))
            .collect();
        Some(Edge {
            id,
            src: record.src,
            dst: record.dst,
            relation: self.relation_name(record.relation).to_owned(),
            properties,
        })
    }

    // ========================================================================
    // Index DDL
    // ========================================================================

    /// Create an exact-match index on a node label, populated from the
    /// label's existing nodes. Errors if an identical index exists.
    pub fn create_node_exact_index(&mut self, label: LabelId, fields: Vec<AttrId>) -> Result<()> {
        if self.node_schemas[label.0 as usize].index_with_fields(&fields).is_some() {
            return Err(Error::Index(format!(
                "index already exists on :{}",
                self.label_name(label)
            )));
        }
        let mut index = Index::Exact(ExactIndex::new(fields));
        for id in self.label_nodes(label) {
            if let Some(record) = self.nodes.get(id.0) {
                index.index_entity(id.0, &record.attrs);
            }
        }
        info!(label = self.label_name(label), kind = index.kind_name(), "index created");
        self.node_schemas[label.0 as usize].indexes.push(index);
        self.schema_version += 1;
        Ok(())
    }

    /// Create a full-text index on a node label.
    pub fn create_node_fulltext_index(
        &mut self,
        label: LabelId,
        fields: Vec<FtField>,
        language: &str,
        stopwords: Option<Vec<String>>,
    ) -> Result<()> {
        let attr_fields: Vec<AttrId> = fields.iter().map(|f| f.attr).collect();
        if self.node_schemas[label.0 as usize].index_with_fields(&attr_fields).is_some() {
            return Err(Error::Index(format!(
                "index already exists on :{}",
                self.label_name(label)
            )));
        }
        let mut index = Index::FullText(FullTextIndex::new(fields, language, stopwords));
        for id in self.label_nodes(label) {
            if let Some(record) = self.nodes.get(id.0) {
                index.index_entity(id.0, &record.attrs);
            }
        }
        info!(label = self.label_name(label), kind = index.kind_name(), "index created");
        self.node_schemas[label.0 as usize].indexes.push(index);
        self.schema_version += 1;
        Ok(())
    }

    pub fn drop_node_index(&mut self, label: LabelId, fields: &[AttrId]) -> Result<bool> {
        let schema = &mut self.node_schemas[label.0 as usize];
        let Some(pos) = schema.index_with_fields(fields) else {
            return Ok(false);
        };
        // refuse to drop the backing index of an active unique constraint
        let backs_constraint = schema.constraints.iter().any(|c| {
            matches!(&c.kind, ConstraintKind::Unique(f) if f.as_slice() == fields)
                && c.status != ConstraintStatus::Failed
        });
        if backs_constraint {
            return Err(Error::Index(
                "index backs a unique constraint; drop the constraint first".into(),
            ));
        }
        schema.indexes.remove(pos);
        self.schema_version += 1;
        Ok(true)
    }

    // ========================================================================
    // Constraint DDL
    // ========================================================================

    /// Create a constraint on a node label. The constraint starts Pending,
    /// existing nodes are scanned, and the result is Active or Failed.
    pub fn create_node_constraint(
        &mut self,
        label: LabelId,
        kind: ConstraintKind,
    ) -> Result<ConstraintStatus> {
        if let ConstraintKind::Unique(fields) = &kind {
            // unique constraints need a backing exact index
            if self.node_schemas[label.0 as usize].index_with_fields(fields).is_none() {
                self.create_node_exact_index(label, fields.clone())?;
            }
        }

        let mut constraint = Constraint::new(kind);
        let status = self.scan_for_violations(label, &constraint);
        constraint.status = status;
        info!(
            label = self.label_name(label),
            ?status,
            "constraint activation scan finished"
        );
        self.node_schemas[label.0 as usize].constraints.push(constraint);
        self.schema_version += 1;
        Ok(status)
    }

    fn scan_for_violations(&self, label: LabelId, constraint: &Constraint) -> ConstraintStatus {
        let schema = &self.node_schemas[label.0 as usize];
        for id in self.label_nodes(label) {
            let Some(record) = self.nodes.get(id.0) else { continue };
            let ok = match &constraint.kind {
                ConstraintKind::Mandatory(required) => {
                    required.iter().all(|a| record.attrs.contains(*a))
                }
                ConstraintKind::Unique(fields) => {
                    let backing = schema
                        .index_with_fields(fields)
                        .and_then(|i| match &schema.indexes[i] {
                            Index::Exact(idx) => Some(idx),
                            Index::FullText(_) => None,
                        });
                    match backing {
                        Some(idx) => {
                            let tuple: Option<Vec<Value>> =
                                fields.iter().map(|f| record.attrs.get(*f).cloned()).collect();
                            match tuple {
                                Some(t) => !idx.occupied_by_other(&t, Some(id.0)),
                                None => true,
                            }
                        }
                        None => false,
                    }
                }
            };
            if !ok {
                return ConstraintStatus::Failed;
            }
        }
        ConstraintStatus::Active
    }

    pub fn drop_node_constraint(&mut self, label: LabelId, kind: &ConstraintKind) -> bool {
        let schema = &mut self.node_schemas[label.0 as usize];
        let before = schema.constraints.len();
        schema.constraints.retain(|c| &c.kind != kind);
        let dropped = schema.constraints.len() < before;
        if dropped {
            self.schema_version += 1;
        }
        dropped
    }

    // ========================================================================
    // Restore paths (snapshot decode, bulk load)
    // ========================================================================

    /// Install a node at an explicit id. Matrices are updated but indexes
    /// are not — callers rebuild indexes once restoration completes.
    pub fn restore_node(&mut self, id: NodeId, labels: &[LabelId], attrs: AttributeSet) {
        self.ensure_capacity(id.0);
        self.nodes.restore(
            id.0,
            NodeRecord { labels: SmallVec::from_slice(labels), attrs },
        );
        for label in labels {
            self.label_matrices[label.0 as usize].set(id.0, id.0, true);
        }
    }

    pub fn restore_edge(
        &mut self,
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        relation: RelTypeId,
        attrs: AttributeSet,
    ) {
        self.ensure_capacity(src.0.max(dst.0));
        self.edges.restore(id.0, EdgeRecord { src, dst, relation, attrs });
        self.link_edge(id, src, dst, relation);
    }

    pub fn restore_free_node(&mut self, id: NodeId) {
        self.nodes.restore_free(id.0);
    }

    pub fn restore_free_edge(&mut self, id: EdgeId) {
        self.edges.restore_free(id.0);
    }

    /// Attach a decoded index without populating it; the snapshot decoder
    /// calls [`GraphStore::rebuild_indexes`] once restoration completes.
    pub(crate) fn attach_node_index(&mut self, label: LabelId, index: Index) {
        self.node_schemas[label.0 as usize].indexes.push(index);
        self.schema_version += 1;
    }

    pub(crate) fn attach_rel_index(&mut self, relation: RelTypeId, index: Index) {
        self.rel_schemas[relation.0 as usize].indexes.push(index);
        self.schema_version += 1;
    }

    /// Attach a decoded constraint with its recorded status; no
    /// revalidation scan runs.
    pub(crate) fn attach_node_constraint(&mut self, label: LabelId, constraint: Constraint) {
        self.node_schemas[label.0 as usize].constraints.push(constraint);
        self.schema_version += 1;
    }

    pub(crate) fn attach_rel_constraint(&mut self, relation: RelTypeId, constraint: Constraint) {
        self.rel_schemas[relation.0 as usize].constraints.push(constraint);
        self.schema_version += 1;
    }

    /// Rebuild every index from current records. Called after restore.
    pub fn rebuild_indexes(&mut self) {
        for (l, schema) in self.node_schemas.iter_mut().enumerate() {
            let label = LabelId(l as u16);
            let members: Vec<(u64, AttributeSet)> = self
                .label_matrices[label.0 as usize]
                .iter_logical()
                .into_iter()
                .filter(|(i, j, _)| i == j)
                .filter_map(|(i, _, _)| self.nodes.get(i).map(|r| (i, r.attrs.clone())))
                .collect();
            for index in &mut schema.indexes {
                index.rebuild(members.iter().map(|(id, attrs)| (*id, attrs)));
            }
        }
        let edge_members: Vec<(u64, RelTypeId, AttributeSet)> = self
            .edges
            .iter()
            .map(|(id, r)| (id, r.relation, r.attrs.clone()))
            .collect();
        for (r, schema) in self.rel_schemas.iter_mut().enumerate() {
            for index in &mut schema.indexes {
                index.rebuild(
                    edge_members
                        .iter()
                        .filter(|(_, rel, _)| rel.0 as usize == r)
                        .map(|(id, _, attrs)| (*id, attrs)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with_pair() -> (GraphStore, NodeId, NodeId, RelTypeId) {
        let mut g = GraphStore::new();
        let person = g.intern_label("Person");
        let knows = g.intern_relation("KNOWS");
        let name = g.intern_attr("name");
        let a = g
            .create_node(&[person], vec![(name, Value::from("Roi"))])
            .unwrap();
        let b = g
            .create_node(&[person], vec![(name, Value::from("Ailon"))])
            .unwrap();
        g.create_edge(a, b, knows, vec![]).unwrap();
        (g, a, b, knows)
    }

    #[test]
    fn test_create_node_updates_label_matrix() {
        let (g, a, b, _) = store_with_pair();
        let person = g.label_id("Person").unwrap();
        assert!(g.node_has_label(a, person));
        assert!(g.node_has_label(b, person));
        assert_eq!(g.label_node_count(person), 2);
    }

    #[test]
    fn test_edge_endpoint_integrity() {
        let (g, a, b, knows) = store_with_pair();
        assert!(g.rel_matrix(knows).contains(a.0, b.0));
        assert!(g.rel_matrix_t(knows).contains(b.0, a.0));
        assert!(g.adj_matrix().contains(a.0, b.0));
        assert_eq!(g.out_neighbors(Some(knows), a), vec![b]);
        assert_eq!(g.in_neighbors(Some(knows), b), vec![a]);
    }

    #[test]
    fn test_delete_edge_clears_matrices() {
        let (mut g, a, b, knows) = store_with_pair();
        let eid = g.edges_between(a, b, knows)[0];
        g.delete_edge(eid).unwrap();
        assert!(!g.rel_matrix(knows).contains(a.0, b.0));
        assert!(!g.adj_matrix().contains(a.0, b.0));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_multi_edge_tag_upgrade_and_downgrade() {
        let (mut g, a, b, knows) = store_with_pair();
        let e2 = g.create_edge(a, b, knows, vec![]).unwrap();
        assert_eq!(g.rel_matrix(knows).get(a.0, b.0), Some(EdgeSlot::Many));
        assert_eq!(g.edges_between(a, b, knows).len(), 2);

        g.delete_edge(e2).unwrap();
        assert!(matches!(
            g.rel_matrix(knows).get(a.0, b.0),
            Some(EdgeSlot::Single(_))
        ));
        assert_eq!(g.edges_between(a, b, knows).len(), 1);
        // ADJ still connected
        assert!(g.adj_matrix().contains(a.0, b.0));
    }

    #[test]
    fn test_delete_node_detaches_edges() {
        let (mut g, a, b, knows) = store_with_pair();
        let deleted = g.delete_node(a).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
        assert!(!g.rel_matrix(knows).contains(a.0, b.0));
        let person = g.label_id("Person").unwrap();
        assert!(!g.node_has_label(a, person));
    }

    #[test]
    fn test_id_reuse_only_after_flush() {
        let (mut g, a, _, _) = store_with_pair();
        g.delete_node(a).unwrap();
        let person = g.label_id("Person").unwrap();
        let c = g.create_node(&[person], vec![]).unwrap();
        assert_ne!(c, a, "freed id visible before flush");
        g.flush();
        let d = g.create_node(&[person], vec![]).unwrap();
        assert_eq!(d, a, "freed id should be reused after flush");
    }

    #[test]
    fn test_capacity_growth_preserves_entries() {
        let mut g = GraphStore::new();
        let l = g.intern_label("N");
        let r = g.intern_relation("R");
        let first = g.create_node(&[l], vec![]).unwrap();
        let mut last = first;
        // push past the initial dimension
        for _ in 0..40 {
            let next = g.create_node(&[l], vec![]).unwrap();
            g.create_edge(last, next, r, vec![]).unwrap();
            last = next;
        }
        assert!(g.dim() > INITIAL_DIM);
        assert_eq!(g.node_count(), 41);
        assert_eq!(g.edge_count(), 40);
        assert!(g.rel_matrix(r).contains(first.0, 1));
    }

    #[test]
    fn test_update_props_reindexes() {
        let mut g = GraphStore::new();
        let user = g.intern_label("User");
        let email = g.intern_attr("email");
        g.create_node_exact_index(user, vec![email]).unwrap();
        let n = g
            .create_node(&[user], vec![(email, Value::from("a@b"))])
            .unwrap();

        let schema = g.node_schema(user);
        let Index::Exact(idx) = &schema.indexes[0] else { panic!() };
        assert_eq!(idx.query_eq(&[Value::from("a@b")]), vec![n.0]);

        g.update_node_props(n, &[(email, Value::from("c@d"))]).unwrap();
        let schema = g.node_schema(user);
        let Index::Exact(idx) = &schema.indexes[0] else { panic!() };
        assert!(idx.query_eq(&[Value::from("a@b")]).is_empty());
        assert_eq!(idx.query_eq(&[Value::from("c@d")]), vec![n.0]);
    }

    #[test]
    fn test_unique_constraint_blocks_duplicate() {
        let mut g = GraphStore::new();
        let user = g.intern_label("User");
        let email = g.intern_attr("email");
        g.create_node(&[user], vec![(email, Value::from("a@b"))]).unwrap();
        let status = g
            .create_node_constraint(user, ConstraintKind::Unique(vec![email]))
            .unwrap();
        assert_eq!(status, ConstraintStatus::Active);

        let err = g
            .create_node(&[user], vec![(email, Value::from("a@b"))])
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        assert_eq!(g.label_node_count(user), 1);
    }

    #[test]
    fn test_constraint_activation_fails_on_existing_violation() {
        let mut g = GraphStore::new();
        let user = g.intern_label("User");
        let email = g.intern_attr("email");
        g.create_node(&[user], vec![(email, Value::from("dup"))]).unwrap();
        g.create_node(&[user], vec![(email, Value::from("dup"))]).unwrap();
        let status = g
            .create_node_constraint(user, ConstraintKind::Unique(vec![email]))
            .unwrap();
        assert_eq!(status, ConstraintStatus::Failed);
    }

    #[test]
    fn test_mandatory_constraint() {
        let mut g = GraphStore::new();
        let user = g.intern_label("User");
        let email = g.intern_attr("email");
        let status = g
            .create_node_constraint(user, ConstraintKind::Mandatory(vec![email]))
            .unwrap();
        assert_eq!(status, ConstraintStatus::Active);
        assert!(g.create_node(&[user], vec![]).is_err());
        assert!(g.create_node(&[user], vec![(email, Value::from("x"))]).is_ok());
    }

    #[test]
    fn test_create_then_delete_restores_logical_state() {
        let (mut g, _, _, _) = store_with_pair();
        g.flush();
        let person = g.label_id("Person").unwrap();
        let before_nodes = g.node_count();
        let before_nnz = g.label_matrix(person).nnz();

        let n = g.create_node(&[person], vec![]).unwrap();
        g.delete_node(n).unwrap();
        assert_eq!(g.node_count(), before_nodes);
        assert_eq!(g.label_matrix(person).nnz(), before_nnz);
    }
}
