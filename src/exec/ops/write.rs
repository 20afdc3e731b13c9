//! Write operators: Create, Merge, Update, Delete, Foreach.
//!
//! Writers drain their input before touching the store, then emit the
//! (refreshed) records: deferring the writes to the end of the chunk
//! keeps scan cursors and traversal state from observing their own
//! query's mutations mid-stream. A failed write surfaces the error with
//! earlier writes left in place — there is no query-level rollback.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::model::{EdgeId, NodeId, Value};
use crate::plan::{EdgeCreate, ForeachAction, NodeCreate, UpdateItem};
use crate::store::{AttrId, GraphStore, LabelId};
use crate::{Error, Result};

use super::filter::eval_in;
use super::super::record::{Record, RecordLayout};
use super::super::{BoxOp, ExecEnv, Operator};

// ============================================================================
// Shared write helpers
// ============================================================================

fn eval_props(
    props: &[(String, Expr)],
    record: &Record,
    layout: &RecordLayout,
    env: &ExecEnv<'_>,
) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::with_capacity(props.len());
    for (key, expr) in props {
        let value = eval_in(expr, record, layout, env)?;
        if !value.is_storable() {
            return Err(Error::RuntimeType {
                expected: "storable property value".into(),
                got: value.type_name().into(),
            });
        }
        out.push((key.clone(), value));
    }
    Ok(out)
}

fn intern_props(graph: &mut GraphStore, props: Vec<(String, Value)>) -> Vec<(AttrId, Value)> {
    props
        .into_iter()
        .map(|(key, value)| (graph.intern_attr(&key), value))
        .collect()
}

fn node_at(record: &Record, slot: usize) -> Result<NodeId> {
    match record.get(slot) {
        Value::Node(n) => Ok(n.id),
        other => Err(Error::RuntimeType {
            expected: "node".into(),
            got: other.type_name().into(),
        }),
    }
}

/// Re-materialize the entity in `slot` so downstream clauses observe the
/// mutation.
fn refresh_slot(graph: &GraphStore, record: &mut Record, slot: usize) {
    let refreshed = match record.get(slot) {
        Value::Node(n) => graph.materialize_node(n.id).map(|n| Value::Node(Box::new(n))),
        Value::Edge(e) => graph.materialize_edge(e.id).map(|e| Value::Edge(Box::new(e))),
        _ => None,
    };
    if let Some(value) = refreshed {
        record.set(slot, value);
    }
}

/// Create the pattern entities of one record in place.
fn apply_create(
    env: &mut ExecEnv<'_>,
    layout: &RecordLayout,
    record: &mut Record,
    nodes: &[NodeCreate],
    edges: &[EdgeCreate],
) -> Result<()> {
    for nc in nodes {
        let props = eval_props(&nc.props, record, layout, env)?;
        let prop_count = props.len() as u64;
        let graph = env.graph_mut()?;
        let labels: Vec<LabelId> = nc.labels.iter().map(|l| graph.intern_label(l)).collect();
        let props = intern_props(graph, props);
        let id = graph.create_node(&labels, props)?;
        env.stats.nodes_created += 1;
        env.stats.labels_added += labels.len() as u64;
        env.stats.properties_set += prop_count;
        let node = env
            .graph()
            .materialize_node(id)
            .ok_or_else(|| Error::InternalInvariant(format!("created node {id} vanished")))?;
        record.set(nc.slot, Value::Node(Box::new(node)));
    }

    for ec in edges {
        let props = eval_props(&ec.props, record, layout, env)?;
        let prop_count = props.len() as u64;
        let (src, dst) = if ec.outgoing {
            (node_at(record, ec.src_slot)?, node_at(record, ec.dst_slot)?)
        } else {
            (node_at(record, ec.dst_slot)?, node_at(record, ec.src_slot)?)
        };
        let graph = env.graph_mut()?;
        let relation = graph.intern_relation(&ec.rel_type);
        let props = intern_props(graph, props);
        let id = graph.create_edge(src, dst, relation, props)?;
        env.stats.relationships_created += 1;
        env.stats.properties_set += prop_count;
        let edge = env
            .graph()
            .materialize_edge(id)
            .ok_or_else(|| Error::InternalInvariant(format!("created edge {id} vanished")))?;
        record.set(ec.slot, Value::Edge(Box::new(edge)));
    }
    Ok(())
}

/// Apply SET/REMOVE items to one record.
fn apply_update_items(
    env: &mut ExecEnv<'_>,
    layout: &RecordLayout,
    record: &mut Record,
    items: &[UpdateItem],
) -> Result<()> {
    for item in items {
        match item {
            UpdateItem::SetProp { slot, name, key, value } => {
                let new_value = eval_in(value, record, layout, env)?;
                if !new_value.is_storable() {
                    return Err(Error::RuntimeType {
                        expected: "storable property value".into(),
                        got: new_value.type_name().into(),
                    });
                }
                apply_prop_write(env, record, *slot, name, key, new_value)?;
            }
            UpdateItem::MergeProps { slot, name, value } => {
                let map = eval_in(value, record, layout, env)?;
                let entries = destructure_map(&map).ok_or_else(|| Error::RuntimeType {
                    expected: format!("map for SET {name} += …"),
                    got: map.type_name().into(),
                })?;
                for (key, entry) in entries {
                    apply_prop_write(env, record, *slot, name, &key, entry)?;
                }
            }
            UpdateItem::SetLabel { slot, name, label } => {
                match record.get(*slot).clone() {
                    Value::Node(n) => {
                        let graph = env.graph_mut()?;
                        let label_id = graph.intern_label(label);
                        if graph.add_node_label(n.id, label_id)? {
                            env.stats.labels_added += 1;
                        }
                        refresh_slot(env.graph(), record, *slot);
                    }
                    Value::Null => {}
                    other => {
                        return Err(Error::RuntimeType {
                            expected: format!("node for SET {name}:{label}"),
                            got: other.type_name().into(),
                        });
                    }
                }
            }
            UpdateItem::RemoveProp { slot, name, key } => {
                apply_prop_write(env, record, *slot, name, key, Value::Null)?;
            }
            UpdateItem::RemoveLabel { slot, name, label } => {
                match record.get(*slot).clone() {
                    Value::Node(n) => {
                        let graph = env.graph_mut()?;
                        if let Some(label_id) = graph.label_id(label) {
                            if graph.remove_node_label(n.id, label_id)? {
                                env.stats.labels_removed += 1;
                            }
                        }
                        refresh_slot(env.graph(), record, *slot);
                    }
                    Value::Null => {}
                    other => {
                        return Err(Error::RuntimeType {
                            expected: format!("node for REMOVE {name}:{label}"),
                            got: other.type_name().into(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_prop_write(
    env: &mut ExecEnv<'_>,
    record: &mut Record,
    slot: usize,
    name: &str,
    key: &str,
    value: Value,
) -> Result<()> {
    match record.get(slot).clone() {
        Value::Node(n) => {
            let graph = env.graph_mut()?;
            let attr = graph.intern_attr(key);
            let writes = graph.update_node_props(n.id, &[(attr, value)])?;
            env.stats.properties_set += writes;
        }
        Value::Edge(e) => {
            let graph = env.graph_mut()?;
            let attr = graph.intern_attr(key);
            let writes = graph.update_edge_props(e.id, &[(attr, value)])?;
            env.stats.properties_set += writes;
        }
        Value::Null => return Ok(()),
        other => {
            return Err(Error::RuntimeType {
                expected: format!("node or edge for SET {name}.{key}"),
                got: other.type_name().into(),
            });
        }
    }
    refresh_slot(env.graph(), record, slot);
    Ok(())
}

/// Maps evaluate to sorted `[[key, value], …]` arrays; pull the entries
/// back out.
fn destructure_map(value: &Value) -> Option<Vec<(String, Value)>> {
    let Value::Array(entries) = value else { return None };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(kv) = entry else { return None };
        let [Value::String(k), v] = kv.as_slice() else { return None };
        out.push((k.clone(), v.clone()));
    }
    Some(out)
}

/// Drain a child (or produce the single seed record when there is none).
fn drain_input(
    child: &mut Option<BoxOp>,
    layout: &Arc<RecordLayout>,
    env: &mut ExecEnv<'_>,
) -> Result<Vec<Record>> {
    match child {
        Some(child) => {
            let mut records = Vec::new();
            while let Some(record) = child.next(env)? {
                env.check_interrupt()?;
                records.push(record);
            }
            Ok(records)
        }
        None => Ok(vec![Record::empty(layout)]),
    }
}

// ============================================================================
// Create
// ============================================================================

pub struct CreateOp {
    child: Option<BoxOp>,
    layout: Arc<RecordLayout>,
    nodes: Vec<NodeCreate>,
    edges: Vec<EdgeCreate>,
    output: Option<VecDeque<Record>>,
}

impl CreateOp {
    pub fn new(
        child: Option<BoxOp>,
        layout: Arc<RecordLayout>,
        nodes: Vec<NodeCreate>,
        edges: Vec<EdgeCreate>,
    ) -> Self {
        Self { child, layout, nodes, edges, output: None }
    }
}

impl Operator for CreateOp {
    fn name(&self) -> &'static str {
        "Create"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.output.is_none() {
            let staged = drain_input(&mut self.child, &self.layout, env)?;
            let mut output = VecDeque::with_capacity(staged.len());
            for mut record in staged {
                apply_create(env, &self.layout, &mut record, &self.nodes, &self.edges)?;
                output.push_back(record);
            }
            self.output = Some(output);
        }
        Ok(self.output.as_mut().expect("committed above").pop_front())
    }

    fn reset(&mut self) {
        if let Some(child) = &mut self.child {
            child.reset();
        }
        self.output = None;
    }
}

// ============================================================================
// Merge
// ============================================================================

pub struct MergeOp {
    child: Option<BoxOp>,
    layout: Arc<RecordLayout>,
    nodes: Vec<NodeCreate>,
    edges: Vec<EdgeCreate>,
    on_create: Vec<UpdateItem>,
    on_match: Vec<UpdateItem>,
    output: Option<VecDeque<Record>>,
}

impl MergeOp {
    pub fn new(
        child: Option<BoxOp>,
        layout: Arc<RecordLayout>,
        nodes: Vec<NodeCreate>,
        edges: Vec<EdgeCreate>,
        on_create: Vec<UpdateItem>,
        on_match: Vec<UpdateItem>,
    ) -> Self {
        Self { child, layout, nodes, edges, on_create, on_match, output: None }
    }

    /// All consistent bindings of the merge pattern against the current
    /// graph, given the record's already-bound entities.
    fn find_matches(
        &self,
        env: &ExecEnv<'_>,
        record: &Record,
    ) -> Result<Vec<Vec<(usize, Value)>>> {
        let graph = env.graph();

        // candidate node ids per pattern node
        let mut candidates: Vec<(usize, Vec<NodeId>)> = Vec::new();
        for nc in &self.nodes {
            if nc.bound {
                candidates.push((nc.slot, vec![node_at(record, nc.slot)?]));
                continue;
            }
            let mut ids: Vec<NodeId> = match nc.labels.first() {
                Some(first) => match graph.label_id(first) {
                    Some(label) => graph.label_nodes(label),
                    None => Vec::new(),
                },
                None => (0..graph.node_capacity())
                    .map(NodeId)
                    .filter(|id| graph.node(*id).is_some())
                    .collect(),
            };
            for extra in nc.labels.iter().skip(1) {
                match graph.label_id(extra) {
                    Some(label) => ids.retain(|id| graph.node_has_label(*id, label)),
                    None => ids.clear(),
                }
            }
            let props = eval_props(&nc.props, record, &self.layout, env)?;
            ids.retain(|id| {
                let Some(node_record) = graph.node(*id) else { return false };
                props.iter().all(|(key, value)| {
                    graph
                        .attr_id(key)
                        .and_then(|attr| node_record.attrs.get(attr))
                        .is_some_and(|v| v == value)
                })
            });
            candidates.push((nc.slot, ids));
        }

        // depth-first assignment of node candidates, then edges
        let mut bindings = Vec::new();
        let mut assignment: Vec<(usize, NodeId)> = Vec::new();
        self.assign_nodes(env, record, &candidates, 0, &mut assignment, &mut bindings)?;
        Ok(bindings)
    }

    fn assign_nodes(
        &self,
        env: &ExecEnv<'_>,
        record: &Record,
        candidates: &[(usize, Vec<NodeId>)],
        depth: usize,
        assignment: &mut Vec<(usize, NodeId)>,
        bindings: &mut Vec<Vec<(usize, Value)>>,
    ) -> Result<()> {
        if depth == candidates.len() {
            return self.assign_edges(env, record, assignment, bindings);
        }
        let (slot, ids) = &candidates[depth];
        for id in ids {
            assignment.push((*slot, *id));
            self.assign_nodes(env, record, candidates, depth + 1, assignment, bindings)?;
            assignment.pop();
        }
        Ok(())
    }

    fn assign_edges(
        &self,
        env: &ExecEnv<'_>,
        record: &Record,
        nodes: &[(usize, NodeId)],
        bindings: &mut Vec<Vec<(usize, Value)>>,
    ) -> Result<()> {
        let graph = env.graph();
        let node_of = |slot: usize| -> Option<NodeId> {
            nodes.iter().find(|(s, _)| *s == slot).map(|(_, id)| *id)
        };

        // enumerate edge choices depth-first
        fn recurse(
            edges: &[(usize, Vec<EdgeId>)],
            depth: usize,
            chosen: &mut Vec<(usize, EdgeId)>,
            out: &mut Vec<Vec<(usize, EdgeId)>>,
        ) {
            if depth == edges.len() {
                out.push(chosen.clone());
                return;
            }
            let (slot, ids) = &edges[depth];
            for id in ids {
                chosen.push((*slot, *id));
                recurse(edges, depth + 1, chosen, out);
                chosen.pop();
            }
        }

        let mut per_edge: Vec<(usize, Vec<EdgeId>)> = Vec::new();
        for ec in &self.edges {
            let (src_slot, dst_slot) = if ec.outgoing {
                (ec.src_slot, ec.dst_slot)
            } else {
                (ec.dst_slot, ec.src_slot)
            };
            let (Some(src), Some(dst)) = (node_of(src_slot), node_of(dst_slot)) else {
                return Ok(());
            };
            let Some(relation) = graph.relation_id(&ec.rel_type) else {
                return Ok(());
            };
            let props = eval_props(&ec.props, record, &self.layout, env)?;
            let ids: Vec<EdgeId> = graph
                .edges_between(src, dst, relation)
                .into_iter()
                .filter(|eid| {
                    let Some(edge_record) = graph.edge(*eid) else { return false };
                    props.iter().all(|(key, value)| {
                        graph
                            .attr_id(key)
                            .and_then(|attr| edge_record.attrs.get(attr))
                            .is_some_and(|v| v == value)
                    })
                })
                .collect();
            if ids.is_empty() {
                return Ok(());
            }
            per_edge.push((ec.slot, ids));
        }

        let mut chosen = Vec::new();
        let mut combos = Vec::new();
        recurse(&per_edge, 0, &mut chosen, &mut combos);

        for combo in combos {
            let mut binding: Vec<(usize, Value)> = Vec::new();
            for (slot, id) in nodes {
                let Some(node) = graph.materialize_node(*id) else { continue };
                binding.push((*slot, Value::Node(Box::new(node))));
            }
            for (slot, id) in combo {
                let Some(edge) = graph.materialize_edge(id) else { continue };
                binding.push((slot, Value::Edge(Box::new(edge))));
            }
            bindings.push(binding);
        }
        Ok(())
    }
}

impl Operator for MergeOp {
    fn name(&self) -> &'static str {
        "Merge"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.output.is_none() {
            let staged = drain_input(&mut self.child, &self.layout, env)?;
            let mut output = VecDeque::new();
            for record in staged {
                let matches = self.find_matches(env, &record)?;
                if matches.is_empty() {
                    let mut out = record.clone();
                    apply_create(env, &self.layout, &mut out, &self.nodes, &self.edges)?;
                    apply_update_items(env, &self.layout, &mut out, &self.on_create)?;
                    output.push_back(out);
                } else {
                    for binding in matches {
                        let mut out = record.clone();
                        for (slot, value) in binding {
                            out.set(slot, value);
                        }
                        apply_update_items(env, &self.layout, &mut out, &self.on_match)?;
                        output.push_back(out);
                    }
                }
            }
            self.output = Some(output);
        }
        Ok(self.output.as_mut().expect("merged above").pop_front())
    }

    fn reset(&mut self) {
        if let Some(child) = &mut self.child {
            child.reset();
        }
        self.output = None;
    }
}

// ============================================================================
// Update (SET / REMOVE)
// ============================================================================

pub struct UpdateOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    items: Vec<UpdateItem>,
    output: Option<VecDeque<Record>>,
}

impl UpdateOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, items: Vec<UpdateItem>) -> Self {
        Self { child, layout, items, output: None }
    }
}

impl Operator for UpdateOp {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.output.is_none() {
            let mut staged = Vec::new();
            while let Some(record) = self.child.next(env)? {
                env.check_interrupt()?;
                staged.push(record);
            }
            let mut output = VecDeque::with_capacity(staged.len());
            for mut record in staged {
                apply_update_items(env, &self.layout, &mut record, &self.items)?;
                output.push_back(record);
            }
            self.output = Some(output);
        }
        Ok(self.output.as_mut().expect("updated above").pop_front())
    }

    fn reset(&mut self) {
        self.child.reset();
        self.output = None;
    }
}

// ============================================================================
// Delete
// ============================================================================

pub struct DeleteOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    exprs: Vec<Expr>,
    /// DELETE always detaches incident edges here (source behavior); the
    /// flag only records what the query said.
    #[allow(dead_code)]
    detach: bool,
    output: Option<VecDeque<Record>>,
}

impl DeleteOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, exprs: Vec<Expr>, detach: bool) -> Self {
        Self { child, layout, exprs, detach, output: None }
    }
}

impl Operator for DeleteOp {
    fn name(&self) -> &'static str {
        "Delete"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.output.is_none() {
            let mut staged = Vec::new();
            while let Some(record) = self.child.next(env)? {
                env.check_interrupt()?;
                staged.push(record);
            }

            let mut nodes: Vec<NodeId> = Vec::new();
            let mut edges: Vec<EdgeId> = Vec::new();
            for record in &staged {
                for expr in &self.exprs {
                    match eval_in(expr, record, &self.layout, env)? {
                        Value::Node(n) => nodes.push(n.id),
                        Value::Edge(e) => edges.push(e.id),
                        Value::Path(p) => {
                            nodes.extend(p.nodes.iter().map(|n| n.id));
                            edges.extend(p.edges.iter().map(|e| e.id));
                        }
                        Value::Null => {}
                        other => {
                            return Err(Error::RuntimeType {
                                expected: "node, edge, or path".into(),
                                got: other.type_name().into(),
                            });
                        }
                    }
                }
            }
            nodes.sort_unstable();
            nodes.dedup();
            edges.sort_unstable();
            edges.dedup();

            // edges first, so node deletion below does not double-count
            let graph = env.graph_mut()?;
            let mut relationships_deleted = 0;
            let mut nodes_deleted = 0;
            for eid in edges {
                if graph.edge(eid).is_some() {
                    graph.delete_edge(eid)?;
                    relationships_deleted += 1;
                }
            }
            for nid in nodes {
                if graph.node(nid).is_some() {
                    relationships_deleted += graph.delete_node(nid)?;
                    nodes_deleted += 1;
                }
            }
            env.stats.relationships_deleted += relationships_deleted;
            env.stats.nodes_deleted += nodes_deleted;

            self.output = Some(staged.into());
        }
        Ok(self.output.as_mut().expect("deleted above").pop_front())
    }

    fn reset(&mut self) {
        self.child.reset();
        self.output = None;
    }
}

// ============================================================================
// Foreach
// ============================================================================

pub struct ForeachOp {
    child: Option<BoxOp>,
    layout: Arc<RecordLayout>,
    variable_slot: usize,
    list: Expr,
    body: Vec<ForeachAction>,
    output: Option<VecDeque<Record>>,
}

impl ForeachOp {
    pub fn new(
        child: Option<BoxOp>,
        layout: Arc<RecordLayout>,
        variable_slot: usize,
        list: Expr,
        body: Vec<ForeachAction>,
    ) -> Self {
        Self { child, layout, variable_slot, list, body, output: None }
    }
}

fn run_foreach(
    env: &mut ExecEnv<'_>,
    layout: &RecordLayout,
    record: &Record,
    variable_slot: usize,
    list: &Expr,
    body: &[ForeachAction],
) -> Result<()> {
    let value = eval_in(list, record, layout, env)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Ok(()),
        other => {
            return Err(Error::RuntimeType {
                expected: "list for FOREACH".into(),
                got: other.type_name().into(),
            });
        }
    };
    for item in items {
        let mut scratch = record.clone();
        scratch.set(variable_slot, item);
        run_actions(env, layout, &mut scratch, body)?;
    }
    Ok(())
}

fn run_actions(
    env: &mut ExecEnv<'_>,
    layout: &RecordLayout,
    scratch: &mut Record,
    actions: &[ForeachAction],
) -> Result<()> {
    for action in actions {
        match action {
            ForeachAction::Create { nodes, edges } => {
                apply_create(env, layout, scratch, nodes, edges)?;
            }
            ForeachAction::Update(items) => {
                apply_update_items(env, layout, scratch, items)?;
            }
            ForeachAction::Delete { exprs, .. } => {
                for expr in exprs {
                    match eval_in(expr, scratch, layout, env)? {
                        Value::Node(n) => {
                            let deleted = {
                                let graph = env.graph_mut()?;
                                if graph.node(n.id).is_some() {
                                    Some(graph.delete_node(n.id)?)
                                } else {
                                    None
                                }
                            };
                            if let Some(rels) = deleted {
                                env.stats.relationships_deleted += rels;
                                env.stats.nodes_deleted += 1;
                            }
                        }
                        Value::Edge(e) => {
                            let deleted = {
                                let graph = env.graph_mut()?;
                                if graph.edge(e.id).is_some() {
                                    graph.delete_edge(e.id)?;
                                    true
                                } else {
                                    false
                                }
                            };
                            if deleted {
                                env.stats.relationships_deleted += 1;
                            }
                        }
                        Value::Null => {}
                        other => {
                            return Err(Error::RuntimeType {
                                expected: "node or edge".into(),
                                got: other.type_name().into(),
                            });
                        }
                    }
                }
            }
            ForeachAction::Foreach { variable_slot, list, body } => {
                let snapshot = scratch.clone();
                run_foreach(env, layout, &snapshot, *variable_slot, list, body)?;
            }
        }
    }
    Ok(())
}

impl Operator for ForeachOp {
    fn name(&self) -> &'static str {
        "Foreach"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.output.is_none() {
            let staged = drain_input(&mut self.child, &self.layout, env)?;
            for record in &staged {
                run_foreach(env, &self.layout, record, self.variable_slot, &self.list, &self.body)?;
            }
            self.output = Some(staged.into());
        }
        Ok(self.output.as_mut().expect("ran above").pop_front())
    }

    fn reset(&mut self) {
        if let Some(child) = &mut self.child {
            child.reset();
        }
        self.output = None;
    }
}
