//! Operator construction and the structural operators.
//!
//! [`build_segment`] instantiates a [`crate::plan::SegmentPlan`] as an
//! operator tree. Argument seeding for Apply subtrees is wired here: each
//! Apply owns a shared cell, and every Argument leaf built underneath it
//! clones records out of that cell.

mod aggregate;
mod filter;
mod scan;
mod traverse;
mod write;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::model::{Path, Value};
use crate::plan::{PlanNode, SegmentPlan};
use crate::Result;

use super::record::{Record, RecordLayout};
use super::{BoxOp, ExecEnv, Operator};

/// Shared seed cell connecting an Apply to the Argument leaves of its
/// right-hand side.
pub type ArgCell = Rc<RefCell<Option<Record>>>;

// ============================================================================
// Profiling
// ============================================================================

#[derive(Debug)]
pub struct ProfileEntry {
    name: String,
    depth: usize,
    rows: u64,
    nanos: u128,
}

/// Collects per-operator counters during a profiled run.
#[derive(Default, Clone)]
pub struct ProfileSink {
    entries: Rc<RefCell<Vec<ProfileEntry>>>,
}

impl ProfileSink {
    fn register(&self, name: String, depth: usize) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.push(ProfileEntry { name, depth, rows: 0, nanos: 0 });
        entries.len() - 1
    }

    fn record(&self, idx: usize, produced: bool, nanos: u128) {
        let mut entries = self.entries.borrow_mut();
        let entry = &mut entries[idx];
        if produced {
            entry.rows += 1;
        }
        entry.nanos += nanos;
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.borrow().iter() {
            out.push_str(&"    ".repeat(entry.depth));
            out.push_str(&format!(
                "{} | Records produced: {}, Execution time: {:.6} ms\n",
                entry.name,
                entry.rows,
                entry.nanos as f64 / 1_000_000.0
            ));
        }
        out
    }
}

struct ProfiledOp {
    inner: BoxOp,
    idx: usize,
    sink: ProfileSink,
}

impl Operator for ProfiledOp {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        let started = Instant::now();
        let out = self.inner.next(env);
        let produced = matches!(out, Ok(Some(_)));
        self.sink.record(self.idx, produced, started.elapsed().as_nanos());
        out
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

// ============================================================================
// Builder
// ============================================================================

pub fn build_segment(segment: &SegmentPlan, profile: Option<&ProfileSink>) -> BoxOp {
    let builder = Builder {
        layout: segment.layout.clone(),
        profile: profile.cloned(),
    };
    if let Some(sink) = &builder.profile {
        sink.register("Results".into(), 0);
    }
    let PlanNode::Results { child } = &segment.root else {
        // segment roots are always Results; anything else is a planner bug
        // that EmptyResult renders harmless
        return Box::new(EmptyResultOp);
    };
    builder.build(child, 1, None)
}

struct Builder {
    layout: Arc<RecordLayout>,
    profile: Option<ProfileSink>,
}

impl Builder {
    fn build(&self, node: &PlanNode, depth: usize, arg: Option<&ArgCell>) -> BoxOp {
        let idx = self
            .profile
            .as_ref()
            .map(|sink| sink.register(node_name(node).to_owned(), depth));

        let op = self.construct(node, depth, arg);
        match (idx, &self.profile) {
            (Some(idx), Some(sink)) => Box::new(ProfiledOp { inner: op, idx, sink: sink.clone() }),
            _ => op,
        }
    }

    fn construct(&self, node: &PlanNode, depth: usize, arg: Option<&ArgCell>) -> BoxOp {
        let d = depth + 1;
        match node {
            PlanNode::Results { child } => self.build(child, d, arg),

            PlanNode::EmptyRow => Box::new(EmptyRowOp {
                layout: self.layout.clone(),
                done: false,
            }),
            PlanNode::EmptyResult => Box::new(EmptyResultOp),
            PlanNode::Argument => Box::new(ArgumentOp {
                cell: arg.cloned().unwrap_or_default(),
                layout: self.layout.clone(),
                consumed: false,
            }),

            PlanNode::Apply { lhs, rhs, optional } => {
                let cell: ArgCell = ArgCell::default();
                Box::new(ApplyOp {
                    lhs: self.build(lhs, d, arg),
                    rhs: self.build(rhs, d, Some(&cell)),
                    cell,
                    optional: *optional,
                    current: None,
                    matched: false,
                })
            }

            PlanNode::CartesianProduct { branches } => Box::new(CartesianProductOp {
                branches: branches.iter().map(|b| self.build(b, d, arg)).collect(),
                layout: self.layout.clone(),
                buffers: None,
                indices: Vec::new(),
                done: false,
            }),

            PlanNode::NamedPath { child, path_slot, element_slots } => Box::new(NamedPathOp {
                child: self.build(child, d, arg),
                path_slot: *path_slot,
                element_slots: element_slots.clone(),
            }),

            PlanNode::AllNodeScan { slot, .. } => {
                Box::new(scan::AllNodeScanOp::new(self.layout.clone(), *slot))
            }
            PlanNode::NodeByLabelScan { label, slot, .. } => {
                Box::new(scan::NodeByLabelScanOp::new(self.layout.clone(), label.clone(), *slot))
            }
            PlanNode::IndexScan { label, attr, predicate, slot, .. } => Box::new(
                scan::IndexScanOp::new(self.layout.clone(), label.clone(), attr.clone(), predicate.clone(), *slot),
            ),

            PlanNode::Traverse { child, ae, src_slot, dst_slot, edge_slot, var_len, .. } => {
                Box::new(traverse::TraverseOp::new(
                    self.build(child, d, arg),
                    ae.clone(),
                    *src_slot,
                    *dst_slot,
                    *edge_slot,
                    *var_len,
                ))
            }
            PlanNode::ExpandInto { child, ae, src_slot, dst_slot, edge_slot, .. } => {
                Box::new(traverse::ExpandIntoOp::new(
                    self.build(child, d, arg),
                    ae.clone(),
                    *src_slot,
                    *dst_slot,
                    *edge_slot,
                ))
            }

            PlanNode::Filter { child, predicate } => Box::new(filter::FilterOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                predicate.clone(),
            )),
            PlanNode::Project { child, items } => Box::new(filter::ProjectOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                items.clone(),
            )),
            PlanNode::Sort { child, keys } => Box::new(filter::SortOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                keys.clone(),
            )),
            PlanNode::Skip { child, count } => Box::new(filter::SkipOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                count.clone(),
            )),
            PlanNode::Limit { child, count } => Box::new(filter::LimitOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                count.clone(),
            )),
            PlanNode::Distinct { child, slots } => Box::new(filter::DistinctOp::new(
                self.build(child, d, arg),
                slots.clone(),
            )),
            PlanNode::Unwind { child, expr, slot } => Box::new(filter::UnwindOp::new(
                child.as_ref().map(|c| self.build(c, d, arg)),
                self.layout.clone(),
                expr.clone(),
                *slot,
            )),

            PlanNode::Aggregate { child, keys, aggs } => Box::new(aggregate::AggregateOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                keys.clone(),
                aggs.clone(),
            )),

            PlanNode::Create { child, nodes, edges } => Box::new(write::CreateOp::new(
                child.as_ref().map(|c| self.build(c, d, arg)),
                self.layout.clone(),
                nodes.clone(),
                edges.clone(),
            )),
            PlanNode::Merge { child, nodes, edges, on_create, on_match } => {
                Box::new(write::MergeOp::new(
                    child.as_ref().map(|c| self.build(c, d, arg)),
                    self.layout.clone(),
                    nodes.clone(),
                    edges.clone(),
                    on_create.clone(),
                    on_match.clone(),
                ))
            }
            PlanNode::Update { child, items } => Box::new(write::UpdateOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                items.clone(),
            )),
            PlanNode::Delete { child, exprs, detach } => Box::new(write::DeleteOp::new(
                self.build(child, d, arg),
                self.layout.clone(),
                exprs.clone(),
                *detach,
            )),
            PlanNode::Foreach { child, variable_slot, list, body } => {
                Box::new(write::ForeachOp::new(
                    child.as_ref().map(|c| self.build(c, d, arg)),
                    self.layout.clone(),
                    *variable_slot,
                    list.clone(),
                    body.clone(),
                ))
            }
        }
    }
}

fn node_name(node: &PlanNode) -> &'static str {
    match node {
        PlanNode::Results { .. } => "Results",
        PlanNode::Project { .. } => "Project",
        PlanNode::Aggregate { .. } => "Aggregate",
        PlanNode::Sort { .. } => "Sort",
        PlanNode::Skip { .. } => "Skip",
        PlanNode::Limit { .. } => "Limit",
        PlanNode::Distinct { .. } => "Distinct",
        PlanNode::Filter { .. } => "Filter",
        PlanNode::AllNodeScan { .. } => "All Node Scan",
        PlanNode::NodeByLabelScan { .. } => "Node By Label Scan",
        PlanNode::IndexScan { .. } => "Index Scan",
        PlanNode::Traverse { var_len: Some(_), .. } => "Conditional Variable Length Traverse",
        PlanNode::Traverse { .. } => "Conditional Traverse",
        PlanNode::ExpandInto { .. } => "Expand Into",
        PlanNode::NamedPath { .. } => "Named Path",
        PlanNode::CartesianProduct { .. } => "Cartesian Product",
        PlanNode::Apply { .. } => "Apply",
        PlanNode::Argument => "Argument",
        PlanNode::EmptyRow => "Empty Row",
        PlanNode::EmptyResult => "Empty Result",
        PlanNode::Unwind { .. } => "Unwind",
        PlanNode::Create { .. } => "Create",
        PlanNode::Merge { .. } => "Merge",
        PlanNode::Update { .. } => "Update",
        PlanNode::Delete { .. } => "Delete",
        PlanNode::Foreach { .. } => "Foreach",
    }
}

// ============================================================================
// Structural operators
// ============================================================================

struct EmptyRowOp {
    layout: Arc<RecordLayout>,
    done: bool,
}

impl Operator for EmptyRowOp {
    fn name(&self) -> &'static str {
        "Empty Row"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(Record::empty(&self.layout)))
    }

    fn reset(&mut self) {
        self.done = false;
    }
}

struct EmptyResultOp;

impl Operator for EmptyResultOp {
    fn name(&self) -> &'static str {
        "Empty Result"
    }

    fn next(&mut self, _env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        Ok(None)
    }

    fn reset(&mut self) {}
}

struct ArgumentOp {
    cell: ArgCell,
    layout: Arc<RecordLayout>,
    consumed: bool,
}

impl Operator for ArgumentOp {
    fn name(&self) -> &'static str {
        "Argument"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        // an unseeded Argument degrades to a single empty row
        Ok(Some(
            self.cell
                .borrow()
                .clone()
                .unwrap_or_else(|| Record::empty(&self.layout)),
        ))
    }

    fn reset(&mut self) {
        self.consumed = false;
    }
}

struct ApplyOp {
    lhs: BoxOp,
    rhs: BoxOp,
    cell: ArgCell,
    optional: bool,
    current: Option<Record>,
    matched: bool,
}

impl Operator for ApplyOp {
    fn name(&self) -> &'static str {
        "Apply"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        loop {
            env.check_interrupt()?;
            if self.current.is_none() {
                match self.lhs.next(env)? {
                    None => return Ok(None),
                    Some(record) => {
                        *self.cell.borrow_mut() = Some(record.clone());
                        self.current = Some(record);
                        self.matched = false;
                        self.rhs.reset();
                    }
                }
            }
            match self.rhs.next(env)? {
                Some(record) => {
                    self.matched = true;
                    return Ok(Some(record));
                }
                None => {
                    let lhs_row = self.current.take().expect("current lhs row");
                    if self.optional && !self.matched {
                        // no rhs match: pass the lhs row through with the
                        // rhs bindings left NULL
                        return Ok(Some(lhs_row));
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.lhs.reset();
        self.rhs.reset();
        *self.cell.borrow_mut() = None;
        self.current = None;
        self.matched = false;
    }
}

struct CartesianProductOp {
    branches: Vec<BoxOp>,
    layout: Arc<RecordLayout>,
    buffers: Option<Vec<Vec<Record>>>,
    indices: Vec<usize>,
    done: bool,
}

impl Operator for CartesianProductOp {
    fn name(&self) -> &'static str {
        "Cartesian Product"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.done {
            return Ok(None);
        }
        if self.buffers.is_none() {
            let mut buffers = Vec::with_capacity(self.branches.len());
            for branch in &mut self.branches {
                let mut rows = Vec::new();
                while let Some(record) = branch.next(env)? {
                    rows.push(record);
                }
                if rows.is_empty() {
                    self.done = true;
                    return Ok(None);
                }
                buffers.push(rows);
            }
            self.indices = vec![0; buffers.len()];
            self.buffers = Some(buffers);
        }

        let buffers = self.buffers.as_ref().expect("materialized above");
        // merge the current combination: unbound slots are NULL, so the
        // later branch only fills what the earlier left empty
        let mut merged = Record::empty(&self.layout);
        for (branch, idx) in buffers.iter().zip(&self.indices) {
            let record = &branch[*idx];
            for (slot, value) in record.slots().iter().enumerate() {
                if !value.is_null() {
                    merged.set(slot, value.clone());
                }
            }
        }

        // odometer advance, rightmost fastest
        let mut i = buffers.len();
        loop {
            if i == 0 {
                self.done = true;
                break;
            }
            i -= 1;
            self.indices[i] += 1;
            if self.indices[i] < buffers[i].len() {
                break;
            }
            self.indices[i] = 0;
        }

        Ok(Some(merged))
    }

    fn reset(&mut self) {
        for branch in &mut self.branches {
            branch.reset();
        }
        self.buffers = None;
        self.indices.clear();
        self.done = false;
    }
}

struct NamedPathOp {
    child: BoxOp,
    path_slot: usize,
    /// (slot, is_relationship) in pattern order.
    element_slots: Vec<(usize, bool)>,
}

impl Operator for NamedPathOp {
    fn name(&self) -> &'static str {
        "Named Path"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        let Some(mut record) = self.child.next(env)? else {
            return Ok(None);
        };
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut complete = true;
        for (slot, is_rel) in &self.element_slots {
            match (record.get(*slot), *is_rel) {
                (Value::Node(n), false) => nodes.push((**n).clone()),
                (Value::Edge(e), true) => edges.push((**e).clone()),
                _ => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            record.set(self.path_slot, Value::Path(Box::new(Path { nodes, edges })));
        }
        Ok(Some(record))
    }

    fn reset(&mut self) {
        self.child.reset();
    }
}
