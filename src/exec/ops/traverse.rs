//! Traversal operators.
//!
//! `TraverseOp` streams one source row at a time through its algebraic
//! expression; `ExpandIntoOp` filters rows whose endpoints are both bound
//! by testing reachability.
//!
//! Variable-length traversal is a masked powers-of-matrix iteration when
//! the matrices are synchronized (writers flush first); under a reader
//! with pending deltas it degrades to a pointwise breadth-first expansion
//! that consults the delta layers on every probe. Either way the
//! intermediate frontier is deduplicated, so a destination reachable
//! along several paths appears once per source.

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::model::{EdgeId, NodeId, Value};
use crate::plan::AlgebraicExpression;
use crate::store::{GraphStore, Semiring, SparseMatrix};
use crate::Result;

use super::super::record::Record;
use super::super::{BoxOp, ExecEnv, Operator};

pub struct TraverseOp {
    child: BoxOp,
    ae: AlgebraicExpression,
    src_slot: usize,
    dst_slot: usize,
    edge_slot: Option<usize>,
    var_len: Option<(u32, Option<u32>)>,
    buffer: VecDeque<Record>,
}

impl TraverseOp {
    pub fn new(
        child: BoxOp,
        ae: AlgebraicExpression,
        src_slot: usize,
        dst_slot: usize,
        edge_slot: Option<usize>,
        var_len: Option<(u32, Option<u32>)>,
    ) -> Self {
        Self {
            child,
            ae,
            src_slot,
            dst_slot,
            edge_slot,
            var_len,
            buffer: VecDeque::new(),
        }
    }

    fn expand_fixed(&mut self, graph: &GraphStore, record: &Record, src: NodeId) {
        for dst in self.ae.expand(graph, src) {
            let Some(dst_node) = graph.materialize_node(dst) else { continue };
            match self.edge_slot {
                Some(edge_slot) => {
                    for eid in hop_edges(graph, &self.ae, src, dst) {
                        let Some(edge) = graph.materialize_edge(eid) else { continue };
                        let mut out = record.clone();
                        out.set(self.dst_slot, Value::Node(Box::new(dst_node.clone())));
                        out.set(edge_slot, Value::Edge(Box::new(edge)));
                        self.buffer.push_back(out);
                    }
                }
                None => {
                    let mut out = record.clone();
                    out.set(self.dst_slot, Value::Node(Box::new(dst_node)));
                    self.buffer.push_back(out);
                }
            }
        }
    }

    fn expand_var_len(
        &mut self,
        env: &mut ExecEnv<'_>,
        record: &Record,
        src: NodeId,
    ) -> Result<()> {
        let (min, max) = self.var_len.expect("variable-length expansion");
        let hop = AlgebraicExpression { dest_label: None, ..self.ae.clone() };
        let algebraic = env.sync_for_algebra();
        let graph = env.graph();

        let mut reached: Vec<NodeId> = Vec::new();
        if min == 0 {
            reached.push(src);
        }

        if algebraic {
            // masked powers of the combined hop matrix: the complement
            // mask of visited nodes is the frontier deduplication
            let combined = hop.combined_matrix(graph)?;
            let dim = graph.dim();
            let mut frontier: SparseMatrix<bool> = SparseMatrix::new(1, dim);
            frontier.set(0, src.0, true);
            let mut visited: SparseMatrix<bool> = SparseMatrix::new(1, dim);
            visited.set(0, src.0, true);

            let mut depth = 0u32;
            loop {
                if let Some(cap) = max {
                    if depth >= cap {
                        break;
                    }
                }
                let product =
                    frontier.multiply(&combined, Some(&visited), true, Semiring::AnyPair);
                if product.is_empty() {
                    break;
                }
                depth += 1;
                let mut next: SparseMatrix<bool> = SparseMatrix::new(1, dim);
                for (_, j, _) in product.iter() {
                    next.set(0, j, true);
                    visited.set(0, j, true);
                    if depth >= min {
                        reached.push(NodeId(j));
                    }
                }
                frontier = next;
            }
        } else {
            // direct-read mode: pointwise expansion through the deltas
            let mut visited: HashSet<NodeId> = HashSet::new();
            visited.insert(src);
            let mut frontier = vec![src];
            let mut depth = 0u32;
            while !frontier.is_empty() {
                if let Some(cap) = max {
                    if depth >= cap {
                        break;
                    }
                }
                depth += 1;
                let mut next = Vec::new();
                for node in frontier {
                    for dst in hop.expand(graph, node) {
                        if visited.insert(dst) {
                            if depth >= min {
                                reached.push(dst);
                            }
                            next.push(dst);
                        }
                    }
                }
                frontier = next;
            }
        }

        for dst in reached {
            if let Some(label) = self.ae.dest_label {
                if !graph.node_has_label(dst, label) {
                    continue;
                }
            }
            let Some(dst_node) = graph.materialize_node(dst) else { continue };
            let mut out = record.clone();
            out.set(self.dst_slot, Value::Node(Box::new(dst_node)));
            self.buffer.push_back(out);
        }
        Ok(())
    }
}

impl Operator for TraverseOp {
    fn name(&self) -> &'static str {
        if self.var_len.is_some() {
            "Conditional Variable Length Traverse"
        } else {
            "Conditional Traverse"
        }
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        loop {
            env.check_interrupt()?;
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(record) = self.child.next(env)? else {
                return Ok(None);
            };
            let src = match record.get(self.src_slot) {
                Value::Node(n) => n.id,
                // an unbound source (e.g. under a failed OPTIONAL) expands
                // to nothing
                _ => continue,
            };
            if self.var_len.is_some() {
                self.expand_var_len(env, &record, src)?;
            } else {
                self.expand_fixed(env.graph(), &record, src);
            }
        }
    }

    fn reset(&mut self) {
        self.child.reset();
        self.buffer.clear();
    }
}

pub struct ExpandIntoOp {
    child: BoxOp,
    ae: AlgebraicExpression,
    src_slot: usize,
    dst_slot: usize,
    edge_slot: Option<usize>,
    buffer: VecDeque<Record>,
}

impl ExpandIntoOp {
    pub fn new(
        child: BoxOp,
        ae: AlgebraicExpression,
        src_slot: usize,
        dst_slot: usize,
        edge_slot: Option<usize>,
    ) -> Self {
        Self { child, ae, src_slot, dst_slot, edge_slot, buffer: VecDeque::new() }
    }
}

impl Operator for ExpandIntoOp {
    fn name(&self) -> &'static str {
        "Expand Into"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        loop {
            env.check_interrupt()?;
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(record) = self.child.next(env)? else {
                return Ok(None);
            };
            let (src, dst) = match (record.get(self.src_slot), record.get(self.dst_slot)) {
                (Value::Node(s), Value::Node(d)) => (s.id, d.id),
                _ => continue,
            };
            let graph = env.graph();
            if !self.ae.connects(graph, src, dst) {
                continue;
            }
            match self.edge_slot {
                Some(edge_slot) => {
                    for eid in hop_edges(graph, &self.ae, src, dst) {
                        let Some(edge) = graph.materialize_edge(eid) else { continue };
                        let mut out = record.clone();
                        out.set(edge_slot, Value::Edge(Box::new(edge)));
                        self.buffer.push_back(out);
                    }
                }
                None => return Ok(Some(record)),
            }
        }
    }

    fn reset(&mut self) {
        self.child.reset();
        self.buffer.clear();
    }
}

/// Edges realizing one hop between a concrete pair, respecting the
/// expression's direction flags. A multi-edge pair yields one edge id per
/// parallel edge.
fn hop_edges(graph: &GraphStore, ae: &AlgebraicExpression, src: NodeId, dst: NodeId) -> Vec<EdgeId> {
    let forward = !ae.transposed || ae.both;
    let backward = ae.transposed || ae.both;
    let mut out: Vec<EdgeId> = Vec::new();

    if ae.rels.is_empty() {
        if forward {
            out.extend(graph.edges_between_any(src, dst));
        }
        if backward {
            out.extend(graph.edges_between_any(dst, src));
        }
    } else {
        for rel in &ae.rels {
            if forward {
                out.extend(graph.edges_between(src, dst, *rel));
            }
            if backward {
                out.extend(graph.edges_between(dst, src, *rel));
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}
