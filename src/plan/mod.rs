//! Query planner — lowers an enriched AST into a physical plan.
//!
//! The physical plan is a tree of [`PlanNode`] descriptors; the executor
//! instantiates operators from it, `explain` renders it as text, and the
//! plan cache stores it keyed by query text. Planning decisions made here:
//!
//! - scan selection per pattern component (index scan when an indexed
//!   equality/range filter exists, otherwise the cheapest label scan,
//!   otherwise a full node scan),
//! - traversal chaining with algebraic expressions (transposes for
//!   incoming hops, union with the transpose for undirected ones),
//! - filter placement at the earliest point where their variables are
//!   bound,
//! - Cartesian products across disconnected components, cheapest
//!   component first,
//! - Apply/Optional for correlated and OPTIONAL MATCH clauses.

pub mod algebraic;
pub mod optimize;

use std::sync::Arc;

use hashbrown::HashSet;

use crate::cypher::ast::*;
use crate::cypher::enrich::{contains_aggregate, is_aggregate, Enriched, SegmentMeta};
use crate::exec::record::RecordLayout;
use crate::store::GraphStore;
use crate::{Error, Result};

pub use algebraic::AlgebraicExpression;

// ============================================================================
// Plan tree
// ============================================================================

#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub segments: Vec<SegmentPlan>,
    /// One entry per UNION joint: true for UNION ALL.
    pub union_all: Vec<bool>,
    pub columns: Vec<String>,
    pub write: bool,
}

#[derive(Debug, Clone)]
pub struct SegmentPlan {
    pub root: PlanNode,
    pub layout: Arc<RecordLayout>,
    pub columns: Vec<(String, usize)>,
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    /// Root marker: the sink pulls from here.
    Results { child: Box<PlanNode> },
    Project { child: Box<PlanNode>, items: Vec<(Expr, usize)> },
    Aggregate { child: Box<PlanNode>, keys: Vec<(Expr, usize)>, aggs: Vec<AggItem> },
    Sort { child: Box<PlanNode>, keys: Vec<(Expr, bool)> },
    Skip { child: Box<PlanNode>, count: Expr },
    Limit { child: Box<PlanNode>, count: Expr },
    Distinct { child: Box<PlanNode>, slots: Vec<usize> },
    Filter { child: Box<PlanNode>, predicate: Expr },

    AllNodeScan { alias: String, slot: usize },
    NodeByLabelScan { alias: String, label: String, slot: usize },
    IndexScan { alias: String, label: String, attr: String, predicate: IndexScanPredicate, slot: usize },

    Traverse {
        child: Box<PlanNode>,
        ae: AlgebraicExpression,
        src_slot: usize,
        dst_slot: usize,
        /// Bound for fixed-length hops; None for variable-length.
        edge_slot: Option<usize>,
        /// (min, max); None max is unbounded.
        var_len: Option<(u32, Option<u32>)>,
        desc: String,
    },
    ExpandInto {
        child: Box<PlanNode>,
        ae: AlgebraicExpression,
        src_slot: usize,
        dst_slot: usize,
        edge_slot: Option<usize>,
        desc: String,
    },
    /// Assemble a named path value out of bound pattern elements.
    NamedPath { child: Box<PlanNode>, path_slot: usize, element_slots: Vec<(usize, bool)> },

    CartesianProduct { branches: Vec<PlanNode> },
    Apply { lhs: Box<PlanNode>, rhs: Box<PlanNode>, optional: bool },
    Argument,
    /// One empty seed record.
    EmptyRow,
    /// Zero records (statically impossible match).
    EmptyResult,

    Unwind { child: Option<Box<PlanNode>>, expr: Expr, slot: usize },

    Create { child: Option<Box<PlanNode>>, nodes: Vec<NodeCreate>, edges: Vec<EdgeCreate> },
    Merge {
        child: Option<Box<PlanNode>>,
        nodes: Vec<NodeCreate>,
        edges: Vec<EdgeCreate>,
        on_create: Vec<UpdateItem>,
        on_match: Vec<UpdateItem>,
    },
    Update { child: Box<PlanNode>, items: Vec<UpdateItem> },
    Delete { child: Box<PlanNode>, exprs: Vec<Expr>, detach: bool },
    Foreach { child: Option<Box<PlanNode>>, variable_slot: usize, list: Expr, body: Vec<ForeachAction> },
}

#[derive(Debug, Clone)]
pub enum IndexScanPredicate {
    /// Leading field equals the expression (evaluated once at open).
    Eq(Expr),
    /// Leading field within range; bools are inclusivity.
    Range {
        low: Option<(Expr, bool)>,
        high: Option<(Expr, bool)>,
    },
}

#[derive(Debug, Clone)]
pub struct AggItem {
    pub kind: AggKind,
    pub arg: Option<Expr>,
    pub distinct: bool,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
    Any,
    All,
}

#[derive(Debug, Clone)]
pub struct NodeCreate {
    pub alias: String,
    pub slot: usize,
    /// Node already bound by an earlier clause — reference, don't create.
    pub bound: bool,
    pub labels: Vec<String>,
    pub props: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub struct EdgeCreate {
    pub slot: usize,
    pub src_slot: usize,
    pub dst_slot: usize,
    pub rel_type: String,
    pub props: Vec<(String, Expr)>,
    pub outgoing: bool,
}

#[derive(Debug, Clone)]
pub enum UpdateItem {
    SetProp { slot: usize, name: String, key: String, value: Expr },
    MergeProps { slot: usize, name: String, value: Expr },
    SetLabel { slot: usize, name: String, label: String },
    RemoveProp { slot: usize, name: String, key: String },
    RemoveLabel { slot: usize, name: String, label: String },
}

#[derive(Debug, Clone)]
pub enum ForeachAction {
    Create { nodes: Vec<NodeCreate>, edges: Vec<EdgeCreate> },
    Update(Vec<UpdateItem>),
    Delete { exprs: Vec<Expr>, detach: bool },
    Foreach { variable_slot: usize, list: Expr, body: Vec<ForeachAction> },
}

// ============================================================================
// Entry point
// ============================================================================

pub fn plan(enriched: &Enriched, store: &GraphStore) -> Result<PhysicalPlan> {
    let mut segments = Vec::with_capacity(enriched.statement.segments.len());
    for (segment, meta) in enriched.statement.segments.iter().zip(&enriched.segments) {
        let root = plan_segment(segment, meta, store)?;
        let root = optimize::optimize(root);
        segments.push(SegmentPlan {
            root,
            layout: meta.layout.clone(),
            columns: meta.columns.clone(),
        });
    }
    let columns = segments[0]
        .columns
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    Ok(PhysicalPlan {
        segments,
        union_all: enriched.statement.union_all.clone(),
        columns,
        write: enriched.write,
    })
}

// ============================================================================
// Segment planning
// ============================================================================

struct SegmentPlanner<'a> {
    store: &'a GraphStore,
    meta: &'a SegmentMeta,
    bound: HashSet<String>,
    current: Option<PlanNode>,
}

fn plan_segment(segment: &SingleQuery, meta: &SegmentMeta, store: &GraphStore) -> Result<PlanNode> {
    let mut p = SegmentPlanner {
        store,
        meta,
        bound: HashSet::new(),
        current: None,
    };

    for clause in &segment.clauses {
        match clause {
            Clause::Match { optional, patterns, where_clause } => {
                p.plan_match(patterns, where_clause.as_ref(), *optional)?;
            }
            Clause::Unwind { expr, alias } => {
                let slot = p.slot(alias)?;
                p.current = Some(PlanNode::Unwind {
                    child: p.current.take().map(Box::new),
                    expr: expr.clone(),
                    slot,
                });
                p.bound.insert(alias.clone());
            }
            Clause::Create { patterns } => {
                p.plan_create(patterns)?;
            }
            Clause::Merge { pattern, on_create, on_match } => {
                p.plan_merge(pattern, on_create, on_match)?;
            }
            Clause::Set(items) => {
                let items = p.lower_set_items(items)?;
                let child = Box::new(p.take_current()?);
                p.current = Some(PlanNode::Update { child, items });
            }
            Clause::Remove(items) => {
                let items = p.lower_remove_items(items)?;
                let child = Box::new(p.take_current()?);
                p.current = Some(PlanNode::Update { child, items });
            }
            Clause::Delete { exprs, detach } => {
                let child = Box::new(p.take_current()?);
                p.current = Some(PlanNode::Delete {
                    child,
                    exprs: exprs.clone(),
                    detach: *detach,
                });
            }
            Clause::Foreach { variable, list, body } => {
                let variable_slot = p.slot(variable)?;
                let actions = p.lower_foreach_body(body)?;
                p.current = Some(PlanNode::Foreach {
                    child: p.current.take().map(Box::new),
                    variable_slot,
                    list: list.clone(),
                    body: actions,
                });
            }
            Clause::With(projection) => {
                p.plan_projection(projection)?;
            }
            Clause::Return(projection) => {
                p.plan_projection(projection)?;
            }
        }
    }

    let child = p.current.take().unwrap_or(PlanNode::EmptyRow);
    Ok(PlanNode::Results { child: Box::new(child) })
}

impl<'a> SegmentPlanner<'a> {
    fn slot(&self, name: &str) -> Result<usize> {
        self.meta
            .layout
            .slot(name)
            .ok_or_else(|| Error::InternalInvariant(format!("no slot for '{name}'")))
    }

    fn take_current(&mut self) -> Result<PlanNode> {
        self.current
            .take()
            .ok_or_else(|| Error::Semantic("clause requires a preceding MATCH".into()))
    }

    // ------------------------------------------------------------------
    // MATCH
    // ------------------------------------------------------------------

    fn plan_match(
        &mut self,
        patterns: &[Pattern],
        where_clause: Option<&Expr>,
        optional: bool,
    ) -> Result<()> {
        // pending filters: inline pattern properties plus the WHERE clause,
        // AND-split so each conjunct can sink to its earliest point
        let mut filters: Vec<Expr> = Vec::new();
        for pattern in patterns {
            collect_inline_filters(pattern, &mut filters);
        }
        if let Some(pred) = where_clause {
            and_split(pred, &mut filters);
        }

        let correlated = optional
            || (self.current.is_some()
                && patterns.iter().any(|pat| {
                    pattern_aliases(pat).iter().any(|a| self.bound.contains(a))
                }));

        if correlated {
            // plan the pattern against an Argument seed carrying the lhs row
            let lhs = self.current.take().unwrap_or(PlanNode::EmptyRow);
            let outer_bound = self.bound.clone();
            self.current = Some(PlanNode::Argument);
            let rhs = self.plan_components(patterns, &mut filters, &outer_bound)?;
            // leftover filters reference both sides; apply on top of rhs,
            // whose records carry the lhs bindings through the Argument
            let rhs = apply_filters(rhs, &mut filters, None);
            self.current = Some(PlanNode::Apply {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                optional,
            });
        } else {
            let prior = self.current.take();
            // no pattern alias overlaps the prior bindings here, but the
            // bound set still carries them forward for later clauses
            let outer_bound = self.bound.clone();
            let matched = self.plan_components(patterns, &mut filters, &outer_bound)?;
            // filters that straddle clauses or components go above the join
            let combined = match prior {
                None => matched,
                Some(lhs) => PlanNode::CartesianProduct { branches: vec![lhs, matched] },
            };
            self.current = Some(apply_filters(combined, &mut filters, None));
        }

        if !filters.is_empty() {
            // anything left could not resolve its variables — planner bug
            return Err(Error::InternalInvariant(
                "unplaced filter after match planning".into(),
            ));
        }

        // named paths assembled once all elements are bound
        for (path_alias, elements) in &self.meta.paths {
            if self.bound.contains(path_alias) {
                continue;
            }
            if elements.iter().all(|e| self.bound.contains(e)) {
                let path_slot = self.slot(path_alias)?;
                let mut element_slots = Vec::with_capacity(elements.len());
                for (i, alias) in elements.iter().enumerate() {
                    element_slots.push((self.slot(alias)?, i % 2 == 1));
                }
                let child = Box::new(self.current.take().expect("match just planned"));
                self.current = Some(PlanNode::NamedPath { child, path_slot, element_slots });
                self.bound.insert(path_alias.clone());
            }
        }
        Ok(())
    }

    /// Plan every connected component of the pattern list and join the
    /// results: shared-variable continuation within a component, Cartesian
    /// product across components (cheapest first).
    fn plan_components(
        &mut self,
        patterns: &[Pattern],
        filters: &mut Vec<Expr>,
        outer_bound: &HashSet<String>,
    ) -> Result<PlanNode> {
        let components = connected_components(patterns, outer_bound);

        // a filter may only sink into the branch that binds its variables;
        // track bound names per branch, not across the whole clause
        let mut planned: Vec<(u64, PlanNode)> = Vec::new();
        let mut all_bound: HashSet<String> = outer_bound.clone();
        let seed = self.current.take();

        for component in components {
            // components gluing to outer-bound variables keep the Argument
            let starts_bound = component.iter().any(|idx| {
                pattern_aliases(&patterns[*idx])
                    .iter()
                    .any(|a| outer_bound.contains(a))
            });
            self.current = if starts_bound { seed.clone() } else { None };
            self.bound = if starts_bound { outer_bound.clone() } else { HashSet::new() };

            let mut cost = u64::MAX;
            for idx in component {
                let c = self.plan_linear_pattern(&patterns[idx], filters)?;
                cost = cost.min(c);
            }
            let node = self.current.take().expect("component planned");
            let node = apply_filters(node, filters, Some(&self.bound));
            all_bound.extend(self.bound.drain());
            planned.push((cost, node));
        }
        self.bound = all_bound;

        // cheaper components resolve first; the product is deferred
        planned.sort_by_key(|(cost, _)| *cost);
        let mut nodes: Vec<PlanNode> = planned.into_iter().map(|(_, n)| n).collect();
        Ok(if nodes.len() == 1 {
            nodes.pop().expect("nonempty")
        } else {
            PlanNode::CartesianProduct { branches: nodes }
        })
    }

    /// Plan one linear pattern, continuing from already-bound aliases where
    /// possible. Returns the estimated source cardinality.
    fn plan_linear_pattern(&mut self, pattern: &Pattern, filters: &mut Vec<Expr>) -> Result<u64> {
        let mut pattern = pattern.clone();

        // choose the cheaper end to start from, unless the start is
        // already bound
        let start_alias = pattern.start.alias.clone().expect("enriched");
        let end_alias = pattern
            .chain
            .last()
            .map(|(_, n)| n.alias.clone().expect("enriched"))
            .unwrap_or_else(|| start_alias.clone());

        let start_bound = self.bound.contains(&start_alias);
        let end_bound = self.bound.contains(&end_alias);
        let cost = if !start_bound && !end_bound {
            let start_cost = self.scan_cost(&pattern.start, filters);
            let end_cost = pattern
                .chain
                .last()
                .map(|(_, n)| self.scan_cost(n, filters))
                .unwrap_or(start_cost);
            if end_cost < start_cost {
                pattern = reverse_pattern(&pattern);
            }
            start_cost.min(end_cost)
        } else {
            if end_bound && !start_bound {
                pattern = reverse_pattern(&pattern);
            }
            1
        };

        // source
        let src_alias = pattern.start.alias.clone().expect("enriched");
        if !self.bound.contains(&src_alias) {
            let scan = self.build_scan(&pattern.start, filters)?;
            // a pattern of the same component not (yet) connected by a
            // shared variable joins by product
            let scan = match self.current.take() {
                None => scan,
                Some(prior) => PlanNode::CartesianProduct { branches: vec![prior, scan] },
            };
            self.push_node(scan);
            self.bound.insert(src_alias.clone());
            self.place_ready_filters(filters);
        }

        // hops
        let mut cur_alias = src_alias;
        for (rel, node) in &pattern.chain {
            let dst_alias = node.alias.clone().expect("enriched");
            let hop = self.build_hop(&cur_alias, rel, node, filters)?;
            self.push_node(hop);
            self.bound.insert(dst_alias.clone());
            if rel.var_length.is_none() {
                self.bound.insert(rel.alias.clone().expect("enriched"));
            }
            self.place_ready_filters(filters);
            cur_alias = dst_alias;
        }
        Ok(cost)
    }

    fn push_node(&mut self, node: PlanNode) {
        self.current = Some(node);
    }

    fn place_ready_filters(&mut self, filters: &mut Vec<Expr>) {
        if let Some(current) = self.current.take() {
            self.current = Some(apply_filters(current, filters, Some(&self.bound)));
        }
    }

    /// Scan cardinality estimate used for start selection and component
    /// ordering.
    fn scan_cost(&self, node: &NodePattern, filters: &[Expr]) -> u64 {
        let alias = node.alias.as_deref().expect("enriched");
        if let Some(label_name) = node.labels.first() {
            if let Some(label) = self.store.label_id(label_name) {
                let schema = self.store.node_schema(label);
                let indexed = filters.iter().any(|f| {
                    index_predicate_for(f, alias)
                        .is_some_and(|(attr, _)| {
                            self.store
                                .attr_id(&attr)
                                .is_some_and(|a| schema.index_on(a).is_some())
                        })
                });
                if indexed {
                    return 1;
                }
                return self.store.label_node_count(label);
            }
            return 0; // unknown label: empty
        }
        self.store.node_count()
    }

    fn build_scan(&self, node: &NodePattern, filters: &mut Vec<Expr>) -> Result<PlanNode> {
        let alias = node.alias.clone().expect("enriched");
        let slot = self.slot(&alias)?;

        if let Some(label_name) = node.labels.first() {
            let Some(label) = self.store.label_id(label_name) else {
                return Ok(PlanNode::EmptyResult);
            };
            // extra labels become filters
            for extra in &node.labels[1..] {
                filters.push(Expr::HasLabel {
                    expr: Box::new(Expr::Variable(alias.clone())),
                    label: extra.clone(),
                });
            }

            // indexed predicate on this alias?
            let schema = self.store.node_schema(label);
            let mut chosen: Option<(usize, String, IndexScanPredicate)> = None;
            for (i, filter) in filters.iter().enumerate() {
                if let Some((attr_name, pred)) = index_predicate_for(filter, &alias) {
                    let Some(attr) = self.store.attr_id(&attr_name) else { continue };
                    if schema.index_on(attr).is_some() {
                        chosen = Some((i, attr_name, pred));
                        break;
                    }
                }
            }
            if let Some((i, attr, predicate)) = chosen {
                filters.remove(i);
                return Ok(PlanNode::IndexScan {
                    alias,
                    label: label_name.clone(),
                    attr,
                    predicate,
                    slot,
                });
            }
            return Ok(PlanNode::NodeByLabelScan {
                alias,
                label: label_name.clone(),
                slot,
            });
        }

        Ok(PlanNode::AllNodeScan { alias, slot })
    }

    fn build_hop(
        &mut self,
        src_alias: &str,
        rel: &RelPattern,
        node: &NodePattern,
        filters: &mut Vec<Expr>,
    ) -> Result<PlanNode> {
        let dst_alias = node.alias.clone().expect("enriched");
        let src_slot = self.slot(src_alias)?;
        let dst_slot = self.slot(&dst_alias)?;

        // resolve relation types; a name the graph has never seen matches
        // nothing at all
        let mut rels = Vec::with_capacity(rel.rel_types.len());
        for name in &rel.rel_types {
            match self.store.relation_id(name) {
                Some(id) => rels.push(id),
                None => return Ok(PlanNode::EmptyResult),
            }
        }

        let (transposed, both) = match rel.direction {
            PatternDirection::Right => (false, false),
            PatternDirection::Left => (true, false),
            PatternDirection::Both => (false, true),
        };

        let mut dest_label = None;
        if let Some(first) = node.labels.first() {
            match self.store.label_id(first) {
                Some(id) => dest_label = Some(id),
                None => return Ok(PlanNode::EmptyResult),
            }
            for extra in &node.labels[1..] {
                filters.push(Expr::HasLabel {
                    expr: Box::new(Expr::Variable(dst_alias.clone())),
                    label: extra.clone(),
                });
            }
        }

        let ae = AlgebraicExpression { rels, transposed, both, dest_label };
        let desc = ae.describe(self.store, src_alias, &dst_alias);

        let var_len = rel.var_length.map(|v| (v.min.unwrap_or(1), v.max));
        let edge_slot = if rel.var_length.is_none() {
            Some(self.slot(rel.alias.as_deref().expect("enriched"))?)
        } else {
            None
        };

        if self.bound.contains(&dst_alias) && var_len.is_none() {
            let child = Box::new(self.current.take().expect("hop needs a source"));
            return Ok(PlanNode::ExpandInto { child, ae, src_slot, dst_slot, edge_slot, desc });
        }

        let child = Box::new(self.current.take().expect("hop needs a source"));
        Ok(PlanNode::Traverse { child, ae, src_slot, dst_slot, edge_slot, var_len, desc })
    }

    // ------------------------------------------------------------------
    // CREATE / MERGE
    // ------------------------------------------------------------------

    fn lower_create_pattern(
        &mut self,
        pattern: &Pattern,
    ) -> Result<(Vec<NodeCreate>, Vec<EdgeCreate>)> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let mut lower_node = |p: &mut Self, np: &NodePattern| -> Result<usize> {
            let alias = np.alias.clone().expect("enriched");
            let slot = p.slot(&alias)?;
            let bound = p.bound.contains(&alias);
            if bound && (!np.labels.is_empty() || !np.props.is_empty()) {
                return Err(Error::Semantic(format!(
                    "'{alias}' is already bound; it cannot take labels or properties here"
                )));
            }
            if !bound {
                nodes.push(NodeCreate {
                    alias: alias.clone(),
                    slot,
                    bound: false,
                    labels: np.labels.clone(),
                    props: np.props.clone(),
                });
                p.bound.insert(alias);
            } else {
                nodes.push(NodeCreate {
                    alias,
                    slot,
                    bound: true,
                    labels: Vec::new(),
                    props: Vec::new(),
                });
            }
            Ok(slot)
        };

        let mut prev_slot = lower_node(self, &pattern.start)?;
        for (rel, node) in &pattern.chain {
            if rel.var_length.is_some() {
                return Err(Error::Semantic(
                    "variable-length relationships cannot be created".into(),
                ));
            }
            let rel_type = match rel.rel_types.as_slice() {
                [single] => single.clone(),
                _ => {
                    return Err(Error::Semantic(
                        "created relationship must have exactly one type".into(),
                    ));
                }
            };
            let outgoing = match rel.direction {
                PatternDirection::Right => true,
                PatternDirection::Left => false,
                PatternDirection::Both => {
                    return Err(Error::Semantic(
                        "created relationship must be directed".into(),
                    ));
                }
            };
            let rel_alias = rel.alias.clone().expect("enriched");
            let rel_slot = self.slot(&rel_alias)?;
            let node_slot = lower_node(self, node)?;
            edges.push(EdgeCreate {
                slot: rel_slot,
                src_slot: prev_slot,
                dst_slot: node_slot,
                rel_type,
                props: rel.props.clone(),
                outgoing,
            });
            self.bound.insert(rel_alias);
            prev_slot = node_slot;
        }
        Ok((nodes, edges))
    }

    fn plan_create(&mut self, patterns: &[Pattern]) -> Result<()> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for pattern in patterns {
            let (n, e) = self.lower_create_pattern(pattern)?;
            nodes.extend(n);
            edges.extend(e);
        }
        // referenced-only entries carry no work; drop them
        nodes.retain(|n| !n.bound);
        self.current = Some(PlanNode::Create {
            child: self.current.take().map(Box::new),
            nodes,
            edges,
        });
        Ok(())
    }

    fn plan_merge(
        &mut self,
        pattern: &Pattern,
        on_create: &[SetItem],
        on_match: &[SetItem],
    ) -> Result<()> {
        let (nodes, edges) = self.lower_create_pattern(pattern)?;
        let on_create = self.lower_set_items(on_create)?;
        let on_match = self.lower_set_items(on_match)?;
        self.current = Some(PlanNode::Merge {
            child: self.current.take().map(Box::new),
            nodes,
            edges,
            on_create,
            on_match,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // SET / REMOVE / FOREACH
    // ------------------------------------------------------------------

    fn lower_set_items(&self, items: &[SetItem]) -> Result<Vec<UpdateItem>> {
        items
            .iter()
            .map(|item| {
                Ok(match item {
                    SetItem::Property { variable, key, value } => UpdateItem::SetProp {
                        slot: self.slot(variable)?,
                        name: variable.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    },
                    SetItem::MergeProperties { variable, value } => UpdateItem::MergeProps {
                        slot: self.slot(variable)?,
                        name: variable.clone(),
                        value: value.clone(),
                    },
                    SetItem::Label { variable, label } => UpdateItem::SetLabel {
                        slot: self.slot(variable)?,
                        name: variable.clone(),
                        label: label.clone(),
                    },
                })
            })
            .collect()
    }

    fn lower_remove_items(&self, items: &[RemoveItem]) -> Result<Vec<UpdateItem>> {
        items
            .iter()
            .map(|item| {
                Ok(match item {
                    RemoveItem::Property { variable, key } => UpdateItem::RemoveProp {
                        slot: self.slot(variable)?,
                        name: variable.clone(),
                        key: key.clone(),
                    },
                    RemoveItem::Label { variable, label } => UpdateItem::RemoveLabel {
                        slot: self.slot(variable)?,
                        name: variable.clone(),
                        label: label.clone(),
                    },
                })
            })
            .collect()
    }

    fn lower_foreach_body(&mut self, body: &[Clause]) -> Result<Vec<ForeachAction>> {
        let mut actions = Vec::new();
        for clause in body {
            match clause {
                Clause::Create { patterns } => {
                    let mut nodes = Vec::new();
                    let mut edges = Vec::new();
                    for pattern in patterns {
                        let (n, e) = self.lower_create_pattern(pattern)?;
                        nodes.extend(n);
                        edges.extend(e);
                    }
                    nodes.retain(|n| !n.bound);
                    actions.push(ForeachAction::Create { nodes, edges });
                }
                Clause::Set(items) => {
                    actions.push(ForeachAction::Update(self.lower_set_items(items)?));
                }
                Clause::Remove(items) => {
                    actions.push(ForeachAction::Update(self.lower_remove_items(items)?));
                }
                Clause::Delete { exprs, detach } => {
                    actions.push(ForeachAction::Delete { exprs: exprs.clone(), detach: *detach });
                }
                Clause::Foreach { variable, list, body } => {
                    let variable_slot = self.slot(variable)?;
                    let inner = self.lower_foreach_body(body)?;
                    actions.push(ForeachAction::Foreach {
                        variable_slot,
                        list: list.clone(),
                        body: inner,
                    });
                }
                other => {
                    return Err(Error::Semantic(format!(
                        "clause not allowed inside FOREACH: {other:?}"
                    )));
                }
            }
        }
        Ok(actions)
    }

    // ------------------------------------------------------------------
    // WITH / RETURN
    // ------------------------------------------------------------------

    fn plan_projection(&mut self, projection: &Projection) -> Result<()> {
        let child = self.current.take().unwrap_or(PlanNode::EmptyRow);

        let items: Vec<(Expr, String, usize)> = match &projection.items {
            ProjectionItems::Star => {
                // enrichment resolved Star columns into meta for RETURN;
                // for WITH * the scope simply flows through
                Vec::new()
            }
            ProjectionItems::Items(items) => items
                .iter()
                .map(|item| {
                    let alias = item.alias.clone().expect("aliased during enrichment");
                    let slot = self.slot(&alias)?;
                    Ok((item.expr.clone(), alias, slot))
                })
                .collect::<Result<_>>()?,
        };

        let aggregating = items.iter().any(|(expr, _, _)| contains_aggregate(expr));
        let mut node = if aggregating {
            let mut keys = Vec::new();
            let mut aggs = Vec::new();
            for (expr, _, slot) in &items {
                if is_aggregate(expr) {
                    aggs.push(lower_aggregate(expr, *slot)?);
                } else if contains_aggregate(expr) {
                    return Err(Error::Semantic(
                        "aggregate calls cannot be nested inside expressions".into(),
                    ));
                } else {
                    keys.push((expr.clone(), *slot));
                }
            }
            PlanNode::Aggregate { child: Box::new(child), keys, aggs }
        } else if items.is_empty() {
            child
        } else {
            PlanNode::Project {
                child: Box::new(child),
                items: items.iter().map(|(e, _, s)| (e.clone(), *s)).collect(),
            }
        };

        for (_, alias, _) in &items {
            self.bound.insert(alias.clone());
        }

        if projection.distinct && !aggregating {
            // for `DISTINCT *` the resolved output columns carry the slots
            let slots: Vec<usize> = if items.is_empty() {
                self.meta.columns.iter().map(|(_, s)| *s).collect()
            } else {
                items.iter().map(|(_, _, s)| *s).collect()
            };
            node = PlanNode::Distinct { child: Box::new(node), slots };
        }
        if !projection.order_by.is_empty() {
            let keys = projection
                .order_by
                .iter()
                .map(|o| (o.expr.clone(), o.ascending))
                .collect();
            node = PlanNode::Sort { child: Box::new(node), keys };
        }
        if let Some(skip) = &projection.skip {
            node = PlanNode::Skip { child: Box::new(node), count: skip.clone() };
        }
        if let Some(limit) = &projection.limit {
            node = PlanNode::Limit { child: Box::new(node), count: limit.clone() };
        }
        if let Some(pred) = &projection.where_clause {
            node = PlanNode::Filter { child: Box::new(node), predicate: pred.clone() };
        }

        self.current = Some(node);
        Ok(())
    }
}

fn lower_aggregate(expr: &Expr, slot: usize) -> Result<AggItem> {
    let Expr::FunctionCall { name, args, distinct } = expr else {
        return Err(Error::InternalInvariant("aggregate item is not a call".into()));
    };
    let (kind, arg) = match name.to_uppercase().as_str() {
        "COUNT" => match args.first() {
            None | Some(Expr::Star) => (AggKind::CountStar, None),
            Some(a) => (AggKind::Count, Some(a.clone())),
        },
        "SUM" => (AggKind::Sum, args.first().cloned()),
        "AVG" => (AggKind::Avg, args.first().cloned()),
        "MIN" => (AggKind::Min, args.first().cloned()),
        "MAX" => (AggKind::Max, args.first().cloned()),
        "COLLECT" => (AggKind::Collect, args.first().cloned()),
        "ANY" => (AggKind::Any, args.first().cloned()),
        "ALL" => (AggKind::All, args.first().cloned()),
        other => return Err(Error::Semantic(format!("unknown aggregate: {other}"))),
    };
    if kind != AggKind::CountStar && arg.is_none() {
        return Err(Error::Semantic(format!("{name}() requires an argument")));
    }
    Ok(AggItem { kind, arg, distinct: *distinct, slot })
}

// ============================================================================
// Pattern helpers
// ============================================================================

fn pattern_aliases(pattern: &Pattern) -> Vec<String> {
    let mut out = vec![pattern.start.alias.clone().expect("enriched")];
    for (rel, node) in &pattern.chain {
        if rel.var_length.is_none() {
            out.push(rel.alias.clone().expect("enriched"));
        }
        out.push(node.alias.clone().expect("enriched"));
    }
    out
}

/// Group patterns into connected components over shared node aliases
/// (or shared outer-bound variables, which glue a pattern to the Argument).
fn connected_components(patterns: &[Pattern], outer_bound: &HashSet<String>) -> Vec<Vec<usize>> {
    let sets: Vec<HashSet<String>> = patterns
        .iter()
        .map(|p| pattern_aliases(p).into_iter().collect())
        .collect();

    let mut component_of: Vec<usize> = (0..patterns.len()).collect();
    loop {
        let mut changed = false;
        for i in 0..patterns.len() {
            for j in (i + 1)..patterns.len() {
                if component_of[i] != component_of[j]
                    && (!sets[i].is_disjoint(&sets[j])
                        || (sets[i].iter().any(|a| outer_bound.contains(a))
                            && sets[j].iter().any(|a| outer_bound.contains(a))))
                {
                    let (from, to) = (component_of[j], component_of[i]);
                    for c in component_of.iter_mut() {
                        if *c == from {
                            *c = to;
                        }
                    }
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for (idx, c) in component_of.iter().enumerate() {
        if let Some((_, members)) = groups.iter_mut().find(|(id, _)| id == c) {
            members.push(idx);
        } else {
            groups.push((*c, vec![idx]));
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

fn reverse_pattern(pattern: &Pattern) -> Pattern {
    let mut nodes: Vec<NodePattern> = Vec::with_capacity(pattern.chain.len() + 1);
    nodes.push(pattern.start.clone());
    for (_, node) in &pattern.chain {
        nodes.push(node.clone());
    }
    nodes.reverse();

    let mut rels: Vec<RelPattern> = pattern.chain.iter().map(|(r, _)| r.clone()).collect();
    rels.reverse();
    for rel in &mut rels {
        rel.direction = match rel.direction {
            PatternDirection::Right => PatternDirection::Left,
            PatternDirection::Left => PatternDirection::Right,
            PatternDirection::Both => PatternDirection::Both,
        };
    }

    let start = nodes.remove(0);
    let chain = rels.into_iter().zip(nodes).collect();
    Pattern { path_alias: pattern.path_alias.clone(), start, chain }
}

/// Inline `{prop: value}` maps become equality predicates.
fn collect_inline_filters(pattern: &Pattern, filters: &mut Vec<Expr>) {
    let mut push = |alias: &str, props: &[(String, Expr)]| {
        for (key, value) in props {
            filters.push(Expr::BinaryOp {
                left: Box::new(Expr::Property {
                    expr: Box::new(Expr::Variable(alias.to_owned())),
                    key: key.clone(),
                }),
                op: BinaryOp::Eq,
                right: Box::new(value.clone()),
            });
        }
    };
    push(pattern.start.alias.as_deref().expect("enriched"), &pattern.start.props);
    for (rel, node) in &pattern.chain {
        if rel.var_length.is_none() {
            push(rel.alias.as_deref().expect("enriched"), &rel.props);
        }
        push(node.alias.as_deref().expect("enriched"), &node.props);
    }
}

/// Split a predicate on top-level ANDs.
fn and_split(expr: &Expr, out: &mut Vec<Expr>) {
    if let Expr::BinaryOp { left, op: BinaryOp::And, right } = expr {
        and_split(left, out);
        and_split(right, out);
    } else {
        out.push(expr.clone());
    }
}

/// Chain Filter nodes for every pending predicate whose variables are all
/// bound (or unconditionally when `bound` is None).
fn apply_filters(mut node: PlanNode, filters: &mut Vec<Expr>, bound: Option<&HashSet<String>>) -> PlanNode {
    let mut i = 0;
    while i < filters.len() {
        let ready = match bound {
            None => true,
            Some(bound) => expr_vars(&filters[i]).iter().all(|v| bound.contains(v)),
        };
        if ready {
            let predicate = filters.remove(i);
            node = PlanNode::Filter { child: Box::new(node), predicate };
        } else {
            i += 1;
        }
    }
    node
}

/// Free variables of an expression.
pub fn expr_vars(expr: &Expr) -> Vec<String> {
    fn walk(expr: &Expr, skip: &mut Vec<String>, out: &mut Vec<String>) {
        match expr {
            Expr::Variable(name) => {
                if !skip.contains(name) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Property { expr, .. }
            | Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::HasLabel { expr, .. } => walk(expr, skip, out),
            Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
                walk(left, skip, out);
                walk(right, skip, out);
            }
            Expr::In { expr, list } => {
                walk(expr, skip, out);
                walk(list, skip, out);
            }
            Expr::Subscript { expr, index } => {
                walk(expr, skip, out);
                walk(index, skip, out);
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    walk(arg, skip, out);
                }
            }
            Expr::List(items) => {
                for item in items {
                    walk(item, skip, out);
                }
            }
            Expr::Map(entries) => {
                for (_, value) in entries {
                    walk(value, skip, out);
                }
            }
            Expr::Case { operand, whens, else_expr } => {
                if let Some(op) = operand {
                    walk(op, skip, out);
                }
                for (w, t) in whens {
                    walk(w, skip, out);
                    walk(t, skip, out);
                }
                if let Some(e) = else_expr {
                    walk(e, skip, out);
                }
            }
            Expr::Reduce { acc, init, variable, list, expr } => {
                walk(init, skip, out);
                walk(list, skip, out);
                skip.push(acc.clone());
                skip.push(variable.clone());
                walk(expr, skip, out);
                skip.pop();
                skip.pop();
            }
            Expr::MapProjection { variable, selectors } => {
                if !skip.contains(variable) && !out.contains(variable) {
                    out.push(variable.clone());
                }
                for selector in selectors {
                    match selector {
                        MapSelector::Literal(_, value) => walk(value, skip, out),
                        MapSelector::Identifier(name) => {
                            if !skip.contains(name) && !out.contains(name) {
                                out.push(name.clone());
                            }
                        }
                        _ => {}
                    }
                }
            }
            Expr::Literal(_) | Expr::Parameter(_) | Expr::Star => {}
        }
    }
    let mut out = Vec::new();
    walk(expr, &mut Vec::new(), &mut out);
    out
}

/// Does `filter` have the shape of an indexable predicate on `alias`?
/// Returns (attribute name, index predicate).
fn index_predicate_for(filter: &Expr, alias: &str) -> Option<(String, IndexScanPredicate)> {
    let Expr::BinaryOp { left, op, right } = filter else { return None };

    let as_prop = |e: &Expr| -> Option<String> {
        if let Expr::Property { expr, key } = e {
            if matches!(&**expr, Expr::Variable(v) if v == alias) {
                return Some(key.clone());
            }
        }
        None
    };
    let constish = |e: &Expr| expr_vars(e).is_empty();

    // alias.attr OP const  |  const OP alias.attr
    let (attr, value, op) = if let Some(attr) = as_prop(left) {
        if !constish(right) {
            return None;
        }
        (attr, (**right).clone(), *op)
    } else if let Some(attr) = as_prop(right) {
        if !constish(left) {
            return None;
        }
        let flipped = match op {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Lte => BinaryOp::Gte,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Gte => BinaryOp::Lte,
            other => *other,
        };
        (attr, (**left).clone(), flipped)
    } else {
        return None;
    };

    let pred = match op {
        BinaryOp::Eq => IndexScanPredicate::Eq(value),
        BinaryOp::Lt => IndexScanPredicate::Range { low: None, high: Some((value, false)) },
        BinaryOp::Lte => IndexScanPredicate::Range { low: None, high: Some((value, true)) },
        BinaryOp::Gt => IndexScanPredicate::Range { low: Some((value, false)), high: None },
        BinaryOp::Gte => IndexScanPredicate::Range { low: Some((value, true)), high: None },
        _ => return None,
    };
    Some((attr, pred))
}

// ============================================================================
// Plan text (EXPLAIN)
// ============================================================================

impl PhysicalPlan {
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                let all = if self.union_all[i - 1] { " ALL" } else { "" };
                out.push_str(&format!("Union{all}\n"));
            }
            render(&segment.root, if self.segments.len() > 1 { 1 } else { 0 }, &mut out);
        }
        out
    }
}

fn render(node: &PlanNode, depth: usize, out: &mut String) {
    let pad = "    ".repeat(depth);
    let line = |out: &mut String, text: &str| {
        out.push_str(&pad);
        out.push_str(text);
        out.push('\n');
    };

    match node {
        PlanNode::Results { child } => {
            line(out, "Results");
            render(child, depth + 1, out);
        }
        PlanNode::Project { child, .. } => {
            line(out, "Project");
            render(child, depth + 1, out);
        }
        PlanNode::Aggregate { child, .. } => {
            line(out, "Aggregate");
            render(child, depth + 1, out);
        }
        PlanNode::Sort { child, .. } => {
            line(out, "Sort");
            render(child, depth + 1, out);
        }
        PlanNode::Skip { child, .. } => {
            line(out, "Skip");
            render(child, depth + 1, out);
        }
        PlanNode::Limit { child, .. } => {
            line(out, "Limit");
            render(child, depth + 1, out);
        }
        PlanNode::Distinct { child, .. } => {
            line(out, "Distinct");
            render(child, depth + 1, out);
        }
        PlanNode::Filter { child, .. } => {
            line(out, "Filter");
            render(child, depth + 1, out);
        }
        PlanNode::AllNodeScan { alias, .. } => {
            line(out, &format!("All Node Scan | ({alias})"));
        }
        PlanNode::NodeByLabelScan { alias, label, .. } => {
            line(out, &format!("Node By Label Scan | ({alias}:{label})"));
        }
        PlanNode::IndexScan { alias, label, attr, .. } => {
            line(out, &format!("Index Scan | ({alias}:{label} {{{attr}}})"));
        }
        PlanNode::Traverse { child, desc, var_len, .. } => {
            match var_len {
                Some((min, Some(max))) => line(out, &format!("Conditional Variable Length Traverse | {desc} [*{min}..{max}]")),
                Some((min, None)) => line(out, &format!("Conditional Variable Length Traverse | {desc} [*{min}..]")),
                None => line(out, &format!("Conditional Traverse | {desc}")),
            }
            render(child, depth + 1, out);
        }
        PlanNode::ExpandInto { child, desc, .. } => {
            line(out, &format!("Expand Into | {desc}"));
            render(child, depth + 1, out);
        }
        PlanNode::NamedPath { child, .. } => {
            line(out, "Named Path");
            render(child, depth + 1, out);
        }
        PlanNode::CartesianProduct { branches } => {
            line(out, "Cartesian Product");
            for branch in branches {
                render(branch, depth + 1, out);
            }
        }
        PlanNode::Apply { lhs, rhs, optional } => {
            line(out, if *optional { "Apply | Optional" } else { "Apply" });
            render(lhs, depth + 1, out);
            render(rhs, depth + 1, out);
        }
        PlanNode::Argument => line(out, "Argument"),
        PlanNode::EmptyRow => line(out, "Empty Row"),
        PlanNode::EmptyResult => line(out, "Empty Result"),
        PlanNode::Unwind { child, .. } => {
            line(out, "Unwind");
            if let Some(child) = child {
                render(child, depth + 1, out);
            }
        }
        PlanNode::Create { child, .. } => {
            line(out, "Create");
            if let Some(child) = child {
                render(child, depth + 1, out);
            }
        }
        PlanNode::Merge { child, .. } => {
            line(out, "Merge");
            if let Some(child) = child {
                render(child, depth + 1, out);
            }
        }
        PlanNode::Update { child, .. } => {
            line(out, "Update");
            render(child, depth + 1, out);
        }
        PlanNode::Delete { child, .. } => {
            line(out, "Delete");
            render(child, depth + 1, out);
        }
        PlanNode::Foreach { child, .. } => {
            line(out, "Foreach");
            if let Some(child) = child {
                render(child, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::{self, enrich::enrich};
    use crate::model::Value;
    use crate::store::GraphStore;

    fn plan_for(store: &GraphStore, q: &str) -> PhysicalPlan {
        let crate::cypher::ast::Ast::Query(stmt) = cypher::parse(q).unwrap() else {
            panic!("not a query");
        };
        let enriched = enrich(stmt).unwrap();
        plan(&enriched, store).unwrap()
    }

    fn demo_store() -> GraphStore {
        let mut g = GraphStore::new();
        let person = g.intern_label("Person");
        let name = g.intern_attr("name");
        let knows = g.intern_relation("KNOWS");
        let a = g.create_node(&[person], vec![(name, Value::from("Roi"))]).unwrap();
        let b = g.create_node(&[person], vec![(name, Value::from("Ailon"))]).unwrap();
        g.create_edge(a, b, knows, vec![]).unwrap();
        g
    }

    #[test]
    fn test_label_scan_plan() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (n:Person) RETURN n");
        let text = p.explain();
        assert!(text.contains("Node By Label Scan"), "{text}");
        assert!(text.starts_with("Results"));
    }

    #[test]
    fn test_traverse_plan() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (a:Person)-[:KNOWS]->(b) RETURN a, b");
        let text = p.explain();
        assert!(text.contains("Conditional Traverse"), "{text}");
    }

    #[test]
    fn test_index_scan_selected_when_index_exists() {
        let mut g = demo_store();
        let person = g.label_id("Person").unwrap();
        let name = g.attr_id("name").unwrap();
        g.create_node_exact_index(person, vec![name]).unwrap();

        let p = plan_for(&g, "MATCH (n:Person {name: 'Roi'}) RETURN n");
        let text = p.explain();
        assert!(text.contains("Index Scan"), "{text}");
        assert!(!text.contains("Node By Label Scan"), "{text}");
    }

    #[test]
    fn test_no_index_means_label_scan_plus_filter() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (n:Person {name: 'Roi'}) RETURN n");
        let text = p.explain();
        assert!(text.contains("Node By Label Scan"), "{text}");
        assert!(text.contains("Filter"), "{text}");
    }

    #[test]
    fn test_cartesian_product_for_disconnected_patterns() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (a:Person), (b:Person) RETURN a, b");
        let text = p.explain();
        assert!(text.contains("Cartesian Product"), "{text}");
    }

    #[test]
    fn test_unknown_label_is_statically_empty() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (n:Ghost) RETURN n");
        assert!(p.explain().contains("Empty Result"));
    }

    #[test]
    fn test_var_length_plan() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (a)-[:KNOWS*1..2]->(b) RETURN b");
        let text = p.explain();
        assert!(text.contains("Variable Length"), "{text}");
    }

    #[test]
    fn test_optional_match_apply() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (a:Person) OPTIONAL MATCH (a)-[:KNOWS]->(b) RETURN a, b");
        let text = p.explain();
        assert!(text.contains("Apply | Optional"), "{text}");
        assert!(text.contains("Argument"), "{text}");
    }

    #[test]
    fn test_aggregate_plan() {
        let g = demo_store();
        let p = plan_for(&g, "MATCH (n:Person) RETURN count(n)");
        assert!(p.explain().contains("Aggregate"));
    }
}
