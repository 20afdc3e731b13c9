//! Source operators: node scans and index scans.

use std::ops::Bound;
use std::sync::Arc;

use crate::index::Index;
use crate::model::{NodeId, Value};
use crate::plan::IndexScanPredicate;
use crate::{Error, Result};

use super::super::expr::{eval, EvalEnv};
use super::super::record::{Record, RecordLayout};
use super::super::{ExecEnv, Operator};

/// Every live node, ascending by id. The order is stable within a query:
/// ids freed by this query's own deletes cannot be reused before the next
/// flush.
pub struct AllNodeScanOp {
    layout: Arc<RecordLayout>,
    slot: usize,
    cursor: u64,
}

impl AllNodeScanOp {
    pub fn new(layout: Arc<RecordLayout>, slot: usize) -> Self {
        Self { layout, slot, cursor: 0 }
    }
}

impl Operator for AllNodeScanOp {
    fn name(&self) -> &'static str {
        "All Node Scan"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        let graph = env.graph();
        while self.cursor < graph.node_capacity() {
            let id = NodeId(self.cursor);
            self.cursor += 1;
            if let Some(node) = graph.materialize_node(id) {
                let mut record = Record::empty(&self.layout);
                record.set(self.slot, Value::Node(Box::new(node)));
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Nodes carrying a label, via the label's diagonal matrix.
pub struct NodeByLabelScanOp {
    layout: Arc<RecordLayout>,
    label: String,
    slot: usize,
    ids: Option<Vec<NodeId>>,
    pos: usize,
}

impl NodeByLabelScanOp {
    pub fn new(layout: Arc<RecordLayout>, label: String, slot: usize) -> Self {
        Self { layout, label, slot, ids: None, pos: 0 }
    }
}

impl Operator for NodeByLabelScanOp {
    fn name(&self) -> &'static str {
        "Node By Label Scan"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        let graph = env.graph();
        if self.ids.is_none() {
            self.ids = Some(match graph.label_id(&self.label) {
                Some(label) => graph.label_nodes(label),
                None => Vec::new(),
            });
            self.pos = 0;
        }
        let ids = self.ids.as_ref().expect("opened above");
        while self.pos < ids.len() {
            let id = ids[self.pos];
            self.pos += 1;
            if let Some(node) = graph.materialize_node(id) {
                let mut record = Record::empty(&self.layout);
                record.set(self.slot, Value::Node(Box::new(node)));
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.ids = None;
        self.pos = 0;
    }
}

/// Nodes satisfying an indexed predicate, in index key order.
pub struct IndexScanOp {
    layout: Arc<RecordLayout>,
    label: String,
    attr: String,
    predicate: IndexScanPredicate,
    slot: usize,
    ids: Option<Vec<u64>>,
    pos: usize,
}

impl IndexScanOp {
    pub fn new(
        layout: Arc<RecordLayout>,
        label: String,
        attr: String,
        predicate: IndexScanPredicate,
        slot: usize,
    ) -> Self {
        Self { layout, label, attr, predicate, slot, ids: None, pos: 0 }
    }

    fn open(&self, env: &ExecEnv<'_>) -> Result<Vec<u64>> {
        let graph = env.graph();
        let Some(label) = graph.label_id(&self.label) else {
            return Ok(Vec::new());
        };
        let Some(attr) = graph.attr_id(&self.attr) else {
            return Ok(Vec::new());
        };
        let schema = graph.node_schema(label);
        let Some(Index::Exact(index)) = schema.index_on(attr) else {
            return Err(Error::Index(format!(
                "plan expected an exact-match index on :{}({})",
                self.label, self.attr
            )));
        };

        // predicate operands may reference parameters only; evaluate them
        // against an empty record
        let empty = Record::empty(&self.layout);
        let eval_env = EvalEnv {
            layout: &self.layout,
            params: &env.ctx.params,
            graph,
        };
        Ok(match &self.predicate {
            IndexScanPredicate::Eq(expr) => {
                let value = eval(expr, &empty, &eval_env)?;
                index.query_eq(&[value])
            }
            IndexScanPredicate::Range { low, high } => {
                let low_val = low
                    .as_ref()
                    .map(|(e, inclusive)| Ok::<_, Error>((eval(e, &empty, &eval_env)?, *inclusive)))
                    .transpose()?;
                let high_val = high
                    .as_ref()
                    .map(|(e, inclusive)| Ok::<_, Error>((eval(e, &empty, &eval_env)?, *inclusive)))
                    .transpose()?;
                let low_bound = match &low_val {
                    None => Bound::Unbounded,
                    Some((v, true)) => Bound::Included(v),
                    Some((v, false)) => Bound::Excluded(v),
                };
                let high_bound = match &high_val {
                    None => Bound::Unbounded,
                    Some((v, true)) => Bound::Included(v),
                    Some((v, false)) => Bound::Excluded(v),
                };
                index.query_range(low_bound, high_bound)
            }
        })
    }
}

impl Operator for IndexScanOp {
    fn name(&self) -> &'static str {
        "Index Scan"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.ids.is_none() {
            self.ids = Some(self.open(env)?);
            self.pos = 0;
        }
        let ids = self.ids.as_ref().expect("opened above");
        let graph = env.graph();
        while self.pos < ids.len() {
            let id = NodeId(ids[self.pos]);
            self.pos += 1;
            if let Some(node) = graph.materialize_node(id) {
                let mut record = Record::empty(&self.layout);
                record.set(self.slot, Value::Node(Box::new(node)));
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.ids = None;
        self.pos = 0;
    }
}
