//! Blocking aggregation operator.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::model::Value;
use crate::plan::{AggItem, AggKind};
use crate::Result;

use super::super::agg::Aggregate;
use super::super::expr::{eval, EvalEnv};
use super::super::record::{Record, RecordLayout};
use super::super::{BoxOp, ExecEnv, Operator};

use crate::cypher::ast::Expr;

/// Groups input records by the key expressions and folds each group's
/// aggregates. Output records carry only the key and aggregate slots.
///
/// Empty input with no grouping keys yields a single record of aggregate
/// identities; with keys it yields nothing.
pub struct AggregateOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    keys: Vec<(Expr, usize)>,
    aggs: Vec<AggItem>,
    output: Option<VecDeque<Record>>,
}

impl AggregateOp {
    pub fn new(
        child: BoxOp,
        layout: Arc<RecordLayout>,
        keys: Vec<(Expr, usize)>,
        aggs: Vec<AggItem>,
    ) -> Self {
        Self { child, layout, keys, aggs, output: None }
    }

    fn consume(&mut self, env: &mut ExecEnv<'_>) -> Result<VecDeque<Record>> {
        // group key → aggregate states
        let mut groups: Vec<(Vec<Value>, Vec<Aggregate>)> = Vec::new();

        while let Some(record) = self.child.next(env)? {
            env.check_interrupt()?;
            let eval_env = EvalEnv {
                layout: &self.layout,
                params: &env.ctx.params,
                graph: env.graph(),
            };
            let key: Vec<Value> = self
                .keys
                .iter()
                .map(|(expr, _)| eval(expr, &record, &eval_env))
                .collect::<Result<_>>()?;

            let idx = match groups.iter().position(|(k, _)| *k == key) {
                Some(idx) => idx,
                None => {
                    let states = self
                        .aggs
                        .iter()
                        .map(|item| Aggregate::new(item.kind, item.distinct))
                        .collect();
                    groups.push((key, states));
                    groups.len() - 1
                }
            };
            let group = &mut groups[idx].1;

            for (item, state) in self.aggs.iter().zip(group.iter_mut()) {
                let value = match (&item.kind, &item.arg) {
                    (AggKind::CountStar, _) => Value::Bool(true),
                    (_, Some(arg)) => eval(arg, &record, &eval_env)?,
                    (_, None) => Value::Null,
                };
                state.step(value)?;
            }
        }

        // aggregation with no keys over an empty input still produces a
        // row of identities
        if groups.is_empty() && self.keys.is_empty() {
            let states = self
                .aggs
                .iter()
                .map(|item| Aggregate::new(item.kind, item.distinct))
                .collect();
            groups.push((Vec::new(), states));
        }

        let mut out = VecDeque::with_capacity(groups.len());
        for (key, mut states) in groups {
            let mut record = Record::empty(&self.layout);
            for ((_, slot), value) in self.keys.iter().zip(key) {
                record.set(*slot, value);
            }
            for (item, state) in self.aggs.iter().zip(states.iter_mut()) {
                record.set(item.slot, state.finalize());
            }
            out.push_back(record);
        }
        Ok(out)
    }
}

impl Operator for AggregateOp {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.output.is_none() {
            let output = self.consume(env)?;
            self.output = Some(output);
        }
        Ok(self.output.as_mut().expect("consumed above").pop_front())
    }

    fn reset(&mut self) {
        self.child.reset();
        self.output = None;
    }
}
