//! Row-shaping operators: filter, project, sort, skip, limit, distinct,
//! unwind.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::cypher::ast::Expr;
use crate::model::Value;
use crate::{Error, Result};

use super::super::expr::{eval, EvalEnv};
use super::super::record::{Record, RecordLayout};
use super::super::{BoxOp, ExecEnv, Operator};

pub(super) fn eval_in<'a>(
    expr: &Expr,
    record: &Record,
    layout: &'a RecordLayout,
    env: &'a ExecEnv<'_>,
) -> Result<Value> {
    let eval_env = EvalEnv {
        layout,
        params: &env.ctx.params,
        graph: env.graph(),
    };
    eval(expr, record, &eval_env)
}

/// Passes records whose predicate is truthy; short-circuits on the first
/// failing conjunct by construction of the expression evaluator.
pub struct FilterOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    predicate: Expr,
}

impl FilterOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, predicate: Expr) -> Self {
        Self { child, layout, predicate }
    }
}

impl Operator for FilterOp {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        loop {
            env.check_interrupt()?;
            let Some(record) = self.child.next(env)? else {
                return Ok(None);
            };
            let verdict = eval_in(&self.predicate, &record, &self.layout, env)?;
            if verdict.is_truthy() {
                return Ok(Some(record));
            }
        }
    }

    fn reset(&mut self) {
        self.child.reset();
    }
}

/// Evaluates projection items into their alias slots. Input bindings stay
/// in place so ORDER BY can still see them.
pub struct ProjectOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    items: Vec<(Expr, usize)>,
}

impl ProjectOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, items: Vec<(Expr, usize)>) -> Self {
        Self { child, layout, items }
    }
}

impl Operator for ProjectOp {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        let Some(mut record) = self.child.next(env)? else {
            return Ok(None);
        };
        for (expr, slot) in &self.items {
            let value = eval_in(expr, &record, &self.layout, env)?;
            record.set(*slot, value);
        }
        Ok(Some(record))
    }

    fn reset(&mut self) {
        self.child.reset();
    }
}

/// Blocking sort over the full child output.
pub struct SortOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    keys: Vec<(Expr, bool)>,
    sorted: Option<VecDeque<Record>>,
}

impl SortOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, keys: Vec<(Expr, bool)>) -> Self {
        Self { child, layout, keys, sorted: None }
    }
}

impl Operator for SortOp {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.sorted.is_none() {
            let mut rows: Vec<(Vec<Value>, Record)> = Vec::new();
            while let Some(record) = self.child.next(env)? {
                env.check_interrupt()?;
                let key: Vec<Value> = self
                    .keys
                    .iter()
                    .map(|(expr, _)| eval_in(expr, &record, &self.layout, env))
                    .collect::<Result<_>>()?;
                rows.push((key, record));
            }
            let directions: Vec<bool> = self.keys.iter().map(|(_, asc)| *asc).collect();
            rows.sort_by(|(a, _), (b, _)| {
                for ((x, y), ascending) in a.iter().zip(b.iter()).zip(&directions) {
                    let ord = x.total_cmp(y);
                    let ord = if *ascending { ord } else { ord.reverse() };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            self.sorted = Some(rows.into_iter().map(|(_, r)| r).collect());
        }
        Ok(self.sorted.as_mut().expect("sorted above").pop_front())
    }

    fn reset(&mut self) {
        self.child.reset();
        self.sorted = None;
    }
}

pub struct SkipOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    count: Expr,
    remaining: Option<i64>,
}

impl SkipOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, count: Expr) -> Self {
        Self { child, layout, count, remaining: None }
    }
}

impl Operator for SkipOp {
    fn name(&self) -> &'static str {
        "Skip"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        if self.remaining.is_none() {
            let n = eval_count(&self.count, &self.layout, env, "SKIP")?;
            self.remaining = Some(n);
        }
        loop {
            env.check_interrupt()?;
            let Some(record) = self.child.next(env)? else {
                return Ok(None);
            };
            let remaining = self.remaining.as_mut().expect("initialized above");
            if *remaining > 0 {
                *remaining -= 1;
                continue;
            }
            return Ok(Some(record));
        }
    }

    fn reset(&mut self) {
        self.child.reset();
        self.remaining = None;
    }
}

pub struct LimitOp {
    child: BoxOp,
    layout: Arc<RecordLayout>,
    count: Expr,
    remaining: Option<i64>,
}

impl LimitOp {
    pub fn new(child: BoxOp, layout: Arc<RecordLayout>, count: Expr) -> Self {
        Self { child, layout, count, remaining: None }
    }
}

impl Operator for LimitOp {
    fn name(&self) -> &'static str {
        "Limit"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        env.check_interrupt()?;
        if self.remaining.is_none() {
            let n = eval_count(&self.count, &self.layout, env, "LIMIT")?;
            self.remaining = Some(n);
        }
        let remaining = self.remaining.as_mut().expect("initialized above");
        if *remaining <= 0 {
            return Ok(None);
        }
        match self.child.next(env)? {
            Some(record) => {
                *remaining -= 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn reset(&mut self) {
        self.child.reset();
        self.remaining = None;
    }
}

fn eval_count(
    expr: &Expr,
    layout: &Arc<RecordLayout>,
    env: &mut ExecEnv<'_>,
    clause: &str,
) -> Result<i64> {
    let empty = Record::empty(layout);
    let value = eval_in(expr, &empty, layout, env)?;
    match value.as_int() {
        Some(n) if n >= 0 => Ok(n),
        _ => Err(Error::RuntimeType {
            expected: format!("non-negative integer for {clause}"),
            got: value.type_name().into(),
        }),
    }
}

/// De-duplicates on the given slots' values.
pub struct DistinctOp {
    child: BoxOp,
    slots: Vec<usize>,
    seen: Vec<Vec<Value>>,
}

impl DistinctOp {
    pub fn new(child: BoxOp, slots: Vec<usize>) -> Self {
        Self { child, slots, seen: Vec::new() }
    }
}

impl Operator for DistinctOp {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        loop {
            env.check_interrupt()?;
            let Some(record) = self.child.next(env)? else {
                return Ok(None);
            };
            let key: Vec<Value> = self.slots.iter().map(|s| record.get(*s).clone()).collect();
            if !self.seen.contains(&key) {
                self.seen.push(key);
                return Ok(Some(record));
            }
        }
    }

    fn reset(&mut self) {
        self.child.reset();
        self.seen.clear();
    }
}

/// One output record per list element. A non-list value unwinds to
/// itself; NULL and the empty list unwind to nothing.
pub struct UnwindOp {
    child: Option<BoxOp>,
    layout: Arc<RecordLayout>,
    expr: Expr,
    slot: usize,
    buffer: VecDeque<Record>,
    standalone_done: bool,
}

impl UnwindOp {
    pub fn new(child: Option<BoxOp>, layout: Arc<RecordLayout>, expr: Expr, slot: usize) -> Self {
        Self { child, layout, expr, slot, buffer: VecDeque::new(), standalone_done: false }
    }

    fn fill(&mut self, record: Record, env: &mut ExecEnv<'_>) -> Result<()> {
        let value = eval_in(&self.expr, &record, &self.layout, env)?;
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    let mut out = record.clone();
                    out.set(self.slot, item);
                    self.buffer.push_back(out);
                }
            }
            single => {
                let mut out = record;
                out.set(self.slot, single);
                self.buffer.push_back(out);
            }
        }
        Ok(())
    }
}

impl Operator for UnwindOp {
    fn name(&self) -> &'static str {
        "Unwind"
    }

    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>> {
        loop {
            env.check_interrupt()?;
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let seed = if let Some(child) = &mut self.child {
                match child.next(env)? {
                    Some(record) => record,
                    None => return Ok(None),
                }
            } else {
                if self.standalone_done {
                    return Ok(None);
                }
                self.standalone_done = true;
                Record::empty(&self.layout)
            };
            self.fill(seed, env)?;
        }
    }

    fn reset(&mut self) {
        if let Some(child) = &mut self.child {
            child.reset();
        }
        self.buffer.clear();
        self.standalone_done = false;
    }
}
