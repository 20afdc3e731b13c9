//! Query execution engine.
//!
//! The physical plan is instantiated as a tree of pull-based operators.
//! Each operator exposes `next() → Ok(Some(record)) | Ok(None) | Err`,
//! plus `reset` for re-drive under Apply and Cartesian product. Errors
//! propagate upward without partial results; operator state is freed by
//! drop.
//!
//! Access discipline: the executor receives either shared or exclusive
//! store access for the whole query. Read-only queries can never reach a
//! mutation — any write operator asking for exclusive access surfaces
//! `ReadonlyViolation`. Readers also never flush: algebraic traversal
//! paths fall back to delta-aware pointwise reads when matrices are
//! Pending.

pub mod agg;
pub mod expr;
pub mod ops;
pub mod record;

use std::time::Instant;

use tracing::debug;

use crate::plan::PhysicalPlan;
use crate::query::QueryCtx;
use crate::result::{QueryStats, ResultSet};
use crate::store::GraphStore;
use crate::{Error, Result};

use record::Record;

// ============================================================================
// Store access
// ============================================================================

/// The query's view of the store: shared for readers, exclusive for
/// writers. Acquired by the dispatcher before execution and held for the
/// whole query.
pub enum StoreAccess<'a> {
    Read(&'a GraphStore),
    Write(&'a mut GraphStore),
}

/// Everything operators can reach during execution.
pub struct ExecEnv<'a> {
    access: StoreAccess<'a>,
    pub ctx: &'a QueryCtx,
    pub stats: QueryStats,
}

impl<'a> ExecEnv<'a> {
    pub fn new(access: StoreAccess<'a>, ctx: &'a QueryCtx) -> Self {
        Self { access, ctx, stats: QueryStats::default() }
    }

    pub fn graph(&self) -> &GraphStore {
        match &self.access {
            StoreAccess::Read(g) => g,
            StoreAccess::Write(g) => g,
        }
    }

    /// Exclusive store access; a read-only query reaching a write path
    /// gets `ReadonlyViolation`.
    pub fn graph_mut(&mut self) -> Result<&mut GraphStore> {
        match &mut self.access {
            StoreAccess::Write(g) => Ok(g),
            StoreAccess::Read(_) => Err(Error::ReadonlyViolation),
        }
    }

    /// Cancellation / deadline poll; operators call this on every `next`.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.ctx.interrupted() {
            return Err(Error::QueryTimedOut);
        }
        Ok(())
    }

    /// Try to make the matrices safe for algebraic reads. Writers flush;
    /// readers must not, so the return value tells the caller whether the
    /// algebraic path is available or the pointwise delta-aware path has
    /// to be used.
    pub fn sync_for_algebra(&mut self) -> bool {
        match &mut self.access {
            StoreAccess::Write(g) => {
                if !g.synced() {
                    g.flush();
                }
                true
            }
            StoreAccess::Read(g) => g.synced(),
        }
    }
}

// ============================================================================
// Operator contract
// ============================================================================

pub trait Operator {
    fn name(&self) -> &'static str;

    /// Produce the next record, `Ok(None)` on depletion. Operators poll
    /// `env.check_interrupt()` and propagate child errors untouched.
    fn next(&mut self, env: &mut ExecEnv<'_>) -> Result<Option<Record>>;

    /// Return to the pre-`next` state, keeping configuration. Used by
    /// Apply and Cartesian product to re-drive a subtree.
    fn reset(&mut self);
}

pub type BoxOp = Box<dyn Operator>;

// ============================================================================
// Execution
// ============================================================================

pub fn execute(plan: &PhysicalPlan, access: StoreAccess<'_>, ctx: &QueryCtx) -> Result<ResultSet> {
    run(plan, access, ctx, None)
}

/// Execute while recording per-operator row counts and timings; returns
/// the result set and the profile text.
pub fn execute_profiled(
    plan: &PhysicalPlan,
    access: StoreAccess<'_>,
    ctx: &QueryCtx,
) -> Result<(ResultSet, String)> {
    let sink = ops::ProfileSink::default();
    let result = run(plan, access, ctx, Some(&sink))?;
    Ok((result, sink.render()))
}

fn run(
    plan: &PhysicalPlan,
    mut access: StoreAccess<'_>,
    ctx: &QueryCtx,
    profile: Option<&ops::ProfileSink>,
) -> Result<ResultSet> {
    let started = Instant::now();
    let mut result = ResultSet::empty(plan.columns.clone());
    let mut stats = QueryStats::default();

    for segment in &plan.segments {
        // reborrow the access for this segment; exclusivity spans them all
        let seg_access = match &mut access {
            StoreAccess::Read(g) => StoreAccess::Read(*g),
            StoreAccess::Write(g) => StoreAccess::Write(&mut **g),
        };
        let mut env = ExecEnv::new(seg_access, ctx);
        let mut root = ops::build_segment(segment, profile);

        while let Some(record) = root.next(&mut env)? {
            // update-only queries surface statistics, not rows
            if segment.columns.is_empty() {
                continue;
            }
            let row: Vec<_> = segment
                .columns
                .iter()
                .map(|(_, slot)| record.get(*slot).clone())
                .collect();
            result.rows.push(row);
            if ctx.max_records > 0 && result.rows.len() as u64 > ctx.max_records {
                return Err(Error::OutOfMemory(format!(
                    "result set exceeded the configured cap of {} records",
                    ctx.max_records
                )));
            }
        }
        stats.merge(&env.stats);
    }

    // UNION without ALL de-duplicates the combined result
    if plan.segments.len() > 1 && plan.union_all.iter().any(|all| !all) {
        let rows = std::mem::take(&mut result.rows);
        let mut deduped: Vec<Vec<crate::model::Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            if !deduped.contains(&row) {
                deduped.push(row);
            }
        }
        result.rows = deduped;
    }

    stats.execution_time_ms = started.elapsed().as_millis() as u64;
    result.stats = stats;
    debug!(
        rows = result.rows.len(),
        ms = result.stats.execution_time_ms,
        "query executed"
    );
    Ok(result)
}
