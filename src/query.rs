//! Query context and the compiled-plan cache.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::model::PropertyMap;
use crate::plan::PhysicalPlan;

/// Per-query execution context: parameters, deadline, cancellation.
///
/// Operators poll [`QueryCtx::interrupted`] at every `next()`; a watchdog
/// (or any other thread holding the cancel handle) can flip the flag at
/// any time.
#[derive(Debug, Default)]
pub struct QueryCtx {
    pub params: PropertyMap,
    pub deadline: Option<Instant>,
    pub cancelled: Arc<AtomicBool>,
    /// Result-set record cap; 0 means unlimited.
    pub max_records: u64,
}

impl QueryCtx {
    pub fn new(params: PropertyMap) -> Self {
        Self { params, ..Default::default() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records = max;
        self
    }

    /// Shareable cancel flag for a watchdog thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn interrupted(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }
}

/// LRU cache of compiled plans keyed by query text.
///
/// Entries are tagged with the store's schema version; any DDL bump
/// empties the cache, since index selection baked into a plan may no
/// longer be valid.
#[derive(Debug)]
pub struct PlanCache {
    capacity: usize,
    version: u64,
    entries: HashMap<String, Arc<PhysicalPlan>>,
    order: VecDeque<String>,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            version: 0,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    pub fn get(&mut self, query: &str, schema_version: u64) -> Option<Arc<PhysicalPlan>> {
        if schema_version != self.version {
            self.entries.clear();
            self.order.clear();
            self.version = schema_version;
            return None;
        }
        let plan = self.entries.get(query).cloned()?;
        // move to the back of the recency order
        if let Some(pos) = self.order.iter().position(|q| q == query) {
            let key = self.order.remove(pos).expect("position just found");
            self.order.push_back(key);
        }
        Some(plan)
    }

    pub fn insert(&mut self, query: &str, schema_version: u64, plan: Arc<PhysicalPlan>) {
        if self.capacity == 0 {
            return;
        }
        if schema_version != self.version {
            self.entries.clear();
            self.order.clear();
            self.version = schema_version;
        }
        if self.entries.insert(query.to_owned(), plan).is_none() {
            self.order.push_back(query.to_owned());
        }
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            self.entries.remove(&oldest);
        }
    }
}
