//! Per-graph command surface and the graph registry.
//!
//! `GraphContext` is the embedding host's handle to one graph: query,
//! read-only query, explain, profile, bulk load, snapshot, config. The
//! reader/writer discipline lives here — many concurrent readers or one
//! exclusive writer, the lock acquired before dispatch and held for the
//! whole query. Readers execute in direct-read mode when matrices carry
//! pending deltas; only writers flush.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::bulk::{self, BulkStats};
use crate::config::GraphConfig;
use crate::constraint::{ConstraintKind, ConstraintStatus};
use crate::cypher::{
    self,
    ast::{Ast, SchemaCommand},
    enrich::{enrich, Enriched},
};
use crate::exec::{self, StoreAccess};
use crate::index::FtField;
use crate::model::{PropertyMap, Value};
use crate::plan::{self, PhysicalPlan};
use crate::query::{PlanCache, QueryCtx};
use crate::result::{QueryStats, ResultSet};
use crate::store::{AttrId, GraphStore};
use crate::{Error, Result};

pub struct GraphContext {
    name: String,
    store: RwLock<GraphStore>,
    config: RwLock<GraphConfig>,
    cache: Mutex<PlanCache>,
}

impl GraphContext {
    pub fn new(name: impl Into<String>) -> Self {
        let config = GraphConfig::default();
        let cache = PlanCache::new(config.cache_size);
        Self {
            name: name.into(),
            store: RwLock::new(GraphStore::new()),
            config: RwLock::new(config),
            cache: Mutex::new(cache),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Execute a query (read or write) with the default timeout.
    pub fn query(&self, text: &str, params: PropertyMap) -> Result<ResultSet> {
        self.query_with_timeout(text, params, None)
    }

    /// Execute with an explicit timeout in milliseconds; clamped by
    /// `timeout_max_ms` when configured.
    pub fn query_with_timeout(
        &self,
        text: &str,
        params: PropertyMap,
        timeout_ms: Option<u64>,
    ) -> Result<ResultSet> {
        match cypher::parse(text)? {
            Ast::Schema(command) => self.run_schema_command(&command),
            Ast::Query(stmt) => {
                let enriched = enrich(stmt)?;
                let ctx = self.make_ctx(params, timeout_ms);
                Ok(self.dispatch(text, &enriched, &ctx, false)?.0)
            }
        }
    }

    /// Read-only entry point: write clauses and schema commands are
    /// rejected before any work happens.
    pub fn ro_query(&self, text: &str, params: PropertyMap) -> Result<ResultSet> {
        match cypher::parse(text)? {
            Ast::Schema(_) => Err(Error::ReadonlyViolation),
            Ast::Query(stmt) => {
                let enriched = enrich(stmt)?;
                if enriched.write {
                    return Err(Error::ReadonlyViolation);
                }
                let ctx = self.make_ctx(params, None);
                Ok(self.dispatch(text, &enriched, &ctx, false)?.0)
            }
        }
    }

    /// Plan text without executing.
    pub fn explain(&self, text: &str) -> Result<String> {
        match cypher::parse(text)? {
            Ast::Schema(command) => Ok(format!("{command:?}\n")),
            Ast::Query(stmt) => {
                let enriched = enrich(stmt)?;
                let store = self.store.read();
                let plan = plan::plan(&enriched, &store)?;
                Ok(plan.explain())
            }
        }
    }

    /// Execute and return the result together with per-operator rows and
    /// timings.
    pub fn profile(&self, text: &str, params: PropertyMap) -> Result<(ResultSet, String)> {
        match cypher::parse(text)? {
            Ast::Schema(_) => Err(Error::Semantic(
                "schema commands cannot be profiled".into(),
            )),
            Ast::Query(stmt) => {
                let enriched = enrich(stmt)?;
                let ctx = self.make_ctx(params, None);
                let (result, profile_text) = self.dispatch(text, &enriched, &ctx, true)?;
                profile_text
                    .map(|text| (result, text))
                    .ok_or_else(|| Error::InternalInvariant("profiled run produced no profile".into()))
            }
        }
    }

    fn make_ctx(&self, params: PropertyMap, timeout_ms: Option<u64>) -> QueryCtx {
        let config = self.config.read();
        let mut timeout = timeout_ms.unwrap_or(config.timeout_default_ms);
        if config.timeout_max_ms > 0 {
            // 0 means "no deadline", which the cap turns into the cap itself
            timeout = if timeout == 0 {
                config.timeout_max_ms
            } else {
                timeout.min(config.timeout_max_ms)
            };
        }
        let mut ctx = QueryCtx::new(params)
            .with_max_records(config.result_set_max_unstable_records);
        if timeout > 0 {
            ctx = ctx.with_timeout(Duration::from_millis(timeout));
        }
        ctx
    }

    fn dispatch(
        &self,
        text: &str,
        enriched: &Enriched,
        ctx: &QueryCtx,
        profiled: bool,
    ) -> Result<(ResultSet, Option<String>)> {
        if enriched.write {
            let mut store = self.store.write();
            let plan = self.plan_for(text, enriched, &store)?;
            let outcome = if profiled {
                let (result, profile_text) =
                    exec::execute_profiled(&plan, StoreAccess::Write(&mut store), ctx)?;
                (result, Some(profile_text))
            } else {
                (exec::execute(&plan, StoreAccess::Write(&mut store), ctx)?, None)
            };
            // fold this query's buffered deltas in before the lock drops
            store.flush();
            Ok(outcome)
        } else {
            let store = self.store.read();
            let plan = self.plan_for(text, enriched, &store)?;
            if profiled {
                let (result, profile_text) =
                    exec::execute_profiled(&plan, StoreAccess::Read(&store), ctx)?;
                Ok((result, Some(profile_text)))
            } else {
                Ok((exec::execute(&plan, StoreAccess::Read(&store), ctx)?, None))
            }
        }
    }

    /// Plan with the compiled-plan cache, keyed by query text and the
    /// store's schema version.
    fn plan_for(
        &self,
        text: &str,
        enriched: &Enriched,
        store: &GraphStore,
    ) -> Result<Arc<PhysicalPlan>> {
        let version = store.schema_version();
        if let Some(plan) = self.cache.lock().get(text, version) {
            return Ok(plan);
        }
        let plan = Arc::new(plan::plan(enriched, store)?);
        self.cache.lock().insert(text, version, plan.clone());
        Ok(plan)
    }

    // ========================================================================
    // Schema commands
    // ========================================================================

    fn run_schema_command(&self, command: &SchemaCommand) -> Result<ResultSet> {
        let mut store = self.store.write();
        let mut stats = QueryStats::default();

        match command {
            SchemaCommand::CreateExactIndex { label, properties } => {
                let label = store.intern_label(label);
                let fields = intern_fields(&mut store, properties);
                store.create_node_exact_index(label, fields)?;
                stats.indices_created += 1;
            }
            SchemaCommand::CreateFullTextIndex { label, properties } => {
                let label = store.intern_label(label);
                let fields = intern_fields(&mut store, properties)
                    .into_iter()
                    .map(FtField::plain)
                    .collect();
                store.create_node_fulltext_index(label, fields, "english", None)?;
                stats.indices_created += 1;
            }
            SchemaCommand::DropIndex { label, properties } => {
                let (label, fields) = resolve_fields(&store, label, properties)?;
                if !store.drop_node_index(label, &fields)? {
                    return Err(Error::Index("no such index".into()));
                }
            }
            SchemaCommand::CreateUniqueConstraint { label, properties } => {
                let label = store.intern_label(label);
                let fields = intern_fields(&mut store, properties);
                let status = store.create_node_constraint(label, ConstraintKind::Unique(fields.clone()))?;
                if status == ConstraintStatus::Failed {
                    store.drop_node_constraint(label, &ConstraintKind::Unique(fields));
                    return Err(Error::ConstraintViolation(
                        "existing data violates the constraint".into(),
                    ));
                }
                stats.constraints_created += 1;
            }
            SchemaCommand::CreateMandatoryConstraint { label, properties } => {
                let label = store.intern_label(label);
                let fields = intern_fields(&mut store, properties);
                let status =
                    store.create_node_constraint(label, ConstraintKind::Mandatory(fields.clone()))?;
                if status == ConstraintStatus::Failed {
                    store.drop_node_constraint(label, &ConstraintKind::Mandatory(fields));
                    return Err(Error::ConstraintViolation(
                        "existing data violates the constraint".into(),
                    ));
                }
                stats.constraints_created += 1;
            }
            SchemaCommand::DropConstraint { label, properties, unique } => {
                let (label, fields) = resolve_fields(&store, label, properties)?;
                let kind = if *unique {
                    ConstraintKind::Unique(fields)
                } else {
                    ConstraintKind::Mandatory(fields)
                };
                if !store.drop_node_constraint(label, &kind) {
                    return Err(Error::Semantic("no such constraint".into()));
                }
            }
        }

        let mut result = ResultSet::empty(Vec::new());
        result.stats = stats;
        Ok(result)
    }

    // ========================================================================
    // Bulk load, snapshot, config
    // ========================================================================

    pub fn bulk_load(&self, frame: &[u8]) -> Result<BulkStats> {
        let flush_every = self.config.read().node_creation_buffer;
        let mut store = self.store.write();
        bulk::load(&mut store, &mut &frame[..], flush_every)
    }

    pub fn snapshot_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let store = self.store.read();
        crate::serializer::encode(&store, &self.name, out)
    }

    pub fn restore_from<R: Read>(input: &mut R) -> Result<GraphContext> {
        let (name, store) = crate::serializer::decode(input)?;
        let ctx = GraphContext::new(name);
        *ctx.store.write() = store;
        Ok(ctx)
    }

    pub fn config_get(&self, name: &str) -> Result<Value> {
        self.config.read().get(name)
    }

    pub fn config_set(&self, name: &str, value: &Value) -> Result<()> {
        let mut config = self.config.write();
        config.set(name, value)?;
        if name == "cache_size" {
            self.cache.lock().set_capacity(config.cache_size);
        }
        Ok(())
    }

    /// Read access to the underlying store, for embedding code and tests.
    pub fn with_store<T>(&self, f: impl FnOnce(&GraphStore) -> T) -> T {
        f(&self.store.read())
    }
}

fn intern_fields(store: &mut GraphStore, properties: &[String]) -> Vec<AttrId> {
    properties.iter().map(|p| store.intern_attr(p)).collect()
}

fn resolve_fields(
    store: &GraphStore,
    label: &str,
    properties: &[String],
) -> Result<(crate::store::LabelId, Vec<AttrId>)> {
    let label = store
        .label_id(label)
        .ok_or_else(|| Error::Semantic(format!("unknown label :{label}")))?;
    let mut fields = Vec::with_capacity(properties.len());
    for property in properties {
        fields.push(
            store
                .attr_id(property)
                .ok_or_else(|| Error::Semantic(format!("unknown property '{property}'")))?,
        );
    }
    Ok((label, fields))
}

// ============================================================================
// Registry
// ============================================================================

/// Name → graph map mirroring the host's `GRAPH.*` dispatch.
#[derive(Default)]
pub struct GraphRegistry {
    graphs: RwLock<hashbrown::HashMap<String, Arc<GraphContext>>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<GraphContext> {
        if let Some(graph) = self.graphs.read().get(name) {
            return graph.clone();
        }
        let mut graphs = self.graphs.write();
        graphs
            .entry(name.to_owned())
            .or_insert_with(|| {
                info!(graph = name, "graph created");
                Arc::new(GraphContext::new(name))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<GraphContext>> {
        self.graphs.read().get(name).cloned()
    }

    /// Destroy a graph. Outstanding handles keep their data alive until
    /// dropped, but the name is gone immediately.
    pub fn delete(&self, name: &str) -> bool {
        let removed = self.graphs.write().remove(name).is_some();
        if removed {
            info!(graph = name, "graph deleted");
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registry_lifecycle() {
        let registry = GraphRegistry::new();
        let g1 = registry.get_or_create("social");
        let g2 = registry.get_or_create("social");
        assert!(Arc::ptr_eq(&g1, &g2));
        assert_eq!(registry.names(), vec!["social"]);
        assert!(registry.delete("social"));
        assert!(!registry.delete("social"));
        assert!(registry.get("social").is_none());
    }

    #[test]
    fn test_ro_query_rejects_writes() {
        let graph = GraphContext::new("g");
        let err = graph.ro_query("CREATE (:N)", PropertyMap::new()).unwrap_err();
        assert!(matches!(err, Error::ReadonlyViolation));
        let err = graph
            .ro_query("CREATE INDEX ON :N(p)", PropertyMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::ReadonlyViolation));
    }

    #[test]
    fn test_config_surface() {
        let graph = GraphContext::new("g");
        graph.config_set("cache_size", &Value::Int(4)).unwrap();
        assert_eq!(graph.config_get("cache_size").unwrap(), Value::Int(4));
        assert!(graph.config_get("bogus").is_err());
    }
}
