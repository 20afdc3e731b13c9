//! Index DDL and index-accelerated planning, end to end.

use deltagraph::{GraphContext, PropertyMap, Value};

fn query(graph: &GraphContext, q: &str) -> deltagraph::ResultSet {
    graph.query(q, PropertyMap::new()).unwrap()
}

fn populated(n: usize) -> GraphContext {
    let graph = GraphContext::new("people");
    query(
        &graph,
        &format!("UNWIND range(0, {}) AS i CREATE (:Person {{name: 'p' + toString(i), rank: i}})", n - 1),
    );
    graph
}

#[test]
fn test_index_scan_selected_and_correct() {
    let graph = populated(500);
    let created = query(&graph, "CREATE INDEX ON :Person(name)");
    assert_eq!(created.stats.indices_created, 1);

    // the plan must go through the index...
    let plan = graph.explain("MATCH (p:Person {name: 'p42'}) RETURN p.rank").unwrap();
    assert!(plan.contains("Index Scan"), "plan does not use the index:\n{plan}");
    assert!(!plan.contains("Node By Label Scan"), "{plan}");

    // ...and return exactly the matching node
    let result = query(&graph, "MATCH (p:Person {name: 'p42'}) RETURN p.rank");
    assert_eq!(result.column("p.rank"), vec![Value::Int(42)]);
}

#[test]
fn test_plan_without_index_uses_label_scan() {
    let graph = populated(10);
    let plan = graph.explain("MATCH (p:Person {name: 'p3'}) RETURN p").unwrap();
    assert!(plan.contains("Node By Label Scan"), "{plan}");
    assert!(plan.contains("Filter"), "{plan}");
}

#[test]
fn test_range_predicate_through_index() {
    let graph = populated(100);
    query(&graph, "CREATE INDEX ON :Person(rank)");

    let plan = graph
        .explain("MATCH (p:Person) WHERE p.rank >= 95 RETURN p.rank")
        .unwrap();
    assert!(plan.contains("Index Scan"), "{plan}");

    let result = query(
        &graph,
        "MATCH (p:Person) WHERE p.rank >= 95 RETURN p.rank ORDER BY p.rank",
    );
    assert_eq!(
        result.column("p.rank"),
        (95..100).map(Value::Int).collect::<Vec<_>>()
    );
}

#[test]
fn test_index_stays_coherent_under_updates() {
    let graph = populated(50);
    query(&graph, "CREATE INDEX ON :Person(name)");

    query(&graph, "MATCH (p:Person {name: 'p7'}) SET p.name = 'renamed'");

    let stale = query(&graph, "MATCH (p:Person {name: 'p7'}) RETURN p");
    assert!(stale.is_empty());
    let fresh = query(&graph, "MATCH (p:Person {name: 'renamed'}) RETURN p.rank");
    assert_eq!(fresh.column("p.rank"), vec![Value::Int(7)]);

    // deletion unindexes
    query(&graph, "MATCH (p:Person {name: 'renamed'}) DELETE p");
    let gone = query(&graph, "MATCH (p:Person {name: 'renamed'}) RETURN p");
    assert!(gone.is_empty());
}

#[test]
fn test_drop_index_falls_back_to_scan() {
    let graph = populated(10);
    query(&graph, "CREATE INDEX ON :Person(name)");
    query(&graph, "DROP INDEX ON :Person(name)");

    let plan = graph.explain("MATCH (p:Person {name: 'p3'}) RETURN p").unwrap();
    assert!(!plan.contains("Index Scan"), "{plan}");
    // results are unaffected
    let result = query(&graph, "MATCH (p:Person {name: 'p3'}) RETURN p.rank");
    assert_eq!(result.column("p.rank"), vec![Value::Int(3)]);
}

#[test]
fn test_duplicate_index_rejected() {
    let graph = populated(5);
    query(&graph, "CREATE INDEX ON :Person(name)");
    let err = graph
        .query("CREATE INDEX ON :Person(name)", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "INDEX_ERROR");
}

#[test]
fn test_drop_missing_index_errors() {
    let graph = populated(5);
    let err = graph
        .query("DROP INDEX ON :Person(name)", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "INDEX_ERROR");
}

#[test]
fn test_fulltext_index_ddl() {
    let graph = GraphContext::new("movies");
    query(
        &graph,
        "CREATE (:Movie {title: 'The Matrix Reloaded'}), (:Movie {title: 'Inception'})",
    );
    let created = query(&graph, "CREATE FULLTEXT INDEX ON :Movie(title)");
    assert_eq!(created.stats.indices_created, 1);

    // query the engine directly through the store handle
    let hits = graph.with_store(|store| {
        let movie = store.label_id("Movie").unwrap();
        let schema = store.node_schema(movie);
        let deltagraph::index::Index::FullText(idx) = &schema.indexes[0] else {
            panic!("expected a full-text index");
        };
        idx.query("matrix")
    });
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_plan_cache_invalidated_by_ddl() {
    let graph = populated(20);
    let q = "MATCH (p:Person {name: 'p4'}) RETURN p.rank";

    // warm the cache with the scan-based plan
    assert_eq!(query(&graph, q).column("p.rank"), vec![Value::Int(4)]);

    query(&graph, "CREATE INDEX ON :Person(name)");
    let plan = graph.explain(q).unwrap();
    assert!(plan.contains("Index Scan"), "{plan}");
    // the cached plan was invalidated; results still correct
    assert_eq!(query(&graph, q).column("p.rank"), vec![Value::Int(4)]);
}

#[test]
fn test_profile_reports_operator_rows() {
    let graph = populated(10);
    let (result, profile) = graph
        .profile("MATCH (p:Person) RETURN p.rank", PropertyMap::new())
        .unwrap();
    assert_eq!(result.len(), 10);
    assert!(profile.contains("Node By Label Scan"), "{profile}");
    assert!(profile.contains("Records produced: 10"), "{profile}");
}
