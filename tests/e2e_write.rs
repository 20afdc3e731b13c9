//! End-to-end tests for the write pipeline: CREATE, SET, REMOVE, DELETE,
//! MERGE, FOREACH, and the statistics they report.

use deltagraph::{GraphContext, PropertyMap, Value};

fn query(graph: &GraphContext, q: &str) -> deltagraph::ResultSet {
    graph.query(q, PropertyMap::new()).unwrap()
}

// ============================================================================
// Delete and re-match
// ============================================================================

#[test]
fn test_delete_edge_then_rematch() {
    let graph = GraphContext::new("g");
    query(
        &graph,
        "CREATE (:Person {name: 'Roi', age: 30})-[:KNOWS]->(:Person {name: 'Ailon'})",
    );

    let deleted = query(&graph, "MATCH (a {name: 'Roi'})-[r]->(b) DELETE r");
    assert_eq!(deleted.stats.relationships_deleted, 1);

    let rematch = query(
        &graph,
        "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name, b.name",
    );
    assert!(rematch.is_empty());

    let count = query(&graph, "MATCH (n:Person) RETURN count(n)");
    assert_eq!(count.row(0), &[Value::Int(2)]);
}

#[test]
fn test_delete_node_detaches_edges() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:A {name: 'hub'})-[:R]->(:B), (:C)");
    let result = query(&graph, "MATCH (n:A) DELETE n");
    assert_eq!(result.stats.nodes_deleted, 1);
    assert_eq!(result.stats.relationships_deleted, 1);

    let remaining = query(&graph, "MATCH (n) RETURN count(n)");
    assert_eq!(remaining.row(0), &[Value::Int(2)]);
}

// ============================================================================
// SET / REMOVE
// ============================================================================

#[test]
fn test_set_property_visible_in_same_query_return() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:Person {name: 'Roi'})");
    let result = query(
        &graph,
        "MATCH (n:Person) SET n.age = 30 RETURN n.age",
    );
    assert_eq!(result.stats.properties_set, 1);
    assert_eq!(result.column("n.age"), vec![Value::Int(30)]);
}

#[test]
fn test_set_merge_properties_and_label() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:Person {name: 'Roi'})");
    let result = query(
        &graph,
        "MATCH (n:Person) SET n += {age: 30, city: 'Haifa'}, n:Admin RETURN n",
    );
    assert_eq!(result.stats.properties_set, 2);
    assert_eq!(result.stats.labels_added, 1);

    let Value::Node(node) = &result.row(0)[0] else { panic!() };
    assert!(node.has_label("Admin"));
    assert_eq!(node.get("city"), Some(&Value::from("Haifa")));
}

#[test]
fn test_remove_property_and_label() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:Person:Admin {name: 'Roi', age: 30})");
    let result = query(&graph, "MATCH (n:Person) REMOVE n.age, n:Admin RETURN n");
    assert_eq!(result.stats.properties_set, 1);
    assert_eq!(result.stats.labels_removed, 1);

    let Value::Node(node) = &result.row(0)[0] else { panic!() };
    assert!(!node.has_label("Admin"));
    assert!(node.get("age").is_none());
}

#[test]
fn test_setting_null_removes_property() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:N {v: 1})");
    query(&graph, "MATCH (n:N) SET n.v = null");
    let result = query(&graph, "MATCH (n:N) RETURN n.v");
    assert_eq!(result.row(0), &[Value::Null]);
}

#[test]
fn test_duplicate_attribute_last_write_wins() {
    // the same attribute twice in one CREATE map: the later value lands
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:N {v: 1, v: 2})");
    let result = query(&graph, "MATCH (n:N) RETURN n.v");
    assert_eq!(result.row(0), &[Value::Int(2)]);
}

// ============================================================================
// CREATE with bound endpoints, multi-edge
// ============================================================================

#[test]
fn test_create_edge_between_matched_nodes() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:Person {name: 'Roi'}), (:Person {name: 'Ailon'})");
    let result = query(
        &graph,
        "MATCH (a:Person {name: 'Roi'}), (b:Person {name: 'Ailon'}) CREATE (a)-[:KNOWS {since: 2020}]->(b)",
    );
    assert_eq!(result.stats.relationships_created, 1);

    let check = query(&graph, "MATCH (:Person)-[r:KNOWS]->(:Person) RETURN r.since");
    assert_eq!(check.column("r.since"), vec![Value::Int(2020)]);
}

#[test]
fn test_parallel_edges_both_returned() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:P {name: 'a'})-[:KNOWS]->(:P {name: 'b'})");
    query(
        &graph,
        "MATCH (a:P {name: 'a'}), (b:P {name: 'b'}) CREATE (a)-[:KNOWS]->(b)",
    );

    let result = query(&graph, "MATCH (:P)-[r:KNOWS]->(:P) RETURN count(r)");
    assert_eq!(result.row(0), &[Value::Int(2)]);

    // deleting one parallel edge keeps the other reachable
    query(&graph, "MATCH (a:P {name: 'a'})-[r:KNOWS]->(b) WITH r LIMIT 1 DELETE r");
    let result = query(&graph, "MATCH (:P)-[r:KNOWS]->(:P) RETURN count(r)");
    assert_eq!(result.row(0), &[Value::Int(1)]);
}

#[test]
fn test_unwind_create() {
    let graph = GraphContext::new("g");
    let result = query(
        &graph,
        "UNWIND range(1, 5) AS i CREATE (:Item {rank: i})",
    );
    assert_eq!(result.stats.nodes_created, 5);

    let check = query(&graph, "MATCH (n:Item) WHERE n.rank % 2 = 0 RETURN n.rank ORDER BY n.rank");
    assert_eq!(check.column("n.rank"), vec![Value::Int(2), Value::Int(4)]);
}

// ============================================================================
// MERGE
// ============================================================================

#[test]
fn test_merge_creates_then_matches() {
    let graph = GraphContext::new("g");
    let first = query(
        &graph,
        "MERGE (u:User {id: 1}) ON CREATE SET u.created = true ON MATCH SET u.seen = true",
    );
    assert_eq!(first.stats.nodes_created, 1);

    let second = query(
        &graph,
        "MERGE (u:User {id: 1}) ON CREATE SET u.created = true ON MATCH SET u.seen = true",
    );
    assert_eq!(second.stats.nodes_created, 0);

    let check = query(&graph, "MATCH (u:User) RETURN count(u), u.created, u.seen");
    assert_eq!(
        check.row(0),
        &[Value::Int(1), Value::Bool(true), Value::Bool(true)]
    );
}

#[test]
fn test_merge_edge_from_bound_nodes() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:U {id: 1}), (:U {id: 2})");
    for _ in 0..2 {
        query(
            &graph,
            "MATCH (a:U {id: 1}), (b:U {id: 2}) MERGE (a)-[:LINKED]->(b)",
        );
    }
    let check = query(&graph, "MATCH (:U)-[r:LINKED]->(:U) RETURN count(r)");
    assert_eq!(check.row(0), &[Value::Int(1)]);
}

// ============================================================================
// FOREACH
// ============================================================================

#[test]
fn test_foreach_creates_per_element() {
    let graph = GraphContext::new("g");
    let result = query(
        &graph,
        "FOREACH (x IN [1, 2, 3] | CREATE (:Batch {v: x}))",
    );
    assert_eq!(result.stats.nodes_created, 3);

    let check = query(&graph, "MATCH (n:Batch) RETURN n.v ORDER BY n.v");
    assert_eq!(
        check.column("n.v"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
}

#[test]
fn test_foreach_set_over_matched_rows() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:N {v: 1}), (:N {v: 2})");
    query(&graph, "MATCH (n:N) FOREACH (ignored IN [1] | SET n.touched = true)");
    let check = query(&graph, "MATCH (n:N) WHERE n.touched RETURN count(n)");
    assert_eq!(check.row(0), &[Value::Int(2)]);
}

// ============================================================================
// ID reuse
// ============================================================================

#[test]
fn test_deleted_node_id_reused_after_flush() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:T {gen: 1})");
    let first = query(&graph, "MATCH (n:T) RETURN id(n)");
    let Value::Int(old_id) = first.row(0)[0] else { panic!() };

    // the write query flushes on commit, releasing the id
    query(&graph, "MATCH (n:T) DELETE n");
    query(&graph, "CREATE (:T {gen: 2})");

    let second = query(&graph, "MATCH (n:T) RETURN id(n), n.gen");
    assert_eq!(second.row(0), &[Value::Int(old_id), Value::Int(2)]);
}

#[test]
fn test_readonly_entry_point_rejects_writes() {
    let graph = GraphContext::new("g");
    let err = graph
        .ro_query("CREATE (:N)", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "READONLY_VIOLATION");

    // reads still work
    query(&graph, "CREATE (:N {v: 7})");
    let result = graph
        .ro_query("MATCH (n:N) RETURN n.v", PropertyMap::new())
        .unwrap();
    assert_eq!(result.column("n.v"), vec![Value::Int(7)]);
}
