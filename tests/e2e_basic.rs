//! End-to-end tests for the read pipeline: parse → enrich → plan →
//! execute against a live store.

use deltagraph::{GraphContext, PropertyMap, Value};

fn query(graph: &GraphContext, q: &str) -> deltagraph::ResultSet {
    graph.query(q, PropertyMap::new()).unwrap()
}

fn seeded() -> GraphContext {
    let graph = GraphContext::new("social");
    query(
        &graph,
        "CREATE (:Person {name: 'Roi', age: 30})-[:KNOWS]->(:Person {name: 'Ailon', age: 32})",
    );
    query(&graph, "CREATE (:Person {name: 'Hila', age: 28})");
    graph
}

// ============================================================================
// 1. Create and match
// ============================================================================

#[test]
fn test_create_and_match() {
    let graph = GraphContext::new("g");
    let created = query(
        &graph,
        "CREATE (:Person {name: 'Roi', age: 30})-[:KNOWS]->(:Person {name: 'Ailon'})",
    );
    assert_eq!(created.stats.nodes_created, 2);
    assert_eq!(created.stats.relationships_created, 1);

    let result = query(
        &graph,
        "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name, b.name",
    );
    assert_eq!(result.columns, vec!["a.name", "b.name"]);
    assert_eq!(result.len(), 1);
    assert_eq!(result.row(0), &[Value::from("Roi"), Value::from("Ailon")]);
}

#[test]
fn test_match_returns_whole_node() {
    let graph = seeded();
    let result = query(&graph, "MATCH (n:Person {name: 'Roi'}) RETURN n");
    assert_eq!(result.len(), 1);
    let Value::Node(node) = &result.row(0)[0] else {
        panic!("expected a node, got {:?}", result.row(0));
    };
    assert!(node.has_label("Person"));
    assert_eq!(node.get("age"), Some(&Value::Int(30)));
}

#[test]
fn test_where_filter() {
    let graph = seeded();
    let result = query(
        &graph,
        "MATCH (n:Person) WHERE n.age > 28 RETURN n.name ORDER BY n.name",
    );
    assert_eq!(
        result.column("n.name"),
        vec![Value::from("Ailon"), Value::from("Roi")]
    );
}

#[test]
fn test_order_skip_limit() {
    let graph = seeded();
    let result = query(
        &graph,
        "MATCH (n:Person) RETURN n.name ORDER BY n.age DESC SKIP 1 LIMIT 1",
    );
    assert_eq!(result.column("n.name"), vec![Value::from("Roi")]);
}

#[test]
fn test_return_expression_and_alias() {
    let graph = seeded();
    let result = query(
        &graph,
        "MATCH (n:Person {name: 'Roi'}) RETURN n.age + 1 AS next, toUpper(n.name) AS shout",
    );
    assert_eq!(result.get(0, "next"), Some(&Value::Int(31)));
    assert_eq!(result.get(0, "shout"), Some(&Value::from("ROI")));
}

#[test]
fn test_parameters() {
    let graph = seeded();
    let mut params = PropertyMap::new();
    params.insert("who".into(), Value::from("Hila"));
    let result = graph
        .query("MATCH (n:Person) WHERE n.name = $who RETURN n.age", params)
        .unwrap();
    assert_eq!(result.column("n.age"), vec![Value::Int(28)]);
}

#[test]
fn test_missing_property_is_null() {
    let graph = seeded();
    let result = query(&graph, "MATCH (n:Person {name: 'Roi'}) RETURN n.nickname");
    assert_eq!(result.row(0), &[Value::Null]);
}

// ============================================================================
// Aggregation
// ============================================================================

#[test]
fn test_count_and_group_by() {
    let graph = seeded();
    let result = query(&graph, "MATCH (n:Person) RETURN count(n)");
    assert_eq!(result.row(0), &[Value::Int(3)]);

    query(&graph, "CREATE (:Person {name: 'Omer', age: 28})");
    let result = query(
        &graph,
        "MATCH (n:Person) RETURN n.age AS age, count(n) AS c ORDER BY age",
    );
    assert_eq!(result.len(), 3);
    assert_eq!(result.row(0), &[Value::Int(28), Value::Int(2)]);
}

#[test]
fn test_aggregates_over_values() {
    let graph = seeded();
    let result = query(
        &graph,
        "MATCH (n:Person) RETURN sum(n.age) AS s, avg(n.age) AS a, min(n.age) AS lo, max(n.age) AS hi",
    );
    assert_eq!(result.get(0, "s"), Some(&Value::Int(90)));
    assert_eq!(result.get(0, "a"), Some(&Value::Double(30.0)));
    assert_eq!(result.get(0, "lo"), Some(&Value::Int(28)));
    assert_eq!(result.get(0, "hi"), Some(&Value::Int(32)));
}

#[test]
fn test_aggregation_over_empty_input() {
    let graph = GraphContext::new("empty");
    query(&graph, "CREATE (:Marker)"); // so the label exists but not the match
    let result = query(&graph, "MATCH (n:Marker) WHERE n.missing = 1 RETURN count(n), sum(n.x), collect(n.x), min(n.x)");
    assert_eq!(result.len(), 1);
    assert_eq!(
        result.row(0),
        &[
            Value::Int(0),
            Value::Int(0),
            Value::Array(vec![]),
            Value::Null
        ]
    );
}

#[test]
fn test_collect_and_distinct() {
    let graph = seeded();
    query(&graph, "CREATE (:Person {name: 'Dup', age: 30})");
    let result = query(&graph, "MATCH (n:Person) RETURN count(DISTINCT n.age) AS ages");
    assert_eq!(result.get(0, "ages"), Some(&Value::Int(3)));

    let result = query(&graph, "MATCH (n:Person) RETURN DISTINCT n.age ORDER BY n.age");
    assert_eq!(result.len(), 3);
}

// ============================================================================
// WITH pipelines, UNWIND, UNION
// ============================================================================

#[test]
fn test_with_pipeline() {
    let graph = seeded();
    let result = query(
        &graph,
        "MATCH (n:Person) WITH n.age AS age WHERE age < 31 RETURN age ORDER BY age",
    );
    assert_eq!(result.column("age"), vec![Value::Int(28), Value::Int(30)]);
}

#[test]
fn test_unwind() {
    let graph = GraphContext::new("g");
    let result = query(&graph, "UNWIND [3, 1, 2] AS x RETURN x ORDER BY x");
    assert_eq!(
        result.column("x"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
}

#[test]
fn test_union_and_union_all() {
    let graph = GraphContext::new("g");
    query(&graph, "CREATE (:A {v: 1}), (:B {v: 1}), (:B {v: 2})");

    let result = query(
        &graph,
        "MATCH (a:A) RETURN a.v AS v UNION MATCH (b:B) RETURN b.v AS v",
    );
    assert_eq!(result.len(), 2); // deduplicated

    let result = query(
        &graph,
        "MATCH (a:A) RETURN a.v AS v UNION ALL MATCH (b:B) RETURN b.v AS v",
    );
    assert_eq!(result.len(), 3);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_syntax_error() {
    let graph = GraphContext::new("g");
    let err = graph.query("MATCH (n RETURN n", PropertyMap::new()).unwrap_err();
    assert_eq!(err.code(), "SYNTAX_ERROR");
}

#[test]
fn test_semantic_error_undefined_variable() {
    let graph = GraphContext::new("g");
    let err = graph.query("MATCH (n) RETURN m", PropertyMap::new()).unwrap_err();
    assert_eq!(err.code(), "SEMANTIC_ERROR");
}

#[test]
fn test_runtime_type_error() {
    let graph = seeded();
    let err = graph
        .query(
            "MATCH (n:Person {name: 'Roi'}) RETURN n.name / 2",
            PropertyMap::new(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "TYPE_ERROR");
}

#[test]
fn test_list_index_out_of_bounds() {
    let graph = GraphContext::new("g");
    let err = graph.query("RETURN [1, 2][9]", PropertyMap::new()).unwrap_err();
    assert_eq!(err.code(), "INDEX_OUT_OF_BOUNDS");
}
