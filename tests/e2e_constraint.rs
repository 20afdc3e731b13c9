//! Constraint DDL and enforcement, end to end.

use deltagraph::{GraphContext, PropertyMap, Value};

fn query(graph: &GraphContext, q: &str) -> deltagraph::ResultSet {
    graph.query(q, PropertyMap::new()).unwrap()
}

#[test]
fn test_unique_constraint_blocks_duplicate_create() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE (:User {email: 'a@b'})");
    let created = query(&graph, "CREATE CONSTRAINT ON :User UNIQUE(email)");
    assert_eq!(created.stats.constraints_created, 1);

    let err = graph
        .query("CREATE (:User {email: 'a@b'})", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");

    // the graph still has exactly one user
    let count = query(&graph, "MATCH (u:User) RETURN count(u)");
    assert_eq!(count.row(0), &[Value::Int(1)]);

    // a different value is fine
    query(&graph, "CREATE (:User {email: 'c@d'})");
    let count = query(&graph, "MATCH (u:User) RETURN count(u)");
    assert_eq!(count.row(0), &[Value::Int(2)]);
}

#[test]
fn test_unique_constraint_blocks_duplicate_set() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE (:User {email: 'a@b'}), (:User {email: 'c@d'})");
    query(&graph, "CREATE CONSTRAINT ON :User UNIQUE(email)");

    let err = graph
        .query(
            "MATCH (u:User {email: 'c@d'}) SET u.email = 'a@b'",
            PropertyMap::new(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");

    // re-setting a value to itself is not a self-collision
    query(&graph, "MATCH (u:User {email: 'c@d'}) SET u.email = 'c@d'");
}

#[test]
fn test_constraint_creation_fails_on_existing_violation() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE (:User {email: 'dup'}), (:User {email: 'dup'})");

    let err = graph
        .query("CREATE CONSTRAINT ON :User UNIQUE(email)", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");

    // the failed constraint does not enforce afterwards
    query(&graph, "CREATE (:User {email: 'dup'})");
    let count = query(&graph, "MATCH (u:User) RETURN count(u)");
    assert_eq!(count.row(0), &[Value::Int(3)]);
}

#[test]
fn test_mandatory_constraint() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE CONSTRAINT ON :User MANDATORY(email)");

    let err = graph
        .query("CREATE (:User {name: 'nobody'})", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");

    query(&graph, "CREATE (:User {email: 'a@b'})");

    // removing the mandatory property is also a violation
    let err = graph
        .query("MATCH (u:User) REMOVE u.email", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
}

#[test]
fn test_drop_constraint_lifts_enforcement() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE (:User {email: 'a@b'})");
    query(&graph, "CREATE CONSTRAINT ON :User UNIQUE(email)");
    query(&graph, "DROP CONSTRAINT ON :User UNIQUE(email)");

    query(&graph, "CREATE (:User {email: 'a@b'})");
    let count = query(&graph, "MATCH (u:User) RETURN count(u)");
    assert_eq!(count.row(0), &[Value::Int(2)]);
}

#[test]
fn test_unique_constraint_exempts_partial_tuples() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE CONSTRAINT ON :User UNIQUE(email)");
    // nodes without the attribute never collide
    query(&graph, "CREATE (:User {name: 'x'}), (:User {name: 'y'})");
    let count = query(&graph, "MATCH (u:User) RETURN count(u)");
    assert_eq!(count.row(0), &[Value::Int(2)]);
}

#[test]
fn test_label_add_checks_constraints() {
    let graph = GraphContext::new("users");
    query(&graph, "CREATE (:User {email: 'a@b'})");
    query(&graph, "CREATE CONSTRAINT ON :User UNIQUE(email)");
    query(&graph, "CREATE (:Visitor {email: 'a@b'})");

    // promoting the visitor to :User would violate uniqueness
    let err = graph
        .query("MATCH (v:Visitor) SET v:User", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
}
