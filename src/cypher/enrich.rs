//! AST enrichment — the pass between parsing and planning.
//!
//! Three jobs:
//! 1. Assign synthetic names to anonymous pattern entities so every
//!    element has a stable identifier (`@anon_N`; the `@` prefix cannot
//!    collide with user identifiers).
//! 2. Annotate projected named paths with the pattern elements they refer
//!    to, so the planner can emit a path-assembly step.
//! 3. Resolve every identifier to a slot in the segment's [`RecordLayout`]
//!    and reject references to undefined variables.
//!
//! Enrichment also decides whether the statement writes, and checks UNION
//! column agreement.

use std::sync::Arc;

use crate::exec::record::RecordLayout;
use crate::{Error, Result};
use super::ast::*;

/// An enriched statement, ready for planning.
#[derive(Debug)]
pub struct Enriched {
    pub statement: Statement,
    pub segments: Vec<SegmentMeta>,
    pub write: bool,
}

/// Per-segment planning metadata.
#[derive(Debug)]
pub struct SegmentMeta {
    pub layout: Arc<RecordLayout>,
    /// Output columns: (name, slot). Empty for update-only queries.
    pub columns: Vec<(String, usize)>,
    /// Projected named paths: path alias → element aliases in pattern
    /// order (node, rel, node, …).
    pub paths: Vec<(String, Vec<String>)>,
}

pub fn enrich(mut statement: Statement) -> Result<Enriched> {
    let mut anon = AnonNamer::default();
    let mut segments = Vec::with_capacity(statement.segments.len());
    let mut write = false;

    for segment in &mut statement.segments {
        let meta = enrich_segment(segment, &mut anon)?;
        write |= segment.clauses.iter().any(Clause::is_update);
        segments.push(meta);
    }

    // UNION branches must agree on column names
    if segments.len() > 1 {
        let first: Vec<&str> = segments[0].columns.iter().map(|(n, _)| n.as_str()).collect();
        for meta in &segments[1..] {
            let cols: Vec<&str> = meta.columns.iter().map(|(n, _)| n.as_str()).collect();
            if cols != first {
                return Err(Error::Semantic(
                    "UNION branches must return the same column names".into(),
                ));
            }
        }
    }

    Ok(Enriched { statement, segments, write })
}

#[derive(Default)]
struct AnonNamer {
    next: usize,
}

impl AnonNamer {
    fn name(&mut self) -> String {
        let name = format!("@anon_{}", self.next);
        self.next += 1;
        name
    }
}

/// Variable scope: insertion-ordered so `RETURN *` is deterministic.
#[derive(Debug, Clone, Default)]
struct Scope {
    names: Vec<String>,
}

impl Scope {
    fn bind(&mut self, name: &str) {
        if !self.contains(name) {
            self.names.push(name.to_owned());
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn visible_user_names(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !n.starts_with('@'))
            .cloned()
            .collect()
    }
}

fn enrich_segment(segment: &mut SingleQuery, anon: &mut AnonNamer) -> Result<SegmentMeta> {
    let mut layout = RecordLayout::new();
    let mut scope = Scope::default();
    let mut columns: Vec<(String, usize)> = Vec::new();
    let mut paths: Vec<(String, Vec<String>)> = Vec::new();

    for clause in &mut segment.clauses {
        match clause {
            Clause::Match { patterns, where_clause, .. } => {
                for pattern in patterns.iter_mut() {
                    name_pattern(pattern, anon)?;
                    bind_pattern(pattern, &mut scope, &mut layout, &mut paths)?;
                    validate_pattern_props(pattern, &scope)?;
                }
                if let Some(pred) = where_clause {
                    validate_expr(pred, &scope)?;
                }
            }
            Clause::Unwind { expr, alias } => {
                validate_expr(expr, &scope)?;
                scope.bind(alias);
                layout.add(alias);
            }
            Clause::Create { patterns } => {
                for pattern in patterns.iter_mut() {
                    name_pattern(pattern, anon)?;
                    validate_pattern_props(pattern, &scope)?;
                    bind_pattern(pattern, &mut scope, &mut layout, &mut paths)?;
                }
            }
            Clause::Merge { pattern, on_create, on_match } => {
                name_pattern(pattern, anon)?;
                validate_pattern_props(pattern, &scope)?;
                bind_pattern(pattern, &mut scope, &mut layout, &mut paths)?;
                for item in on_create.iter().chain(on_match.iter()) {
                    validate_set_item(item, &scope)?;
                }
            }
            Clause::Set(items) => {
                for item in items {
                    validate_set_item(item, &scope)?;
                }
            }
            Clause::Remove(items) => {
                for item in items {
                    let variable = match item {
                        RemoveItem::Property { variable, .. } => variable,
                        RemoveItem::Label { variable, .. } => variable,
                    };
                    require_bound(variable, &scope)?;
                }
            }
            Clause::Delete { exprs, .. } => {
                for expr in exprs {
                    validate_expr(expr, &scope)?;
                }
            }
            Clause::Foreach { variable, list, body } => {
                validate_expr(list, &scope)?;
                // the loop variable and any body binds are local
                let mut body_scope = scope.clone();
                body_scope.bind(variable);
                layout.add(variable);
                enrich_foreach_body(body, &mut body_scope, &mut layout, anon)?;
            }
            Clause::With(projection) => {
                let items = resolve_projection(projection, &mut scope, &mut layout, true)?;
                // WITH narrows the scope to its aliases
                if !matches!(projection.items, ProjectionItems::Star) {
                    let mut narrowed = Scope::default();
                    for (name, _) in &items {
                        narrowed.bind(name);
                    }
                    scope = narrowed;
                }
            }
            Clause::Return(projection) => {
                columns = resolve_projection(projection, &mut scope, &mut layout, false)?;
            }
        }
    }

    Ok(SegmentMeta {
        layout: Arc::new(layout),
        columns,
        paths,
    })
}

fn enrich_foreach_body(
    body: &mut [Clause],
    scope: &mut Scope,
    layout: &mut RecordLayout,
    anon: &mut AnonNamer,
) -> Result<()> {
    let mut paths = Vec::new();
    for clause in body {
        match clause {
            Clause::Create { patterns } => {
                for pattern in patterns.iter_mut() {
                    name_pattern(pattern, anon)?;
                    validate_pattern_props(pattern, scope)?;
                    bind_pattern(pattern, scope, layout, &mut paths)?;
                }
            }
            Clause::Set(items) => {
                for item in items {
                    validate_set_item(item, scope)?;
                }
            }
            Clause::Remove(items) => {
                for item in items {
                    let variable = match item {
                        RemoveItem::Property { variable, .. } => variable,
                        RemoveItem::Label { variable, .. } => variable,
                    };
                    require_bound(variable, scope)?;
                }
            }
            Clause::Delete { exprs, .. } => {
                for expr in exprs {
                    validate_expr(expr, scope)?;
                }
            }
            Clause::Foreach { variable, list, body } => {
                validate_expr(list, scope)?;
                let mut inner = scope.clone();
                inner.bind(variable);
                layout.add(variable);
                enrich_foreach_body(body, &mut inner, layout, anon)?;
            }
            other => {
                return Err(Error::Semantic(format!(
                    "clause not allowed inside FOREACH: {other:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Fill in anonymous aliases and reject unsupported bindings.
fn name_pattern(pattern: &mut Pattern, anon: &mut AnonNamer) -> Result<()> {
    if pattern.start.alias.is_none() {
        pattern.start.alias = Some(anon.name());
    }
    for (rel, node) in &mut pattern.chain {
        if rel.var_length.is_some() {
            if let Some(alias) = &rel.alias {
                if !alias.starts_with('@') {
                    return Err(Error::Semantic(format!(
                        "variable-length relationship '{alias}' cannot be bound to a name"
                    )));
                }
            }
        }
        if rel.alias.is_none() {
            rel.alias = Some(anon.name());
        }
        if node.alias.is_none() {
            node.alias = Some(anon.name());
        }
    }
    Ok(())
}

fn bind_pattern(
    pattern: &Pattern,
    scope: &mut Scope,
    layout: &mut RecordLayout,
    paths: &mut Vec<(String, Vec<String>)>,
) -> Result<()> {
    let start = pattern.start.alias.as_deref().expect("named during enrichment");
    scope.bind(start);
    layout.add(start);
    for (rel, node) in &pattern.chain {
        let rel_alias = rel.alias.as_deref().expect("named during enrichment");
        let node_alias = node.alias.as_deref().expect("named during enrichment");
        if rel.var_length.is_none() {
            scope.bind(rel_alias);
            layout.add(rel_alias);
        }
        scope.bind(node_alias);
        layout.add(node_alias);
    }
    if let Some(path_alias) = &pattern.path_alias {
        if pattern.chain.iter().any(|(r, _)| r.var_length.is_some()) {
            return Err(Error::Semantic(format!(
                "named path '{path_alias}' over a variable-length pattern is not supported"
            )));
        }
        scope.bind(path_alias);
        layout.add(path_alias);
        paths.push((path_alias.clone(), pattern.element_aliases()));
    }
    Ok(())
}

fn validate_pattern_props(pattern: &Pattern, scope: &Scope) -> Result<()> {
    for (_, expr) in &pattern.start.props {
        validate_expr(expr, scope)?;
    }
    for (rel, node) in &pattern.chain {
        for (_, expr) in rel.props.iter().chain(node.props.iter()) {
            validate_expr(expr, scope)?;
        }
    }
    Ok(())
}

fn validate_set_item(item: &SetItem, scope: &Scope) -> Result<()> {
    match item {
        SetItem::Property { variable, value, .. } => {
            require_bound(variable, scope)?;
            validate_expr(value, scope)
        }
        SetItem::MergeProperties { variable, value } => {
            require_bound(variable, scope)?;
            validate_expr(value, scope)
        }
        SetItem::Label { variable, .. } => require_bound(variable, scope),
    }
}

/// Resolve a WITH/RETURN projection: give every item an alias and a slot.
/// Returns the ordered (name, slot) column list.
fn resolve_projection(
    projection: &mut Projection,
    scope: &mut Scope,
    layout: &mut RecordLayout,
    is_with: bool,
) -> Result<Vec<(String, usize)>> {
    let mut columns = Vec::new();

    match &mut projection.items {
        ProjectionItems::Star => {
            for name in scope.visible_user_names() {
                let slot = layout.slot(&name).ok_or_else(|| {
                    Error::InternalInvariant(format!("scoped variable '{name}' has no slot"))
                })?;
                columns.push((name, slot));
            }
            if columns.is_empty() {
                return Err(Error::Semantic("RETURN * with no variables in scope".into()));
            }
        }
        ProjectionItems::Items(items) => {
            for item in items.iter_mut() {
                validate_expr(&item.expr, scope)?;
                let name = match &item.alias {
                    Some(alias) => alias.clone(),
                    None => {
                        let label = expr_label(&item.expr);
                        item.alias = Some(label.clone());
                        label
                    }
                };
                let slot = layout.add(&name);
                columns.push((name, slot));
            }
        }
    }

    for order in &projection.order_by {
        // ORDER BY may reference projected aliases or still-visible input
        // variables; bind aliases first so both resolve
        let mut order_scope = scope.clone();
        for (name, _) in &columns {
            order_scope.bind(name);
        }
        validate_expr(&order.expr, &order_scope)?;
    }
    if let Some(skip) = &projection.skip {
        validate_expr(skip, scope)?;
    }
    if let Some(limit) = &projection.limit {
        validate_expr(limit, scope)?;
    }
    if let Some(pred) = &projection.where_clause {
        let mut where_scope = scope.clone();
        for (name, _) in &columns {
            where_scope.bind(name);
        }
        if !is_with {
            return Err(Error::Semantic("WHERE is not allowed after RETURN".into()));
        }
        validate_expr(pred, &where_scope)?;
    }

    Ok(columns)
}

fn require_bound(name: &str, scope: &Scope) -> Result<()> {
    if scope.contains(name) {
        Ok(())
    } else {
        Err(Error::Semantic(format!("'{name}' not defined")))
    }
}

fn validate_expr(expr: &Expr, scope: &Scope) -> Result<()> {
    match expr {
        Expr::Literal(_) | Expr::Parameter(_) | Expr::Star => Ok(()),
        Expr::Variable(name) => require_bound(name, scope),
        Expr::Property { expr, .. } => validate_expr(expr, scope),
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                validate_expr(arg, scope)?;
            }
            Ok(())
        }
        Expr::BinaryOp { left, right, .. } => {
            validate_expr(left, scope)?;
            validate_expr(right, scope)
        }
        Expr::UnaryOp { expr, .. } => validate_expr(expr, scope),
        Expr::List(items) => {
            for item in items {
                validate_expr(item, scope)?;
            }
            Ok(())
        }
        Expr::Map(entries) => {
            for (_, value) in entries {
                validate_expr(value, scope)?;
            }
            Ok(())
        }
        Expr::Subscript { expr, index } => {
            validate_expr(expr, scope)?;
            validate_expr(index, scope)
        }
        Expr::Case { operand, whens, else_expr } => {
            if let Some(op) = operand {
                validate_expr(op, scope)?;
            }
            for (when, then) in whens {
                validate_expr(when, scope)?;
                validate_expr(then, scope)?;
            }
            if let Some(els) = else_expr {
                validate_expr(els, scope)?;
            }
            Ok(())
        }
        Expr::In { expr, list } => {
            validate_expr(expr, scope)?;
            validate_expr(list, scope)
        }
        Expr::IsNull { expr, .. } => validate_expr(expr, scope),
        Expr::HasLabel { expr, .. } => validate_expr(expr, scope),
        Expr::StringOp { left, right, .. } => {
            validate_expr(left, scope)?;
            validate_expr(right, scope)
        }
        Expr::Reduce { acc, init, variable, list, expr } => {
            validate_expr(init, scope)?;
            validate_expr(list, scope)?;
            let mut inner = scope.clone();
            inner.bind(acc);
            inner.bind(variable);
            validate_expr(expr, &inner)
        }
        Expr::MapProjection { variable, selectors } => {
            require_bound(variable, scope)?;
            for selector in selectors {
                match selector {
                    MapSelector::Literal(_, value) => validate_expr(value, scope)?,
                    MapSelector::Identifier(name) => require_bound(name, scope)?,
                    MapSelector::Property(_) | MapSelector::AllProperties => {}
                }
            }
            Ok(())
        }
    }
}

/// Human-readable column label for an unaliased projection item.
pub fn expr_label(expr: &Expr) -> String {
    match expr {
        Expr::Variable(name) => name.clone(),
        Expr::Property { expr, key } => format!("{}.{}", expr_label(expr), key),
        Expr::Parameter(name) => format!("${name}"),
        Expr::Literal(lit) => match lit {
            Literal::Null => "null".into(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Double(f) => f.to_string(),
            Literal::String(s) => format!("'{s}'"),
        },
        Expr::FunctionCall { name, args, distinct } => {
            let inner: Vec<String> = args.iter().map(expr_label).collect();
            if *distinct {
                format!("{}(DISTINCT {})", name, inner.join(", "))
            } else {
                format!("{}({})", name, inner.join(", "))
            }
        }
        Expr::Star => "*".into(),
        Expr::HasLabel { expr, label } => format!("{}:{}", expr_label(expr), label),
        Expr::Subscript { expr, index } => {
            format!("{}[{}]", expr_label(expr), expr_label(index))
        }
        _ => "expr".into(),
    }
}

/// Is this expression an aggregate call at its top level?
pub fn is_aggregate(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::FunctionCall { name, .. }
            if matches!(
                name.to_uppercase().as_str(),
                "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" | "COLLECT" | "ANY" | "ALL"
            )
    )
}

/// Does the expression contain an aggregate call anywhere?
pub fn contains_aggregate(expr: &Expr) -> bool {
    if is_aggregate(expr) {
        return true;
    }
    match expr {
        Expr::Property { expr, .. }
        | Expr::UnaryOp { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::HasLabel { expr, .. } => contains_aggregate(expr),
        Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        Expr::In { expr, list } => contains_aggregate(expr) || contains_aggregate(list),
        Expr::Subscript { expr, index } => contains_aggregate(expr) || contains_aggregate(index),
        Expr::FunctionCall { args, .. } => args.iter().any(contains_aggregate),
        Expr::List(items) => items.iter().any(contains_aggregate),
        Expr::Map(entries) => entries.iter().any(|(_, v)| contains_aggregate(v)),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || whens.iter().any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || else_expr.as_deref().is_some_and(contains_aggregate)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::{lexer::tokenize, parser::parse_ast};

    fn enriched(q: &str) -> Enriched {
        let Ast::Query(stmt) = parse_ast(&tokenize(q).unwrap()).unwrap() else {
            panic!("not a query")
        };
        enrich(stmt).unwrap()
    }

    fn enrich_err(q: &str) -> Error {
        let Ast::Query(stmt) = parse_ast(&tokenize(q).unwrap()).unwrap() else {
            panic!("not a query")
        };
        enrich(stmt).unwrap_err()
    }

    #[test]
    fn test_anonymous_entities_get_names() {
        let e = enriched("MATCH (a)-[:KNOWS]->() RETURN a");
        let Clause::Match { patterns, .. } = &e.statement.segments[0].clauses[0] else { panic!() };
        let (rel, node) = &patterns[0].chain[0];
        assert!(rel.alias.as_deref().unwrap().starts_with("@anon_"));
        assert!(node.alias.as_deref().unwrap().starts_with("@anon_"));
    }

    #[test]
    fn test_columns_and_slots() {
        let e = enriched("MATCH (a:Person) RETURN a.name, a.age AS age");
        let cols: Vec<&str> = e.segments[0].columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(cols, vec!["a.name", "age"]);
        assert!(e.segments[0].layout.slot("a").is_some());
    }

    #[test]
    fn test_undefined_variable_rejected() {
        let err = enrich_err("MATCH (a) RETURN b");
        assert!(matches!(err, Error::Semantic(_)));
    }

    #[test]
    fn test_with_narrows_scope() {
        let err = enrich_err("MATCH (a)-[:R]->(b) WITH a RETURN b");
        assert!(matches!(err, Error::Semantic(_)));
    }

    #[test]
    fn test_write_detection() {
        assert!(enriched("CREATE (:N)").write);
        assert!(enriched("MATCH (n) SET n.x = 1 RETURN n").write);
        assert!(!enriched("MATCH (n) RETURN n").write);
    }

    #[test]
    fn test_union_column_mismatch() {
        let err = enrich_err("MATCH (a:A) RETURN a.x UNION MATCH (b:B) RETURN b.y");
        assert!(matches!(err, Error::Semantic(_)));
    }

    #[test]
    fn test_named_path_annotation() {
        let e = enriched("MATCH p = (a)-[:R]->(b) RETURN p");
        assert_eq!(e.segments[0].paths.len(), 1);
        let (name, elements) = &e.segments[0].paths[0];
        assert_eq!(name, "p");
        assert_eq!(elements.len(), 3);
    }

    #[test]
    fn test_var_length_user_alias_rejected() {
        let err = enrich_err("MATCH (a)-[r:R*1..2]->(b) RETURN b");
        assert!(matches!(err, Error::Semantic(_)));
    }
}
