//! Cypher AST.
//!
//! These types represent parsed queries. They are pure data — no storage
//! references, no execution logic. The pipeline enriches an AST (anonymous
//! entity naming, named-path annotation, identifier resolution) before
//! planning; see [`super::enrich`].

/// Top-level parse result: a query or a schema command.
#[derive(Debug, Clone)]
pub enum Ast {
    Query(Statement),
    Schema(SchemaCommand),
}

/// A statement: one or more single queries joined by UNION.
#[derive(Debug, Clone)]
pub struct Statement {
    pub segments: Vec<SingleQuery>,
    /// One entry per UNION joint: true for UNION ALL.
    pub union_all: Vec<bool>,
}

/// A single query: an ordered clause list ending in RETURN or an update.
#[derive(Debug, Clone)]
pub struct SingleQuery {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    Match {
        optional: bool,
        patterns: Vec<Pattern>,
        where_clause: Option<Expr>,
    },
    Unwind {
        expr: Expr,
        alias: String,
    },
    Create {
        patterns: Vec<Pattern>,
    },
    Merge {
        pattern: Pattern,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete {
        exprs: Vec<Expr>,
        detach: bool,
    },
    Foreach {
        variable: String,
        list: Expr,
        /// Update clauses only (SET / CREATE / DELETE / FOREACH).
        body: Vec<Clause>,
    },
    With(Projection),
    Return(Projection),
}

impl Clause {
    /// Does this clause mutate the graph?
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            Clause::Create { .. }
                | Clause::Merge { .. }
                | Clause::Set(_)
                | Clause::Remove(_)
                | Clause::Delete { .. }
                | Clause::Foreach { .. }
        )
    }
}

/// Projection body shared by WITH and RETURN.
#[derive(Debug, Clone)]
pub struct Projection {
    pub distinct: bool,
    pub items: ProjectionItems,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
    /// WHERE after WITH.
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum ProjectionItems {
    /// `RETURN *`
    Star,
    Items(Vec<ProjectionItem>),
}

#[derive(Debug, Clone)]
pub struct ProjectionItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: Expr,
    pub ascending: bool,
}

// ============================================================================
// Patterns
// ============================================================================

/// A linear pattern path: node, then (relationship, node) hops.
/// `p = (a)-[:R]->(b)` carries the path alias.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub path_alias: Option<String>,
    pub start: NodePattern,
    pub chain: Vec<(RelPattern, NodePattern)>,
}

impl Pattern {
    /// Aliases of the pattern's elements in traversal order:
    /// node, rel, node, rel, node …  Populated after enrichment (every
    /// element has a name by then).
    pub fn element_aliases(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.chain.len() * 2);
        out.push(self.start.alias.clone().unwrap_or_default());
        for (rel, node) in &self.chain {
            out.push(rel.alias.clone().unwrap_or_default());
            out.push(node.alias.clone().unwrap_or_default());
        }
        out
    }
}

/// `(alias:Label1:Label2 {prop: value})`
#[derive(Debug, Clone)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    /// Inline property filters / creation values. Order preserved;
    /// duplicate keys resolve last-write-wins at evaluation.
    pub props: Vec<(String, Expr)>,
}

/// `-[alias:TYPE1|TYPE2 *min..max {props}]->`
#[derive(Debug, Clone)]
pub struct RelPattern {
    pub alias: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: PatternDirection,
    pub props: Vec<(String, Expr)>,
    pub var_length: Option<VarLength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// `->`
    Right,
    /// `<-`
    Left,
    /// `-` (undirected)
    Both,
}

/// `*min..max`; either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLength {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

// ============================================================================
// Update items
// ============================================================================

#[derive(Debug, Clone)]
pub enum SetItem {
    /// `SET n.prop = expr`
    Property { variable: String, key: String, value: Expr },
    /// `SET n += {map}`
    MergeProperties { variable: String, value: Expr },
    /// `SET n:Label`
    Label { variable: String, label: String },
}

#[derive(Debug, Clone)]
pub enum RemoveItem {
    /// `REMOVE n.prop`
    Property { variable: String, key: String },
    /// `REMOVE n:Label`
    Label { variable: String, label: String },
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    /// `n`, `r`, `p`
    Variable(String),
    /// `n.name`
    Property { expr: Box<Expr>, key: String },
    /// `$name`
    Parameter(String),
    /// `count(n)`, `id(n)`, `labels(n)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    /// `a + b`, `a = b`, `a AND b`
    BinaryOp { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    /// `NOT a`, `-a`
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    /// `[1, 2, 3]`
    List(Vec<Expr>),
    /// `{name: 'Roi', age: 30}` — order preserved, duplicates last-write-wins
    Map(Vec<(String, Expr)>),
    /// `list[idx]`
    Subscript { expr: Box<Expr>, index: Box<Expr> },
    /// CASE expression (simple and searched)
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// `x IN [1, 2, 3]`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// `x IS NULL` / `x IS NOT NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    /// `n:Person`
    HasLabel { expr: Box<Expr>, label: String },
    /// STARTS WITH / ENDS WITH / CONTAINS
    StringOp { left: Box<Expr>, op: StringOp, right: Box<Expr> },
    /// `reduce(acc = init, x IN list | acc + x)`
    Reduce {
        acc: String,
        init: Box<Expr>,
        variable: String,
        list: Box<Expr>,
        expr: Box<Expr>,
    },
    /// `n {.name, id: id(n), .*}`
    MapProjection { variable: String, selectors: Vec<MapSelector> },
    /// `*` in RETURN
    Star,
}

#[derive(Debug, Clone)]
pub enum MapSelector {
    /// `.name`
    Property(String),
    /// `key: expr`
    Literal(String, Expr),
    /// bare `var` — entry under the variable's own name
    Identifier(String),
    /// `.*`
    AllProperties,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod, Pow,
    // Comparison
    Eq, Neq, Lt, Lte, Gt, Gte,
    // Logical
    And, Or, Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

// ============================================================================
// Schema commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum SchemaCommand {
    /// `CREATE INDEX ON :Label(prop, …)`
    CreateExactIndex { label: String, properties: Vec<String> },
    /// `CREATE FULLTEXT INDEX ON :Label(prop, …)`
    CreateFullTextIndex { label: String, properties: Vec<String> },
    /// `DROP INDEX ON :Label(prop, …)`
    DropIndex { label: String, properties: Vec<String> },
    /// `CREATE CONSTRAINT ON :Label UNIQUE(prop, …)`
    CreateUniqueConstraint { label: String, properties: Vec<String> },
    /// `CREATE CONSTRAINT ON :Label MANDATORY(prop, …)`
    CreateMandatoryConstraint { label: String, properties: Vec<String> },
    /// `DROP CONSTRAINT ON :Label UNIQUE(prop, …)` (or MANDATORY)
    DropConstraint { label: String, properties: Vec<String>, unique: bool },
}
