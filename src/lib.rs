//! # deltagraph — Embeddable Property Graph Database
//!
//! A property graph engine built on sparse delta-buffered adjacency
//! matrices, queried through a Cypher pipeline that lowers pattern
//! matches to algebraic traversal expressions.
//!
//! ## Design Principles
//!
//! 1. **Matrices are the graph**: every relation is a sparse boolean
//!    matrix, every label a diagonal; traversals are row products.
//! 2. **Buffered mutation**: structural updates land in delta layers and
//!    fold into the primary matrices on flush — readers never flush.
//! 3. **Arena ownership**: the store owns everything; cross-links are
//!    dense integer ids, so there are no pointer cycles.
//! 4. **Pull-based execution**: operators are stateful `next()` producers
//!    driven from the result sink.
//!
//! ## Quick Start
//!
//! ```rust
//! use deltagraph::{GraphContext, PropertyMap};
//!
//! # fn example() -> deltagraph::Result<()> {
//! let graph = GraphContext::new("social");
//!
//! graph.query(
//!     "CREATE (:Person {name: 'Roi'})-[:KNOWS]->(:Person {name: 'Ailon'})",
//!     PropertyMap::new(),
//! )?;
//!
//! let result = graph.query(
//!     "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name, b.name",
//!     PropertyMap::new(),
//! )?;
//! assert_eq!(result.len(), 1);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod bulk;
pub mod config;
pub mod constraint;
pub mod context;
pub mod cypher;
pub mod exec;
pub mod index;
pub mod model;
pub mod plan;
pub mod query;
pub mod result;
pub mod serializer;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use bulk::BulkStats;
pub use config::GraphConfig;
pub use context::{GraphContext, GraphRegistry};
pub use model::{Edge, EdgeId, Node, NodeId, Path, PropertyMap, Value};
pub use query::QueryCtx;
pub use result::{QueryStats, ResultSet};
pub use store::GraphStore;

// ============================================================================
// Error Types
// ============================================================================

/// The user-facing error taxonomy. Every variant carries a machine code
/// ([`Error::code`]) and a human message; both travel in the host error
/// frame.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("semantic error: {0}")]
    Semantic(String),

    #[error("type mismatch: expected {expected}, got {got}")]
    RuntimeType { expected: String, got: String },

    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("query timed out")]
    QueryTimedOut,

    #[error("writes are not allowed through a read-only entry point")]
    ReadonlyViolation,

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Algebraic read attempted on a matrix with pending deltas. Internal:
    /// operators catch it and fall back to the pointwise path; it escapes
    /// only when something is genuinely wrong.
    #[error("matrix is not synchronized")]
    UnsynchronizedMatrix,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for the host error frame.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Syntax { .. } => "SYNTAX_ERROR",
            Error::Semantic(_) => "SEMANTIC_ERROR",
            Error::RuntimeType { .. } => "TYPE_ERROR",
            Error::IndexOutOfBounds(_) => "INDEX_OUT_OF_BOUNDS",
            Error::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            Error::Index(_) => "INDEX_ERROR",
            Error::OutOfMemory(_) => "OUT_OF_MEMORY",
            Error::QueryTimedOut => "QUERY_TIMED_OUT",
            Error::ReadonlyViolation => "READONLY_VIOLATION",
            Error::InternalInvariant(_) => "INTERNAL_ERROR",
            Error::UnsynchronizedMatrix => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::QueryTimedOut.code(), "QUERY_TIMED_OUT");
        assert_eq!(Error::ReadonlyViolation.code(), "READONLY_VIOLATION");
        assert_eq!(Error::Semantic("x".into()).code(), "SEMANTIC_ERROR");
        assert_eq!(Error::UnsynchronizedMatrix.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_error_messages_have_both_fields() {
        let err = Error::ConstraintViolation("unique constraint violated on (email)".into());
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
        assert!(err.to_string().contains("email"));
    }
}
