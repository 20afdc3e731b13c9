//! # Cypher Language
//!
//! Lexer, recursive-descent parser, and AST enrichment.
//! Pure functions — no I/O, no state, no storage dependency.

pub mod ast;
pub mod enrich;
pub mod lexer;
pub mod parser;

use crate::Result;
use ast::Ast;

/// Parse a Cypher query string into an AST.
pub fn parse(query: &str) -> Result<Ast> {
    let tokens = lexer::tokenize(query)?;
    parser::parse_ast(&tokens)
}
