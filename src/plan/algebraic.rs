//! Algebraic traversal expressions.
//!
//! A pattern hop `(a:A)-[:R1|R2]->(b:B)` lowers to a product of matrices:
//! the source row selector, the relation matrices (transposed for incoming
//! hops, unioned with their transpose for undirected ones), and diagonal
//! label matrices filtering each end. The executor materializes the result
//! lazily, streaming one source row at a time through the chain:
//! [`AlgebraicExpression::expand`] is exactly that row-vector product,
//! reading through the delta layers.
//!
//! For variable-length traversals over synchronized matrices the batch
//! form [`AlgebraicExpression::combined_matrix`] feeds the masked
//! powers-of-matrix iteration; it refuses Pending matrices, which is what
//! keeps algebraic multiplication off unsynchronized state.

use crate::model::NodeId;
use crate::store::{GraphStore, LabelId, RelTypeId, SparseMatrix};
use crate::Result;

#[derive(Debug, Clone)]
pub struct AlgebraicExpression {
    /// Relation types to traverse; empty means any relation (the ADJ
    /// matrix).
    pub rels: Vec<RelTypeId>,
    /// Traverse incoming edges (use the transposed matrices).
    pub transposed: bool,
    /// Undirected hop: union of the matrix and its transpose.
    pub both: bool,
    /// Diagonal label filter applied to the destination column.
    pub dest_label: Option<LabelId>,
}

impl AlgebraicExpression {
    /// One-hop expansion from a single source row. Delta-aware (pointwise
    /// reads), deduplicated, ascending by destination id.
    pub fn expand(&self, store: &GraphStore, src: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();

        let forward = !self.transposed || self.both;
        let backward = self.transposed || self.both;

        if self.rels.is_empty() {
            if forward {
                out.extend(store.out_neighbors(None, src));
            }
            if backward {
                out.extend(store.in_neighbors(None, src));
            }
        } else {
            for rel in &self.rels {
                if forward {
                    out.extend(store.out_neighbors(Some(*rel), src));
                }
                if backward {
                    out.extend(store.in_neighbors(Some(*rel), src));
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        if let Some(label) = self.dest_label {
            out.retain(|n| store.node_has_label(*n, label));
        }
        out
    }

    /// The single boolean matrix equivalent to this hop (without the
    /// destination label diagonal). Requires every participating matrix to
    /// be Synchronized; errors with `UnsynchronizedMatrix` otherwise.
    pub fn combined_matrix(&self, store: &GraphStore) -> Result<SparseMatrix<bool>> {
        let mut combined: Option<SparseMatrix<bool>> = None;

        let mut add = |m: SparseMatrix<bool>| {
            combined = Some(match combined.take() {
                None => m,
                Some(acc) => acc.union(&m),
            });
        };

        if self.rels.is_empty() {
            if !self.transposed || self.both {
                add(store.adj_matrix().to_sparse()?.clone());
            }
            if self.transposed || self.both {
                add(store.adj_matrix_t().to_sparse()?.clone());
            }
        } else {
            for rel in &self.rels {
                if !self.transposed || self.both {
                    add(store.rel_matrix(*rel).to_sparse()?.structure());
                }
                if self.transposed || self.both {
                    add(store.rel_matrix_t(*rel).to_sparse()?.structure());
                }
            }
        }

        Ok(combined.unwrap_or_else(|| SparseMatrix::new(store.dim(), store.dim())))
    }

    /// True when the hop's source, viewed from the destination side, is
    /// reachable — used by ExpandInto to test a bound pair.
    pub fn connects(&self, store: &GraphStore, src: NodeId, dst: NodeId) -> bool {
        if let Some(label) = self.dest_label {
            if !store.node_has_label(dst, label) {
                return false;
            }
        }
        let pair = |a: NodeId, b: NodeId| -> bool {
            if self.rels.is_empty() {
                store.adj_matrix().contains(a.0, b.0)
            } else {
                self.rels
                    .iter()
                    .any(|r| store.rel_matrix(*r).contains(a.0, b.0))
            }
        };
        let forward = !self.transposed || self.both;
        let backward = self.transposed || self.both;
        (forward && pair(src, dst)) || (backward && pair(dst, src))
    }

    /// Render for plan text, e.g. `(a)-[:KNOWS]->(b)`.
    pub fn describe(&self, store: &GraphStore, src: &str, dst: &str) -> String {
        let rels = if self.rels.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = self.rels.iter().map(|r| store.relation_name(*r)).collect();
            format!(":{}", names.join("|"))
        };
        let dst_label = match self.dest_label {
            Some(l) => format!(":{}", store.label_name(l)),
            None => String::new(),
        };
        let (head, tail) = if self.both {
            ("-", "-")
        } else if self.transposed {
            ("<-", "-")
        } else {
            ("-", "->")
        };
        format!("({src}){head}[{rels}]{tail}({dst}{dst_label})")
    }
}
