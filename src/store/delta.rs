//! Delta matrix — a sparse matrix with buffered structural updates.
//!
//! Each stored matrix is a triple (M, Δ⁺, Δ⁻):
//!
//! - `m` is the last synchronized state,
//! - `delta_plus` holds pending insertions not yet merged into `m`,
//! - `delta_minus` holds pending deletions of entries present in `m`.
//!
//! The logical matrix is `(M ∪ Δ⁺) \ Δ⁻`. Invariants, maintained by every
//! mutation:
//!
//! 1. Δ⁺ ∩ M = ∅
//! 2. Δ⁻ ⊆ M
//! 3. Δ⁺ ∩ Δ⁻ = ∅
//! 4. A write that reverses a pending delta removes from the opposite delta
//!    rather than adding to its own.
//!
//! Value updates to entries already in M (a multi-edge tag upgrade, or a
//! delete-then-recreate that lands a different payload on the same
//! position) are applied to M in place; only structural insertion and
//! deletion are buffered. This keeps invariant 1 without a read-modify
//! cycle through the deltas.
//!
//! The matrix is `Synchronized` when both deltas are empty, `Pending`
//! otherwise. `flush` is the only transition Pending → Synchronized.
//! Algebraic reads (`multiply`, `transpose`, `to_sparse`) demand
//! Synchronized and fail with `UnsynchronizedMatrix` otherwise; pointwise
//! reads (`get`, `row_iter`, `nnz`) consult all three layers.

use crate::{Error, Result};
use super::sparse::{MatrixValue, Semiring, SparseMatrix};

#[derive(Debug, Clone)]
pub struct DeltaMatrix<T: MatrixValue> {
    m: SparseMatrix<T>,
    delta_plus: SparseMatrix<T>,
    delta_minus: SparseMatrix<bool>,
}

impl<T: MatrixValue> DeltaMatrix<T> {
    pub fn new(nrows: u64, ncols: u64) -> Self {
        Self {
            m: SparseMatrix::new(nrows, ncols),
            delta_plus: SparseMatrix::new(nrows, ncols),
            delta_minus: SparseMatrix::new(nrows, ncols),
        }
    }

    pub fn nrows(&self) -> u64 { self.m.nrows() }
    pub fn ncols(&self) -> u64 { self.m.ncols() }

    /// True when both delta layers are empty.
    pub fn synced(&self) -> bool {
        self.delta_plus.is_empty() && self.delta_minus.is_empty()
    }

    /// Count of logically present entries: nnz(M) + nnz(Δ⁺) - nnz(Δ⁻).
    pub fn nnz(&self) -> u64 {
        self.m.nvals() + self.delta_plus.nvals() - self.delta_minus.nvals()
    }

    /// Pointwise read through all three layers.
    pub fn get(&self, i: u64, j: u64) -> Option<T> {
        if let Some(v) = self.delta_plus.get(i, j) {
            return Some(v);
        }
        if self.delta_minus.contains(i, j) {
            return None;
        }
        self.m.get(i, j)
    }

    pub fn contains(&self, i: u64, j: u64) -> bool {
        self.get(i, j).is_some()
    }

    /// Make (i, j) logically present with value `v`.
    pub fn set(&mut self, i: u64, j: u64, v: T) {
        if self.delta_minus.contains(i, j) {
            // reversing a pending delete: drop from Δ⁻, refresh M's payload
            self.delta_minus.remove(i, j);
            if self.m.get(i, j) != Some(v) {
                self.m.set(i, j, v);
            }
        } else if self.m.contains(i, j) {
            // value update on a synchronized entry, applied in place
            self.m.set(i, j, v);
        } else {
            self.delta_plus.set(i, j, v);
        }
    }

    /// Make (i, j) logically absent.
    pub fn clear(&mut self, i: u64, j: u64) {
        if self.delta_plus.contains(i, j) {
            // reversing a pending insert
            self.delta_plus.remove(i, j);
        } else if self.m.contains(i, j) {
            self.delta_minus.set(i, j, true);
        }
        // absent everywhere: nothing to do
    }

    /// Fold Δ⁺ and Δ⁻ into M and empty both.
    pub fn flush(&mut self) {
        if self.synced() {
            return;
        }
        let inserts: Vec<(u64, u64, T)> = self.delta_plus.iter().collect();
        for (i, j, v) in inserts {
            self.m.set(i, j, v);
        }
        let deletes: Vec<(u64, u64)> = self.delta_minus.iter().map(|(i, j, _)| (i, j)).collect();
        for (i, j) in deletes {
            self.m.remove(i, j);
        }
        self.delta_plus.clear();
        self.delta_minus.clear();
    }

    /// Entries of row `i` in ascending column order, respecting deltas.
    pub fn row_iter(&self, i: u64) -> impl Iterator<Item = (u64, T)> + '_ {
        // merge of two ascending streams; Δ⁺ and M are disjoint so no
        // per-column tie-break is needed beyond choosing the smaller j
        RowMerge {
            base: self.m.row_iter(i).peekable(),
            plus: self.delta_plus.row_iter(i).peekable(),
            minus: &self.delta_minus,
            row: i,
        }
    }

    /// All logical entries in (row, column) order.
    pub fn iter_logical(&self) -> Vec<(u64, u64, T)> {
        let mut out: Vec<(u64, u64, T)> = Vec::with_capacity(self.nnz() as usize);
        for (i, j, v) in self.m.iter() {
            if !self.delta_minus.contains(i, j) {
                out.push((i, j, v));
            }
        }
        out.extend(self.delta_plus.iter());
        out.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        out
    }

    /// Resize all three layers. Logical entries within bounds and the
    /// flush state are preserved.
    pub fn resize(&mut self, nrows: u64, ncols: u64) {
        self.m.resize(nrows, ncols);
        self.delta_plus.resize(nrows, ncols);
        self.delta_minus.resize(nrows, ncols);
    }

    /// The synchronized matrix, for algebraic use. Pending deltas make this
    /// an error: callers must flush first or stay on the pointwise path.
    pub fn to_sparse(&self) -> Result<&SparseMatrix<T>> {
        if !self.synced() {
            return Err(Error::UnsynchronizedMatrix);
        }
        Ok(&self.m)
    }

    pub fn transpose(&self) -> Result<SparseMatrix<T>> {
        Ok(self.to_sparse()?.transpose())
    }

    #[cfg(test)]
    pub(crate) fn delta_plus(&self) -> &SparseMatrix<T> { &self.delta_plus }
    #[cfg(test)]
    pub(crate) fn delta_minus(&self) -> &SparseMatrix<bool> { &self.delta_minus }
    #[cfg(test)]
    pub(crate) fn primary(&self) -> &SparseMatrix<T> { &self.m }
}

impl DeltaMatrix<bool> {
    /// Semiring multiply; both operands must be Synchronized.
    pub fn multiply(
        &self,
        other: &DeltaMatrix<bool>,
        mask: Option<&SparseMatrix<bool>>,
        complement_mask: bool,
        semiring: Semiring,
    ) -> Result<SparseMatrix<i64>> {
        let a = self.to_sparse()?;
        let b = other.to_sparse()?;
        Ok(a.multiply(b, mask, complement_mask, semiring))
    }
}

struct RowMerge<'a, T, B, P>
where
    T: MatrixValue,
    B: Iterator<Item = (u64, T)>,
    P: Iterator<Item = (u64, T)>,
{
    base: std::iter::Peekable<B>,
    plus: std::iter::Peekable<P>,
    minus: &'a SparseMatrix<bool>,
    row: u64,
}

impl<'a, T, B, P> Iterator for RowMerge<'a, T, B, P>
where
    T: MatrixValue,
    B: Iterator<Item = (u64, T)>,
    P: Iterator<Item = (u64, T)>,
{
    type Item = (u64, T);

    fn next(&mut self) -> Option<(u64, T)> {
        loop {
            let take_base = match (self.base.peek(), self.plus.peek()) {
                (Some((jb, _)), Some((jp, _))) => jb < jp,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => return None,
            };
            if take_base {
                let (j, v) = self.base.next()?;
                if self.minus.contains(self.row, j) {
                    continue; // pending delete
                }
                return Some((j, v));
            } else {
                return self.plus.next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flushed(entries: &[(u64, u64)]) -> DeltaMatrix<bool> {
        let mut m = DeltaMatrix::new(16, 16);
        for (i, j) in entries {
            m.set(*i, *j, true);
        }
        m.flush();
        m
    }

    #[test]
    fn test_set_buffers_into_delta_plus() {
        let mut m: DeltaMatrix<bool> = DeltaMatrix::new(8, 8);
        m.set(1, 2, true);
        assert!(!m.synced());
        assert!(m.contains(1, 2));
        assert_eq!(m.nnz(), 1);
        assert_eq!(m.primary().nvals(), 0);
    }

    #[test]
    fn test_clear_buffers_into_delta_minus() {
        let mut m = flushed(&[(1, 2)]);
        m.clear(1, 2);
        assert!(!m.synced());
        assert!(!m.contains(1, 2));
        assert_eq!(m.nnz(), 0);
        // entry still physically in M until flush
        assert_eq!(m.primary().nvals(), 1);
    }

    #[test]
    fn test_reversal_cancels_pending_delete() {
        let mut m = flushed(&[(3, 4)]);
        m.clear(3, 4);
        m.set(3, 4, true);
        // reversal removed from Δ⁻ rather than adding to Δ⁺
        assert!(m.synced());
        assert!(m.contains(3, 4));
    }

    #[test]
    fn test_reversal_cancels_pending_insert() {
        let mut m: DeltaMatrix<bool> = DeltaMatrix::new(8, 8);
        m.set(5, 6, true);
        m.clear(5, 6);
        assert!(m.synced());
        assert!(!m.contains(5, 6));
    }

    #[test]
    fn test_invariants_hold_under_mixed_writes() {
        let mut m = flushed(&[(0, 0), (0, 1), (1, 1)]);
        m.clear(0, 1);
        m.set(2, 2, true);
        m.set(0, 1, true);
        m.clear(1, 1);

        // Δ⁺ ∩ M = ∅
        for (i, j, _) in m.delta_plus().iter() {
            assert!(!m.primary().contains(i, j));
        }
        // Δ⁻ ⊆ M
        for (i, j, _) in m.delta_minus().iter() {
            assert!(m.primary().contains(i, j));
        }
        // Δ⁺ ∩ Δ⁻ = ∅
        for (i, j, _) in m.delta_plus().iter() {
            assert!(!m.delta_minus().contains(i, j));
        }
    }

    #[test]
    fn test_flush_preserves_nnz() {
        let mut m = flushed(&[(0, 0), (1, 1)]);
        m.set(2, 2, true);
        m.clear(0, 0);
        let logical = m.nnz();
        m.flush();
        assert!(m.synced());
        assert_eq!(m.nnz(), logical);
        assert_eq!(m.primary().nvals(), logical);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut m = flushed(&[(0, 1), (2, 3)]);
        m.set(4, 5, true);
        m.flush();
        let snapshot = m.iter_logical();
        m.flush();
        assert_eq!(m.iter_logical(), snapshot);
    }

    #[test]
    fn test_row_iter_respects_deltas() {
        let mut m = flushed(&[(7, 1), (7, 3), (7, 5)]);
        m.clear(7, 3);
        m.set(7, 2, true);
        let cols: Vec<u64> = m.row_iter(7).map(|(j, _)| j).collect();
        assert_eq!(cols, vec![1, 2, 5]);
    }

    #[test]
    fn test_multiply_requires_sync() {
        let mut a = flushed(&[(0, 1)]);
        let b = flushed(&[(1, 2)]);
        a.set(3, 3, true);
        let err = a.multiply(&b, None, false, Semiring::AnyPair).unwrap_err();
        assert!(matches!(err, Error::UnsynchronizedMatrix));
        a.flush();
        let prod = a.multiply(&b, None, false, Semiring::AnyPair).unwrap();
        assert!(prod.contains(0, 2));
    }

    #[test]
    fn test_resize_preserves_logical_and_flush_state() {
        let mut m = flushed(&[(1, 1)]);
        m.set(2, 2, true);
        assert!(!m.synced());
        m.resize(64, 64);
        assert!(!m.synced());
        assert!(m.contains(1, 1));
        assert!(m.contains(2, 2));
        assert_eq!(m.nnz(), 2);
    }
}
