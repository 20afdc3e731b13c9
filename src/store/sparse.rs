//! Sparse matrix primitive.
//!
//! Row-major sparse storage over ordered maps: iteration within a row is in
//! ascending column order, which the traversal operators rely on for stable
//! output. Matrices are square in practice (node-id space on both axes) but
//! the type does not require it.
//!
//! The semiring multiply is structural: the "multiply" step tests entry
//! presence, the "add" step is either boolean OR (`AnyPair`) or integer
//! accumulation (`PlusTimes`, used where path counts matter).

use std::collections::BTreeMap;

/// Values a sparse matrix can hold. Entries are present-or-absent; `T` is
/// the payload of a present entry.
pub trait MatrixValue: Copy + PartialEq + std::fmt::Debug {}
impl<T: Copy + PartialEq + std::fmt::Debug> MatrixValue for T {}

/// Semiring selector for [`SparseMatrix::multiply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semiring {
    /// Boolean OR-AND: result entry is present iff any pair matches.
    AnyPair,
    /// Plus-times over structure: result entry counts matching pairs.
    PlusTimes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<T: MatrixValue> {
    nrows: u64,
    ncols: u64,
    rows: BTreeMap<u64, BTreeMap<u64, T>>,
    nvals: u64,
}

impl<T: MatrixValue> SparseMatrix<T> {
    pub fn new(nrows: u64, ncols: u64) -> Self {
        Self { nrows, ncols, rows: BTreeMap::new(), nvals: 0 }
    }

    pub fn nrows(&self) -> u64 { self.nrows }
    pub fn ncols(&self) -> u64 { self.ncols }
    pub fn nvals(&self) -> u64 { self.nvals }
    pub fn is_empty(&self) -> bool { self.nvals == 0 }

    pub fn get(&self, i: u64, j: u64) -> Option<T> {
        self.rows.get(&i).and_then(|r| r.get(&j)).copied()
    }

    pub fn contains(&self, i: u64, j: u64) -> bool {
        self.get(i, j).is_some()
    }

    /// Insert or overwrite. Returns the previous value if any.
    pub fn set(&mut self, i: u64, j: u64, v: T) -> Option<T> {
        debug_assert!(i < self.nrows && j < self.ncols, "entry ({i},{j}) out of dim");
        let prev = self.rows.entry(i).or_default().insert(j, v);
        if prev.is_none() {
            self.nvals += 1;
        }
        prev
    }

    /// Remove an entry. Returns the previous value if any.
    pub fn remove(&mut self, i: u64, j: u64) -> Option<T> {
        let row = self.rows.get_mut(&i)?;
        let prev = row.remove(&j);
        if prev.is_some() {
            self.nvals -= 1;
            if row.is_empty() {
                self.rows.remove(&i);
            }
        }
        prev
    }

    /// Entries of row `i` in ascending column order.
    pub fn row_iter(&self, i: u64) -> impl Iterator<Item = (u64, T)> + '_ {
        self.rows
            .get(&i)
            .into_iter()
            .flat_map(|r| r.iter().map(|(j, v)| (*j, *v)))
    }

    /// All entries in (row, column) order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, T)> + '_ {
        self.rows
            .iter()
            .flat_map(|(i, r)| r.iter().map(move |(j, v)| (*i, *j, *v)))
    }

    /// Grow (or shrink) the dimensions. Entries outside the new bounds are
    /// dropped; in practice the store only ever grows.
    pub fn resize(&mut self, nrows: u64, ncols: u64) {
        if nrows < self.nrows {
            let dropped: Vec<u64> = self.rows.range(nrows..).map(|(i, _)| *i).collect();
            for i in dropped {
                if let Some(row) = self.rows.remove(&i) {
                    self.nvals -= row.len() as u64;
                }
            }
        }
        if ncols < self.ncols {
            for row in self.rows.values_mut() {
                let dropped: Vec<u64> = row.range(ncols..).map(|(j, _)| *j).collect();
                for j in dropped {
                    row.remove(&j);
                    self.nvals -= 1;
                }
            }
            self.rows.retain(|_, r| !r.is_empty());
        }
        self.nrows = nrows;
        self.ncols = ncols;
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.nvals = 0;
    }

    pub fn transpose(&self) -> SparseMatrix<T> {
        let mut out = SparseMatrix::new(self.ncols, self.nrows);
        for (i, j, v) in self.iter() {
            out.set(j, i, v);
        }
        out
    }

    /// Structure of the matrix: same pattern, boolean payload.
    pub fn structure(&self) -> SparseMatrix<bool> {
        let mut out = SparseMatrix::new(self.nrows, self.ncols);
        for (i, j, _) in self.iter() {
            out.set(i, j, true);
        }
        out
    }
}

impl SparseMatrix<bool> {
    /// Element-wise union (boolean OR).
    pub fn union(&self, other: &SparseMatrix<bool>) -> SparseMatrix<bool> {
        let mut out = self.clone();
        for (i, j, _) in other.iter() {
            out.set(i, j, true);
        }
        out
    }

    /// Structural semiring multiply: `self × other`, optionally masked.
    ///
    /// `mask` suppresses result entries: with `complement_mask = false` only
    /// positions present in the mask survive, with `true` only positions
    /// absent from it. The mask is applied to the output, matching the
    /// masked-powers iteration used by variable-length traversals.
    pub fn multiply(
        &self,
        other: &SparseMatrix<bool>,
        mask: Option<&SparseMatrix<bool>>,
        complement_mask: bool,
        semiring: Semiring,
    ) -> SparseMatrix<i64> {
        debug_assert_eq!(self.ncols, other.nrows, "dimension mismatch in multiply");
        let mut out = SparseMatrix::new(self.nrows, other.ncols);
        for (i, row) in self.rows.iter() {
            for (k, _) in row.iter() {
                let Some(other_row) = other.rows.get(k) else { continue };
                for (j, _) in other_row.iter() {
                    if let Some(m) = mask {
                        let hit = m.contains(*i, *j);
                        if hit == complement_mask {
                            continue;
                        }
                    }
                    match semiring {
                        Semiring::AnyPair => {
                            out.set(*i, *j, 1);
                        }
                        Semiring::PlusTimes => {
                            let acc = out.get(*i, *j).unwrap_or(0);
                            out.set(*i, *j, acc + 1);
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_get_remove() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(4, 4);
        assert_eq!(m.set(1, 2, true), None);
        assert_eq!(m.get(1, 2), Some(true));
        assert_eq!(m.nvals(), 1);
        assert_eq!(m.remove(1, 2), Some(true));
        assert_eq!(m.nvals(), 0);
        assert_eq!(m.get(1, 2), None);
    }

    #[test]
    fn test_row_iter_ascending() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(8, 8);
        m.set(3, 7, true);
        m.set(3, 1, true);
        m.set(3, 4, true);
        let cols: Vec<u64> = m.row_iter(3).map(|(j, _)| j).collect();
        assert_eq!(cols, vec![1, 4, 7]);
    }

    #[test]
    fn test_transpose() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        m.set(0, 2, true);
        m.set(1, 0, true);
        let t = m.transpose();
        assert!(t.contains(2, 0));
        assert!(t.contains(0, 1));
        assert_eq!(t.nvals(), 2);
    }

    #[test]
    fn test_multiply_any_pair() {
        // path: 0 -> 1 -> 2; A*A reaches 0 -> 2
        let mut a: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        a.set(0, 1, true);
        a.set(1, 2, true);
        let sq = a.multiply(&a, None, false, Semiring::AnyPair);
        assert_eq!(sq.nvals(), 1);
        assert!(sq.contains(0, 2));
    }

    #[test]
    fn test_multiply_plus_times_counts_paths() {
        // two distinct 2-hop paths from 0 to 2
        let mut a: SparseMatrix<bool> = SparseMatrix::new(4, 4);
        a.set(0, 1, true);
        a.set(0, 3, true);
        a.set(1, 2, true);
        a.set(3, 2, true);
        let sq = a.multiply(&a, None, false, Semiring::PlusTimes);
        assert_eq!(sq.get(0, 2), Some(2));
    }

    #[test]
    fn test_multiply_complement_mask() {
        let mut a: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        a.set(0, 1, true);
        a.set(1, 2, true);
        let mut seen: SparseMatrix<bool> = SparseMatrix::new(3, 3);
        seen.set(0, 2, true);
        // complement mask: already-seen (0,2) is suppressed
        let sq = a.multiply(&a, Some(&seen), true, Semiring::AnyPair);
        assert_eq!(sq.nvals(), 0);
    }

    #[test]
    fn test_resize_preserves_entries() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(2, 2);
        m.set(0, 1, true);
        m.resize(16, 16);
        assert!(m.contains(0, 1));
        assert_eq!(m.nvals(), 1);
    }
}
