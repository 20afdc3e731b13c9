//! Property-based tests for the delta-matrix layer: arbitrary write
//! sequences against a reference model, with the structural invariants
//! checked after every step.

use proptest::prelude::*;
use std::collections::HashSet;

use deltagraph::store::{DeltaMatrix, Semiring};

const DIM: u64 = 16;

#[derive(Debug, Clone)]
enum Op {
    Set(u64, u64),
    Clear(u64, u64),
    Flush,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..DIM, 0..DIM).prop_map(|(i, j)| Op::Set(i, j)),
        4 => (0..DIM, 0..DIM).prop_map(|(i, j)| Op::Clear(i, j)),
        1 => Just(Op::Flush),
    ]
}

/// Reference model: a plain set of coordinates.
fn apply_model(model: &mut HashSet<(u64, u64)>, op: &Op) {
    match op {
        Op::Set(i, j) => {
            model.insert((*i, *j));
        }
        Op::Clear(i, j) => {
            model.remove(&(*i, *j));
        }
        Op::Flush => {}
    }
}

fn apply_matrix(matrix: &mut DeltaMatrix<bool>, op: &Op) {
    match op {
        Op::Set(i, j) => matrix.set(*i, *j, true),
        Op::Clear(i, j) => matrix.clear(*i, *j),
        Op::Flush => matrix.flush(),
    }
}

proptest! {
    /// After any write sequence the logical view equals the model and the
    /// delta invariants hold.
    #[test]
    fn prop_logical_view_matches_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut matrix: DeltaMatrix<bool> = DeltaMatrix::new(DIM, DIM);
        let mut model: HashSet<(u64, u64)> = HashSet::new();

        for op in &ops {
            apply_matrix(&mut matrix, op);
            apply_model(&mut model, op);

            // logical view equals the model, pointwise and by count
            prop_assert_eq!(matrix.nnz(), model.len() as u64);
            for i in 0..DIM {
                for j in 0..DIM {
                    prop_assert_eq!(matrix.contains(i, j), model.contains(&(i, j)),
                        "mismatch at ({}, {})", i, j);
                }
            }
        }
    }

    /// flush preserves the logical content, empties the deltas, and is
    /// idempotent.
    #[test]
    fn prop_flush_preserves_logical(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let mut matrix: DeltaMatrix<bool> = DeltaMatrix::new(DIM, DIM);
        for op in &ops {
            apply_matrix(&mut matrix, op);
        }

        let before: Vec<(u64, u64, bool)> = matrix.iter_logical();
        let nnz_before = matrix.nnz();

        matrix.flush();
        prop_assert!(matrix.synced());
        prop_assert_eq!(matrix.nnz(), nnz_before);
        prop_assert_eq!(matrix.iter_logical(), before.clone());

        matrix.flush();
        prop_assert_eq!(matrix.iter_logical(), before);
    }

    /// Row iteration respects deltas and ascends.
    #[test]
    fn prop_row_iter_ascending_and_complete(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let mut matrix: DeltaMatrix<bool> = DeltaMatrix::new(DIM, DIM);
        let mut model: HashSet<(u64, u64)> = HashSet::new();
        for op in &ops {
            apply_matrix(&mut matrix, op);
            apply_model(&mut model, op);
        }

        for i in 0..DIM {
            let cols: Vec<u64> = matrix.row_iter(i).map(|(j, _)| j).collect();
            let mut expected: Vec<u64> = model.iter()
                .filter(|(r, _)| *r == i)
                .map(|(_, c)| *c)
                .collect();
            expected.sort_unstable();
            prop_assert_eq!(cols, expected);
        }
    }

    /// Multiply refuses Pending state and, once flushed, agrees with the
    /// reference two-hop reachability.
    #[test]
    fn prop_multiply_matches_reachability(edges in prop::collection::hash_set((0..DIM, 0..DIM), 0..40)) {
        let mut matrix: DeltaMatrix<bool> = DeltaMatrix::new(DIM, DIM);
        for (i, j) in &edges {
            matrix.set(*i, *j, true);
        }
        if !matrix.synced() {
            prop_assert!(matrix.multiply(&matrix, None, false, Semiring::AnyPair).is_err());
        }
        matrix.flush();

        let squared = matrix.multiply(&matrix, None, false, Semiring::AnyPair).unwrap();
        for i in 0..DIM {
            for j in 0..DIM {
                let reachable = (0..DIM).any(|k| edges.contains(&(i, k)) && edges.contains(&(k, j)));
                prop_assert_eq!(squared.contains(i, j), reachable, "at ({}, {})", i, j);
            }
        }
    }
}
