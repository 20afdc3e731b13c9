//! Plan rewrites applied after building.
//!
//! The builder already places filters early and orders Cartesian branches;
//! what remains here is structural cleanup:
//!
//! - adjacent Filter nodes collapse into one AND predicate,
//! - filters over literal `true` disappear, literal `false` (and NULL)
//!   predicates turn the subtree into an Empty Result,
//! - a Cartesian product with an Empty Result branch is itself empty.

use crate::cypher::ast::{BinaryOp, Expr, Literal};
use super::PlanNode;

pub fn optimize(node: PlanNode) -> PlanNode {
    rewrite(node)
}

fn rewrite(node: PlanNode) -> PlanNode {
    match node {
        PlanNode::Filter { child, predicate } => {
            let child = rewrite(*child);
            match literal_truth(&predicate) {
                Some(true) => child,
                Some(false) => PlanNode::EmptyResult,
                None => match child {
                    PlanNode::EmptyResult => PlanNode::EmptyResult,
                    // Filter(Filter(x)) → Filter(x, a AND b)
                    PlanNode::Filter { child: inner, predicate: inner_pred } => PlanNode::Filter {
                        child: inner,
                        predicate: Expr::BinaryOp {
                            left: Box::new(inner_pred),
                            op: BinaryOp::And,
                            right: Box::new(predicate),
                        },
                    },
                    child => PlanNode::Filter { child: Box::new(child), predicate },
                },
            }
        }

        PlanNode::CartesianProduct { branches } => {
            let branches: Vec<PlanNode> = branches.into_iter().map(rewrite).collect();
            if branches.iter().any(|b| matches!(b, PlanNode::EmptyResult)) {
                return PlanNode::EmptyResult;
            }
            PlanNode::CartesianProduct { branches }
        }

        // structural recursion for everything else
        PlanNode::Results { child } => PlanNode::Results { child: Box::new(rewrite(*child)) },
        PlanNode::Project { child, items } => PlanNode::Project { child: Box::new(rewrite(*child)), items },
        PlanNode::Aggregate { child, keys, aggs } => {
            PlanNode::Aggregate { child: Box::new(rewrite(*child)), keys, aggs }
        }
        PlanNode::Sort { child, keys } => PlanNode::Sort { child: Box::new(rewrite(*child)), keys },
        PlanNode::Skip { child, count } => PlanNode::Skip { child: Box::new(rewrite(*child)), count },
        PlanNode::Limit { child, count } => PlanNode::Limit { child: Box::new(rewrite(*child)), count },
        PlanNode::Distinct { child, slots } => PlanNode::Distinct { child: Box::new(rewrite(*child)), slots },
        PlanNode::Traverse { child, ae, src_slot, dst_slot, edge_slot, var_len, desc } => {
            let child = rewrite(*child);
            if matches!(child, PlanNode::EmptyResult) {
                return PlanNode::EmptyResult;
            }
            PlanNode::Traverse { child: Box::new(child), ae, src_slot, dst_slot, edge_slot, var_len, desc }
        }
        PlanNode::ExpandInto { child, ae, src_slot, dst_slot, edge_slot, desc } => {
            let child = rewrite(*child);
            if matches!(child, PlanNode::EmptyResult) {
                return PlanNode::EmptyResult;
            }
            PlanNode::ExpandInto { child: Box::new(child), ae, src_slot, dst_slot, edge_slot, desc }
        }
        PlanNode::NamedPath { child, path_slot, element_slots } => {
            PlanNode::NamedPath { child: Box::new(rewrite(*child)), path_slot, element_slots }
        }
        PlanNode::Apply { lhs, rhs, optional } => PlanNode::Apply {
            lhs: Box::new(rewrite(*lhs)),
            rhs: Box::new(rewrite(*rhs)),
            optional,
        },
        PlanNode::Unwind { child, expr, slot } => PlanNode::Unwind {
            child: child.map(|c| Box::new(rewrite(*c))),
            expr,
            slot,
        },
        PlanNode::Create { child, nodes, edges } => PlanNode::Create {
            child: child.map(|c| Box::new(rewrite(*c))),
            nodes,
            edges,
        },
        PlanNode::Merge { child, nodes, edges, on_create, on_match } => PlanNode::Merge {
            child: child.map(|c| Box::new(rewrite(*c))),
            nodes,
            edges,
            on_create,
            on_match,
        },
        PlanNode::Update { child, items } => PlanNode::Update { child: Box::new(rewrite(*child)), items },
        PlanNode::Delete { child, exprs, detach } => {
            PlanNode::Delete { child: Box::new(rewrite(*child)), exprs, detach }
        }
        PlanNode::Foreach { child, variable_slot, list, body } => PlanNode::Foreach {
            child: child.map(|c| Box::new(rewrite(*c))),
            variable_slot,
            list,
            body,
        },

        leaf @ (PlanNode::AllNodeScan { .. }
        | PlanNode::NodeByLabelScan { .. }
        | PlanNode::IndexScan { .. }
        | PlanNode::Argument
        | PlanNode::EmptyRow
        | PlanNode::EmptyResult) => leaf,
    }
}

/// Literal truth of a predicate, when statically known.
fn literal_truth(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Literal(Literal::Bool(b)) => Some(*b),
        Expr::Literal(Literal::Null) => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(child: PlanNode, pred: Expr) -> PlanNode {
        PlanNode::Filter { child: Box::new(child), predicate: pred }
    }

    #[test]
    fn test_true_filter_removed() {
        let plan = filter(PlanNode::EmptyRow, Expr::Literal(Literal::Bool(true)));
        assert!(matches!(rewrite(plan), PlanNode::EmptyRow));
    }

    #[test]
    fn test_false_filter_is_empty() {
        let plan = filter(PlanNode::EmptyRow, Expr::Literal(Literal::Bool(false)));
        assert!(matches!(rewrite(plan), PlanNode::EmptyResult));
    }

    #[test]
    fn test_adjacent_filters_merge() {
        let plan = filter(
            filter(PlanNode::EmptyRow, Expr::Variable("a".into())),
            Expr::Variable("b".into()),
        );
        let PlanNode::Filter { predicate, child } = rewrite(plan) else { panic!() };
        assert!(matches!(predicate, Expr::BinaryOp { op: BinaryOp::And, .. }));
        assert!(matches!(*child, PlanNode::EmptyRow));
    }

    #[test]
    fn test_empty_branch_collapses_product() {
        let plan = PlanNode::CartesianProduct {
            branches: vec![PlanNode::EmptyRow, PlanNode::EmptyResult],
        };
        assert!(matches!(rewrite(plan), PlanNode::EmptyResult));
    }
}
