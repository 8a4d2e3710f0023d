//! Join rewrites: equality pushdown through NLJ chains, extraction of
//! non-equi residues into filters, and the NLJ to hash join conversion.

use std::sync::Arc;

use super::{map_children, transform_up};
use crate::expression::{conjoin, split_conjunction, BinaryOperator, Expression};
use crate::plan::{JoinType, PlanNode};
use crate::value::Value;

/// A join conjunct `left-side column = right-side column`, normalized to
/// flat output-column coordinates (right columns offset by the left width).
fn as_flat_equality(expr: &Expression, left_width: usize) -> Option<(usize, usize)> {
    let Expression::Binary {
        op: BinaryOperator::Eq,
        left,
        right,
    } = expr
    else {
        return None;
    };
    let flat = |e: &Expression| match e {
        Expression::ColumnRef { side: 0, index } => Some(*index),
        Expression::ColumnRef { side: 1, index } => Some(left_width + index),
        _ => None,
    };
    let a = flat(left)?;
    let b = flat(right)?;
    Some((a.min(b), a.max(b)))
}

fn flat_to_join_expr(index: usize, left_width: usize) -> Expression {
    if index < left_width {
        Expression::join_column(0, index)
    } else {
        Expression::join_column(1, index - left_width)
    }
}

fn equality_from_flat(a: usize, b: usize, left_width: usize) -> Expression {
    Expression::eq(
        flat_to_join_expr(a, left_width),
        flat_to_join_expr(b, left_width),
    )
}

/// Flattens chains of inner NLJs whose predicates are pure equality
/// conjunctions, sinking every equality onto the deepest join that sees
/// both of its columns.
pub fn push_down_join_predicates(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    let rebuilt = Arc::new(map_children(plan, &mut |child| {
        push_down_join_predicates(child)
    }));

    let PlanNode::NestedLoopJoin {
        left,
        right,
        predicate,
        join_type: JoinType::Inner,
        schema,
    } = rebuilt.as_ref()
    else {
        return rebuilt;
    };
    let PlanNode::NestedLoopJoin {
        left: inner_left,
        right: inner_right,
        predicate: inner_predicate,
        join_type: JoinType::Inner,
        schema: inner_schema,
    } = left.as_ref()
    else {
        return rebuilt;
    };

    let left_width = left.output_schema().column_count();
    let conjuncts = split_conjunction(predicate);
    let pairs: Option<Vec<(usize, usize)>> = conjuncts
        .iter()
        .map(|c| as_flat_equality(c, left_width))
        .collect();
    let Some(pairs) = pairs else {
        return rebuilt;
    };

    let (sink, keep): (Vec<_>, Vec<_>) = pairs.into_iter().partition(|(_, b)| *b < left_width);
    if sink.is_empty() {
        return rebuilt;
    }

    // Fold the sinking equalities into the inner join's predicate, then
    // push again: they may belong even deeper.
    let inner_left_width = inner_left.output_schema().column_count();
    let mut inner_conjuncts = vec![inner_predicate.clone()];
    inner_conjuncts.extend(
        sink.into_iter()
            .map(|(a, b)| equality_from_flat(a, b, inner_left_width)),
    );
    let new_left = Arc::new(PlanNode::NestedLoopJoin {
        left: inner_left.clone(),
        right: inner_right.clone(),
        predicate: conjoin(inner_conjuncts).expect("at least one conjunct"),
        join_type: JoinType::Inner,
        schema: inner_schema.clone(),
    });
    let new_left = push_down_join_predicates(&new_left);

    let new_predicate = conjoin(
        keep.into_iter()
            .map(|(a, b)| equality_from_flat(a, b, left_width))
            .collect(),
    )
    .unwrap_or(Expression::Literal(Value::Bool(true)));

    Arc::new(PlanNode::NestedLoopJoin {
        left: new_left,
        right: right.clone(),
        predicate: new_predicate,
        join_type: JoinType::Inner,
        schema: schema.clone(),
    })
}

/// Moves the non-equi conjuncts of an inner NLJ predicate into a filter
/// above the join, leaving a pure equi-join behind for the hash join rule.
pub fn extract_filter_from_nlj(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    transform_up(plan, &|node| {
        let PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type: JoinType::Inner,
            schema,
        } = node.as_ref()
        else {
            return node;
        };

        let left_width = left.output_schema().column_count();
        let conjuncts = split_conjunction(predicate);
        let (equi, residue): (Vec<_>, Vec<_>) = conjuncts
            .into_iter()
            .partition(|c| as_flat_equality(c, left_width).is_some());
        if equi.is_empty() || residue.is_empty() {
            return node;
        }

        let join = Arc::new(PlanNode::NestedLoopJoin {
            left: left.clone(),
            right: right.clone(),
            predicate: conjoin(equi.into_iter().cloned().collect())
                .expect("equi conjuncts present"),
            join_type: JoinType::Inner,
            schema: schema.clone(),
        });
        let residue = residue
            .into_iter()
            .map(|c| rebase_join_expr(c, left_width))
            .collect();
        Arc::new(PlanNode::Filter {
            child: join,
            predicate: conjoin(residue).expect("residue conjuncts present"),
        })
    })
}

/// Rewrites a join predicate's column references into the coordinates of
/// the joined output row.
fn rebase_join_expr(expr: &Expression, left_width: usize) -> Expression {
    match expr {
        Expression::ColumnRef { side: 1, index } => Expression::column(left_width + index),
        Expression::ColumnRef { .. } | Expression::Literal(_) => expr.clone(),
        Expression::Binary { op, left, right } => Expression::binary(
            *op,
            rebase_join_expr(left, left_width),
            rebase_join_expr(right, left_width),
        ),
    }
}

/// Converts an NLJ whose predicate is a conjunction of column equalities
/// into a hash join keyed on those columns.
pub fn nlj_as_hash_join(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    transform_up(plan, &|node| {
        let PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
            schema,
        } = node.as_ref()
        else {
            return node;
        };
        let Some((left_keys, right_keys)) = extract_equi_keys(predicate) else {
            return node;
        };
        Arc::new(PlanNode::HashJoin {
            left: left.clone(),
            right: right.clone(),
            left_keys,
            right_keys,
            join_type: *join_type,
            schema: schema.clone(),
        })
    })
}

/// Splits `l.a = r.x AND l.b = r.y AND ...` into per-side key lists. The
/// returned keys are single-input expressions, evaluated against each
/// child on its own.
fn extract_equi_keys(predicate: &Expression) -> Option<(Vec<Expression>, Vec<Expression>)> {
    let conjuncts = split_conjunction(predicate);
    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for conjunct in conjuncts {
        let Expression::Binary {
            op: BinaryOperator::Eq,
            left,
            right,
        } = conjunct
        else {
            return None;
        };
        match (left.as_ref(), right.as_ref()) {
            (
                Expression::ColumnRef { side: 0, index: l },
                Expression::ColumnRef { side: 1, index: r },
            ) => {
                left_keys.push(Expression::column(*l));
                right_keys.push(Expression::column(*r));
            }
            (
                Expression::ColumnRef { side: 1, index: r },
                Expression::ColumnRef { side: 0, index: l },
            ) => {
                left_keys.push(Expression::column(*l));
                right_keys.push(Expression::column(*r));
            }
            _ => return None,
        }
    }
    if left_keys.is_empty() {
        return None;
    }
    Some((left_keys, right_keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, Schema, TypeId};

    fn scan(oid: u32, names: &[&str]) -> Arc<PlanNode> {
        Arc::new(PlanNode::SeqScan {
            table_oid: oid,
            table_name: format!("t{oid}"),
            filter: None,
            schema: Schema::new(
                names
                    .iter()
                    .map(|n| Column::new(*n, TypeId::Integer))
                    .collect(),
            ),
        })
    }

    fn nlj(left: Arc<PlanNode>, right: Arc<PlanNode>, predicate: Expression) -> Arc<PlanNode> {
        let schema = Schema::join(left.output_schema(), right.output_schema());
        Arc::new(PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type: JoinType::Inner,
            schema,
        })
    }

    #[test]
    fn two_column_equality_becomes_a_hash_join() {
        let plan = nlj(
            scan(0, &["x", "y"]),
            scan(1, &["x", "y"]),
            Expression::and(
                Expression::eq(
                    Expression::join_column(0, 0),
                    Expression::join_column(1, 0),
                ),
                Expression::eq(
                    Expression::join_column(1, 1),
                    Expression::join_column(0, 1),
                ),
            ),
        );
        let rewritten = nlj_as_hash_join(&plan);
        let PlanNode::HashJoin {
            left_keys,
            right_keys,
            ..
        } = rewritten.as_ref()
        else {
            panic!("expected a hash join, got {rewritten:?}");
        };
        assert_eq!(
            left_keys,
            &vec![Expression::column(0), Expression::column(1)]
        );
        assert_eq!(
            right_keys,
            &vec![Expression::column(0), Expression::column(1)]
        );
    }

    #[test]
    fn non_equi_predicates_block_the_hash_join() {
        let plan = nlj(
            scan(0, &["x"]),
            scan(1, &["x"]),
            Expression::binary(
                BinaryOperator::Lt,
                Expression::join_column(0, 0),
                Expression::join_column(1, 0),
            ),
        );
        assert!(matches!(
            nlj_as_hash_join(&plan).as_ref(),
            PlanNode::NestedLoopJoin { .. }
        ));
    }

    #[test]
    fn mixed_predicate_splits_into_filter_over_equi_join() {
        let plan = nlj(
            scan(0, &["x", "y"]),
            scan(1, &["x", "y"]),
            Expression::and(
                Expression::eq(
                    Expression::join_column(0, 0),
                    Expression::join_column(1, 0),
                ),
                Expression::binary(
                    BinaryOperator::Lt,
                    Expression::join_column(1, 1),
                    Expression::Literal(Value::Int(10)),
                ),
            ),
        );
        let rewritten = extract_filter_from_nlj(&plan);
        let PlanNode::Filter { child, predicate } = rewritten.as_ref() else {
            panic!("expected a filter, got {rewritten:?}");
        };
        // The residue now addresses the join output: right column 1 is
        // flat column 3.
        assert_eq!(
            predicate,
            &Expression::binary(
                BinaryOperator::Lt,
                Expression::column(3),
                Expression::Literal(Value::Int(10)),
            )
        );
        assert!(matches!(child.as_ref(), PlanNode::NestedLoopJoin { .. }));
    }

    #[test]
    fn chained_join_equalities_sink_to_the_deepest_join() {
        // (A join B on true) join C on A.a = B.a AND A.b = C.b
        let inner = nlj(
            scan(0, &["a", "b"]),
            scan(1, &["a", "b"]),
            Expression::Literal(Value::Bool(true)),
        );
        let plan = nlj(
            inner,
            scan(2, &["b"]),
            Expression::and(
                Expression::eq(
                    Expression::join_column(0, 0),
                    Expression::join_column(0, 2),
                ),
                Expression::eq(
                    Expression::join_column(0, 1),
                    Expression::join_column(1, 0),
                ),
            ),
        );

        let rewritten = push_down_join_predicates(&plan);
        let PlanNode::NestedLoopJoin {
            left, predicate, ..
        } = rewritten.as_ref()
        else {
            panic!("expected an outer join");
        };
        // The A.b = C.b equality stays on the outer join.
        assert_eq!(
            predicate,
            &Expression::eq(
                Expression::join_column(0, 1),
                Expression::join_column(1, 0),
            )
        );
        // The A.a = B.a equality now lives on the inner join.
        let PlanNode::NestedLoopJoin {
            predicate: inner_predicate,
            ..
        } = left.as_ref()
        else {
            panic!("expected an inner join");
        };
        let conjuncts = split_conjunction(inner_predicate);
        assert!(conjuncts.contains(&&Expression::eq(
            Expression::join_column(0, 0),
            Expression::join_column(1, 0),
        )));
    }
}
