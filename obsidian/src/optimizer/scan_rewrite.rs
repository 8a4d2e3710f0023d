//! Sequential scan with a single equality predicate over an indexed column
//! becomes a point index scan.

use std::sync::Arc;

use super::transform_up;
use crate::catalog::Catalog;
use crate::expression::{split_conjunction, BinaryOperator, Expression};
use crate::plan::PlanNode;
use crate::value::Value;

fn single_column_equality(filter: &Expression) -> Option<(usize, Value)> {
    let conjuncts = split_conjunction(filter);
    // Anything beyond one plain equality (a second equality, a range
    // condition) keeps the sequential scan.
    if conjuncts.len() != 1 {
        return None;
    }
    let Expression::Binary {
        op: BinaryOperator::Eq,
        left,
        right,
    } = conjuncts[0]
    else {
        return None;
    };
    match (left.as_ref(), right.as_ref()) {
        (Expression::ColumnRef { side: 0, index }, Expression::Literal(value))
        | (Expression::Literal(value), Expression::ColumnRef { side: 0, index }) => {
            Some((*index, value.clone()))
        }
        _ => None,
    }
}

pub fn seqscan_as_indexscan(plan: &Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    transform_up(plan, &|node| {
        let PlanNode::SeqScan {
            table_oid,
            table_name,
            filter: Some(filter),
            schema,
        } = node.as_ref()
        else {
            return node;
        };
        let Some((column, value)) = single_column_equality(filter) else {
            return node;
        };
        let Some(index) = catalog
            .get_table_indexes(table_name)
            .into_iter()
            .find(|index| index.key_attrs == [column])
        else {
            return node;
        };
        crate::obsidian_debug_log!(
            "[optimizer] seq scan of {table_name} -> index scan via {}",
            index.name
        );
        Arc::new(PlanNode::IndexScan {
            table_oid: *table_oid,
            index_oid: index.oid,
            key: vec![value],
            schema: schema.clone(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, Schema, TypeId};
    use quarry::disk_manager::DiskManager;
    use quarry::BufferPoolManager;
    use tempfile::tempdir;

    fn catalog_with_index() -> (tempfile::TempDir, Catalog, u32) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(64, disk, 2));
        let mut catalog = Catalog::new();
        let table = catalog
            .create_table(
                bpm.clone(),
                "accounts",
                Schema::new(vec![
                    Column::new("id", TypeId::Integer),
                    Column::new("balance", TypeId::Integer),
                ]),
            )
            .unwrap();
        catalog
            .create_index(bpm, "accounts_pk", "accounts", vec![0])
            .unwrap();
        (dir, catalog, table.oid)
    }

    fn scan(oid: u32, filter: Option<Expression>) -> Arc<PlanNode> {
        Arc::new(PlanNode::SeqScan {
            table_oid: oid,
            table_name: "accounts".to_string(),
            filter,
            schema: Schema::new(vec![
                Column::new("id", TypeId::Integer),
                Column::new("balance", TypeId::Integer),
            ]),
        })
    }

    #[test]
    fn indexed_equality_becomes_an_index_scan() {
        let (_dir, catalog, oid) = catalog_with_index();
        let plan = scan(
            oid,
            Some(Expression::eq(
                Expression::column(0),
                Expression::literal(Value::Int(7)),
            )),
        );
        let rewritten = seqscan_as_indexscan(&plan, &catalog);
        let PlanNode::IndexScan { key, .. } = rewritten.as_ref() else {
            panic!("expected an index scan, got {rewritten:?}");
        };
        assert_eq!(key, &vec![Value::Int(7)]);
    }

    #[test]
    fn unindexed_or_narrowed_predicates_keep_the_seq_scan() {
        let (_dir, catalog, oid) = catalog_with_index();

        // Equality on a column with no index.
        let plan = scan(
            oid,
            Some(Expression::eq(
                Expression::column(1),
                Expression::literal(Value::Int(7)),
            )),
        );
        assert!(matches!(
            seqscan_as_indexscan(&plan, &catalog).as_ref(),
            PlanNode::SeqScan { .. }
        ));

        // An extra range conjunct narrows the scan beyond the point lookup.
        let plan = scan(
            oid,
            Some(Expression::and(
                Expression::eq(Expression::column(0), Expression::literal(Value::Int(7))),
                Expression::binary(
                    BinaryOperator::Gt,
                    Expression::column(1),
                    Expression::literal(Value::Int(0)),
                ),
            )),
        );
        assert!(matches!(
            seqscan_as_indexscan(&plan, &catalog).as_ref(),
            PlanNode::SeqScan { .. }
        ));

        // A range on its own is no candidate at all.
        let plan = scan(
            oid,
            Some(Expression::binary(
                BinaryOperator::Lt,
                Expression::column(0),
                Expression::literal(Value::Int(7)),
            )),
        );
        assert!(matches!(
            seqscan_as_indexscan(&plan, &catalog).as_ref(),
            PlanNode::SeqScan { .. }
        ));
    }
}
