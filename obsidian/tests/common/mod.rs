//! Shared fixture: a database in a tempdir plus plan-building helpers.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use obsidian::catalog::TableInfo;
use obsidian::errors::DbError;
use obsidian::executor::execute_plan;
use obsidian::expression::Expression;
use obsidian::plan::PlanNode;
use obsidian::transaction::Transaction;
use obsidian::tuple::Tuple;
use obsidian::types::{Column, Schema, TypeId};
use obsidian::value::Value;
use obsidian::Database;
use tempfile::TempDir;

pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

pub fn setup(test_name: &str) -> TestDb {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join(format!("{test_name}.db"))).unwrap();
    TestDb { db, _dir: dir }
}

pub fn int_schema(names: &[&str]) -> Schema {
    Schema::new(
        names
            .iter()
            .map(|name| Column::new(*name, TypeId::Integer))
            .collect(),
    )
}

pub fn create_table(test_db: &TestDb, name: &str, columns: &[&str]) -> Arc<TableInfo> {
    test_db
        .db
        .catalog
        .lock()
        .unwrap()
        .create_table(test_db.db.bpm.clone(), name, int_schema(columns))
        .unwrap()
}

pub fn create_pk_index(test_db: &TestDb, table_name: &str) {
    test_db
        .db
        .catalog
        .lock()
        .unwrap()
        .create_index(
            test_db.db.bpm.clone(),
            &format!("{table_name}_pk"),
            table_name,
            vec![0],
        )
        .unwrap();
}

pub fn values_plan(rows: &[Vec<i32>], schema: Schema) -> Arc<PlanNode> {
    let rows = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| Expression::literal(Value::Int(*v)))
                .collect()
        })
        .collect();
    Arc::new(PlanNode::Values { rows, schema })
}

pub fn insert_plan(table: &TableInfo, rows: &[Vec<i32>]) -> Arc<PlanNode> {
    Arc::new(PlanNode::Insert {
        child: values_plan(rows, table.schema.clone()),
        table_oid: table.oid,
        schema: PlanNode::dml_schema(),
    })
}

pub fn seq_scan_plan(table: &TableInfo, filter: Option<Expression>) -> Arc<PlanNode> {
    Arc::new(PlanNode::SeqScan {
        table_oid: table.oid,
        table_name: table.name.clone(),
        filter,
        schema: table.schema.clone(),
    })
}

pub fn delete_plan(table: &TableInfo, filter: Option<Expression>) -> Arc<PlanNode> {
    Arc::new(PlanNode::Delete {
        child: seq_scan_plan(table, filter),
        table_oid: table.oid,
        schema: PlanNode::dml_schema(),
    })
}

pub fn update_plan(
    table: &TableInfo,
    filter: Option<Expression>,
    target_expressions: Vec<Expression>,
) -> Arc<PlanNode> {
    Arc::new(PlanNode::Update {
        child: seq_scan_plan(table, filter),
        table_oid: table.oid,
        target_expressions,
        schema: PlanNode::dml_schema(),
    })
}

/// Equality filter `column = value` over integer columns.
pub fn col_eq(column: usize, value: i32) -> Expression {
    Expression::eq(
        Expression::column(column),
        Expression::literal(Value::Int(value)),
    )
}

pub fn run(
    test_db: &TestDb,
    txn: &Arc<Transaction>,
    plan: &Arc<PlanNode>,
) -> Result<Vec<Tuple>, DbError> {
    let ctx = test_db.db.executor_context(txn.clone());
    execute_plan(plan, &ctx)
}

/// Runs a plan and decodes every output row against `schema`.
pub fn run_rows(
    test_db: &TestDb,
    txn: &Arc<Transaction>,
    plan: &Arc<PlanNode>,
    schema: &Schema,
) -> Vec<Vec<Value>> {
    run(test_db, txn, plan)
        .unwrap()
        .iter()
        .map(|tuple| tuple.values(schema))
        .collect()
}

/// Scans a table in its own row order and returns `(col0, col1)` pairs.
pub fn scan_pairs(test_db: &TestDb, txn: &Arc<Transaction>, table: &TableInfo) -> Vec<(i32, i32)> {
    let plan = seq_scan_plan(table, None);
    run_rows(test_db, txn, &plan, &table.schema)
        .iter()
        .map(|row| match (&row[0], &row[1]) {
            (Value::Int(a), Value::Int(b)) => (*a, *b),
            other => panic!("unexpected row shape {other:?}"),
        })
        .collect()
}
