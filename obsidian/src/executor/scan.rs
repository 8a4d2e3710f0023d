use std::sync::Arc;

use quarry::table_heap::TableIterator;
use quarry::Rid;

use super::{Executor, ExecutorContext};
use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::DbError;
use crate::expression::Expression;
use crate::transaction::{visible_tuple, IsolationLevel};
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

/// Walks the table heap, reconstructing the version of each tuple visible
/// at the transaction's snapshot and applying the pushed-down filter.
pub struct SeqScanExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    filter: Option<Expression>,
    iter: Option<TableIterator>,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(ctx: &'a ExecutorContext, table: Arc<TableInfo>, filter: Option<Expression>) -> Self {
        Self {
            ctx,
            table,
            filter,
            iter: None,
        }
    }
}

impl<'a> Executor for SeqScanExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.iter = Some(self.table.heap.iter());
        if self.ctx.txn.isolation() == IsolationLevel::Serializable {
            let predicate = self
                .filter
                .clone()
                .unwrap_or(Expression::Literal(Value::Bool(true)));
            self.ctx.txn.append_scan_predicate(self.table.oid, predicate);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| DbError::Internal("seq scan used before init".to_string()))?;
        for (meta, bytes, rid) in iter.by_ref() {
            let base = Tuple::from_bytes(bytes);
            let Some(tuple) = visible_tuple(
                &self.ctx.txn_manager,
                &self.ctx.txn,
                &self.table.schema,
                meta,
                &base,
                rid,
            ) else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.evaluate_as_filter(&tuple, &self.table.schema)? {
                    continue;
                }
            }
            return Ok(Some((tuple, rid)));
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        &self.table.schema
    }
}

/// Point lookup through a unique hash index: at most one row.
pub struct IndexScanExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    index: Arc<IndexInfo>,
    key: Vec<Value>,
    done: bool,
}

impl<'a> IndexScanExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        table: Arc<TableInfo>,
        index: Arc<IndexInfo>,
        key: Vec<Value>,
    ) -> Self {
        Self {
            ctx,
            table,
            index,
            key,
            done: false,
        }
    }
}

impl<'a> Executor for IndexScanExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.done = false;
        if self.ctx.txn.isolation() == IsolationLevel::Serializable {
            let mut predicate: Option<Expression> = None;
            for (attr, value) in self.index.key_attrs.iter().zip(self.key.iter()) {
                let eq = Expression::eq(
                    Expression::column(*attr),
                    Expression::literal(value.clone()),
                );
                predicate = Some(match predicate {
                    Some(p) => Expression::and(p, eq),
                    None => eq,
                });
            }
            if let Some(predicate) = predicate {
                self.ctx.txn.append_scan_predicate(self.table.oid, predicate);
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let rids = self.index.index.scan_key(&self.key)?;
        let Some(&rid) = rids.first() else {
            return Ok(None);
        };
        let (meta, bytes) = self.table.heap.get_tuple(rid)?;
        let base = Tuple::from_bytes(bytes);
        let Some(tuple) = visible_tuple(
            &self.ctx.txn_manager,
            &self.ctx.txn,
            &self.table.schema,
            meta,
            &base,
            rid,
        ) else {
            return Ok(None);
        };
        Ok(Some((tuple, rid)))
    }

    fn schema(&self) -> &Schema {
        &self.table.schema
    }
}

/// Emits a fixed list of literal rows; feeds Insert.
pub struct ValuesExecutor {
    rows: Vec<Vec<Expression>>,
    schema: Schema,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(rows: Vec<Vec<Expression>>, schema: Schema) -> Self {
        Self {
            rows,
            schema,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<(), DbError> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let empty = Tuple::from_values(&[], &Schema::default());
        let mut values = Vec::with_capacity(row.len());
        for expr in row {
            values.push(expr.evaluate(&empty, &Schema::default())?);
        }
        Ok(Some((
            Tuple::from_values(&values, &self.schema),
            Rid::INVALID,
        )))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
