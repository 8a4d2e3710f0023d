use std::sync::Arc;

use quarry::{Rid, TupleMeta};

use super::{Executor, ExecutorContext};
use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::DbError;
use crate::expression::Expression;
use crate::transaction::{
    check_write_write_conflict, TransactionState, UndoLink, UndoLog,
};
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

fn taint(ctx: &ExecutorContext) {
    ctx.txn.set_state(TransactionState::Tainted);
}

fn dml_row(count: i32, schema: &Schema) -> (Tuple, Rid) {
    (
        Tuple::from_values(&[Value::Int(count)], schema),
        Rid::INVALID,
    )
}

/// Pulls rows from its child and appends them to the table, maintaining
/// every index. A key that collides with a live row fails; a key whose row
/// died is reclaimed in place, linking the new version behind the delete.
pub struct InsertExecutor<'a> {
    ctx: &'a ExecutorContext,
    child: Box<dyn Executor + 'a>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    schema: Schema,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        child: Box<dyn Executor + 'a>,
        table: Arc<TableInfo>,
        indexes: Vec<Arc<IndexInfo>>,
    ) -> Self {
        Self {
            ctx,
            child,
            table,
            indexes,
            schema: crate::plan::PlanNode::dml_schema(),
            done: false,
        }
    }

    fn insert_row(&mut self, tuple: Tuple) -> Result<(), DbError> {
        let txn = &self.ctx.txn;
        let txn_manager = &self.ctx.txn_manager;
        let row = tuple.values(&self.table.schema);

        for index in &self.indexes {
            let key = index.key_from_row(&row);
            let Some(rid) = index.index.scan_key(&key)?.first().copied() else {
                continue;
            };

            let meta = self.table.heap.get_tuple_meta(rid)?;
            if check_write_write_conflict(&meta, txn) {
                taint(self.ctx);
                return Err(DbError::TxnConflict(format!(
                    "insert raced a concurrent writer on {rid:?}"
                )));
            }
            if !meta.is_deleted {
                taint(self.ctx);
                return Err(DbError::IndexConflict(format!(
                    "key {key:?} already maps to a live row"
                )));
            }

            // The slot holds a dead version: reuse the RID and chain the
            // delete behind the fresh payload.
            if meta.ts != txn.id() {
                let log = UndoLog {
                    ts: meta.ts,
                    is_deleted: true,
                    modified_fields: vec![false; self.table.schema.column_count()],
                    values: Vec::new(),
                    prev_version: txn_manager.read_undo_link(rid),
                };
                let log_index = txn.append_undo_log(log);
                txn_manager.update_undo_link(
                    rid,
                    Some(UndoLink {
                        txn_id: txn.id(),
                        log_index,
                    }),
                );
            }
            self.table.heap.update_tuple_in_place(
                TupleMeta {
                    ts: txn.id(),
                    is_deleted: false,
                },
                tuple.data(),
                rid,
            )?;
            txn.record_write(self.table.oid, rid);
            return Ok(());
        }

        let rid = self.table.heap.insert_tuple(
            TupleMeta {
                ts: txn.id(),
                is_deleted: false,
            },
            tuple.data(),
        )?;
        txn.record_write(self.table.oid, rid);
        for index in &self.indexes {
            let key = index.key_from_row(&row);
            if let Err(err) = index.index.insert_entry(&key, rid) {
                taint(self.ctx);
                return Err(err);
            }
        }
        Ok(())
    }
}

impl<'a> Executor for InsertExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0;
        while let Some((tuple, _)) = self.child.next()? {
            self.insert_row(tuple)?;
            count += 1;
        }
        Ok(Some(dml_row(count, &self.schema)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Marks each child row deleted, capturing the full prior tuple in an undo
/// record. Index entries stay so the RID remains reachable for reclaiming
/// inserts and snapshot readers.
pub struct DeleteExecutor<'a> {
    ctx: &'a ExecutorContext,
    child: Box<dyn Executor + 'a>,
    table: Arc<TableInfo>,
    schema: Schema,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        child: Box<dyn Executor + 'a>,
        table: Arc<TableInfo>,
    ) -> Self {
        Self {
            ctx,
            child,
            table,
            schema: crate::plan::PlanNode::dml_schema(),
            done: false,
        }
    }

    fn delete_row(&self, rid: Rid) -> Result<(), DbError> {
        let txn = &self.ctx.txn;
        let txn_manager = &self.ctx.txn_manager;
        let (meta, base_bytes) = self.table.heap.get_tuple(rid)?;

        if check_write_write_conflict(&meta, txn) {
            taint(self.ctx);
            return Err(DbError::TxnConflict(format!(
                "delete raced a concurrent writer on {rid:?}"
            )));
        }

        if meta.ts != txn.id() {
            let base = Tuple::from_bytes(base_bytes);
            let values = base.values(&self.table.schema);
            let log = UndoLog {
                ts: meta.ts,
                is_deleted: meta.is_deleted,
                modified_fields: vec![true; self.table.schema.column_count()],
                values,
                prev_version: txn_manager.read_undo_link(rid),
            };
            let log_index = txn.append_undo_log(log);
            txn_manager.update_undo_link(
                rid,
                Some(UndoLink {
                    txn_id: txn.id(),
                    log_index,
                }),
            );
        }
        self.table.heap.update_tuple_meta(
            TupleMeta {
                ts: txn.id(),
                is_deleted: true,
            },
            rid,
        )?;
        txn.record_write(self.table.oid, rid);
        Ok(())
    }
}

impl<'a> Executor for DeleteExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0;
        while let Some((_, rid)) = self.child.next()? {
            self.delete_row(rid)?;
            count += 1;
        }
        Ok(Some(dml_row(count, &self.schema)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Rewrites each child row in place: delete-plus-insert on the same RID,
/// with an undo record masking exactly the touched fields. Key-changing
/// updates arrive from the planner as an explicit delete and insert.
pub struct UpdateExecutor<'a> {
    ctx: &'a ExecutorContext,
    child: Box<dyn Executor + 'a>,
    table: Arc<TableInfo>,
    target_expressions: Vec<Expression>,
    schema: Schema,
    done: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        child: Box<dyn Executor + 'a>,
        table: Arc<TableInfo>,
        target_expressions: Vec<Expression>,
    ) -> Self {
        Self {
            ctx,
            child,
            table,
            target_expressions,
            schema: crate::plan::PlanNode::dml_schema(),
            done: false,
        }
    }

    fn update_row(&self, old_tuple: &Tuple, rid: Rid) -> Result<(), DbError> {
        let txn = &self.ctx.txn;
        let txn_manager = &self.ctx.txn_manager;
        let table_schema = &self.table.schema;

        let mut new_values = Vec::with_capacity(self.target_expressions.len());
        for expr in &self.target_expressions {
            new_values.push(expr.evaluate(old_tuple, table_schema)?);
        }

        let meta = self.table.heap.get_tuple_meta(rid)?;
        if check_write_write_conflict(&meta, txn) {
            taint(self.ctx);
            return Err(DbError::TxnConflict(format!(
                "update raced a concurrent writer on {rid:?}"
            )));
        }

        let base_values = old_tuple.values(table_schema);
        if meta.ts == txn.id() {
            // A second write of our own: widen the existing undo record so
            // it still reconstructs the pre-transaction version.
            if let Some(link) = txn_manager
                .read_undo_link(rid)
                .filter(|l| l.txn_id == txn.id())
            {
                let mut log = txn
                    .undo_log(link.log_index)
                    .ok_or_else(|| DbError::Internal("dangling undo link".to_string()))?;
                if !log.is_deleted {
                    for field in 0..table_schema.column_count() {
                        if base_values[field] != new_values[field] && !log.modified_fields[field]
                        {
                            let position = log.modified_fields[..field]
                                .iter()
                                .filter(|m| **m)
                                .count();
                            log.modified_fields[field] = true;
                            log.values.insert(position, base_values[field].clone());
                        }
                    }
                    txn.modify_undo_log(link.log_index, log);
                }
            }
        } else {
            let mut modified_fields = vec![false; table_schema.column_count()];
            let mut values = Vec::new();
            for field in 0..table_schema.column_count() {
                if base_values[field] != new_values[field] {
                    modified_fields[field] = true;
                    values.push(base_values[field].clone());
                }
            }
            let log = UndoLog {
                ts: meta.ts,
                is_deleted: meta.is_deleted,
                modified_fields,
                values,
                prev_version: txn_manager.read_undo_link(rid),
            };
            let log_index = txn.append_undo_log(log);
            txn_manager.update_undo_link(
                rid,
                Some(UndoLink {
                    txn_id: txn.id(),
                    log_index,
                }),
            );
        }

        let new_tuple = Tuple::from_values(&new_values, table_schema);
        self.table.heap.update_tuple_in_place(
            TupleMeta {
                ts: txn.id(),
                is_deleted: false,
            },
            new_tuple.data(),
            rid,
        )?;
        txn.record_write(self.table.oid, rid);
        Ok(())
    }
}

impl<'a> Executor for UpdateExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut count = 0;
        while let Some((tuple, rid)) = self.child.next()? {
            self.update_row(&tuple, rid)?;
            count += 1;
        }
        Ok(Some(dml_row(count, &self.schema)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
