//! The iterator-model executor framework. Every operator exposes `init` and
//! `next`; consumers pump the root until the stream ends.

use std::sync::{Arc, Mutex};

use quarry::{BufferPoolManager, Rid};

use crate::aggregate_executor::AggregationExecutor;
use crate::catalog::Catalog;
use crate::errors::DbError;
use crate::limit_executor::{LimitExecutor, TopNExecutor};
use crate::plan::PlanNode;
use crate::transaction::{Transaction, TransactionManager, TransactionState};
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::window_executor::WindowFunctionsExecutor;

mod dml;
mod join;
pub(crate) mod pipeline;
mod scan;

pub use dml::{DeleteExecutor, InsertExecutor, UpdateExecutor};
pub use join::{HashJoinExecutor, NestedLoopJoinExecutor};
pub use pipeline::{FilterExecutor, ProjectionExecutor, SortExecutor};
pub use scan::{IndexScanExecutor, SeqScanExecutor, ValuesExecutor};

pub trait Executor {
    /// Resets operator state and initializes children.
    fn init(&mut self) -> Result<(), DbError>;
    /// Produces the next tuple, or None at end of stream.
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError>;
    fn schema(&self) -> &Schema;
}

pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Mutex<Catalog>>,
    pub txn: Arc<Transaction>,
    pub txn_manager: Arc<TransactionManager>,
}

impl ExecutorContext {
    fn table_by_oid(&self, oid: u32) -> Result<Arc<crate::catalog::TableInfo>, DbError> {
        self.catalog
            .lock()
            .unwrap()
            .get_table_by_oid(oid)
            .ok_or_else(|| DbError::TableNotFound(format!("table oid {oid}")))
    }

    fn table_indexes(&self, table_name: &str) -> Vec<Arc<crate::catalog::IndexInfo>> {
        self.catalog.lock().unwrap().get_table_indexes(table_name)
    }
}

/// Builds the executor tree for a physical plan.
pub fn build_executor<'a>(
    plan: &PlanNode,
    ctx: &'a ExecutorContext,
) -> Result<Box<dyn Executor + 'a>, DbError> {
    match plan {
        PlanNode::SeqScan {
            table_oid, filter, ..
        } => {
            let table = ctx.table_by_oid(*table_oid)?;
            Ok(Box::new(SeqScanExecutor::new(ctx, table, filter.clone())))
        }
        PlanNode::IndexScan {
            table_oid,
            index_oid,
            key,
            ..
        } => {
            let table = ctx.table_by_oid(*table_oid)?;
            let index = ctx
                .catalog
                .lock()
                .unwrap()
                .get_index_by_oid(*index_oid)
                .ok_or_else(|| DbError::IndexNotFound(format!("index oid {index_oid}")))?;
            Ok(Box::new(IndexScanExecutor::new(ctx, table, index, key.clone())))
        }
        PlanNode::Values { rows, schema } => {
            Ok(Box::new(ValuesExecutor::new(rows.clone(), schema.clone())))
        }
        PlanNode::Insert {
            child, table_oid, ..
        } => {
            let table = ctx.table_by_oid(*table_oid)?;
            let indexes = ctx.table_indexes(&table.name);
            let child = build_executor(child, ctx)?;
            Ok(Box::new(InsertExecutor::new(ctx, child, table, indexes)))
        }
        PlanNode::Update {
            child,
            table_oid,
            target_expressions,
            ..
        } => {
            let table = ctx.table_by_oid(*table_oid)?;
            let child = build_executor(child, ctx)?;
            Ok(Box::new(UpdateExecutor::new(
                ctx,
                child,
                table,
                target_expressions.clone(),
            )))
        }
        PlanNode::Delete {
            child, table_oid, ..
        } => {
            let table = ctx.table_by_oid(*table_oid)?;
            let child = build_executor(child, ctx)?;
            Ok(Box::new(DeleteExecutor::new(ctx, child, table)))
        }
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
            schema,
        } => {
            let left = build_executor(left, ctx)?;
            let right = build_executor(right, ctx)?;
            Ok(Box::new(NestedLoopJoinExecutor::new(
                left,
                right,
                predicate.clone(),
                *join_type,
                schema.clone(),
            )))
        }
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            schema,
        } => {
            let left = build_executor(left, ctx)?;
            let right = build_executor(right, ctx)?;
            Ok(Box::new(HashJoinExecutor::new(
                left,
                right,
                left_keys.clone(),
                right_keys.clone(),
                *join_type,
                schema.clone(),
            )))
        }
        PlanNode::Filter { child, predicate } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(FilterExecutor::new(child, predicate.clone())))
        }
        PlanNode::Projection {
            child,
            expressions,
            schema,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(ProjectionExecutor::new(
                child,
                expressions.clone(),
                schema.clone(),
            )))
        }
        PlanNode::Aggregation {
            child,
            group_bys,
            aggregates,
            schema,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(AggregationExecutor::new(
                child,
                group_bys.clone(),
                aggregates.clone(),
                schema.clone(),
            )))
        }
        PlanNode::Sort { child, order_bys } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(SortExecutor::new(child, order_bys.clone())))
        }
        PlanNode::TopN {
            child,
            order_bys,
            n,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(TopNExecutor::new(child, order_bys.clone(), *n)))
        }
        PlanNode::Limit { child, n } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(LimitExecutor::new(child, *n)))
        }
        PlanNode::Window {
            child,
            columns,
            functions,
            schema,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(WindowFunctionsExecutor::new(
                child,
                columns.clone(),
                functions.clone(),
                schema.clone(),
            )))
        }
    }
}

/// Drives a plan to completion. Any failure taints the enclosing
/// transaction so its commit necessarily aborts.
pub fn execute_plan(plan: &PlanNode, ctx: &ExecutorContext) -> Result<Vec<Tuple>, DbError> {
    let result = (|| {
        let mut root = build_executor(plan, ctx)?;
        root.init()?;
        let mut rows = Vec::new();
        while let Some((tuple, _rid)) = root.next()? {
            rows.push(tuple);
        }
        Ok(rows)
    })();
    if result.is_err() && ctx.txn.state() == TransactionState::Running {
        ctx.txn.set_state(TransactionState::Tainted);
    }
    result
}
