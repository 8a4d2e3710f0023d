//! Physical plan trees. Nodes hold their children behind `Arc` so rewrites
//! share untouched subtrees.

use std::sync::Arc;

use crate::catalog::{IndexOid, TableOid};
use crate::expression::Expression;
use crate::types::{Column, Schema, TypeId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregationType,
    pub arg: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunctionType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Rank,
}

#[derive(Debug, Clone)]
pub struct WindowFunctionSpec {
    pub function: WindowFunctionType,
    pub arg: Option<Expression>,
    pub partition_by: Vec<Expression>,
    pub order_by: Vec<(OrderByType, Expression)>,
}

/// One output column of a window node: a plain expression over the input,
/// or the result of the n-th window function.
#[derive(Debug, Clone)]
pub enum WindowOutputColumn {
    Expr(Expression),
    Window(usize),
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table_oid: TableOid,
        table_name: String,
        filter: Option<Expression>,
        schema: Schema,
    },
    IndexScan {
        table_oid: TableOid,
        index_oid: IndexOid,
        key: Vec<Value>,
        schema: Schema,
    },
    Values {
        rows: Vec<Vec<Expression>>,
        schema: Schema,
    },
    Insert {
        child: Arc<PlanNode>,
        table_oid: TableOid,
        schema: Schema,
    },
    Update {
        child: Arc<PlanNode>,
        table_oid: TableOid,
        target_expressions: Vec<Expression>,
        schema: Schema,
    },
    Delete {
        child: Arc<PlanNode>,
        table_oid: TableOid,
        schema: Schema,
    },
    NestedLoopJoin {
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
        predicate: Expression,
        join_type: JoinType,
        schema: Schema,
    },
    HashJoin {
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
        left_keys: Vec<Expression>,
        right_keys: Vec<Expression>,
        join_type: JoinType,
        schema: Schema,
    },
    Filter {
        child: Arc<PlanNode>,
        predicate: Expression,
    },
    Projection {
        child: Arc<PlanNode>,
        expressions: Vec<Expression>,
        schema: Schema,
    },
    Aggregation {
        child: Arc<PlanNode>,
        group_bys: Vec<Expression>,
        aggregates: Vec<AggregateSpec>,
        schema: Schema,
    },
    Sort {
        child: Arc<PlanNode>,
        order_bys: Vec<(OrderByType, Expression)>,
    },
    TopN {
        child: Arc<PlanNode>,
        order_bys: Vec<(OrderByType, Expression)>,
        n: usize,
    },
    Limit {
        child: Arc<PlanNode>,
        n: usize,
    },
    Window {
        child: Arc<PlanNode>,
        columns: Vec<WindowOutputColumn>,
        functions: Vec<WindowFunctionSpec>,
        schema: Schema,
    },
}

impl PlanNode {
    pub fn output_schema(&self) -> &Schema {
        match self {
            PlanNode::SeqScan { schema, .. }
            | PlanNode::IndexScan { schema, .. }
            | PlanNode::Values { schema, .. }
            | PlanNode::Insert { schema, .. }
            | PlanNode::Update { schema, .. }
            | PlanNode::Delete { schema, .. }
            | PlanNode::NestedLoopJoin { schema, .. }
            | PlanNode::HashJoin { schema, .. }
            | PlanNode::Projection { schema, .. }
            | PlanNode::Aggregation { schema, .. }
            | PlanNode::Window { schema, .. } => schema,
            PlanNode::Filter { child, .. }
            | PlanNode::Sort { child, .. }
            | PlanNode::TopN { child, .. }
            | PlanNode::Limit { child, .. } => child.output_schema(),
        }
    }

    /// The one-column schema every DML node emits: rows affected.
    pub fn dml_schema() -> Schema {
        Schema::new(vec![Column::new("rows", TypeId::Integer)])
    }
}
