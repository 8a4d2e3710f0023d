//! Rule-based plan rewrites, applied bottom-up: each rule rewrites a
//! node's children first, then attempts its local pattern match.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::plan::PlanNode;

pub mod join_rewrite;
pub mod scan_rewrite;
pub mod topn_rewrite;

/// Runs the full rewrite pipeline over a plan tree.
pub fn optimize(plan: &Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    let plan = join_rewrite::push_down_join_predicates(plan);
    let plan = join_rewrite::extract_filter_from_nlj(&plan);
    let plan = join_rewrite::nlj_as_hash_join(&plan);
    let plan = topn_rewrite::sort_limit_as_topn(&plan);
    scan_rewrite::seqscan_as_indexscan(&plan, catalog)
}

/// Clones a node with each child replaced through `f`. Leaves are returned
/// unchanged.
pub(crate) fn map_children(
    plan: &PlanNode,
    f: &mut dyn FnMut(&Arc<PlanNode>) -> Arc<PlanNode>,
) -> PlanNode {
    match plan {
        PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. } => {
            plan.clone()
        }
        PlanNode::Insert {
            child,
            table_oid,
            schema,
        } => PlanNode::Insert {
            child: f(child),
            table_oid: *table_oid,
            schema: schema.clone(),
        },
        PlanNode::Update {
            child,
            table_oid,
            target_expressions,
            schema,
        } => PlanNode::Update {
            child: f(child),
            table_oid: *table_oid,
            target_expressions: target_expressions.clone(),
            schema: schema.clone(),
        },
        PlanNode::Delete {
            child,
            table_oid,
            schema,
        } => PlanNode::Delete {
            child: f(child),
            table_oid: *table_oid,
            schema: schema.clone(),
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
            schema,
        } => PlanNode::NestedLoopJoin {
            left: f(left),
            right: f(right),
            predicate: predicate.clone(),
            join_type: *join_type,
            schema: schema.clone(),
        },
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            schema,
        } => PlanNode::HashJoin {
            left: f(left),
            right: f(right),
            left_keys: left_keys.clone(),
            right_keys: right_keys.clone(),
            join_type: *join_type,
            schema: schema.clone(),
        },
        PlanNode::Filter { child, predicate } => PlanNode::Filter {
            child: f(child),
            predicate: predicate.clone(),
        },
        PlanNode::Projection {
            child,
            expressions,
            schema,
        } => PlanNode::Projection {
            child: f(child),
            expressions: expressions.clone(),
            schema: schema.clone(),
        },
        PlanNode::Aggregation {
            child,
            group_bys,
            aggregates,
            schema,
        } => PlanNode::Aggregation {
            child: f(child),
            group_bys: group_bys.clone(),
            aggregates: aggregates.clone(),
            schema: schema.clone(),
        },
        PlanNode::Sort { child, order_bys } => PlanNode::Sort {
            child: f(child),
            order_bys: order_bys.clone(),
        },
        PlanNode::TopN {
            child,
            order_bys,
            n,
        } => PlanNode::TopN {
            child: f(child),
            order_bys: order_bys.clone(),
            n: *n,
        },
        PlanNode::Limit { child, n } => PlanNode::Limit {
            child: f(child),
            n: *n,
        },
        PlanNode::Window {
            child,
            columns,
            functions,
            schema,
        } => PlanNode::Window {
            child: f(child),
            columns: columns.clone(),
            functions: functions.clone(),
            schema: schema.clone(),
        },
    }
}

/// Applies `rule` to every node, children before parents.
pub(crate) fn transform_up(
    plan: &Arc<PlanNode>,
    rule: &dyn Fn(Arc<PlanNode>) -> Arc<PlanNode>,
) -> Arc<PlanNode> {
    let rebuilt = Arc::new(map_children(plan, &mut |child| transform_up(child, rule)));
    rule(rebuilt)
}
