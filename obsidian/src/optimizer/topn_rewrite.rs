//! Limit directly over Sort collapses into a bounded TopN.

use std::sync::Arc;

use super::transform_up;
use crate::plan::PlanNode;

pub fn sort_limit_as_topn(plan: &Arc<PlanNode>) -> Arc<PlanNode> {
    transform_up(plan, &|node| {
        let PlanNode::Limit { child, n } = node.as_ref() else {
            return node;
        };
        let PlanNode::Sort {
            child: sorted_child,
            order_bys,
        } = child.as_ref()
        else {
            return node;
        };
        crate::obsidian_debug_log!("[optimizer] limit({n}) over sort -> top-n");
        Arc::new(PlanNode::TopN {
            child: sorted_child.clone(),
            order_bys: order_bys.clone(),
            n: *n,
        })
    })
}
