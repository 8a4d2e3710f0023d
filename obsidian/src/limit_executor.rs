//! LIMIT and top-N executors.
//!
//! TopN keeps a bounded max-heap over the sort keys so only the N smallest
//! rows are ever held; it emits the same rows in the same order as a full
//! sort followed by a limit.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use quarry::Rid;

use crate::errors::DbError;
use crate::executor::pipeline::{compare_order_keys, evaluate_order_keys};
use crate::executor::Executor;
use crate::expression::Expression;
use crate::plan::OrderByType;
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

/// Passes through the first N rows.
pub struct LimitExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    limit: usize,
    emitted: usize,
}

impl<'a> LimitExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, limit: usize) -> Self {
        Self {
            child,
            limit,
            emitted: 0,
        }
    }
}

impl<'a> Executor for LimitExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.emitted = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.emitted += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

/// Heap entry ordered by the sort keys (then input order, mirroring a
/// stable sort). The heap is a max-heap, so its top is the worst row kept.
struct TopNEntry {
    keys: Vec<Value>,
    sequence: usize,
    order_bys: Arc<Vec<(OrderByType, Expression)>>,
    tuple: Tuple,
    rid: Rid,
}

impl PartialEq for TopNEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TopNEntry {}

impl PartialOrd for TopNEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopNEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_order_keys(&self.keys, &other.keys, &self.order_bys)
            .then(self.sequence.cmp(&other.sequence))
    }
}

pub struct TopNExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    order_bys: Arc<Vec<(OrderByType, Expression)>>,
    n: usize,
    sorted: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl<'a> TopNExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        order_bys: Vec<(OrderByType, Expression)>,
        n: usize,
    ) -> Self {
        Self {
            child,
            order_bys: Arc::new(order_bys),
            n,
            sorted: Vec::new(),
            cursor: 0,
        }
    }
}

impl<'a> Executor for TopNExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.sorted.clear();
        self.cursor = 0;
        if self.n == 0 {
            // Drain the child for its side effects, emit nothing.
            while self.child.next()?.is_some() {}
            return Ok(());
        }

        let mut heap: BinaryHeap<TopNEntry> = BinaryHeap::with_capacity(self.n + 1);
        let mut sequence = 0usize;
        while let Some((tuple, rid)) = self.child.next()? {
            let keys = evaluate_order_keys(&tuple, self.child.schema(), &self.order_bys)?;
            heap.push(TopNEntry {
                keys,
                sequence,
                order_bys: self.order_bys.clone(),
                tuple,
                rid,
            });
            sequence += 1;
            if heap.len() > self.n {
                heap.pop();
            }
        }

        let mut entries = heap.into_vec();
        entries.sort();
        self.sorted = entries
            .into_iter()
            .map(|entry| (entry.tuple, entry.rid))
            .collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        let Some(row) = self.sorted.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(row))
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}
