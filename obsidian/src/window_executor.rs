//! Window function execution.
//!
//! The input is materialized and sorted by the window order-by, then each
//! function is computed per partition. With an order-by the aggregate is
//! cumulative (one value per row as the frame grows); without one the
//! whole-partition aggregate repeats on every row. RANK repeats its value
//! across rows whose order keys compare equal.

use std::collections::HashMap;

use quarry::Rid;

use crate::aggregate_executor;
use crate::errors::DbError;
use crate::executor::pipeline::{compare_order_keys, evaluate_order_keys};
use crate::executor::Executor;
use crate::plan::{
    AggregationType, WindowFunctionSpec, WindowFunctionType, WindowOutputColumn,
};
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

fn aggregation_of(function: WindowFunctionType) -> Option<AggregationType> {
    match function {
        WindowFunctionType::CountStar => Some(AggregationType::CountStar),
        WindowFunctionType::Count => Some(AggregationType::Count),
        WindowFunctionType::Sum => Some(AggregationType::Sum),
        WindowFunctionType::Min => Some(AggregationType::Min),
        WindowFunctionType::Max => Some(AggregationType::Max),
        WindowFunctionType::Rank => None,
    }
}

pub struct WindowFunctionsExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    columns: Vec<WindowOutputColumn>,
    functions: Vec<WindowFunctionSpec>,
    schema: Schema,
    results: Vec<Tuple>,
    cursor: usize,
}

impl<'a> WindowFunctionsExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        columns: Vec<WindowOutputColumn>,
        functions: Vec<WindowFunctionSpec>,
        schema: Schema,
    ) -> Self {
        Self {
            child,
            columns,
            functions,
            schema,
            results: Vec::new(),
            cursor: 0,
        }
    }

    fn compute_function(
        &self,
        spec: &WindowFunctionSpec,
        rows: &[Tuple],
        child_schema: &Schema,
    ) -> Result<Vec<Value>, DbError> {
        let mut partition_keys = Vec::with_capacity(rows.len());
        for row in rows {
            let mut key = Vec::with_capacity(spec.partition_by.len());
            for expr in &spec.partition_by {
                key.push(expr.evaluate(row, child_schema)?);
            }
            partition_keys.push(key);
        }

        if spec.function == WindowFunctionType::Rank {
            // Rank needs the pair (position in partition, running rank):
            // equal order keys repeat the rank, a fresh key jumps to the
            // position.
            let mut states: HashMap<Vec<Value>, (usize, usize, Vec<Value>)> = HashMap::new();
            let mut out = Vec::with_capacity(rows.len());
            for (row, key) in rows.iter().zip(partition_keys.iter()) {
                let order_keys = evaluate_order_keys(row, child_schema, &spec.order_by)?;
                let state = states.entry(key.clone()).or_insert((0, 0, Vec::new()));
                state.0 += 1;
                let is_tie = state.0 > 1
                    && compare_order_keys(&state.2, &order_keys, &spec.order_by)
                        == std::cmp::Ordering::Equal;
                if !is_tie {
                    state.1 = state.0;
                    state.2 = order_keys;
                }
                out.push(Value::BigInt(state.1 as i64));
            }
            return Ok(out);
        }

        let aggregation = aggregation_of(spec.function).expect("aggregate window function");
        if spec.order_by.is_empty() {
            // Whole-partition value on every row: two passes.
            let mut totals: HashMap<Vec<Value>, Value> = HashMap::new();
            for (row, key) in rows.iter().zip(partition_keys.iter()) {
                let input = match &spec.arg {
                    Some(expr) => expr.evaluate(row, child_schema)?,
                    None => Value::Null,
                };
                let accumulator = totals
                    .entry(key.clone())
                    .or_insert_with(|| aggregate_executor::initial_value(aggregation));
                *accumulator = aggregate_executor::combine(aggregation, accumulator, &input)?;
            }
            Ok(partition_keys
                .iter()
                .map(|key| totals[key].clone())
                .collect())
        } else {
            // Running value in sort order.
            let mut states: HashMap<Vec<Value>, Value> = HashMap::new();
            let mut out = Vec::with_capacity(rows.len());
            for (row, key) in rows.iter().zip(partition_keys.iter()) {
                let input = match &spec.arg {
                    Some(expr) => expr.evaluate(row, child_schema)?,
                    None => Value::Null,
                };
                let accumulator = states
                    .entry(key.clone())
                    .or_insert_with(|| aggregate_executor::initial_value(aggregation));
                *accumulator = aggregate_executor::combine(aggregation, accumulator, &input)?;
                out.push(accumulator.clone());
            }
            Ok(out)
        }
    }
}

impl<'a> Executor for WindowFunctionsExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.results.clear();
        self.cursor = 0;
        let child_schema = self.child.schema().clone();

        let mut rows = Vec::new();
        while let Some((tuple, _)) = self.child.next()? {
            rows.push(tuple);
        }

        // One global sort by the first ordered window; all functions here
        // share their order-by, as the planner guarantees.
        if let Some(order_by) = self
            .functions
            .iter()
            .map(|f| &f.order_by)
            .find(|o| !o.is_empty())
        {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let keys = evaluate_order_keys(&row, &child_schema, order_by)?;
                keyed.push((keys, row));
            }
            keyed.sort_by(|a, b| compare_order_keys(&a.0, &b.0, order_by));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let mut function_results = Vec::with_capacity(self.functions.len());
        for spec in &self.functions {
            function_results.push(self.compute_function(spec, &rows, &child_schema)?);
        }

        for (row_index, row) in rows.iter().enumerate() {
            let mut values = Vec::with_capacity(self.columns.len());
            for column in &self.columns {
                match column {
                    WindowOutputColumn::Expr(expr) => {
                        values.push(expr.evaluate(row, &child_schema)?)
                    }
                    WindowOutputColumn::Window(function_index) => {
                        values.push(function_results[*function_index][row_index].clone())
                    }
                }
            }
            self.results.push(Tuple::from_values(&values, &self.schema));
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        let Some(tuple) = self.results.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((tuple, Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::pipeline::test_support::StaticRowsExecutor;
    use crate::expression::Expression;
    use crate::plan::OrderByType;
    use crate::types::{Column, TypeId};

    fn input(rows: &[(i32, i32)]) -> StaticRowsExecutor {
        let schema = Schema::new(vec![
            Column::new("dept", TypeId::Integer),
            Column::new("salary", TypeId::Integer),
        ]);
        StaticRowsExecutor::new(
            schema,
            rows.iter()
                .map(|(d, s)| vec![Value::Int(*d), Value::Int(*s)])
                .collect(),
        )
    }

    fn drain(exec: &mut dyn Executor) -> Vec<Vec<Value>> {
        let schema = exec.schema().clone();
        let mut out = Vec::new();
        while let Some((tuple, _)) = exec.next().unwrap() {
            out.push(tuple.values(&schema));
        }
        out
    }

    #[test]
    fn partitioned_running_sum_follows_sort_order() {
        let schema = Schema::new(vec![
            Column::new("dept", TypeId::Integer),
            Column::new("salary", TypeId::Integer),
            Column::new("running", TypeId::Integer),
        ]);
        let mut window = WindowFunctionsExecutor::new(
            Box::new(input(&[(1, 30), (2, 5), (1, 10), (1, 20)])),
            vec![
                WindowOutputColumn::Expr(Expression::column(0)),
                WindowOutputColumn::Expr(Expression::column(1)),
                WindowOutputColumn::Window(0),
            ],
            vec![WindowFunctionSpec {
                function: WindowFunctionType::Sum,
                arg: Some(Expression::column(1)),
                partition_by: vec![Expression::column(0)],
                order_by: vec![(OrderByType::Asc, Expression::column(1))],
            }],
            schema,
        );
        window.init().unwrap();
        let rows = drain(&mut window);
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(2), Value::Int(5), Value::Int(5)],
                vec![Value::Int(1), Value::Int(10), Value::Int(10)],
                vec![Value::Int(1), Value::Int(20), Value::Int(30)],
                vec![Value::Int(1), Value::Int(30), Value::Int(60)],
            ]
        );
    }

    #[test]
    fn unordered_window_repeats_the_partition_total() {
        let schema = Schema::new(vec![
            Column::new("dept", TypeId::Integer),
            Column::new("total", TypeId::Integer),
        ]);
        let mut window = WindowFunctionsExecutor::new(
            Box::new(input(&[(1, 30), (2, 5), (1, 10)])),
            vec![
                WindowOutputColumn::Expr(Expression::column(0)),
                WindowOutputColumn::Window(0),
            ],
            vec![WindowFunctionSpec {
                function: WindowFunctionType::Sum,
                arg: Some(Expression::column(1)),
                partition_by: vec![Expression::column(0)],
                order_by: vec![],
            }],
            schema,
        );
        window.init().unwrap();
        let rows = drain(&mut window);
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Int(40)],
                vec![Value::Int(2), Value::Int(5)],
                vec![Value::Int(1), Value::Int(40)],
            ]
        );
    }

    #[test]
    fn rank_repeats_on_ties_and_jumps_after_them() {
        let schema = Schema::new(vec![
            Column::new("salary", TypeId::Integer),
            Column::new("rank", TypeId::BigInt),
        ]);
        let mut window = WindowFunctionsExecutor::new(
            Box::new(input(&[(1, 10), (1, 30), (1, 10), (1, 40)])),
            vec![
                WindowOutputColumn::Expr(Expression::column(1)),
                WindowOutputColumn::Window(0),
            ],
            vec![WindowFunctionSpec {
                function: WindowFunctionType::Rank,
                arg: None,
                partition_by: vec![],
                order_by: vec![(OrderByType::Asc, Expression::column(1))],
            }],
            schema,
        );
        window.init().unwrap();
        let rows = drain(&mut window);
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(10), Value::BigInt(1)],
                vec![Value::Int(10), Value::BigInt(1)],
                vec![Value::Int(30), Value::BigInt(3)],
                vec![Value::Int(40), Value::BigInt(4)],
            ]
        );
    }
}
