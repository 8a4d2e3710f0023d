//! Hash aggregation. A pipeline breaker: the whole input is consumed in
//! `init`, grouped by the group-by keys, then the groups stream out.

use std::collections::HashMap;

use quarry::Rid;

use crate::errors::DbError;
use crate::executor::Executor;
use crate::expression::Expression;
use crate::plan::{AggregateSpec, AggregationType};
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

/// Starting accumulator for one aggregate: zero for COUNT(*), Null for the
/// rest (so an all-null input yields Null, not zero).
pub(crate) fn initial_value(function: AggregationType) -> Value {
    match function {
        AggregationType::CountStar => Value::Int(0),
        _ => Value::Null,
    }
}

pub(crate) fn combine(
    function: AggregationType,
    accumulator: &Value,
    input: &Value,
) -> Result<Value, DbError> {
    if function == AggregationType::CountStar {
        return accumulator.add(&Value::Int(1));
    }
    if input.is_null() {
        return Ok(accumulator.clone());
    }
    Ok(match function {
        AggregationType::Count => match accumulator {
            Value::Null => Value::Int(1),
            other => other.add(&Value::Int(1))?,
        },
        AggregationType::Sum => match accumulator {
            Value::Null => input.clone(),
            other => other.add(input)?,
        },
        AggregationType::Min => match accumulator {
            Value::Null => input.clone(),
            other if input.compare(other).is_lt() => input.clone(),
            other => other.clone(),
        },
        AggregationType::Max => match accumulator {
            Value::Null => input.clone(),
            other if input.compare(other).is_gt() => input.clone(),
            other => other.clone(),
        },
        AggregationType::CountStar => unreachable!(),
    })
}

pub struct AggregationExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    group_bys: Vec<Expression>,
    aggregates: Vec<AggregateSpec>,
    schema: Schema,
    results: Vec<Tuple>,
    cursor: usize,
}

impl<'a> AggregationExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        group_bys: Vec<Expression>,
        aggregates: Vec<AggregateSpec>,
        schema: Schema,
    ) -> Self {
        Self {
            child,
            group_bys,
            aggregates,
            schema,
            results: Vec::new(),
            cursor: 0,
        }
    }
}

impl<'a> Executor for AggregationExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.results.clear();
        self.cursor = 0;

        let child_schema = self.child.schema().clone();
        // Group keys in first-seen order keeps output deterministic.
        let mut groups: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        let mut group_order: Vec<Vec<Value>> = Vec::new();

        while let Some((tuple, _)) = self.child.next()? {
            let mut key = Vec::with_capacity(self.group_bys.len());
            for expr in &self.group_bys {
                key.push(expr.evaluate(&tuple, &child_schema)?);
            }
            if !groups.contains_key(&key) {
                group_order.push(key.clone());
                groups.insert(
                    key.clone(),
                    self.aggregates
                        .iter()
                        .map(|a| initial_value(a.function))
                        .collect(),
                );
            }
            let state = groups.get_mut(&key).expect("group was just inserted");
            for (i, aggregate) in self.aggregates.iter().enumerate() {
                let input = match &aggregate.arg {
                    Some(expr) => expr.evaluate(&tuple, &child_schema)?,
                    None => Value::Null,
                };
                state[i] = combine(aggregate.function, &state[i], &input)?;
            }
        }

        if groups.is_empty() && self.group_bys.is_empty() {
            // No input rows and no grouping: one row of initial values.
            let values: Vec<Value> = self
                .aggregates
                .iter()
                .map(|a| initial_value(a.function))
                .collect();
            self.results.push(Tuple::from_values(&values, &self.schema));
            return Ok(());
        }

        for key in group_order {
            let state = groups.remove(&key).expect("ordered key exists");
            let mut values = key;
            values.extend(state);
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
