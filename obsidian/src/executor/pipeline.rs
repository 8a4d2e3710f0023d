use quarry::Rid;

use super::Executor;
use crate::errors::DbError;
use crate::expression::Expression;
use crate::plan::OrderByType;
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

pub struct FilterExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    predicate: Expression,
}

impl<'a> FilterExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, predicate: Expression) -> Self {
        Self { child, predicate }
    }
}

impl<'a> Executor for FilterExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        while let Some((tuple, rid)) = self.child.next()? {
            if self
                .predicate
                .evaluate_as_filter(&tuple, self.child.schema())?
            {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

pub struct ProjectionExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    expressions: Vec<Expression>,
    schema: Schema,
}

impl<'a> ProjectionExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, expressions: Vec<Expression>, schema: Schema) -> Self {
        Self {
            child,
            expressions,
            schema,
        }
    }
}

impl<'a> Executor for ProjectionExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        let Some((tuple, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(self.expressions.len());
        for expr in &self.expressions {
            values.push(expr.evaluate(&tuple, self.child.schema())?);
        }
        Ok(Some((Tuple::from_values(&values, &self.schema), rid)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Compares two rows' precomputed order keys under the given directions.
pub(crate) fn compare_order_keys(
    a: &[Value],
    b: &[Value],
    order_bys: &[(OrderByType, Expression)],
) -> std::cmp::Ordering {
    for (i, (direction, _)) in order_bys.iter().enumerate() {
        let ordering = a[i].compare(&b[i]);
        let ordering = match direction {
            OrderByType::Asc => ordering,
            OrderByType::Desc => ordering.reverse(),
        };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

pub(crate) fn evaluate_order_keys(
    tuple: &Tuple,
    schema: &Schema,
    order_bys: &[(OrderByType, Expression)],
) -> Result<Vec<Value>, DbError> {
    order_bys
        .iter()
        .map(|(_, expr)| expr.evaluate(tuple, schema))
        .collect()
}

/// Pipeline breaker: pulls the whole input, stable-sorts it by the ordered
/// key list, then streams the result.
pub struct SortExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    order_bys: Vec<(OrderByType, Expression)>,
    sorted: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl<'a> SortExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, order_bys: Vec<(OrderByType, Expression)>) -> Self {
        Self {
            child,
            order_bys,
            sorted: Vec::new(),
            cursor: 0,
        }
    }
}

impl<'a> Executor for SortExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.child.init()?;
        self.sorted.clear();
        self.cursor = 0;

        let mut entries = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            let keys = evaluate_order_keys(&tuple, self.child.schema(), &self.order_bys)?;
            entries.push((keys, tuple, rid));
        }
        entries.sort_by(|a, b| compare_order_keys(&a.0, &b.0, &self.order_bys));
        self.sorted = entries
            .into_iter()
            .map(|(_, tuple, rid)| (tuple, rid))
            .collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        let Some((tuple, rid)) = self.sorted.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((tuple, rid)))
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A fixed-rows executor for operator tests.
    pub(crate) struct StaticRowsExecutor {
        schema: Schema,
        rows: Vec<Tuple>,
        cursor: usize,
    }

    impl StaticRowsExecutor {
        pub(crate) fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
            let rows = rows
                .iter()
                .map(|values| Tuple::from_values(values, &schema))
                .collect();
            Self {
                schema,
                rows,
                cursor: 0,
            }
        }
    }

    impl Executor for StaticRowsExecutor {
        fn init(&mut self) -> Result<(), DbError> {
            self.cursor = 0;
            Ok(())
        }

        fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
            let Some(tuple) = self.rows.get(self.cursor).cloned() else {
                return Ok(None);
            };
            self.cursor += 1;
            Ok(Some((tuple, Rid::INVALID)))
        }

        fn schema(&self) -> &Schema {
            &self.schema
        }
    }
}
