//! The expression interpreter: a small evaluator over a tree of tagged
//! nodes. Column references carry a side so the same tree evaluates against
//! a single tuple or against the two inputs of a join.

use crate::errors::DbError;
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `side` 0 names the only input (or a join's left), 1 a join's right.
    ColumnRef { side: usize, index: usize },
    Literal(Value),
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::ColumnRef { side: 0, index }
    }

    pub fn join_column(side: usize, index: usize) -> Self {
        Expression::ColumnRef { side, index }
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOperator::Eq, left, right)
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOperator::And, left, right)
    }

    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Result<Value, DbError> {
        match self {
            Expression::ColumnRef { side, index } => {
                if *side != 0 {
                    return Err(DbError::Internal(
                        "right-side column reference outside a join".to_string(),
                    ));
                }
                Ok(tuple.value(schema, *index))
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Binary { op, left, right } => {
                let l = left.evaluate(tuple, schema)?;
                let r = right.evaluate(tuple, schema)?;
                apply_binary(*op, l, r)
            }
        }
    }

    pub fn evaluate_join(
        &self,
        left_tuple: &Tuple,
        left_schema: &Schema,
        right_tuple: &Tuple,
        right_schema: &Schema,
    ) -> Result<Value, DbError> {
        match self {
            Expression::ColumnRef { side: 0, index } => Ok(left_tuple.value(left_schema, *index)),
            Expression::ColumnRef { side: 1, index } => {
                Ok(right_tuple.value(right_schema, *index))
            }
            Expression::ColumnRef { side, .. } => Err(DbError::Internal(format!(
                "column reference to unknown join side {side}"
            ))),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Binary { op, left, right } => {
                let l = left.evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?;
                let r = right.evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?;
                apply_binary(*op, l, r)
            }
        }
    }

    /// True when the value is a definite boolean true; Null and false both
    /// fail a filter.
    pub fn evaluate_as_filter(&self, tuple: &Tuple, schema: &Schema) -> Result<bool, DbError> {
        Ok(self.evaluate(tuple, schema)?.as_bool().unwrap_or(false))
    }
}

fn apply_binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value, DbError> {
    use std::cmp::Ordering;
    match op {
        BinaryOperator::And | BinaryOperator::Or => {
            let l = left.as_bool().unwrap_or(false);
            let r = right.as_bool().unwrap_or(false);
            Ok(Value::Bool(if op == BinaryOperator::And {
                l && r
            } else {
                l || r
            }))
        }
        BinaryOperator::Plus => left.add(&right),
        BinaryOperator::Minus => left.subtract(&right),
        _ => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let ordering = left.compare(&right);
            let result = match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::NotEq => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::LtEq => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                BinaryOperator::GtEq => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

/// Flattens a tree of ANDs into its conjuncts.
pub fn split_conjunction(expr: &Expression) -> Vec<&Expression> {
    match expr {
        Expression::Binary {
            op: BinaryOperator::And,
            left,
            right,
        } => {
            let mut conjuncts = split_conjunction(left);
            conjuncts.extend(split_conjunction(right));
            conjuncts
        }
        _ => vec![expr],
    }
}

/// Rebuilds a conjunction from parts; `None` for an empty list.
pub fn conjoin(mut exprs: Vec<Expression>) -> Option<Expression> {
    let first = if exprs.is_empty() {
        return None;
    } else {
        exprs.remove(0)
    };
    Some(
        exprs
            .into_iter()
            .fold(first, |acc, e| Expression::and(acc, e)),
    )
}
