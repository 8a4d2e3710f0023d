use std::collections::HashMap;

use quarry::Rid;

use super::Executor;
use crate::errors::DbError;
use crate::expression::Expression;
use crate::plan::JoinType;
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;

fn join_rows(
    left: &Tuple,
    left_schema: &Schema,
    right: &Tuple,
    right_schema: &Schema,
    out_schema: &Schema,
) -> Tuple {
    let mut values = left.values(left_schema);
    values.extend(right.values(right_schema));
    Tuple::from_values(&values, out_schema)
}

fn pad_right_nulls(left: &Tuple, left_schema: &Schema, right_width: usize, out: &Schema) -> Tuple {
    let mut values = left.values(left_schema);
    values.extend(std::iter::repeat(Value::Null).take(right_width));
    Tuple::from_values(&values, out)
}

/// Classic tuple-at-a-time nested loop join: hold one left tuple, restart
/// the right child, stream its matches; pad on LEFT joins.
pub struct NestedLoopJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    predicate: Expression,
    join_type: JoinType,
    schema: Schema,
    left_tuple: Option<Tuple>,
    left_matched: bool,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        predicate: Expression,
        join_type: JoinType,
        schema: Schema,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            join_type,
            schema,
            left_tuple: None,
            left_matched: false,
        }
    }
}

impl<'a> Executor for NestedLoopJoinExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.left.init()?;
        self.right.init()?;
        self.left_tuple = None;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        loop {
            if self.left_tuple.is_none() {
                let Some((tuple, _)) = self.left.next()? else {
                    return Ok(None);
                };
                self.left_tuple = Some(tuple);
                self.left_matched = false;
                self.right.init()?;
            }
            let left_tuple = self.left_tuple.clone().expect("left tuple is loaded");

            while let Some((right_tuple, _)) = self.right.next()? {
                let matched = self
                    .predicate
                    .evaluate_join(
                        &left_tuple,
                        self.left.schema(),
                        &right_tuple,
                        self.right.schema(),
                    )?
                    .as_bool()
                    .unwrap_or(false);
                if matched {
                    self.left_matched = true;
                    let joined = join_rows(
                        &left_tuple,
                        self.left.schema(),
                        &right_tuple,
                        self.right.schema(),
                        &self.schema,
                    );
                    return Ok(Some((joined, Rid::INVALID)));
                }
            }

            let pad = self.join_type == JoinType::Left && !self.left_matched;
            self.left_tuple = None;
            if pad {
                let padded = pad_right_nulls(
                    &left_tuple,
                    self.left.schema(),
                    self.right.schema().column_count(),
                    &self.schema,
                );
                return Ok(Some((padded, Rid::INVALID)));
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Build the right child into a hash table keyed by its key expressions,
/// then probe with each left tuple.
pub struct HashJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    left_keys: Vec<Expression>,
    right_keys: Vec<Expression>,
    join_type: JoinType,
    schema: Schema,
    table: HashMap<Vec<Value>, Vec<Tuple>>,
    pending: Vec<(Tuple, Rid)>,
}

impl<'a> HashJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        left_keys: Vec<Expression>,
        right_keys: Vec<Expression>,
        join_type: JoinType,
        schema: Schema,
    ) -> Self {
        Self {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            schema,
            table: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn key_of(
        tuple: &Tuple,
        schema: &Schema,
        exprs: &[Expression],
    ) -> Result<Option<Vec<Value>>, DbError> {
        let mut key = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let value = expr.evaluate(tuple, schema)?;
            if value.is_null() {
                // Null keys never join.
                return Ok(None);
            }
            key.push(value);
        }
        Ok(Some(key))
    }
}

impl<'a> Executor for HashJoinExecutor<'a> {
    fn init(&mut self) -> Result<(), DbError> {
        self.left.init()?;
        self.right.init()?;
        self.table.clear();
        self.pending.clear();

        while let Some((tuple, _)) = self.right.next()? {
            let Some(key) = Self::key_of(&tuple, self.right.schema(), &self.right_keys)? else {
                continue;
            };
            self.table.entry(key).or_default().push(tuple);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, DbError> {
        loop {
            if let Some(out) = self.pending.pop() {
                return Ok(Some(out));
            }

            let Some((left_tuple, _)) = self.left.next()? else {
                return Ok(None);
            };
            let key = Self::key_of(&left_tuple, self.left.schema(), &self.left_keys)?;
            let matches = key.as_ref().and_then(|k| self.table.get(k));

            match matches {
                Some(rows) if !rows.is_empty() => {
                    // Reverse so pop() emits matches in build order.
                    for right_tuple in rows.iter().rev() {
                        let joined = join_rows(
                            &left_tuple,
                            self.left.schema(),
                            right_tuple,
                            self.right.schema(),
                            &self.schema,
                        );
                        self.pending.push((joined, Rid::INVALID));
                    }
                }
                _ => {
                    if self.join_type == JoinType::Left {
                        let padded = pad_right_nulls(
                            &left_tuple,
                            self.left.schema(),
                            self.right.schema().column_count(),
                            &self.schema,
                        );
                        return Ok(Some((padded, Rid::INVALID)));
                    }
                }
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
