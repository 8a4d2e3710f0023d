//! Runtime values flowing through expressions and executors.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;

use crate::errors::DbError;
use crate::types::TypeId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(TypeId::Boolean),
            Value::Int(_) => Some(TypeId::Integer),
            Value::BigInt(_) => Some(TypeId::BigInt),
            Value::Text(_) => Some(TypeId::Text),
            Value::Date(_) => Some(TypeId::Date),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Total order used by sorting and grouping: Null sorts first, integer
    /// widths compare numerically, mismatched types fall back to a stable
    /// arbitrary order.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.rank().cmp(&other.rank()),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::BigInt(_) => 3,
            Value::Text(_) => 4,
            Value::Date(_) => 5,
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, DbError> {
        self.arith(other, "add", |a, b| a.checked_add(b))
    }

    pub fn subtract(&self, other: &Value) -> Result<Value, DbError> {
        self.arith(other, "subtract", |a, b| a.checked_sub(b))
    }

    fn arith(
        &self,
        other: &Value,
        what: &str,
        op: impl Fn(i64, i64) -> Option<i64>,
    ) -> Result<Value, DbError> {
        if self.is_null() || other.is_null() {
            return Ok(Value::Null);
        }
        let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) else {
            return Err(DbError::Internal(format!(
                "cannot {what} {self:?} and {other:?}"
            )));
        };
        let result = op(a, b)
            .ok_or_else(|| DbError::Internal(format!("arithmetic overflow in {what}")))?;
        match (self, other) {
            (Value::Int(_), Value::Int(_)) => Ok(Value::Int(result as i32)),
            _ => Ok(Value::BigInt(result)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "t" } else { "f" }),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}
