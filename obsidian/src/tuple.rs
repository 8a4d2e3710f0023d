//! Tuple encoding: a null bitmap followed by the column values in schema
//! order. Fixed-width values are stored big-endian; text carries a length
//! prefix. A tuple is opaque bytes until decoded against a schema.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDate;

use crate::types::{Schema, TypeId};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    data: Bytes,
}

impl Tuple {
    pub fn from_bytes(data: Bytes) -> Self {
        Self { data }
    }

    pub fn from_values(values: &[Value], schema: &Schema) -> Self {
        debug_assert_eq!(values.len(), schema.column_count());
        let bitmap_len = schema.column_count().div_ceil(8);
        let mut buf = BytesMut::with_capacity(bitmap_len + values.len() * 8);

        let mut bitmap = vec![0u8; bitmap_len];
        for (i, value) in values.iter().enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.put_slice(&bitmap);

        for value in values {
            match value {
                Value::Null => {}
                Value::Bool(b) => buf.put_u8(*b as u8),
                Value::Int(v) => buf.put_i32(*v),
                Value::BigInt(v) => buf.put_i64(*v),
                Value::Text(s) => {
                    buf.put_u32(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
                Value::Date(d) => {
                    buf.put_i32(NaiveDate::signed_duration_since(
                        *d,
                        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
                    )
                    .num_days() as i32)
                }
            }
        }
        Self { data: buf.freeze() }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn values(&self, schema: &Schema) -> Vec<Value> {
        let bitmap_len = schema.column_count().div_ceil(8);
        let bitmap = &self.data[..bitmap_len];
        let mut offset = bitmap_len;
        let mut values = Vec::with_capacity(schema.column_count());

        for (i, column) in schema.columns().iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(Value::Null);
                continue;
            }
            let value = match column.type_id {
                TypeId::Boolean => {
                    let v = self.data[offset] != 0;
                    offset += 1;
                    Value::Bool(v)
                }
                TypeId::Integer => {
                    let v = i32::from_be_bytes(self.data[offset..offset + 4].try_into().unwrap());
                    offset += 4;
                    Value::Int(v)
                }
                TypeId::BigInt => {
                    let v = i64::from_be_bytes(self.data[offset..offset + 8].try_into().unwrap());
                    offset += 8;
                    Value::BigInt(v)
                }
                TypeId::Text => {
                    let len =
                        u32::from_be_bytes(self.data[offset..offset + 4].try_into().unwrap())
                            as usize;
                    offset += 4;
                    let s = String::from_utf8_lossy(&self.data[offset..offset + len]).into_owned();
                    offset += len;
                    Value::Text(s)
                }
                TypeId::Date => {
                    let days =
                        i32::from_be_bytes(self.data[offset..offset + 4].try_into().unwrap());
                    offset += 4;
                    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                    Value::Date(epoch + chrono::Duration::days(days as i64))
                }
            };
            values.push(value);
        }
        values
    }

    pub fn value(&self, schema: &Schema, index: usize) -> Value {
        self.values(schema)
            .into_iter()
            .nth(index)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer),
            Column::new("name", TypeId::Text),
            Column::new("big", TypeId::BigInt),
            Column::new("flag", TypeId::Boolean),
            Column::new("day", TypeId::Date),
        ])
    }

    #[test]
    fn encode_decode_round_trip() {
        let schema = test_schema();
        let values = vec![
            Value::Int(42),
            Value::Text("obsidian".into()),
            Value::BigInt(-7),
            Value::Bool(true),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()),
        ];
        let tuple = Tuple::from_values(&values, &schema);
        assert_eq!(tuple.values(&schema), values);
        assert_eq!(tuple.value(&schema, 1), Value::Text("obsidian".into()));
    }

    #[test]
    fn nulls_survive_the_bitmap() {
        let schema = test_schema();
        let values = vec![
            Value::Null,
            Value::Text("x".into()),
            Value::Null,
            Value::Bool(false),
            Value::Null,
        ];
        let tuple = Tuple::from_values(&values, &schema);
        assert_eq!(tuple.values(&schema), values);
    }
}
