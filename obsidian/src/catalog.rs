//! The catalog: names to tables, tables to heaps, and the hash indexes
//! built over them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use quarry::hash_table::{DefaultKeyHasher, DiskExtendibleHashTable};
use quarry::{BufferPoolManager, Rid, StorageError, TableHeap};

use crate::errors::DbError;
use crate::types::Schema;
use crate::value::Value;

pub type TableOid = u32;
pub type IndexOid = u32;

pub const GENERIC_KEY_WIDTH: usize = 16;

/// Fixed 16-byte index key. Key tuples are serialized into the prefix with
/// length-prefixed text components so distinct keys never alias; the
/// remainder stays zero. Sixteen bytes cover a two-column integer key or a
/// bigint pair; a wider key is rejected at encoding time, never truncated.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey16 {
    data: [u8; GENERIC_KEY_WIDTH],
}

impl GenericKey16 {
    pub fn from_values(values: &[Value]) -> Result<Self, DbError> {
        let mut encoded = Vec::with_capacity(GENERIC_KEY_WIDTH);
        for value in values {
            match value {
                Value::Null => encoded.push(0xff),
                Value::Bool(b) => encoded.push(*b as u8),
                Value::Int(v) => encoded.extend_from_slice(&v.to_be_bytes()),
                Value::BigInt(v) => encoded.extend_from_slice(&v.to_be_bytes()),
                Value::Text(s) => {
                    let len = u8::try_from(s.len()).map_err(|_| {
                        DbError::Internal(format!(
                            "index key text component of {} bytes is too long",
                            s.len()
                        ))
                    })?;
                    encoded.push(len);
                    encoded.extend_from_slice(s.as_bytes());
                }
                Value::Date(d) => {
                    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                    let days = d.signed_duration_since(epoch).num_days() as i32;
                    encoded.extend_from_slice(&days.to_be_bytes());
                }
            }
        }
        if encoded.len() > GENERIC_KEY_WIDTH {
            return Err(DbError::Internal(format!(
                "index key {values:?} needs {} bytes, over the {GENERIC_KEY_WIDTH}-byte key buffer",
                encoded.len()
            )));
        }
        let mut data = [0u8; GENERIC_KEY_WIDTH];
        data[..encoded.len()].copy_from_slice(&encoded);
        Ok(Self { data })
    }
}

/// A unique hash index over a table, keyed by a projection of its columns.
pub struct HashIndex {
    table: DiskExtendibleHashTable<GenericKey16, Rid, DefaultKeyHasher>,
}

const INDEX_HEADER_MAX_DEPTH: u32 = 1;
const INDEX_BUCKET_MAX_SIZE: u32 = 64;

impl HashIndex {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Result<Self, DbError> {
        let table = DiskExtendibleHashTable::new(
            bpm,
            INDEX_HEADER_MAX_DEPTH,
            quarry::hash_pages::HASH_DIRECTORY_MAX_DEPTH,
            INDEX_BUCKET_MAX_SIZE,
        )?;
        Ok(Self { table })
    }

    pub fn insert_entry(&self, key: &[Value], rid: Rid) -> Result<(), DbError> {
        match self.table.insert(GenericKey16::from_values(key)?, rid) {
            Ok(()) => Ok(()),
            Err(StorageError::HashKeyExists) => Err(DbError::IndexConflict(format!(
                "duplicate key {key:?}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub fn delete_entry(&self, key: &[Value]) -> Result<bool, DbError> {
        Ok(self.table.remove(&GenericKey16::from_values(key)?)?)
    }

    /// RIDs for a key; zero or one of them, the index being unique.
    pub fn scan_key(&self, key: &[Value]) -> Result<Vec<Rid>, DbError> {
        Ok(self
            .table
            .get(&GenericKey16::from_values(key)?)?
            .into_iter()
            .collect())
    }
}

pub struct TableInfo {
    pub schema: Schema,
    pub name: String,
    pub oid: TableOid,
    pub heap: Arc<TableHeap>,
}

pub struct IndexInfo {
    pub name: String,
    pub oid: IndexOid,
    pub table_name: String,
    /// Schema of the key tuple, projected from the table schema.
    pub key_schema: Schema,
    /// Positions of the key columns within the table schema.
    pub key_attrs: Vec<usize>,
    pub index: HashIndex,
}

impl IndexInfo {
    /// Projects a table tuple's values down to the index key.
    pub fn key_from_row(&self, row: &[Value]) -> Vec<Value> {
        self.key_attrs.iter().map(|&i| row[i].clone()).collect()
    }
}

#[derive(Default)]
pub struct Catalog {
    tables: HashMap<TableOid, Arc<TableInfo>>,
    table_names: HashMap<String, TableOid>,
    indexes: HashMap<IndexOid, Arc<IndexInfo>>,
    index_names: HashMap<String, HashMap<String, IndexOid>>,
    next_oid: u32,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(
        &mut self,
        bpm: Arc<BufferPoolManager>,
        name: &str,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, DbError> {
        if self.table_names.contains_key(name) {
            return Err(DbError::Internal(format!("table {name} already exists")));
        }
        let oid = self.next_oid;
        self.next_oid += 1;
        let heap = Arc::new(TableHeap::new(bpm)?);
        let info = Arc::new(TableInfo {
            schema,
            name: name.to_string(),
            oid,
            heap,
        });
        self.tables.insert(oid, info.clone());
        self.table_names.insert(name.to_string(), oid);
        self.index_names.insert(name.to_string(), HashMap::new());
        crate::obsidian_debug_log!("[Catalog::create_table] {name} -> oid {oid}");
        Ok(info)
    }

    /// Creates a unique hash index and backfills it from the table's
    /// current base tuples.
    pub fn create_index(
        &mut self,
        bpm: Arc<BufferPoolManager>,
        index_name: &str,
        table_name: &str,
        key_attrs: Vec<usize>,
    ) -> Result<Arc<IndexInfo>, DbError> {
        let table = self
            .get_table_by_name(table_name)
            .ok_or_else(|| DbError::TableNotFound(table_name.to_string()))?;
        let oid = self.next_oid;
        self.next_oid += 1;

        let key_schema = table.schema.project(&key_attrs);
        let index = HashIndex::new(bpm)?;
        for (meta, data, rid) in table.heap.iter() {
            if meta.is_deleted {
                continue;
            }
            let tuple = crate::tuple::Tuple::from_bytes(data);
            let row = tuple.values(&table.schema);
            let key: Vec<Value> = key_attrs.iter().map(|&i| row[i].clone()).collect();
            index.insert_entry(&key, rid)?;
        }

        let info = Arc::new(IndexInfo {
            name: index_name.to_string(),
            oid,
            table_name: table_name.to_string(),
            key_schema,
            key_attrs,
            index,
        });
        self.indexes.insert(oid, info.clone());
        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), oid);
        crate::obsidian_debug_log!(
            "[Catalog::create_index] {index_name} on {table_name} -> oid {oid}"
        );
        Ok(info)
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let oid = self.table_names.get(name)?;
        self.tables.get(oid).cloned()
    }

    pub fn get_table_by_oid(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.get(&oid).cloned()
    }

    pub fn get_index_by_oid(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.indexes.get(&oid).cloned()
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> Option<Arc<IndexInfo>> {
        let oid = self.index_names.get(table_name)?.get(index_name)?;
        self.indexes.get(oid).cloned()
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let Some(by_name) = self.index_names.get(table_name) else {
            return Vec::new();
        };
        by_name
            .values()
            .filter_map(|oid| self.indexes.get(oid).cloned())
            .collect()
    }
}
