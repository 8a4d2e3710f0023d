//! Multi-version concurrency control: transactions, per-tuple version
//! chains, and commit-time validation.
//!
//! A base tuple's metadata carries either a commit timestamp or, while a
//! write is in flight, the writing transaction's id (distinguished by the
//! high bit). Prior versions live as undo records in the writing
//! transaction's log arena; the chain head for each RID is kept by the
//! transaction manager and resolved through it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use quarry::{Rid, TupleMeta};

use crate::catalog::{Catalog, TableOid};
use crate::errors::DbError;
use crate::expression::Expression;
use crate::tuple::Tuple;
use crate::types::Schema;
use crate::value::Value;
use crate::watermark::Watermark;

/// High bit marking a timestamp slot as an in-flight transaction id.
pub const TXN_START_ID: u64 = 1 << 63;

pub fn is_txn_id(ts: u64) -> bool {
    ts & TXN_START_ID != 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    /// Hit a conflict; the next commit attempt must abort.
    Tainted,
    Committed,
    Aborted,
}

/// Locates an undo record: the owning transaction and the record's index
/// in that transaction's log arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoLink {
    pub txn_id: u64,
    pub log_index: usize,
}

/// One step back in a tuple's version chain. `values` holds only the
/// fields flagged in `modified_fields`, in field order.
#[derive(Debug, Clone)]
pub struct UndoLog {
    /// Timestamp of the version this record reconstructs.
    pub ts: u64,
    pub is_deleted: bool,
    pub modified_fields: Vec<bool>,
    pub values: Vec<Value>,
    pub prev_version: Option<UndoLink>,
}

struct WriteSet {
    order: Vec<(TableOid, Rid)>,
    seen: HashSet<Rid>,
}

pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
    read_ts: u64,
    state: Mutex<TransactionState>,
    commit_ts: Mutex<Option<u64>>,
    undo_logs: Mutex<Vec<UndoLog>>,
    write_set: Mutex<WriteSet>,
    scan_predicates: Mutex<Vec<(TableOid, Expression)>>,
}

impl Transaction {
    fn new(id: u64, read_ts: u64, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            read_ts,
            state: Mutex::new(TransactionState::Running),
            commit_ts: Mutex::new(None),
            undo_logs: Mutex::new(Vec::new()),
            write_set: Mutex::new(WriteSet {
                order: Vec::new(),
                seen: HashSet::new(),
            }),
            scan_predicates: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn read_ts(&self) -> u64 {
        self.read_ts
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn commit_ts(&self) -> Option<u64> {
        *self.commit_ts.lock().unwrap()
    }

    pub fn append_undo_log(&self, log: UndoLog) -> usize {
        let mut logs = self.undo_logs.lock().unwrap();
        logs.push(log);
        logs.len() - 1
    }

    pub fn modify_undo_log(&self, index: usize, log: UndoLog) {
        self.undo_logs.lock().unwrap()[index] = log;
    }

    pub fn undo_log(&self, index: usize) -> Option<UndoLog> {
        self.undo_logs.lock().unwrap().get(index).cloned()
    }

    pub fn undo_log_count(&self) -> usize {
        self.undo_logs.lock().unwrap().len()
    }

    /// Records a write; returns false when the RID was already in the set.
    pub fn record_write(&self, table_oid: TableOid, rid: Rid) -> bool {
        let mut write_set = self.write_set.lock().unwrap();
        if !write_set.seen.insert(rid) {
            return false;
        }
        write_set.order.push((table_oid, rid));
        true
    }

    pub fn write_set(&self) -> Vec<(TableOid, Rid)> {
        self.write_set.lock().unwrap().order.clone()
    }

    pub fn append_scan_predicate(&self, table_oid: TableOid, predicate: Expression) {
        self.scan_predicates
            .lock()
            .unwrap()
            .push((table_oid, predicate));
    }

    pub fn scan_predicates(&self) -> Vec<(TableOid, Expression)> {
        self.scan_predicates.lock().unwrap().clone()
    }
}

/// True when `txn` may not stamp a tuple currently carrying `meta`: another
/// transaction's write is in flight, or a commit landed after our snapshot.
pub fn check_write_write_conflict(meta: &TupleMeta, txn: &Transaction) -> bool {
    if meta.ts == txn.id() {
        return false;
    }
    if is_txn_id(meta.ts) {
        return true;
    }
    meta.ts > txn.read_ts()
}

/// Applies one undo record over a decoded row.
fn apply_undo_log(values: &mut [Value], deleted: &mut bool, log: &UndoLog) {
    if log.is_deleted {
        *deleted = true;
        return;
    }
    *deleted = false;
    let mut value_index = 0;
    for (field, modified) in log.modified_fields.iter().enumerate() {
        if *modified {
            values[field] = log.values[value_index].clone();
            value_index += 1;
        }
    }
}

/// Replays undo records (newest first) over a base tuple to produce the
/// version the last record stamps. None when that version is a delete.
pub fn reconstruct_tuple(
    schema: &Schema,
    base_tuple: &Tuple,
    base_meta: TupleMeta,
    undo_logs: &[UndoLog],
) -> Option<Tuple> {
    let mut values = base_tuple.values(schema);
    let mut deleted = base_meta.is_deleted;
    for log in undo_logs {
        apply_undo_log(&mut values, &mut deleted, log);
    }
    if deleted {
        None
    } else {
        Some(Tuple::from_values(&values, schema))
    }
}

pub struct TransactionManager {
    next_txn_id: AtomicU64,
    last_commit_ts: AtomicU64,
    txn_map: Mutex<HashMap<u64, Arc<Transaction>>>,
    version_info: Mutex<HashMap<Rid, UndoLink>>,
    running_txns: Mutex<Watermark>,
    /// Serializes commit (and begin's snapshot acquisition) so commit
    /// timestamps, the watermark, and `last_commit_ts` stay consistent.
    commit_latch: Mutex<()>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(TXN_START_ID),
            last_commit_ts: AtomicU64::new(0),
            txn_map: Mutex::new(HashMap::new()),
            version_info: Mutex::new(HashMap::new()),
            running_txns: Mutex::new(Watermark::new()),
            commit_latch: Mutex::new(()),
        }
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let _commit_guard = self.commit_latch.lock().unwrap();
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let read_ts = self.last_commit_ts.load(Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, read_ts, isolation));
        self.running_txns.lock().unwrap().add_txn(read_ts);
        self.txn_map.lock().unwrap().insert(id, txn.clone());
        crate::obsidian_debug_log!("[TM::begin] txn {id:#x} read_ts {read_ts}");
        txn
    }

    pub fn get_txn(&self, txn_id: u64) -> Option<Arc<Transaction>> {
        self.txn_map.lock().unwrap().get(&txn_id).cloned()
    }

    pub fn last_commit_ts(&self) -> u64 {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    pub fn watermark(&self) -> u64 {
        self.running_txns.lock().unwrap().watermark()
    }

    pub fn read_undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.version_info.lock().unwrap().get(&rid).copied()
    }

    pub fn update_undo_link(&self, rid: Rid, link: Option<UndoLink>) {
        let mut version_info = self.version_info.lock().unwrap();
        match link {
            Some(link) => {
                version_info.insert(rid, link);
            }
            None => {
                version_info.remove(&rid);
            }
        }
    }

    pub fn get_undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        let txn = self.get_txn(link.txn_id)?;
        txn.undo_log(link.log_index)
    }

    pub fn commit(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<(), DbError> {
        match txn.state() {
            TransactionState::Running => {}
            TransactionState::Tainted => {
                self.abort(txn, catalog)?;
                return Err(DbError::TxnConflict(
                    "commit of a tainted transaction".to_string(),
                ));
            }
            other => {
                return Err(DbError::Internal(format!(
                    "commit of transaction in state {other:?}"
                )))
            }
        }

        let commit_guard = self.commit_latch.lock().unwrap();

        // A read-only transaction publishes nothing: no commit timestamp.
        if txn.write_set().is_empty() {
            txn.set_state(TransactionState::Committed);
            self.running_txns.lock().unwrap().remove_txn(txn.read_ts());
            return Ok(());
        }

        let commit_ts = self.last_commit_ts.load(Ordering::SeqCst) + 1;

        if txn.isolation() == IsolationLevel::Serializable
            && !self.validate_serializable(txn, catalog)?
        {
            drop(commit_guard);
            self.abort(txn, catalog)?;
            return Err(DbError::TxnConflict(
                "serializable validation failed".to_string(),
            ));
        }

        // Republish every write under its commit timestamp.
        for (table_oid, rid) in txn.write_set() {
            let table = catalog
                .get_table_by_oid(table_oid)
                .ok_or_else(|| DbError::Internal(format!("table oid {table_oid} vanished")))?;
            let meta = table.heap.get_tuple_meta(rid)?;
            if meta.ts == txn.id() {
                table.heap.update_tuple_meta(
                    TupleMeta {
                        ts: commit_ts,
                        is_deleted: meta.is_deleted,
                    },
                    rid,
                )?;
            }
        }

        *txn.commit_ts.lock().unwrap() = Some(commit_ts);
        txn.set_state(TransactionState::Committed);
        self.last_commit_ts.store(commit_ts, Ordering::SeqCst);
        {
            let mut watermark = self.running_txns.lock().unwrap();
            watermark.update_commit_ts(commit_ts);
            watermark.remove_txn(txn.read_ts());
        }
        crate::obsidian_debug_log!("[TM::commit] txn {:#x} commit_ts {commit_ts}", txn.id());
        Ok(())
    }

    /// Walks the write set in reverse, restoring each base tuple from the
    /// transaction's own undo record (or deleting a fresh insert).
    pub fn abort(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<(), DbError> {
        match txn.state() {
            TransactionState::Running | TransactionState::Tainted => {}
            other => {
                return Err(DbError::Internal(format!(
                    "abort of transaction in state {other:?}"
                )))
            }
        }

        for (table_oid, rid) in txn.write_set().into_iter().rev() {
            let table = catalog
                .get_table_by_oid(table_oid)
                .ok_or_else(|| DbError::Internal(format!("table oid {table_oid} vanished")))?;
            let (meta, base_bytes) = table.heap.get_tuple(rid)?;
            if meta.ts != txn.id() {
                continue;
            }

            let own_head = self
                .read_undo_link(rid)
                .filter(|link| link.txn_id == txn.id());
            match own_head {
                Some(link) => {
                    let log = txn
                        .undo_log(link.log_index)
                        .ok_or_else(|| DbError::Internal("dangling undo link".to_string()))?;
                    if log.is_deleted {
                        table.heap.update_tuple_meta(
                            TupleMeta {
                                ts: log.ts,
                                is_deleted: true,
                            },
                            rid,
                        )?;
                    } else {
                        let base = Tuple::from_bytes(base_bytes);
                        let mut values = base.values(&table.schema);
                        let mut deleted = false;
                        apply_undo_log(&mut values, &mut deleted, &log);
                        let restored = Tuple::from_values(&values, &table.schema);
                        table.heap.update_tuple_in_place(
                            TupleMeta {
                                ts: log.ts,
                                is_deleted: false,
                            },
                            restored.data(),
                            rid,
                        )?;
                    }
                    self.update_undo_link(rid, log.prev_version);
                }
                None => {
                    // Fresh insert with no prior version: the slot dies.
                    table.heap.update_tuple_meta(
                        TupleMeta {
                            ts: 0,
                            is_deleted: true,
                        },
                        rid,
                    )?;
                }
            }
        }

        txn.set_state(TransactionState::Aborted);
        let _commit_guard = self.commit_latch.lock().unwrap();
        self.running_txns.lock().unwrap().remove_txn(txn.read_ts());
        crate::obsidian_debug_log!("[TM::abort] txn {:#x}", txn.id());
        Ok(())
    }

    /// Backward validation: any version a concurrently-committed writer
    /// produced (or replaced) after our snapshot that satisfies one of our
    /// recorded scan predicates invalidates the commit.
    fn validate_serializable(
        &self,
        txn: &Arc<Transaction>,
        catalog: &Catalog,
    ) -> Result<bool, DbError> {
        let predicates = txn.scan_predicates();
        if predicates.is_empty() || txn.write_set().is_empty() {
            return Ok(true);
        }

        let concurrent_write_sets: Vec<Vec<(TableOid, Rid)>> = {
            let txn_map = self.txn_map.lock().unwrap();
            txn_map
                .values()
                .filter(|other| other.id() != txn.id())
                .filter(|other| other.state() == TransactionState::Committed)
                .filter(|other| other.commit_ts().is_some_and(|ts| ts > txn.read_ts()))
                .map(|other| other.write_set())
                .collect()
        };

        for write_set in concurrent_write_sets {
            for (table_oid, rid) in write_set {
                let table_predicates: Vec<&Expression> = predicates
                    .iter()
                    .filter(|(oid, _)| *oid == table_oid)
                    .map(|(_, p)| p)
                    .collect();
                if table_predicates.is_empty() {
                    continue;
                }
                let table = catalog
                    .get_table_by_oid(table_oid)
                    .ok_or_else(|| DbError::Internal(format!("table oid {table_oid} vanished")))?;

                // Materialize the chain from the base down to the first
                // version at or below our snapshot.
                let (base_meta, base_bytes) = table.heap.get_tuple(rid)?;
                let base = Tuple::from_bytes(base_bytes);
                let mut values = base.values(&table.schema);
                let mut deleted = base_meta.is_deleted;
                let mut versions = vec![(base_meta.ts, deleted, values.clone())];
                let mut link = self.read_undo_link(rid);
                while let Some(l) = link {
                    let Some(log) = self.get_undo_log(l) else {
                        break;
                    };
                    apply_undo_log(&mut values, &mut deleted, &log);
                    versions.push((log.ts, deleted, values.clone()));
                    if log.ts <= txn.read_ts() {
                        break;
                    }
                    link = log.prev_version;
                }

                for (ts, is_deleted, row) in versions {
                    // In-flight stamps belong to uncommitted writers.
                    if is_txn_id(ts) || is_deleted {
                        continue;
                    }
                    let tuple = Tuple::from_values(&row, &table.schema);
                    for predicate in &table_predicates {
                        if predicate.evaluate_as_filter(&tuple, &table.schema)? {
                            crate::obsidian_debug_log!(
                                "[TM::validate] txn {:#x} conflicts on rid {rid:?}",
                                txn.id()
                            );
                            return Ok(false);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    /// Forgets finished transactions whose undo records no live reader can
    /// reach: every chain is needed only down to its first version at or
    /// below the watermark.
    pub fn garbage_collection(&self) {
        let watermark = self.watermark();
        let mut needed: HashSet<u64> = HashSet::new();
        {
            let version_info = self.version_info.lock().unwrap();
            let txn_map = self.txn_map.lock().unwrap();
            for link in version_info.values() {
                let mut cursor = Some(*link);
                while let Some(l) = cursor {
                    let Some(owner) = txn_map.get(&l.txn_id) else {
                        break;
                    };
                    needed.insert(l.txn_id);
                    let Some(log) = owner.undo_log(l.log_index) else {
                        break;
                    };
                    if log.ts <= watermark {
                        break;
                    }
                    cursor = log.prev_version;
                }
            }
        }

        let mut txn_map = self.txn_map.lock().unwrap();
        let before = txn_map.len();
        txn_map.retain(|id, t| {
            matches!(
                t.state(),
                TransactionState::Running | TransactionState::Tainted
            ) || needed.contains(id)
                || t.commit_ts().is_some_and(|ts| ts >= watermark)
        });
        crate::obsidian_debug_log!(
            "[TM::gc] watermark {watermark}, dropped {} of {before} txns",
            before - txn_map.len()
        );
    }
}

/// Walks the version chain for `rid` until a version visible at the
/// transaction's snapshot. `Some(vec![])` means the base tuple itself is
/// visible; None means nothing is.
pub fn collect_undo_logs(
    txn_manager: &TransactionManager,
    txn: &Transaction,
    rid: Rid,
    base_meta: TupleMeta,
) -> Option<Vec<UndoLog>> {
    if base_meta.ts == txn.id() {
        return Some(Vec::new());
    }
    if !is_txn_id(base_meta.ts) && base_meta.ts <= txn.read_ts() {
        return Some(Vec::new());
    }

    let mut logs = Vec::new();
    let mut link = txn_manager.read_undo_link(rid);
    while let Some(l) = link {
        let log = txn_manager.get_undo_log(l)?;
        let log_ts = log.ts;
        let prev = log.prev_version;
        logs.push(log);
        if log_ts <= txn.read_ts() {
            return Some(logs);
        }
        link = prev;
    }
    None
}

/// The version of a tuple visible to `txn`, or None when the tuple is
/// invisible or deleted at the snapshot.
pub fn visible_tuple(
    txn_manager: &TransactionManager,
    txn: &Transaction,
    schema: &Schema,
    base_meta: TupleMeta,
    base_tuple: &Tuple,
    rid: Rid,
) -> Option<Tuple> {
    let logs = collect_undo_logs(txn_manager, txn, rid, base_meta)?;
    reconstruct_tuple(schema, base_tuple, base_meta, &logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, TypeId};

    fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new("b", TypeId::Integer),
        ])
    }

    fn tuple(a: i32, b: i32, schema: &Schema) -> Tuple {
        Tuple::from_values(&[Value::Int(a), Value::Int(b)], schema)
    }

    #[test]
    fn reconstruct_applies_masked_fields_newest_first() {
        let schema = test_schema();
        let base = tuple(10, 20, &schema);
        let base_meta = TupleMeta {
            ts: 5,
            is_deleted: false,
        };

        let logs = vec![
            UndoLog {
                ts: 4,
                is_deleted: false,
                modified_fields: vec![true, false],
                values: vec![Value::Int(7)],
                prev_version: None,
            },
            UndoLog {
                ts: 2,
                is_deleted: false,
                modified_fields: vec![false, true],
                values: vec![Value::Int(99)],
                prev_version: None,
            },
        ];
        let rebuilt = reconstruct_tuple(&schema, &base, base_meta, &logs).unwrap();
        assert_eq!(
            rebuilt.values(&schema),
            vec![Value::Int(7), Value::Int(99)]
        );
    }

    #[test]
    fn reconstruct_surfaces_deletes() {
        let schema = test_schema();
        let base = tuple(1, 2, &schema);
        let base_meta = TupleMeta {
            ts: 5,
            is_deleted: false,
        };
        let logs = vec![UndoLog {
            ts: 3,
            is_deleted: true,
            modified_fields: vec![false, false],
            values: vec![],
            prev_version: None,
        }];
        assert!(reconstruct_tuple(&schema, &base, base_meta, &logs).is_none());

        // A deleted base with no undo records is invisible.
        let deleted_meta = TupleMeta {
            ts: 5,
            is_deleted: true,
        };
        assert!(reconstruct_tuple(&schema, &base, deleted_meta, &[]).is_none());
    }

    #[test]
    fn write_conflict_detection() {
        let txn = Transaction::new(TXN_START_ID + 1, 5, IsolationLevel::SnapshotIsolation);

        // Own stamp: fine.
        let own = TupleMeta {
            ts: TXN_START_ID + 1,
            is_deleted: false,
        };
        assert!(!check_write_write_conflict(&own, &txn));

        // Another in-flight transaction: conflict.
        let other = TupleMeta {
            ts: TXN_START_ID + 2,
            is_deleted: false,
        };
        assert!(check_write_write_conflict(&other, &txn));

        // Committed before our snapshot: fine; after it: conflict.
        let old = TupleMeta {
            ts: 5,
            is_deleted: false,
        };
        assert!(!check_write_write_conflict(&old, &txn));
        let newer = TupleMeta {
            ts: 6,
            is_deleted: false,
        };
        assert!(check_write_write_conflict(&newer, &txn));
    }

    #[test]
    fn begin_takes_the_last_commit_ts_as_snapshot() {
        let tm = TransactionManager::new();
        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(t1.read_ts(), 0);
        assert!(is_txn_id(t1.id()));
        assert_eq!(tm.watermark(), 0);
    }
}
