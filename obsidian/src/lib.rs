//! # Obsidian
//! The execution layer of the Obsidian database: values, tuples and
//! schemas, the expression interpreter, the catalog, multi-version
//! concurrency control, the iterator-model executors, and the plan
//! optimizer. Storage lives in the `quarry` crate.

use std::path::Path;
use std::sync::{Arc, Mutex};

use quarry::disk_manager::DiskManager;
use quarry::BufferPoolManager;

pub mod aggregate_executor;
pub mod catalog;
pub mod errors;
pub mod executor;
pub mod expression;
pub mod limit_executor;
pub mod optimizer;
pub mod plan;
pub mod transaction;
pub mod tuple;
pub mod types;
pub mod value;
pub mod watermark;
pub mod window_executor;

use catalog::Catalog;
use errors::DbError;
use transaction::{IsolationLevel, Transaction, TransactionManager};

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("OBSIDIAN_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! obsidian_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}

const DEFAULT_POOL_SIZE: usize = 256;
const DEFAULT_REPLACER_K: usize = 2;

/// Wires the storage engine, catalog, and transaction manager together.
pub struct Database {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Mutex<Catalog>>,
    pub txn_manager: Arc<TransactionManager>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::open_with_pool(path, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self, DbError> {
        let disk = DiskManager::open(path).map_err(quarry::StorageError::DiskIo)?;
        let bpm = Arc::new(BufferPoolManager::new(pool_size, disk, DEFAULT_REPLACER_K));
        Ok(Self {
            bpm,
            catalog: Arc::new(Mutex::new(Catalog::new())),
            txn_manager: Arc::new(TransactionManager::new()),
        })
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        self.txn_manager.begin(isolation)
    }

    /// An executor context for one transaction's pipeline.
    pub fn executor_context(&self, txn: Arc<Transaction>) -> executor::ExecutorContext {
        executor::ExecutorContext {
            bpm: self.bpm.clone(),
            catalog: self.catalog.clone(),
            txn,
            txn_manager: self.txn_manager.clone(),
        }
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), DbError> {
        let catalog = self.catalog.lock().unwrap();
        self.txn_manager.commit(txn, &catalog)
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), DbError> {
        let catalog = self.catalog.lock().unwrap();
        self.txn_manager.abort(txn, &catalog)
    }
}
