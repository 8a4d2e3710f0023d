use quarry::StorageError;

#[derive(Debug)]
pub enum DbError {
    Storage(StorageError),
    TableNotFound(String),
    IndexNotFound(String),
    ColumnNotFound(String),
    /// Duplicate key on a unique index.
    IndexConflict(String),
    /// Write-write conflict or failed serializable validation. The owning
    /// transaction is tainted and must abort.
    TxnConflict(String),
    NotImplemented(String),
    Internal(String),
}

impl From<StorageError> for DbError {
    fn from(err: StorageError) -> Self {
        DbError::Storage(err)
    }
}
