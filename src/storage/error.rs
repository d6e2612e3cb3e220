use thiserror::Error;

use crate::ledger::persist::PersistError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database.path is required when database.in_memory = false")]
    MissingPath,

    #[error("snapshot error: {0}")]
    Snapshot(#[from] PersistError),
}
