use thiserror::Error;

use crate::config::ConfigError;
use crate::file::FileError;
use crate::record::RecordError;

/// Errors that can occur during B+ tree operations
#[derive(Debug, Error)]
pub enum BPlusTreeError {
    #[error("Index file missing for table '{0}'")]
    IndexMissing(String),

    #[error("Record file missing for table '{0}'")]
    DbMissing(String),

    #[error("Index file already exists for table '{0}'")]
    IndexAlreadyExists(String),

    #[error("Record file already exists for table '{0}'")]
    DbAlreadyExists(String),

    #[error("Item already exists")]
    ItemAlreadyExists,

    #[error("Item not found")]
    ItemNotFound,

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSize { expected: usize, actual: usize },

    #[error("Key of {0} bytes exceeds the field width")]
    KeySize(usize),

    #[error("Update would change the indexed key")]
    KeyChanged,

    #[error("Invalid node capacity: {0} (must be 4..=255)")]
    InvalidNodeCapacity(usize),

    #[error("Corrupted index: {0}")]
    Corrupted(String),

    #[error("Schema error: {0}")]
    Record(#[from] RecordError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BPlusTreeError {
    /// Whether the error comes from the storage below the tree rather than
    /// from the request itself
    pub fn is_fatal(&self) -> bool {
        matches!(self, BPlusTreeError::File(_) | BPlusTreeError::Corrupted(_))
    }
}

pub type BPlusTreeResult<T> = Result<T, BPlusTreeError>;
