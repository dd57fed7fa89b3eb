//! Storage trait definitions

use crate::records::Record;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed record document: {0}")]
    InvalidDocument(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Insufficient storage: disk full")]
    DiskFull,

    #[error("Storage error: {0}")]
    Other(String),
}

/// Keyed record persistence.
///
/// Object-safe; the application holds it as `Arc<dyn RecordStore>`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record
    async fn get(&self, id: &str) -> Result<Option<Record>, StorageError>;

    /// Insert or replace a record. A replaced record keeps its position.
    async fn put(&self, id: &str, record: Record) -> Result<(), StorageError>;

    /// Remove a record, returning it if it existed
    async fn delete(&self, id: &str) -> Result<Option<Record>, StorageError>;

    /// Every record, in document order
    async fn list(&self) -> Result<Vec<(String, Record)>, StorageError>;

    /// Every record id, in document order
    async fn ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.list().await?.into_iter().map(|(id, _)| id).collect())
    }
}
