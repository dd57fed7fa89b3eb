//! Record store backed by a single pretty-printed JSON document.

use super::traits::{RecordStore, StorageError};
use crate::records::Record;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

/// Convert an io::Error into StorageError, detecting disk-full (ENOSPC).
pub(crate) fn io_to_storage_error(e: std::io::Error) -> StorageError {
    if e.raw_os_error() == Some(ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(e)
    }
}

/// Replace `path` with `data` via temp file + fsync + rename, so readers
/// see either the old or the new file, never a torn one.
pub(crate) async fn atomic_write(path: &Path, data: Vec<u8>) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_to_storage_error)?;
        tmp.write_all(&data).map_err(io_to_storage_error)?;
        tmp.as_file().sync_all().map_err(io_to_storage_error)?;
        tmp.persist(&path).map_err(|e| io_to_storage_error(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))?
}

/// The whole collection lives in memory and every mutation rewrites the file.
///
/// File layout: one JSON object `{ "<id>": { <field>: <value>, ... }, ... }`,
/// two-space indented, non-ASCII text written verbatim.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the document at `path`. A missing file is an empty collection.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let records = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Map::new(),
            Ok(bytes) => parse_document(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} does not exist yet, starting empty", path.display());
                Map::new()
            }
            Err(e) => return Err(io_to_storage_error(e)),
        };
        debug!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &Map<String, Value>) -> Result<(), StorageError> {
        let mut bytes = serde_json::to_vec_pretty(records)?;
        bytes.push(b'\n');
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_to_storage_error)?;
        }
        atomic_write(&self.path, bytes).await
    }
}

fn parse_document(bytes: &[u8]) -> Result<Map<String, Value>, StorageError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(records) = value else {
        return Err(StorageError::InvalidDocument(
            "top level must be an object".into(),
        ));
    };
    if let Some((id, _)) = records.iter().find(|(_, record)| !record.is_object()) {
        return Err(StorageError::InvalidDocument(format!(
            "record '{}' is not an object",
            id
        )));
    }
    Ok(records)
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StorageError> {
        let records = self.records.read().await;
        Ok(records.get(id).and_then(Value::as_object).cloned())
    }

    #[instrument(skip(self, record))]
    async fn put(&self, id: &str, record: Record) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        next.insert(id.to_string(), Value::Object(record));
        self.persist(&next).await?;
        *records = next;
        debug!("Stored record {} ({} total)", id, records.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<Option<Record>, StorageError> {
        let mut records = self.records.write().await;
        if !records.contains_key(id) {
            return Ok(None);
        }
        let mut next = records.clone();
        let removed = next.shift_remove(id);
        self.persist(&next).await?;
        *records = next;
        debug!("Deleted record {} ({} left)", id, records.len());
        Ok(removed.and_then(|v| match v {
            Value::Object(record) => Some(record),
            _ => None,
        }))
    }

    async fn list(&self) -> Result<Vec<(String, Record)>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter_map(|(id, v)| v.as_object().map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn ids(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}
