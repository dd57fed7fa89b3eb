//! Uploaded images on the local filesystem.

use super::json_file::{atomic_write, io_to_storage_error};
use super::traits::StorageError;
use crate::clock::SharedClock;
use bytes::Bytes;
use futures::future::join_all;
use rand::RngCore;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

/// Flat directory of image files addressed by bare file name.
pub struct ImageStore {
    dir: PathBuf,
    allowed_extensions: HashSet<String>,
    clock: SharedClock,
}

impl ImageStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        allowed_extensions: impl IntoIterator<Item = String>,
        clock: SharedClock,
    ) -> Self {
        Self {
            dir: dir.into(),
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            clock,
        }
    }

    /// Lowercased extension of an uploaded file name, if it has one.
    pub fn extension_of(filename: &str) -> Option<String> {
        let (_, ext) = filename.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn is_allowed(&self, filename: &str) -> bool {
        Self::extension_of(filename)
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Store an upload under a generated `<UTC timestamp>_<random>.<ext>`
    /// name and return that name.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn save(&self, original_name: &str, data: Bytes) -> Result<String, StorageError> {
        let ext = Self::extension_of(original_name)
            .filter(|ext| self.allowed_extensions.contains(ext))
            .ok_or_else(|| StorageError::UnsupportedType(original_name.to_string()))?;

        let mut suffix = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut suffix);
        let name = format!(
            "{}_{}.{}",
            self.clock.now().format("%Y%m%d%H%M%S"),
            hex::encode(suffix),
            ext
        );

        fs::create_dir_all(&self.dir).await.map_err(io_to_storage_error)?;
        atomic_write(&self.dir.join(&name), data.to_vec()).await?;
        info!("Stored image {} ({} bytes)", name, data.len());
        Ok(name)
    }

    /// Map a client-supplied file name to a path inside the directory.
    /// Anything that could escape it is refused.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let safe = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0'])
            && !name.contains("..");
        if !safe {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    /// File contents plus a guessed MIME type.
    pub async fn read(&self, name: &str) -> Result<(Bytes, String), StorageError> {
        let path = self.resolve(name)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                let mime = mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .to_string();
                Ok((Bytes::from(bytes), mime))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(io_to_storage_error(e)),
        }
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted image {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(io_to_storage_error(e)),
        }
    }

    /// Delete several images concurrently. Missing files are logged and
    /// skipped; any other failure is returned after all deletions ran.
    pub async fn delete_many<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, StorageError> {
        let results = join_all(names.into_iter().map(|name| async move {
            (name, self.delete(name).await)
        }))
        .await;

        let mut deleted = 0;
        let mut first_error = None;
        for (name, result) in results {
            match result {
                Ok(()) => deleted += 1,
                Err(StorageError::NotFound(_)) => warn!("Referenced image {} was already gone", name),
                Err(e) => {
                    error!("Failed to delete image {}: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// Names of the regular files in the directory. A missing directory is empty.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_to_storage_error(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // Skip in-flight atomic writes.
                if !name.starts_with(".tmp") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete every image not named in `referenced`. Individual failures are
    /// logged and skipped. Returns how many files were removed.
    #[instrument(skip(self, referenced), fields(referenced = referenced.len()))]
    pub async fn cleanup_unused(&self, referenced: &HashSet<String>) -> Result<usize, StorageError> {
        let mut removed = 0;
        for name in self.list().await? {
            if referenced.contains(&name) {
                continue;
            }
            match fs::remove_file(self.dir.join(&name)).await {
                Ok(()) => removed += 1,
                Err(e) => error!("Failed to delete unused image {}: {}", name, e),
            }
        }
        if removed > 0 {
            info!("Removed {} unused images", removed);
        }
        Ok(removed)
    }
}
