use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::StorageError;

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Storage driver that stores files in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<Utf8PathBuf, MemoryFileItem>>,
}

impl MemoryStorage {
    /// Create a new, empty `MemoryStorage` instance.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let files = self.files.read().await;
        Ok(files
            .get(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), remote))?
            .into())
    }

    async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut files = self.files.write().await;
        files
            .remove(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), remote))?;
        Ok(())
    }

    async fn upload(&self, remote: &Utf8Path, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(reader, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        buf.shutdown()
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        let mut files = self.files.write().await;
        files.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let files = self.files.read().await;
        let mut buf = files
            .get(remote)
            .ok_or_else(|| StorageError::not_found(self.name(), remote))?
            .as_ref();

        tokio::io::copy(&mut buf, writer)
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        writer
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err).with_path(remote))?;

        Ok(())
    }

    async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        tracing::trace!(?prefix, "list memory storage");

        let files = self.files.read().await;

        let mut paths = Vec::new();
        for path in files.keys() {
            if let Some(prefix) = prefix {
                if path.starts_with(prefix) {
                    paths.push(path.to_string());
                }
            } else {
                paths.push(path.to_string());
            }
        }

        Ok(paths)
    }
}
