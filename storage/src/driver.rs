use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::StorageError;

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// File object metadata, generically provided by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides the ability to interact with a storage
/// backend.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Delete a file from the storage, by path.
    async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Upload a file to the storage, using a reader stream to provide the contents.
    async fn upload(&self, remote: &Utf8Path, reader: &mut Reader<'_>) -> Result<(), StorageError>;

    /// Download a file from storage, into a writer stream.
    async fn download(&self, remote: &Utf8Path, writer: &mut Writer<'_>)
    -> Result<(), StorageError>;

    /// List the stored files, optionally filtered by a prefix.
    async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(remote).await
    }

    async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(remote).await
    }

    async fn upload(&self, remote: &Utf8Path, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        self.deref().upload(remote, reader).await
    }

    async fn download(
        &self,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(remote, writer).await
    }

    async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.deref().list(prefix).await
    }
}
