//! # Storage backends
//!
//! Configuration and unification of the byte-storage backends used by the
//! package registry. A [`Driver`] moves opaque byte streams to and from a
//! backend addressed by UTF-8 paths; [`Storage`] is the cloneable handle the
//! registry holds on to.

use std::sync::Arc;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;

mod driver;
pub(crate) mod local;
pub(crate) mod memory;
pub(crate) mod temp;

mod error;

#[doc(inline)]
pub use driver::{Driver, Metadata, Reader, Writer};
#[doc(inline)]
pub use error::{StorageError, StorageErrorKind};
#[doc(inline)]
pub use local::LocalDriver;
#[doc(inline)]
pub use memory::MemoryStorage;
#[doc(inline)]
pub use temp::TempDriver;

use tokio::io;

/// Declarative storage configuration, usually deserialized from a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Keep everything in process memory. Useful for tests and demos.
    Memory,

    /// Store files beneath a local directory.
    Local {
        /// Root directory for stored files.
        path: Utf8PathBuf,
    },

    /// Store files in a temporary directory removed on drop.
    Temp,
}

impl StorageConfig {
    /// Build the configured storage backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let storage: Storage = match self {
            StorageConfig::Memory => MemoryStorage::new().into(),
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            StorageConfig::Temp => TempDriver::new()?.into(),
        };
        Ok(storage)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to a storage backend.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver in a storage handle.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Get the metadata for a stored file.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(remote).await
    }

    /// Download a stored file into a writer stream.
    #[tracing::instrument(skip(self, writer), fields(driver = self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {remote}");
        self.driver.download(remote, writer).await?;
        Ok(())
    }

    /// Upload a file from a reader stream.
    #[tracing::instrument(skip(self, reader), fields(driver = self.driver.name()))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {remote}");
        self.driver.upload(remote, reader).await?;
        Ok(())
    }

    /// List stored files, optionally filtered by a path prefix.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(prefix).await
    }

    /// Delete a stored file.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(path).await
    }
}
