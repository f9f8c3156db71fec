use camino::Utf8Path;
use tempfile::TempDir;

use crate::driver::{Driver, Metadata, Reader, Writer};
use crate::error::StorageError;
use crate::local::LocalDriver;

/// A storage driver that stores files in a temporary directory.
#[derive(Debug)]
pub struct TempDriver {
    #[allow(unused)]
    dir: TempDir,
    driver: LocalDriver,
}

impl TempDriver {
    /// Create a new `TempDriver` instance, storing files in a temporary
    /// directory which is removed when the driver is dropped.
    pub fn new() -> Result<Self, StorageError> {
        let tmp = TempDir::new().map_err(|err| StorageError::io("temp", err))?;
        let root = Utf8Path::from_path(tmp.path())
            .expect("utf-8 path")
            .to_owned();

        Ok(Self {
            dir: tmp,
            driver: LocalDriver::new(root),
        })
    }
}

#[async_trait::async_trait]
impl Driver for TempDriver {
    fn name(&self) -> &'static str {
        "temp"
    }

    async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(remote).await
    }

    async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(remote).await
    }

    async fn upload(&self, remote: &Utf8Path, reader: &mut Reader<'_>) -> Result<(), StorageError> {
        self.driver.upload(remote, reader).await
    }

    async fn download(
        &self,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.driver.download(remote, writer).await
    }

    async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_roundtrip_through_tempdir() {
        let storage = TempDriver::new().unwrap();
        let path = Utf8Path::new("blobs/sha256/feed");

        let mut reader = tokio::io::BufReader::new(&b"local bytes"[..]);
        storage.upload(path, &mut reader).await.unwrap();

        let meta = storage.metadata(path).await.unwrap();
        assert_eq!(meta.size, 11);

        let mut out = Vec::new();
        storage.download(path, &mut out).await.unwrap();
        assert_eq!(&out[..], b"local bytes");

        let listed = storage.list(Some(Utf8Path::new("blobs"))).await.unwrap();
        assert_eq!(listed, vec!["blobs/sha256/feed".to_string()]);

        storage.delete(path).await.unwrap();
        let err = storage.metadata(path).await.expect_err("deleted");
        assert!(err.is_not_found());
    }
}
