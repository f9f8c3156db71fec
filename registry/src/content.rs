//! Content-addressable blob storage
//!
//! Blobs live in the storage backend under `blobs/sha256/<hex>`, keyed by the
//! SHA-256 of their bytes. Writes verify the digest before anything reaches
//! the backend, so a key always matches its content.

use camino::Utf8PathBuf;

use storage::Storage;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::hash::{ContentHashes, hash_bytes};

/// Content-addressable store over a [`Storage`] backend.
#[derive(Debug, Clone)]
pub struct ContentStore {
    storage: Storage,
}

impl ContentStore {
    /// Wrap a storage backend.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn key(digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("blobs/sha256/{}", digest.hex()))
    }

    /// Whether a blob with this digest is stored.
    pub async fn exists(&self, digest: &Digest) -> bool {
        self.storage.metadata(&Self::key(digest)).await.is_ok()
    }

    /// Store a payload under a declared digest, verifying it first.
    ///
    /// Returns the full hash set of the payload. Nothing is written when the
    /// declared digest does not match the bytes.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put(&self, digest: &Digest, data: &[u8]) -> RegistryResult<ContentHashes> {
        let hashes = hash_bytes(data);
        if hashes.sha256 != digest.hex() {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: format!("sha256:{}", hashes.sha256),
            });
        }
        self.put_verified(&hashes, data).await?;
        Ok(hashes)
    }

    /// Store a payload whose hashes were already computed by the caller,
    /// such as an upload session's incremental hasher.
    #[tracing::instrument(skip(self, hashes, data), fields(size = data.len()))]
    pub async fn put_verified(&self, hashes: &ContentHashes, data: &[u8]) -> RegistryResult<Digest> {
        let digest = Digest::from_sha256_hex(hashes.sha256.clone())?;
        let mut reader = data;
        self.storage.upload(&Self::key(&digest), &mut reader).await?;
        Ok(digest)
    }

    /// Read a blob's bytes.
    pub async fn get(&self, digest: &Digest) -> RegistryResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.storage
            .download(&Self::key(digest), &mut buf)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    RegistryError::BlobNotFound(digest.to_string())
                } else {
                    err.into()
                }
            })?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;

    fn content() -> ContentStore {
        ContentStore::new(MemoryStorage::new().into())
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = content();
        let digest = Digest::sha256(b"payload");
        store.put(&digest, b"payload").await.unwrap();

        assert!(store.exists(&digest).await);
        assert_eq!(store.get(&digest).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn mismatch_stores_nothing() {
        let store = content();
        let wrong = Digest::sha256(b"other");
        let err = store.put(&wrong, b"payload").await.expect_err("mismatch");
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));
        assert!(!store.exists(&wrong).await);
        assert!(!store.exists(&Digest::sha256(b"payload")).await);
    }

    #[tokio::test]
    async fn missing_blob() {
        let store = content();
        let digest = Digest::sha256(b"never stored");
        let err = store.get(&digest).await.expect_err("missing");
        assert!(matches!(err, RegistryError::BlobNotFound(_)));
    }
}
