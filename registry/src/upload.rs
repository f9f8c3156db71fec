//! Chunked upload sessions
//!
//! Container blob uploads arrive over several requests. A session buffers the
//! chunks received so far and hashes them incrementally, so committing never
//! re-reads the accumulated bytes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::hash::{ContentHashes, MultiHasher};

/// An in-progress chunked upload.
#[derive(Debug, Default)]
pub struct UploadSession {
    buf: Vec<u8>,
    hasher: MultiHasher,
}

impl UploadSession {
    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Append a chunk at the given offset.
    ///
    /// A chunk whose offset is not exactly the bytes received so far fails
    /// with `RangeNotSatisfiable` and leaves the session unchanged.
    pub fn append(&mut self, offset: Option<u64>, data: &[u8]) -> RegistryResult<u64> {
        if let Some(offset) = offset {
            if offset != self.received() {
                return Err(RegistryError::RangeNotSatisfiable {
                    received: self.received(),
                });
            }
        }
        self.buf.extend_from_slice(data);
        self.hasher.update(data);
        Ok(self.received())
    }

    /// Hashes of the bytes received so far.
    pub fn hashes(&self) -> ContentHashes {
        self.hasher.clone().finalize()
    }
}

/// Tracks the active upload sessions.
#[derive(Debug, Clone, Default)]
pub struct UploadManager {
    sessions: Arc<DashMap<Uuid, Arc<Mutex<Option<UploadSession>>>>>,
}

impl UploadManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .insert(id, Arc::new(Mutex::new(Some(UploadSession::default()))));
        tracing::debug!(upload = %id, "Started upload session");
        id
    }

    fn slot(&self, id: Uuid) -> RegistryResult<Arc<Mutex<Option<UploadSession>>>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))
    }

    /// Bytes received by a session.
    pub async fn received(&self, id: Uuid) -> RegistryResult<u64> {
        let slot = self.slot(id)?;
        let guard = slot.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))?;
        Ok(session.received())
    }

    /// Append a chunk to a session.
    pub async fn append(&self, id: Uuid, offset: Option<u64>, data: &[u8]) -> RegistryResult<u64> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))?;
        session.append(offset, data)
    }

    /// Finalize a session against a declared digest, yielding the payload
    /// and its hashes.
    ///
    /// On digest mismatch the session survives untouched, so a client can
    /// append the missing bytes or retry the commit with the right digest.
    pub async fn commit(&self, id: Uuid, digest: &Digest) -> RegistryResult<(Vec<u8>, ContentHashes)> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))?;

        let hashes = session.hashes();
        if hashes.sha256 != digest.hex() {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: format!("sha256:{}", hashes.sha256),
            });
        }

        let session = guard
            .take()
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))?;
        drop(guard);
        self.sessions.remove(&id);
        Ok((session.buf, hashes))
    }

    /// Discard a session.
    pub fn cancel(&self, id: Uuid) -> RegistryResult<()> {
        self.take(id)?;
        tracing::debug!(upload = %id, "Cancelled upload session");
        Ok(())
    }

    fn take(&self, id: Uuid) -> RegistryResult<Arc<Mutex<Option<UploadSession>>>> {
        self.sessions
            .remove(&id)
            .map(|(_, slot)| slot)
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))
    }
}
