//! Multi-algorithm content hashing
//!
//! Every stored file carries MD5, SHA-1, SHA-256 and SHA-512 sums so that
//! ecosystem adapters can serve whichever checksum their clients ask for.

use sha1::Digest as _;

/// Hex-encoded sums for a single payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHashes {
    /// MD5 sum
    pub md5: String,
    /// SHA-1 sum
    pub sha1: String,
    /// SHA-256 sum
    pub sha256: String,
    /// SHA-512 sum
    pub sha512: String,
}

/// Incrementally hashes a stream of chunks with all four algorithms.
///
/// Cloning the hasher snapshots its state, so an in-progress upload can be
/// finalized for inspection without consuming the session's hasher.
#[derive(Clone)]
pub struct MultiHasher {
    md5: md5::Context,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    sha512: sha2::Sha512,
}

impl MultiHasher {
    /// Create a hasher with no data consumed.
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: sha1::Sha1::new(),
            sha256: sha2::Sha256::new(),
            sha512: sha2::Sha512::new(),
        }
    }

    /// Feed a chunk into all digests.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.sha512.update(data);
    }

    /// Consume the hasher and produce the final sums.
    pub fn finalize(self) -> ContentHashes {
        ContentHashes {
            md5: hex::encode(self.md5.compute().0),
            sha1: hex::encode(self.sha1.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHasher").finish_non_exhaustive()
    }
}

/// Hash a complete in-memory payload.
pub fn hash_bytes(data: &[u8]) -> ContentHashes {
    let mut hasher = MultiHasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload() {
        let hashes = hash_bytes(b"");
        assert_eq!(hashes.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hashes.sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            hashes.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut hasher = MultiHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), hash_bytes(b"hello world"));
    }

    #[test]
    fn clone_snapshots_state() {
        let mut hasher = MultiHasher::new();
        hasher.update(b"first");
        let snapshot = hasher.clone().finalize();
        hasher.update(b" second");

        assert_eq!(snapshot, hash_bytes(b"first"));
        assert_eq!(hasher.finalize(), hash_bytes(b"first second"));
    }
}
