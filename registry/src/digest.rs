//! Content digests
//!
//! Blobs and manifests are addressed by the SHA-256 of their bytes, rendered
//! in the `sha256:<hex>` form used on the wire.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use crate::error::RegistryError;

/// A validated `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Compute the digest of a byte payload.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// Build a digest from an already-computed lowercase hex string.
    pub fn from_sha256_hex(hex: impl Into<String>) -> Result<Self, RegistryError> {
        let hex = hex.into();
        if !is_hex256(&hex) {
            return Err(RegistryError::InvalidDigest(hex));
        }
        Ok(Self { hex })
    }

    /// The hex-encoded hash, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("sha256:")
            .ok_or_else(|| RegistryError::InvalidDigest(s.to_string()))?;
        Self::from_sha256_hex(hex)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

fn is_hex256(s: &str) -> bool {
    s.len() == 64
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
