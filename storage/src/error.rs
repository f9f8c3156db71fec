use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

/// Categorizes storage errors by their semantic meaning, independent of the
/// underlying storage backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested file was not found.
    NotFound,

    /// The caller lacks permission to perform the requested operation.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk, etc.).
    Io,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl StorageErrorKind {
    /// Whether this error kind typically indicates a retryable condition.
    ///
    /// Advisory only; callers decide whether retry logic exists at a higher
    /// level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageErrorKind::Io)
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// An error produced by a storage driver.
#[derive(Debug, thiserror::Error)]
#[error("{engine}: {kind}{}", path.as_deref().map(|p| format!(" ({p})")).unwrap_or_default())]
pub struct StorageError {
    engine: &'static str,
    kind: StorageErrorKind,
    path: Option<Utf8PathBuf>,
    #[source]
    source: std::io::Error,
}

impl StorageError {
    /// Create a new storage error from an I/O error, categorizing it by the
    /// I/O error kind.
    pub fn io(engine: &'static str, source: std::io::Error) -> Self {
        let kind = match source.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        Self {
            engine,
            kind,
            path: None,
            source,
        }
    }

    /// Create a not-found error for the given path.
    pub fn not_found(engine: &'static str, path: &Utf8Path) -> Self {
        Self {
            engine,
            kind: StorageErrorKind::NotFound,
            path: Some(path.to_owned()),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("path not found: {path}"),
            ),
        }
    }

    /// Attach the path the operation was addressing.
    pub fn with_path(mut self, path: &Utf8Path) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    /// The semantic kind of this error.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Whether the error indicates a missing file.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_kind_mapping() {
        let err = StorageError::io(
            "test",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.is_not_found());
        assert!(!err.kind().is_retryable());

        let err = StorageError::io(
            "test",
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        );
        assert_eq!(err.kind(), StorageErrorKind::Io);
        assert!(err.kind().is_retryable());
    }

    #[test]
    fn display_includes_path() {
        let err = StorageError::not_found("memory", Utf8Path::new("blobs/sha256/ab"));
        assert_eq!(err.to_string(), "memory: not found (blobs/sha256/ab)");
    }
}
