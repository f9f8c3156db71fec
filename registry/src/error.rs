//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Package not found
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// Package version not found
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// Package file not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Blob upload session not found
    #[error("blob upload not found: {0}")]
    UploadNotFound(String),

    /// Duplicate coordinate where the ecosystem forbids overwrite
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Declared and computed digests differ
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Declared digest
        expected: String,
        /// Computed digest
        actual: String,
    },

    /// Invalid package or repository name
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Invalid tag or reference
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A manifest references a blob which is not present
    #[error("manifest references unknown blob: {0}")]
    MissingBlob(String),

    /// Adapter-level parse failure
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Unsupported manifest media type
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    /// Non-contiguous chunk offset
    #[error("range not satisfiable: upload has {received} bytes")]
    RangeNotSatisfiable {
        /// Bytes received by the upload session so far
        received: u64,
    },

    /// Payload exceeds the configured size limit
    #[error("payload exceeds maximum size of {limit} bytes")]
    SizeLimitExceeded {
        /// Maximum accepted payload size in bytes
        limit: usize,
    },

    /// Missing or invalid credentials
    #[error("unauthorized")]
    Unauthorized,

    /// The authenticated principal may not perform this operation
    #[error("forbidden")]
    Forbidden,

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::PackageNotFound(_)
            | RegistryError::VersionNotFound(_)
            | RegistryError::FileNotFound(_)
            | RegistryError::UploadNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyExists(_)
            | RegistryError::InvalidDigest(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::InvalidName(_)
            | RegistryError::InvalidReference(_)
            | RegistryError::MissingBlob(_)
            | RegistryError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            RegistryError::UnsupportedManifestType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RegistryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::Forbidden => StatusCode::FORBIDDEN,
            RegistryError::Storage(_) | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code used in OCI-style error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestNotFound(_) => "MANIFEST_UNKNOWN",
            RegistryError::PackageNotFound(_)
            | RegistryError::VersionNotFound(_)
            | RegistryError::FileNotFound(_) => "NAME_UNKNOWN",
            RegistryError::UploadNotFound(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::AlreadyExists(_) => "NAME_INVALID",
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::InvalidName(_) => "NAME_INVALID",
            RegistryError::InvalidReference(_) => "TAG_INVALID",
            RegistryError::MissingBlob(_) => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::MalformedPayload(_)
            | RegistryError::UnsupportedManifestType(_)
            | RegistryError::SizeLimitExceeded { .. } => "MANIFEST_INVALID",
            RegistryError::RangeNotSatisfiable { .. } => "BLOB_UPLOAD_INVALID",
            RegistryError::Unauthorized => "UNAUTHORIZED",
            RegistryError::Forbidden => "DENIED",
            RegistryError::Storage(_) | RegistryError::Io(_) => "UNKNOWN",
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(%status, code, "{message}");
        } else {
            tracing::debug!(%status, code, "{message}");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            RegistryError::BlobNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RegistryError::RangeNotSatisfiable { received: 3 }.status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            RegistryError::AlreadyExists("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RegistryError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            RegistryError::MissingBlob("sha256:ab".into()).error_code(),
            "MANIFEST_BLOB_UNKNOWN"
        );
        assert_eq!(
            RegistryError::DigestMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .error_code(),
            "DIGEST_INVALID"
        );
    }
}
