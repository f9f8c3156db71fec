//! # Multi-ecosystem package registry
//!
//! A package registry service speaking the native protocols of several
//! ecosystems over one content-addressable store: container images (OCI /
//! Docker distribution), npm, NuGet V3, Maven, PyPI and generic files.
//!
//! Payloads are deduplicated by SHA-256 in a pluggable storage backend from
//! the `storage` crate; package/version/file metadata lives in an in-process
//! relational store shared by every adapter. Container routes are protected
//! by JWT bearer tokens issued from `/v2/token`; the other adapters accept
//! HTTP Basic credentials per request.
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = RegistryBuilder::new()
//!     .storage(MemoryStorage::new().into())
//!     .realm("http://localhost:5000")
//!     .build();
//!
//! // Serve with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod auth;
mod container;
mod content;
mod digest;
mod error;
mod generic;
mod hash;
mod manifest;
mod maven;
mod model;
mod npm;
mod nuget;
mod pagination;
mod pypi;
mod store;
mod upload;
mod xml;

pub use api::{Registry, RegistryBuilder, router};
pub use auth::{Authenticator, OpenAuthenticator, Principal};
pub use digest::Digest;
pub use error::{RegistryError, RegistryResult};
pub use manifest::{
    MEDIA_DOCKER_MANIFEST, MEDIA_DOCKER_MANIFEST_LIST, MEDIA_OCI_INDEX, MEDIA_OCI_MANIFEST,
};
pub use model::Ecosystem;
pub use pagination::MAX_PAGE_SIZE;
