//! Registry state and router assembly
//!
//! [`Registry`] is the cloneable state shared by every adapter;
//! [`RegistryBuilder`] wires storage, authentication and the token secret
//! into the final [`axum::Router`].

use std::sync::Arc;

use axum::Router;
use axum::extract::FromRef;

use storage::Storage;

use crate::auth::{self, Authenticator, OpenAuthenticator, TokenGateway};
use crate::container;
use crate::content::ContentStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::generic;
use crate::hash::hash_bytes;
use crate::maven;
use crate::model::{PackageBlob, PackageCoordinate, PackageFile};
use crate::npm;
use crate::nuget;
use crate::pypi;
use crate::store::{NewFile, NewVersion, PackageStore};
use crate::upload::UploadManager;

/// Shared registry state.
#[derive(Debug, Clone)]
pub struct Registry {
    pub(crate) content: ContentStore,
    pub(crate) store: PackageStore,
    pub(crate) uploads: UploadManager,
    pub(crate) tokens: TokenGateway,
}

impl FromRef<Registry> for TokenGateway {
    fn from_ref(registry: &Registry) -> Self {
        registry.tokens.clone()
    }
}

impl Registry {
    /// Store a payload and record it as a package file in one step.
    ///
    /// The metadata transaction validates duplicates before any table is
    /// touched; the content-store write happens first and is harmless on
    /// failure since blobs are content-addressed and shared.
    pub(crate) async fn store_file(
        &self,
        version: NewVersion,
        file: NewFile,
        data: &[u8],
        allow_existing_version: bool,
    ) -> RegistryResult<()> {
        let hashes = hash_bytes(data);
        self.content.put_verified(&hashes, data).await?;
        self.store.tx(|tables| {
            let blob = tables.get_or_insert_blob(data.len() as u64, hashes.clone());
            tables.create_package_and_add_file(&version, &file, blob.id, allow_existing_version)?;
            Ok(())
        })
    }

    /// Read back a package file's record, blob row and bytes. Lead-file
    /// reads bump the version's download counter.
    pub(crate) async fn open_file(
        &self,
        coordinate: &PackageCoordinate,
        version: &str,
        filename: &str,
    ) -> RegistryResult<(PackageFile, PackageBlob, Vec<u8>)> {
        let (_, ver) = self.store.require_version(coordinate, version)?;
        let (file, blob) = self.store.read(|tables| {
            let file = tables
                .find_file(ver.id, filename, None)
                .ok_or_else(|| RegistryError::FileNotFound(filename.to_string()))?;
            let blob = tables.blob(file.blob_id)?;
            Ok::<_, RegistryError>((file, blob))
        })?;

        let digest = Digest::from_sha256_hex(blob.hashes.sha256.clone())?;
        let bytes = self.content.get(&digest).await?;

        if file.is_lead {
            self.store.tx(|tables| {
                tables.increment_downloads(ver.id);
                Ok(())
            })?;
        }

        Ok((file, blob, bytes))
    }

    /// Delete a version and its now-empty package. Blob rows survive.
    pub(crate) fn delete_version(
        &self,
        coordinate: &PackageCoordinate,
        version: &str,
    ) -> RegistryResult<()> {
        let (pkg, ver) = self.store.require_version(coordinate, version)?;
        self.store.tx(|tables| {
            tables.delete_version(ver.id);
            tables.delete_package_if_empty(pkg.id);
            Ok(())
        })
    }

    /// Delete one file, pruning the version (and package) when it was the
    /// last one.
    pub(crate) fn delete_file(
        &self,
        coordinate: &PackageCoordinate,
        version: &str,
        filename: &str,
    ) -> RegistryResult<()> {
        let (pkg, ver) = self.store.require_version(coordinate, version)?;
        self.store.tx(|tables| {
            let file = tables
                .find_file(ver.id, filename, None)
                .ok_or_else(|| RegistryError::FileNotFound(filename.to_string()))?;
            tables.delete_file(file.id);
            if tables.files_for_version(ver.id).is_empty() {
                tables.delete_version(ver.id);
                tables.delete_package_if_empty(pkg.id);
            }
            Ok(())
        })
    }

    /// External base URL for links rendered into metadata documents.
    pub(crate) fn realm(&self) -> &str {
        self.tokens.realm()
    }
}

/// Builds a [`Registry`] and its router.
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Option<Storage>,
    authenticator: Arc<dyn Authenticator>,
    token_secret: Option<Vec<u8>>,
    realm: String,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Start a builder with defaults: in-memory storage, the open
    /// authenticator, an ephemeral token secret, and a localhost realm.
    pub fn new() -> Self {
        Self {
            storage: None,
            authenticator: Arc::new(OpenAuthenticator),
            token_secret: None,
            realm: "http://localhost".to_string(),
        }
    }

    /// Use this storage backend for blob content.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Validate credentials with this authenticator.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Sign bearer tokens with this secret instead of an ephemeral one.
    pub fn token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = Some(secret.into());
        self
    }

    /// External base URL advertised in auth challenges.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Assemble the registry state.
    pub fn build_registry(self) -> Registry {
        let storage = self
            .storage
            .unwrap_or_else(|| storage::MemoryStorage::new().into());
        let tokens = match self.token_secret {
            Some(secret) => TokenGateway::new(secret, self.realm, self.authenticator),
            None => TokenGateway::ephemeral(self.realm, self.authenticator),
        };

        Registry {
            content: ContentStore::new(storage),
            store: PackageStore::new(),
            uploads: UploadManager::new(),
            tokens,
        }
    }

    /// Assemble the full router serving every ecosystem.
    pub fn build(self) -> Router {
        let registry = self.build_registry();
        router(registry)
    }
}

/// The complete router over an existing [`Registry`].
///
/// The framework body limit is lifted; payload bounds that matter (like the
/// manifest cap) are enforced by the handlers themselves.
pub fn router(registry: Registry) -> Router {
    let adapters = Router::new()
        .merge(npm::router())
        .merge(nuget::router())
        .merge(maven::router())
        .merge(pypi::router())
        .merge(generic::router())
        .layer(axum::middleware::from_fn_with_state(
            registry.clone(),
            auth::optional_credentials,
        ));

    Router::new()
        .merge(container::router(registry.clone()))
        .merge(adapters)
        .layer(axum::extract::DefaultBodyLimit::disable())
        .with_state(registry)
}
