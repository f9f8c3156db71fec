//! Generic package adapter
//!
//! Arbitrary files addressed by `{owner}/generic/{name}/{version}/{filename}`.
//! The simplest adapter, and the template the richer ones follow: validate
//! the coordinate, store the payload, serve it back with its counters.

use axum::extract::{Extension, Path, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, put};
use bytes::Bytes;

use crate::api::Registry;
use crate::auth::Principal;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Ecosystem, PackageCoordinate};
use crate::store::{NewFile, NewVersion};

/// Routes for the generic adapter.
pub fn router() -> axum::Router<Registry> {
    axum::Router::new()
        .route(
            "/{owner}/generic/{name}/{version}/{filename}",
            put(upload).get(download).delete(remove_file),
        )
        .route(
            "/{owner}/generic/{name}/{version}",
            delete(remove_version),
        )
}

/// Names, versions and filenames are runs of `[A-Za-z0-9._+-]`, excluding
/// the path traversals.
fn is_valid_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'+' | b'.'))
}

fn coordinate(owner: &str, name: &str) -> RegistryResult<PackageCoordinate> {
    if !is_valid_component(name) {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(PackageCoordinate::new(owner, Ecosystem::Generic, name))
}

fn check_version_and_filename(version: &str, filename: &str) -> RegistryResult<()> {
    if !is_valid_component(version) {
        return Err(RegistryError::InvalidReference(version.to_string()));
    }
    if !is_valid_component(filename) {
        return Err(RegistryError::InvalidName(filename.to_string()));
    }
    Ok(())
}

/// `PUT`: store a file. A repeated coordinate is rejected outright.
async fn upload(
    State(registry): State<Registry>,
    Path((owner, name, version, filename)): Path<(String, String, String, String)>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &name)?;
    check_version_and_filename(&version, &filename)?;

    registry
        .store_file(
            NewVersion {
                coordinate,
                version,
                metadata: None,
                properties: Vec::new(),
            },
            NewFile {
                name: filename,
                composite_key: None,
                is_lead: true,
                properties: Vec::new(),
            },
            &body,
            true,
        )
        .await?;

    Ok(StatusCode::CREATED)
}

/// `GET|HEAD`: serve a file. GET counts as a download.
async fn download(
    State(registry): State<Registry>,
    Path((owner, name, version, filename)): Path<(String, String, String, String)>,
    Extension(_principal): Extension<Principal>,
    method: Method,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &name)?;
    check_version_and_filename(&version, &filename)?;

    if method == Method::HEAD {
        let (_, ver) = registry.store.require_version(&coordinate, &version)?;
        let size = registry.store.read(|tables| {
            let file = tables
                .find_file(ver.id, &filename, None)
                .ok_or_else(|| RegistryError::FileNotFound(filename.clone()))?;
            Ok::<_, RegistryError>(tables.blob(file.blob_id)?.size)
        })?;
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_LENGTH.as_str(), size.to_string())],
        )
            .into_response());
    }

    let (_, _, bytes) = registry.open_file(&coordinate, &version, &filename).await?;
    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE.as_str(),
            "application/octet-stream".to_string(),
        )],
        bytes,
    )
        .into_response())
}

/// `DELETE` a single file; the last file takes the version with it.
async fn remove_file(
    State(registry): State<Registry>,
    Path((owner, name, version, filename)): Path<(String, String, String, String)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &name)?;
    check_version_and_filename(&version, &filename)?;

    registry.delete_file(&coordinate, &version, &filename)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE` a whole version.
async fn remove_version(
    State(registry): State<Registry>,
    Path((owner, name, version)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &name)?;
    if !is_valid_component(&version) {
        return Err(RegistryError::InvalidReference(version));
    }

    registry.delete_version(&coordinate, &version)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_validation() {
        assert!(is_valid_component("my-tool_1.0+build"));
        assert!(!is_valid_component(""));
        assert!(!is_valid_component(".."));
        assert!(!is_valid_component("has/slash"));
        assert!(!is_valid_component("has space"));
    }
}
