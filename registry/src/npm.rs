//! npm registry adapter
//!
//! Speaks enough of the npm registry protocol for `npm publish`, `npm
//! install` and `npm dist-tag`: publish payloads with base64 tarball
//! attachments, the package metadata document, and dist-tag management.
//! Dist-tags live as version properties so retargeting a tag is a property
//! swap, not a version rewrite.

use std::collections::{BTreeMap, HashMap};

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::json;

use crate::api::Registry;
use crate::auth::Principal;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Ecosystem, PackageCoordinate, PropertyRef};
use crate::store::{NewFile, NewVersion};

/// Version property holding the dist-tags pointing at a version.
pub const PROP_DIST_TAG: &str = "npm.dist-tag";

/// Routes for the npm adapter.
pub fn router() -> axum::Router<Registry> {
    axum::Router::new()
        .route("/{owner}/npm/{package}", put(publish).get(metadata))
        .route("/{owner}/npm/{package}/-/{filename}", get(download))
        .route(
            "/{owner}/npm/-/package/{package}/dist-tags",
            get(list_dist_tags),
        )
        .route(
            "/{owner}/npm/-/package/{package}/dist-tags/{tag}",
            put(put_dist_tag).delete(delete_dist_tag),
        )
}

fn coordinate(owner: &str, package: &str) -> RegistryResult<PackageCoordinate> {
    if package.is_empty() || package.len() > 214 || package.starts_with('.') {
        return Err(RegistryError::InvalidName(package.to_string()));
    }
    Ok(PackageCoordinate::new(owner, Ecosystem::Npm, package))
}

fn tarball_name(package: &str, version: &str) -> String {
    format!("{}-{}.tgz", package.replace('/', "-"), version)
}

/// Dist-tag names must not themselves parse as versions, or `npm install
/// pkg@tag` becomes ambiguous.
fn check_dist_tag(tag: &str) -> RegistryResult<()> {
    if tag.is_empty() || semver::Version::parse(tag).is_ok() {
        return Err(RegistryError::InvalidReference(tag.to_string()));
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct PublishRequest {
    name: String,
    #[serde(default, rename = "dist-tags")]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, serde_json::Value>,
    #[serde(default, rename = "_attachments")]
    attachments: HashMap<String, Attachment>,
}

#[derive(Debug, serde::Deserialize)]
struct Attachment {
    data: String,
}

/// `PUT /{owner}/npm/{package}`: publish one version with its tarball.
async fn publish(
    State(registry): State<Registry>,
    Path((owner, package)): Path<(String, String)>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &package)?;

    let request: PublishRequest = serde_json::from_slice(&body)
        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?;
    if request.name != package {
        return Err(RegistryError::InvalidName(request.name));
    }

    let (version, metadata) = request
        .versions
        .iter()
        .next()
        .ok_or_else(|| RegistryError::MalformedPayload("no versions in payload".to_string()))?;
    semver::Version::parse(version)
        .map_err(|_| RegistryError::InvalidReference(version.clone()))?;

    let attachment = request
        .attachments
        .values()
        .next()
        .ok_or_else(|| RegistryError::MalformedPayload("no tarball attachment".to_string()))?;
    let tarball = BASE64
        .decode(attachment.data.as_bytes())
        .map_err(|err| RegistryError::MalformedPayload(format!("attachment: {err}")))?;

    for tag in request.dist_tags.keys() {
        check_dist_tag(tag)?;
    }

    registry
        .store_file(
            NewVersion {
                coordinate: coordinate.clone(),
                version: version.clone(),
                metadata: Some(metadata.to_string()),
                properties: Vec::new(),
            },
            NewFile {
                name: tarball_name(&package, version),
                composite_key: None,
                is_lead: true,
                properties: Vec::new(),
            },
            &tarball,
            false,
        )
        .await?;

    for (tag, tagged_version) in &request.dist_tags {
        if tagged_version == version {
            retarget_dist_tag(&registry, &coordinate, tag, version)?;
        }
    }

    tracing::debug!(%coordinate, version, "Published npm package");
    Ok(StatusCode::CREATED)
}

/// Point a dist-tag at a version, removing it from whichever version held
/// it before.
fn retarget_dist_tag(
    registry: &Registry,
    coordinate: &PackageCoordinate,
    tag: &str,
    version: &str,
) -> RegistryResult<()> {
    let (pkg, ver) = registry.store.require_version(coordinate, version)?;
    registry.store.tx(|tables| {
        for other in tables.versions_of(pkg.id) {
            tables.remove_property(PropertyRef::Version(other.id), PROP_DIST_TAG, Some(tag));
        }
        tables.add_property(PropertyRef::Version(ver.id), PROP_DIST_TAG, tag);
        Ok(())
    })
}

fn collect_dist_tags(registry: &Registry, package_id: i64) -> BTreeMap<String, String> {
    registry.store.read(|tables| {
        let mut tags = BTreeMap::new();
        for ver in tables.versions_of(package_id) {
            for prop in tables.properties_named(PropertyRef::Version(ver.id), PROP_DIST_TAG) {
                tags.insert(prop.value, ver.version.clone());
            }
        }
        tags
    })
}

fn dist_object(
    registry: &Registry,
    coordinate: &PackageCoordinate,
    filename: &str,
    sha1: &str,
    sha512: &str,
) -> serde_json::Value {
    let integrity = hex::decode(sha512)
        .map(|raw| format!("sha512-{}", BASE64.encode(raw)))
        .unwrap_or_default();
    json!({
        "tarball": format!(
            "{}/{}/npm/{}/-/{}",
            registry.realm(), coordinate.owner, coordinate.name, filename
        ),
        "shasum": sha1,
        "integrity": integrity,
    })
}

/// `GET /{owner}/npm/{package}`: the full metadata document.
async fn metadata(
    State(registry): State<Registry>,
    Path((owner, package)): Path<(String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &package)?;
    let pkg = registry.store.require_package(&coordinate)?;

    let mut versions = BTreeMap::new();
    let entries = registry.store.read(|tables| {
        tables
            .versions_of(pkg.id)
            .into_iter()
            .map(|ver| {
                let file = tables.find_file(ver.id, &tarball_name(&package, &ver.version), None);
                let blob = file.and_then(|file| tables.blob(file.blob_id).ok());
                (ver, blob)
            })
            .collect::<Vec<_>>()
    });

    for (ver, blob) in entries {
        let mut doc: serde_json::Value = ver
            .metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({ "name": package, "version": ver.version }));
        if let (Some(blob), Some(obj)) = (blob, doc.as_object_mut()) {
            let filename = tarball_name(&package, &ver.version);
            obj.insert(
                "dist".to_string(),
                dist_object(
                    &registry,
                    &coordinate,
                    &filename,
                    &blob.hashes.sha1,
                    &blob.hashes.sha512,
                ),
            );
        }
        versions.insert(ver.version, doc);
    }

    let dist_tags = collect_dist_tags(&registry, pkg.id);
    Ok(Json(json!({
        "_id": package,
        "name": package,
        "dist-tags": dist_tags,
        "versions": versions,
    }))
    .into_response())
}

/// `GET /{owner}/npm/{package}/-/{filename}`: tarball download.
async fn download(
    State(registry): State<Registry>,
    Path((owner, package, filename)): Path<(String, String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &package)?;

    // the filename encodes the version: {name}-{version}.tgz
    let prefix = format!("{}-", package.replace('/', "-"));
    let version = filename
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_suffix(".tgz"))
        .ok_or_else(|| RegistryError::FileNotFound(filename.clone()))?
        .to_string();

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

/// `GET .../dist-tags`: every tag and the version it points at.
async fn list_dist_tags(
    State(registry): State<Registry>,
    Path((owner, package)): Path<(String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &package)?;
    let pkg = registry.store.require_package(&coordinate)?;
    Ok(Json(collect_dist_tags(&registry, pkg.id)).into_response())
}

/// `PUT .../dist-tags/{tag}`: body is the target version as a JSON string.
async fn put_dist_tag(
    State(registry): State<Registry>,
    Path((owner, package, tag)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &package)?;
    check_dist_tag(&tag)?;

    let version: String = serde_json::from_slice(&body)
        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?;
    retarget_dist_tag(&registry, &coordinate, &tag, &version)?;
    Ok(StatusCode::OK)
}

/// `DELETE .../dist-tags/{tag}`.
async fn delete_dist_tag(
    State(registry): State<Registry>,
    Path((owner, package, tag)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &package)?;
    let pkg = registry.store.require_package(&coordinate)?;

    registry.store.tx(|tables| {
        for ver in tables.versions_of(pkg.id) {
            tables.remove_property(PropertyRef::Version(ver.id), PROP_DIST_TAG, Some(&tag));
        }
        Ok(())
    })?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarball_names() {
        assert_eq!(tarball_name("lodash", "4.17.21"), "lodash-4.17.21.tgz");
        assert_eq!(
            tarball_name("@scope/pkg", "1.0.0"),
            "@scope-pkg-1.0.0.tgz"
        );
    }

    #[test]
    fn dist_tag_names() {
        assert!(check_dist_tag("latest").is_ok());
        assert!(check_dist_tag("beta").is_ok());
        assert!(check_dist_tag("1.2.3").is_err());
        assert!(check_dist_tag("").is_err());
    }
}
