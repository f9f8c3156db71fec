//! Maven repository adapter
//!
//! Serves a Maven repository layout under `/{owner}/maven/...`: artifact
//! uploads, checksum verification, downloads with derived checksums, and a
//! generated `maven-metadata.xml` per artifact. Checksum files are never
//! stored; they are verified on upload and recomputed from the blob's
//! recorded hashes on download.

use axum::extract::{Extension, Path, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;

use crate::api::Registry;
use crate::auth::Principal;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Ecosystem, PackageCoordinate, PropertyRef};
use crate::store::{NewFile, NewVersion};
use crate::xml::{element_text, escape};

/// Version property carrying the POM description.
pub const PROP_DESCRIPTION: &str = "maven.description";

const CHECKSUM_EXTENSIONS: [&str; 4] = [".md5", ".sha1", ".sha256", ".sha512"];

/// Routes for the Maven adapter.
pub fn router() -> axum::Router<Registry> {
    axum::Router::new().route("/{owner}/maven/{*path}", get(download).put(upload))
}

/// What a repository path addresses.
#[derive(Debug, PartialEq, Eq)]
enum Target {
    /// `group…/artifact/maven-metadata.xml[.checksum]`
    Metadata {
        group: String,
        artifact: String,
        checksum: Option<String>,
    },
    /// `group…/artifact/version/filename`
    File {
        group: String,
        artifact: String,
        version: String,
        filename: String,
    },
}

impl Target {
    fn parse(path: &str) -> RegistryResult<Self> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
            return Err(RegistryError::InvalidName(path.to_string()));
        }

        let filename = *segments.last().ok_or_else(|| {
            RegistryError::InvalidName(path.to_string())
        })?;

        if let Some(rest) = filename.strip_prefix("maven-metadata.xml") {
            if segments.len() < 3 {
                return Err(RegistryError::InvalidName(path.to_string()));
            }
            let checksum = match rest {
                "" => None,
                ext if CHECKSUM_EXTENSIONS.contains(&ext) => Some(ext[1..].to_string()),
                _ => return Err(RegistryError::InvalidName(path.to_string())),
            };
            return Ok(Target::Metadata {
                group: segments[..segments.len() - 2].join("."),
                artifact: segments[segments.len() - 2].to_string(),
                checksum,
            });
        }

        if segments.len() < 4 {
            return Err(RegistryError::InvalidName(path.to_string()));
        }
        Ok(Target::File {
            group: segments[..segments.len() - 3].join("."),
            artifact: segments[segments.len() - 3].to_string(),
            version: segments[segments.len() - 2].to_string(),
            filename: filename.to_string(),
        })
    }
}

fn coordinate(owner: &str, group: &str, artifact: &str) -> PackageCoordinate {
    PackageCoordinate::new(owner, Ecosystem::Maven, format!("{group}:{artifact}"))
}

/// Split `file.jar.sha1` into (`file.jar`, `sha1`), when the extension is a
/// checksum.
fn split_checksum(filename: &str) -> Option<(&str, &str)> {
    CHECKSUM_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext).map(|base| (base, &ext[1..])))
}

fn hash_for(blob: &crate::model::PackageBlob, algorithm: &str) -> String {
    match algorithm {
        "md5" => blob.hashes.md5.clone(),
        "sha1" => blob.hashes.sha1.clone(),
        "sha256" => blob.hashes.sha256.clone(),
        _ => blob.hashes.sha512.clone(),
    }
}

/// `PUT /{owner}/maven/{*path}`
///
/// Checksum files verify the already-stored artifact and are discarded;
/// `maven-metadata.xml` uploads are acknowledged but ignored since the
/// document is regenerated on demand; everything else is stored, with `.pom`
/// files additionally contributing the version's description.
async fn upload(
    State(registry): State<Registry>,
    Path((owner, path)): Path<(String, String)>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;

    let target = Target::parse(&path)?;
    let (group, artifact, version, filename) = match target {
        Target::Metadata { .. } => return Ok(StatusCode::OK),
        Target::File {
            group,
            artifact,
            version,
            filename,
        } => (group, artifact, version, filename),
    };
    let coordinate = coordinate(&owner, &group, &artifact);

    if let Some((base, algorithm)) = split_checksum(&filename) {
        let (_, ver) = registry.store.require_version(&coordinate, &version)?;
        let blob = registry.store.read(|tables| {
            let file = tables
                .find_file(ver.id, base, None)
                .ok_or_else(|| RegistryError::FileNotFound(base.to_string()))?;
            tables.blob(file.blob_id)
        })?;

        let declared = String::from_utf8_lossy(&body).trim().to_lowercase();
        let expected = hash_for(&blob, algorithm);
        if declared != expected {
            return Err(RegistryError::DigestMismatch {
                expected,
                actual: declared,
            });
        }
        return Ok(StatusCode::OK);
    }

    let is_pom = filename.ends_with(".pom");
    registry
        .store_file(
            NewVersion {
                coordinate: coordinate.clone(),
                version: version.clone(),
                metadata: None,
                properties: Vec::new(),
            },
            NewFile {
                name: filename,
                composite_key: None,
                is_lead: !is_pom,
                properties: Vec::new(),
            },
            &body,
            true,
        )
        .await?;

    if is_pom {
        if let Some(description) = element_text(&String::from_utf8_lossy(&body), "description") {
            let (_, ver) = registry.store.require_version(&coordinate, &version)?;
            registry.store.tx(|tables| {
                tables.replace_property(
                    PropertyRef::Version(ver.id),
                    PROP_DESCRIPTION,
                    &description,
                );
                Ok(())
            })?;
        }
    }

    Ok(StatusCode::CREATED)
}

fn render_metadata(group: &str, artifact: &str, versions: &[String]) -> String {
    let latest = versions.last().map(String::as_str).unwrap_or_default();
    let list: String = versions
        .iter()
        .map(|v| format!("<version>{}</version>", escape(v)))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <metadata>\
         <groupId>{}</groupId>\
         <artifactId>{}</artifactId>\
         <versioning>\
         <latest>{latest}</latest>\
         <release>{latest}</release>\
         <versions>{list}</versions>\
         </versioning>\
         </metadata>",
        escape(group),
        escape(artifact),
        latest = escape(latest),
    )
}

/// `GET|HEAD /{owner}/maven/{*path}`
async fn download(
    State(registry): State<Registry>,
    Path((owner, path)): Path<(String, String)>,
    Extension(_principal): Extension<Principal>,
    method: Method,
) -> RegistryResult<Response> {
    match Target::parse(&path)? {
        Target::Metadata {
            group,
            artifact,
            checksum,
        } => {
            let coordinate = coordinate(&owner, &group, &artifact);
            let pkg = registry.store.require_package(&coordinate)?;
            let versions: Vec<String> = registry.store.read(|tables| {
                tables
                    .versions_of(pkg.id)
                    .into_iter()
                    .map(|ver| ver.version)
                    .collect()
            });

            let document = render_metadata(&group, &artifact, &versions);
            let body = match checksum.as_deref() {
                None => {
                    return Ok((
                        StatusCode::OK,
                        [(header::CONTENT_TYPE.as_str(), "text/xml")],
                        document,
                    )
                        .into_response());
                }
                Some(algorithm) => {
                    let hashes = crate::hash::hash_bytes(document.as_bytes());
                    match algorithm {
                        "md5" => hashes.md5,
                        "sha1" => hashes.sha1,
                        "sha256" => hashes.sha256,
                        _ => hashes.sha512,
                    }
                }
            };
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE.as_str(), "text/plain")],
                body,
            )
                .into_response())
        }

        Target::File {
            group,
            artifact,
            version,
            filename,
        } => {
            let coordinate = coordinate(&owner, &group, &artifact);

            if let Some((base, algorithm)) = split_checksum(&filename) {
                let (_, ver) = registry.store.require_version(&coordinate, &version)?;
                let blob = registry.store.read(|tables| {
                    let file = tables
                        .find_file(ver.id, base, None)
                        .ok_or_else(|| RegistryError::FileNotFound(base.to_string()))?;
                    tables.blob(file.blob_id)
                })?;
                return Ok((
                    StatusCode::OK,
                    [(header::CONTENT_TYPE.as_str(), "text/plain")],
                    hash_for(&blob, algorithm),
                )
                    .into_response());
            }

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
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_paths() {
        let target = Target::parse("com/example/app/1.0.0/app-1.0.0.jar").unwrap();
        assert_eq!(
            target,
            Target::File {
                group: "com.example".to_string(),
                artifact: "app".to_string(),
                version: "1.0.0".to_string(),
                filename: "app-1.0.0.jar".to_string(),
            }
        );
    }

    #[test]
    fn parses_metadata_paths() {
        let target = Target::parse("com/example/app/maven-metadata.xml.sha1").unwrap();
        assert_eq!(
            target,
            Target::Metadata {
                group: "com.example".to_string(),
                artifact: "app".to_string(),
                checksum: Some("sha1".to_string()),
            }
        );
    }

    #[test]
    fn rejects_traversal() {
        assert!(Target::parse("com/../app/1.0/x.jar").is_err());
        assert!(Target::parse("short").is_err());
    }

    #[test]
    fn checksum_extension_splitting() {
        assert_eq!(
            split_checksum("app-1.0.jar.sha1"),
            Some(("app-1.0.jar", "sha1"))
        );
        assert_eq!(split_checksum("app-1.0.jar"), None);
    }

    #[test]
    fn metadata_document() {
        let doc = render_metadata("com.example", "app", &["0.9".into(), "1.0".into()]);
        assert!(doc.contains("<latest>1.0</latest>"));
        assert!(doc.contains("<version>0.9</version>"));
        assert!(doc.contains("<groupId>com.example</groupId>"));
    }
}
