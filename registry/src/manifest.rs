//! Container manifest processing
//!
//! Stores Docker V2 and OCI manifests byte-for-byte in the content store and
//! mirrors their structure into package metadata: one package per image, one
//! version per tag or untagged digest, with media type, digest and platform
//! recorded as properties.

use serde::Deserialize;

use crate::content::ContentStore;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::hash::ContentHashes;
use crate::model::{Ecosystem, PackageBlob, PackageCoordinate, PackageVersion, PropertyRef};
use crate::store::{NewFile, NewVersion, PackageStore, Tables};

/// Docker V2 single-image manifest.
pub const MEDIA_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker V2 manifest list.
pub const MEDIA_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const MEDIA_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const MEDIA_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Version property: manifest media type.
pub const PROP_MEDIA_TYPE: &str = "container.media-type";
/// Version property: canonical manifest digest.
pub const PROP_DIGEST: &str = "container.digest";
/// Version property: whether the version is a tag.
pub const PROP_TAGGED: &str = "container.manifest.tagged";
/// Version property: digest of a sub-manifest referenced by an index.
pub const PROP_REFERENCE: &str = "container.manifest.reference";
/// Version property: `platform=digest` pair for a sub-manifest referenced
/// by an index.
pub const PROP_PLATFORM: &str = "container.multiarch";

/// File name under which manifest bytes are attached to a version.
pub const MANIFEST_FILENAME: &str = "manifest.json";
/// Hidden version anchoring blobs uploaded before any manifest.
pub const UPLOAD_VERSION: &str = "_upload";

/// Largest accepted manifest body.
pub const MANIFEST_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// A manifest reference from the URL: a tag name or a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Tag name
    Tag(String),
    /// Content digest
    Digest(Digest),
}

impl Reference {
    /// Parse and validate a reference path segment.
    pub fn parse(raw: &str) -> RegistryResult<Self> {
        if raw.starts_with("sha256:") {
            return Ok(Reference::Digest(raw.parse()?));
        }
        if is_valid_tag(raw) {
            return Ok(Reference::Tag(raw.to_string()));
        }
        Err(RegistryError::InvalidReference(raw.to_string()))
    }
}

/// Tags match `[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}`.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    if !(first.is_ascii_alphanumeric() || first == b'_') {
        return false;
    }
    tag.len() <= 128
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Image names are slash-separated runs of `[a-z0-9]+` joined by separators
/// (`.`, `_`, `-`).
pub fn is_valid_image_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|part| {
            !part.is_empty()
                && part.split(['.', '_', '-']).all(|run| {
                    !run.is_empty()
                        && run
                            .bytes()
                            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
                })
        })
}

/// Coordinate of an image package.
pub fn image_coordinate(owner: &str, image: &str) -> RegistryResult<PackageCoordinate> {
    if !is_valid_image_name(image) {
        return Err(RegistryError::InvalidName(image.to_string()));
    }
    Ok(PackageCoordinate::new(owner, Ecosystem::Container, image))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    #[allow(dead_code)]
    media_type: Option<String>,
    digest: String,
    #[allow(dead_code)]
    size: Option<u64>,
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    os: String,
    architecture: String,
    variant: Option<String>,
}

impl Platform {
    fn label(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}/{}/{}", self.os, self.architecture, variant),
            None => format!("{}/{}", self.os, self.architecture),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageManifest {
    config: Descriptor,
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct ImageIndex {
    manifests: Vec<Descriptor>,
}

enum Parsed {
    Single(ImageManifest),
    Index(ImageIndex),
}

/// Properties recording an index's sub-manifest entries. Each platform pairs
/// with its own digest, so the multiarch mapping survives indexes with
/// several platform entries.
fn index_properties(index: &ImageIndex) -> Vec<(String, String)> {
    let mut props = Vec::new();
    for descriptor in &index.manifests {
        props.push((PROP_REFERENCE.to_string(), descriptor.digest.clone()));
        if let Some(platform) = &descriptor.platform {
            props.push((
                PROP_PLATFORM.to_string(),
                format!("{}={}", platform.label(), descriptor.digest),
            ));
        }
    }
    props
}

fn parse(content_type: &str, body: &[u8]) -> RegistryResult<Parsed> {
    let malformed = |err: serde_json::Error| RegistryError::MalformedPayload(err.to_string());
    match content_type {
        MEDIA_DOCKER_MANIFEST | MEDIA_OCI_MANIFEST => {
            Ok(Parsed::Single(serde_json::from_slice(body).map_err(malformed)?))
        }
        MEDIA_DOCKER_MANIFEST_LIST | MEDIA_OCI_INDEX => {
            Ok(Parsed::Index(serde_json::from_slice(body).map_err(malformed)?))
        }
        other => Err(RegistryError::UnsupportedManifestType(other.to_string())),
    }
}

/// A manifest read back from the registry.
#[derive(Debug)]
pub struct StoredManifest {
    /// Exact bytes as uploaded
    pub bytes: Vec<u8>,
    /// Canonical digest of those bytes
    pub digest: Digest,
    /// Media type recorded at upload
    pub media_type: String,
}

/// Store a manifest under a tag or digest reference.
///
/// Referenced blobs (single manifest) or stored sub-manifests (index) must
/// already exist in the image's namespace. Retagging replaces the tag's
/// version in one transaction; pushing the same untagged digest twice is a
/// no-op.
#[tracing::instrument(skip(content, store, body), fields(size = body.len()))]
pub async fn put(
    content: &ContentStore,
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    reference: &Reference,
    content_type: &str,
    body: &[u8],
) -> RegistryResult<Digest> {
    if body.len() > MANIFEST_SIZE_LIMIT {
        return Err(RegistryError::SizeLimitExceeded {
            limit: MANIFEST_SIZE_LIMIT,
        });
    }

    let parsed = parse(content_type, body)?;
    let digest = Digest::sha256(body);

    if let Reference::Digest(declared) = reference {
        if declared != &digest {
            return Err(RegistryError::DigestMismatch {
                expected: declared.to_string(),
                actual: digest.to_string(),
            });
        }
    }

    // reference validation against current metadata
    store.read(|tables| match &parsed {
        Parsed::Single(manifest) => {
            let pkg = tables.find_package(coordinate);
            for descriptor in std::iter::once(&manifest.config).chain(&manifest.layers) {
                let blob: Digest = descriptor.digest.parse()?;
                let known = pkg
                    .as_ref()
                    .is_some_and(|pkg| tables.package_has_blob(pkg.id, blob.hex()));
                if !known {
                    return Err(RegistryError::MissingBlob(blob.to_string()));
                }
            }
            Ok(())
        }
        Parsed::Index(index) => {
            let pkg = tables.find_package(coordinate);
            for descriptor in &index.manifests {
                let sub: Digest = descriptor.digest.parse()?;
                let known = pkg.as_ref().is_some_and(|pkg| {
                    !tables
                        .versions_with_property(pkg.id, PROP_DIGEST, &sub.to_string())
                        .is_empty()
                });
                if !known {
                    return Err(RegistryError::ManifestNotFound(sub.to_string()));
                }
            }
            Ok(())
        }
    })?;

    content.put(&digest, body).await?;

    let version_name = match reference {
        Reference::Tag(tag) => tag.clone(),
        Reference::Digest(digest) => digest.to_string(),
    };
    let tagged = matches!(reference, Reference::Tag(_));

    store.tx(|tables| {
        if let Some(pkg) = tables.find_package(coordinate) {
            if let Some(existing) = tables.find_version(pkg.id, &version_name) {
                let same = tables
                    .properties_named(PropertyRef::Version(existing.id), PROP_DIGEST)
                    .iter()
                    .any(|prop| prop.value == digest.to_string());
                if same {
                    return Ok(());
                }
                if !tagged {
                    // an untagged version is named by its digest, so it can
                    // never hold a different one
                    return Err(RegistryError::InvalidReference(version_name.clone()));
                }
                tables.delete_version(existing.id);
            }
        }

        let mut version_props = vec![
            (PROP_DIGEST.to_string(), digest.to_string()),
            (PROP_MEDIA_TYPE.to_string(), content_type.to_string()),
            (PROP_TAGGED.to_string(), tagged.to_string()),
        ];
        if let Parsed::Index(index) = &parsed {
            version_props.extend(index_properties(index));
        }

        let hashes = crate::hash::hash_bytes(body);
        let blob = tables.get_or_insert_blob(body.len() as u64, hashes);
        tables.create_package_and_add_file(
            &NewVersion {
                coordinate: coordinate.clone(),
                version: version_name.clone(),
                metadata: None,
                properties: version_props,
            },
            &NewFile {
                name: MANIFEST_FILENAME.to_string(),
                composite_key: None,
                is_lead: true,
                properties: vec![(PROP_DIGEST.to_string(), digest.to_string())],
            },
            blob.id,
            false,
        )?;
        Ok(())
    })?;

    tracing::debug!(%digest, tagged, "Stored manifest");
    Ok(digest)
}

fn resolve_version(
    tables: &Tables,
    coordinate: &PackageCoordinate,
    reference: &Reference,
) -> RegistryResult<PackageVersion> {
    let pkg = tables
        .find_package(coordinate)
        .ok_or_else(|| RegistryError::ManifestNotFound(coordinate.to_string()))?;

    // tag-first: a tag that looks like a digest still wins over the digest
    let name = match reference {
        Reference::Tag(tag) => tag.clone(),
        Reference::Digest(digest) => digest.to_string(),
    };
    if let Some(version) = tables.find_version(pkg.id, &name) {
        return Ok(version);
    }

    if let Reference::Digest(digest) = reference {
        if let Some(version) = tables
            .versions_with_property(pkg.id, PROP_DIGEST, &digest.to_string())
            .into_iter()
            .next()
        {
            return Ok(version);
        }
    }

    Err(RegistryError::ManifestNotFound(name))
}

/// Digest, media type and size of a stored manifest, without its bytes.
pub fn resolve(
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    reference: &Reference,
) -> RegistryResult<(Digest, String, u64)> {
    store.read(|tables| {
        let version = resolve_version(tables, coordinate, reference)?;
        manifest_details(tables, &version)
    })
}

fn manifest_details(
    tables: &Tables,
    version: &PackageVersion,
) -> RegistryResult<(Digest, String, u64)> {
    let subject = PropertyRef::Version(version.id);
    let digest: Digest = tables
        .properties_named(subject, PROP_DIGEST)
        .first()
        .ok_or_else(|| RegistryError::ManifestNotFound(version.version.clone()))?
        .value
        .parse()?;
    let media_type = tables
        .properties_named(subject, PROP_MEDIA_TYPE)
        .first()
        .map(|prop| prop.value.clone())
        .unwrap_or_else(|| MEDIA_OCI_MANIFEST.to_string());
    let file = tables
        .find_file(version.id, MANIFEST_FILENAME, None)
        .ok_or_else(|| RegistryError::ManifestNotFound(version.version.clone()))?;
    let size = tables.blob(file.blob_id)?.size;
    Ok((digest, media_type, size))
}

/// Read a manifest's exact bytes, bumping the version's download counter.
pub async fn get(
    content: &ContentStore,
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    reference: &Reference,
) -> RegistryResult<StoredManifest> {
    let (version_id, digest, media_type) = store.read(|tables| {
        let version = resolve_version(tables, coordinate, reference)?;
        let (digest, media_type, _) = manifest_details(tables, &version)?;
        Ok::<_, RegistryError>((version.id, digest, media_type))
    })?;

    let bytes = content.get(&digest).await?;
    store.tx(|tables| {
        tables.increment_downloads(version_id);
        Ok(())
    })?;

    Ok(StoredManifest {
        bytes,
        digest,
        media_type,
    })
}

/// Delete the versions a reference names: the tag's version, or every
/// version recorded with the digest. Blob rows survive; other versions may
/// still reference them.
pub fn delete(
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    reference: &Reference,
) -> RegistryResult<()> {
    store.tx(|tables| {
        let pkg = tables
            .find_package(coordinate)
            .ok_or_else(|| RegistryError::ManifestNotFound(coordinate.to_string()))?;

        let doomed: Vec<_> = match reference {
            Reference::Tag(tag) => tables
                .find_version(pkg.id, tag)
                .map(|ver| vec![ver])
                .ok_or_else(|| RegistryError::ManifestNotFound(tag.clone()))?,
            Reference::Digest(digest) => {
                let versions =
                    tables.versions_with_property(pkg.id, PROP_DIGEST, &digest.to_string());
                if versions.is_empty() {
                    return Err(RegistryError::ManifestNotFound(digest.to_string()));
                }
                versions
            }
        };

        for version in doomed {
            tables.delete_version(version.id);
        }
        Ok(())
    })
}

/// Tags of an image, unsorted. Hidden internal versions are excluded.
pub fn tags(store: &PackageStore, coordinate: &PackageCoordinate) -> RegistryResult<Vec<String>> {
    store.read(|tables| {
        let pkg = tables
            .find_package(coordinate)
            .ok_or_else(|| RegistryError::PackageNotFound(coordinate.to_string()))?;
        Ok(tables
            .versions_of(pkg.id)
            .into_iter()
            .filter(|ver| {
                tables
                    .properties_named(PropertyRef::Version(ver.id), PROP_TAGGED)
                    .iter()
                    .any(|prop| prop.value == "true")
            })
            .map(|ver| ver.version)
            .collect())
    })
}

/// Attach an uploaded blob to the image's hidden placeholder version, so
/// manifests pushed later can find it. Idempotent for a given digest.
pub fn anchor_blob(
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    digest: &Digest,
    size: u64,
    hashes: ContentHashes,
) -> RegistryResult<()> {
    store.tx(|tables| {
        if let Some(pkg) = tables.find_package(coordinate) {
            if let Some(upload) = tables.find_version(pkg.id, UPLOAD_VERSION) {
                if tables.find_file(upload.id, &digest.to_string(), None).is_some() {
                    return Ok(());
                }
            }
        }

        let blob = tables.get_or_insert_blob(size, hashes);
        tables.create_package_and_add_file(
            &NewVersion {
                coordinate: coordinate.clone(),
                version: UPLOAD_VERSION.to_string(),
                metadata: None,
                properties: Vec::new(),
            },
            &NewFile {
                name: digest.to_string(),
                composite_key: None,
                is_lead: false,
                properties: Vec::new(),
            },
            blob.id,
            true,
        )?;
        Ok(())
    })
}

/// Look up a blob in the image's namespace by digest.
pub fn find_blob(
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    digest: &Digest,
) -> RegistryResult<PackageBlob> {
    store.read(|tables| {
        let pkg = tables
            .find_package(coordinate)
            .ok_or_else(|| RegistryError::BlobNotFound(digest.to_string()))?;
        for version in tables.versions_of(pkg.id) {
            for file in tables.files_for_version(version.id) {
                let blob = tables.blob(file.blob_id)?;
                if blob.hashes.sha256 == digest.hex() {
                    return Ok(blob);
                }
            }
        }
        Err(RegistryError::BlobNotFound(digest.to_string()))
    })
}

/// Detach a blob from the image's namespace. The content-store payload and
/// blob row survive; other images may share them.
pub fn forget_blob(
    store: &PackageStore,
    coordinate: &PackageCoordinate,
    digest: &Digest,
) -> RegistryResult<()> {
    store.tx(|tables| {
        let pkg = tables
            .find_package(coordinate)
            .ok_or_else(|| RegistryError::BlobNotFound(digest.to_string()))?;

        let mut found = false;
        for version in tables.versions_of(pkg.id) {
            if let Some(file) = tables.find_file(version.id, &digest.to_string(), None) {
                tables.delete_file(file.id);
                found = true;
            }
        }
        if !found {
            return Err(RegistryError::BlobNotFound(digest.to_string()));
        }
        Ok(())
    })
}
