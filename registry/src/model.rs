//! Metadata model
//!
//! Relational records for packages, versions, files and blobs. The store in
//! [`crate::store`] owns these; handlers only ever see owned copies.

use chrono::{DateTime, Utc};

use crate::hash::ContentHashes;

/// Row identifier.
pub type Id = i64;

/// The package ecosystems this registry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// OCI / Docker container images
    Container,
    /// npm packages
    Npm,
    /// NuGet packages
    Nuget,
    /// Maven artifacts
    Maven,
    /// PyPI distributions
    Pypi,
    /// Arbitrary files
    Generic,
}

impl Ecosystem {
    /// Lowercase name used in URLs and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Container => "container",
            Ecosystem::Npm => "npm",
            Ecosystem::Nuget => "nuget",
            Ecosystem::Maven => "maven",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Generic => "generic",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a package within an owner's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageCoordinate {
    /// Owning namespace
    pub owner: String,
    /// Ecosystem
    pub ecosystem: Ecosystem,
    /// Package name, in the ecosystem's canonical form
    pub name: String,
}

impl PackageCoordinate {
    /// Construct a coordinate.
    pub fn new(owner: impl Into<String>, ecosystem: Ecosystem, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ecosystem,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PackageCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.ecosystem, self.name)
    }
}

/// A package record.
#[derive(Debug, Clone)]
pub struct Package {
    /// Row id
    pub id: Id,
    /// Owner, ecosystem and name
    pub coordinate: PackageCoordinate,
}

/// A version of a package.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    /// Row id
    pub id: Id,
    /// Owning package
    pub package_id: Id,
    /// Version string, in the ecosystem's canonical form
    pub version: String,
    /// Opaque metadata blob supplied by the adapter
    pub metadata: Option<String>,
    /// Download counter
    pub downloads: u64,
    /// Publication time
    pub created: DateTime<Utc>,
}

/// A file attached to a package version.
#[derive(Debug, Clone)]
pub struct PackageFile {
    /// Row id
    pub id: Id,
    /// Owning version
    pub version_id: Id,
    /// File name
    pub name: String,
    /// Distinguishes files which share a name within a version
    pub composite_key: Option<String>,
    /// Whether this is the version's primary artifact
    pub is_lead: bool,
    /// Backing blob
    pub blob_id: Id,
}

/// A deduplicated content blob.
#[derive(Debug, Clone)]
pub struct PackageBlob {
    /// Row id
    pub id: Id,
    /// Payload size in bytes
    pub size: u64,
    /// Content sums
    pub hashes: ContentHashes,
}

/// What a property is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyRef {
    /// Attached to a package
    Package(Id),
    /// Attached to a version
    Version(Id),
    /// Attached to a file
    File(Id),
}

/// A key/value property. Keys may repeat on the same subject.
#[derive(Debug, Clone)]
pub struct Property {
    /// Row id
    pub id: Id,
    /// Subject the property is attached to
    pub subject: PropertyRef,
    /// Property name
    pub name: String,
    /// Property value
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_display() {
        let coord = PackageCoordinate::new("alice", Ecosystem::Npm, "@scope/pkg");
        assert_eq!(coord.to_string(), "alice/npm/@scope/pkg");
    }

    #[test]
    fn ecosystem_names() {
        assert_eq!(Ecosystem::Container.as_str(), "container");
        assert_eq!(Ecosystem::Pypi.to_string(), "pypi");
    }
}
