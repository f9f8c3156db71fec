//! Package metadata store
//!
//! An in-process relational store for the records in [`crate::model`].
//! Compound operations run inside [`PackageStore::tx`], which holds the write
//! lock for the whole closure so that validate-then-mutate sequences are
//! atomic with respect to concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{RegistryError, RegistryResult};
use crate::hash::ContentHashes;
use crate::model::{
    Ecosystem, Id, Package, PackageBlob, PackageCoordinate, PackageFile, PackageVersion, Property,
    PropertyRef,
};

/// Inputs for a new package version.
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Owner, ecosystem and package name
    pub coordinate: PackageCoordinate,
    /// Version string
    pub version: String,
    /// Opaque adapter metadata
    pub metadata: Option<String>,
    /// Version properties to attach
    pub properties: Vec<(String, String)>,
}

/// Inputs for a new package file.
#[derive(Debug, Clone)]
pub struct NewFile {
    /// File name
    pub name: String,
    /// Distinguishes files sharing a name within a version
    pub composite_key: Option<String>,
    /// Whether this is the version's primary artifact
    pub is_lead: bool,
    /// File properties to attach
    pub properties: Vec<(String, String)>,
}

/// The relational tables. Only reachable through [`PackageStore`].
#[derive(Debug, Default)]
pub struct Tables {
    next_id: Id,
    packages: HashMap<Id, Package>,
    versions: HashMap<Id, PackageVersion>,
    files: HashMap<Id, PackageFile>,
    blobs: HashMap<Id, PackageBlob>,
    properties: HashMap<Id, Property>,
}

impl Tables {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    /// Look up a blob by SHA-256, inserting it if absent.
    ///
    /// Blobs are deduplicated by content, so uploading the same bytes twice
    /// yields the same record.
    pub fn get_or_insert_blob(&mut self, size: u64, hashes: ContentHashes) -> PackageBlob {
        if let Some(blob) = self
            .blobs
            .values()
            .find(|blob| blob.hashes.sha256 == hashes.sha256)
        {
            return blob.clone();
        }

        let blob = PackageBlob {
            id: self.next_id(),
            size,
            hashes,
        };
        self.blobs.insert(blob.id, blob.clone());
        blob
    }

    /// Look up a blob row by SHA-256.
    pub fn find_blob_by_sha256(&self, sha256: &str) -> Option<PackageBlob> {
        self.blobs
            .values()
            .find(|blob| blob.hashes.sha256 == sha256)
            .cloned()
    }

    /// Get a blob record by id.
    pub fn blob(&self, id: Id) -> RegistryResult<PackageBlob> {
        self.blobs
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::BlobNotFound(format!("blob #{id}")))
    }

    /// Find a package by coordinate.
    pub fn find_package(&self, coordinate: &PackageCoordinate) -> Option<Package> {
        self.packages
            .values()
            .find(|pkg| &pkg.coordinate == coordinate)
            .cloned()
    }

    /// Packages in an owner's namespace for one ecosystem, sorted by name.
    pub fn packages_in(&self, owner: &str, ecosystem: Ecosystem) -> Vec<Package> {
        let mut packages: Vec<_> = self
            .packages
            .values()
            .filter(|pkg| pkg.coordinate.owner == owner && pkg.coordinate.ecosystem == ecosystem)
            .cloned()
            .collect();
        packages.sort_by(|a, b| a.coordinate.name.cmp(&b.coordinate.name));
        packages
    }

    /// Every package in one ecosystem across all owners, sorted by
    /// `owner/name`.
    pub fn packages_for_ecosystem(&self, ecosystem: Ecosystem) -> Vec<Package> {
        let mut packages: Vec<_> = self
            .packages
            .values()
            .filter(|pkg| pkg.coordinate.ecosystem == ecosystem)
            .cloned()
            .collect();
        packages.sort_by(|a, b| {
            (&a.coordinate.owner, &a.coordinate.name).cmp(&(&b.coordinate.owner, &b.coordinate.name))
        });
        packages
    }

    /// Whether any file of this package is backed by a blob with the given
    /// SHA-256.
    pub fn package_has_blob(&self, package_id: Id, sha256: &str) -> bool {
        self.versions_of(package_id).iter().any(|ver| {
            self.files_for_version(ver.id).iter().any(|file| {
                self.blobs
                    .get(&file.blob_id)
                    .is_some_and(|blob| blob.hashes.sha256 == sha256)
            })
        })
    }

    fn get_or_insert_package(&mut self, coordinate: &PackageCoordinate) -> Package {
        if let Some(pkg) = self.find_package(coordinate) {
            return pkg;
        }

        let pkg = Package {
            id: self.next_id(),
            coordinate: coordinate.clone(),
        };
        self.packages.insert(pkg.id, pkg.clone());
        pkg
    }

    /// Find a version of a package.
    pub fn find_version(&self, package_id: Id, version: &str) -> Option<PackageVersion> {
        self.versions
            .values()
            .find(|ver| ver.package_id == package_id && ver.version == version)
            .cloned()
    }

    /// All versions of a package, in ascending version order. Numeric
    /// segments compare by value, so `1.10.0` sorts after `1.9.0`.
    pub fn versions_of(&self, package_id: Id) -> Vec<PackageVersion> {
        let mut versions: Vec<_> = self
            .versions
            .values()
            .filter(|ver| ver.package_id == package_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| compare_versions(&a.version, &b.version));
        versions
    }

    /// Versions of a package carrying a given property value.
    pub fn versions_with_property(&self, package_id: Id, name: &str, value: &str) -> Vec<PackageVersion> {
        self.versions_of(package_id)
            .into_iter()
            .filter(|ver| {
                self.properties_named(PropertyRef::Version(ver.id), name)
                    .iter()
                    .any(|prop| prop.value == value)
            })
            .collect()
    }

    /// Create the package and version if needed and attach a file.
    ///
    /// When the version already exists and `allow_existing_version` is false,
    /// the call fails and nothing is written. A file with the same name and
    /// composite key as an existing one always fails.
    pub fn create_package_and_add_file(
        &mut self,
        version: &NewVersion,
        file: &NewFile,
        blob_id: Id,
        allow_existing_version: bool,
    ) -> RegistryResult<(Package, PackageVersion, PackageFile)> {
        let existing_version = self
            .find_package(&version.coordinate)
            .and_then(|pkg| self.find_version(pkg.id, &version.version));

        if let Some(existing) = &existing_version {
            if !allow_existing_version {
                return Err(RegistryError::AlreadyExists(format!(
                    "{}@{}",
                    version.coordinate, version.version
                )));
            }
            if self
                .find_file(existing.id, &file.name, file.composite_key.as_deref())
                .is_some()
            {
                return Err(RegistryError::AlreadyExists(format!(
                    "{}@{}: {}",
                    version.coordinate, version.version, file.name
                )));
            }
        }

        let pkg = self.get_or_insert_package(&version.coordinate);

        let ver = match existing_version {
            Some(ver) => ver,
            None => {
                let ver = PackageVersion {
                    id: self.next_id(),
                    package_id: pkg.id,
                    version: version.version.clone(),
                    metadata: version.metadata.clone(),
                    downloads: 0,
                    created: Utc::now(),
                };
                self.versions.insert(ver.id, ver.clone());
                for (name, value) in &version.properties {
                    self.add_property(PropertyRef::Version(ver.id), name, value);
                }
                ver
            }
        };

        let record = PackageFile {
            id: self.next_id(),
            version_id: ver.id,
            name: file.name.clone(),
            composite_key: file.composite_key.clone(),
            is_lead: file.is_lead,
            blob_id,
        };
        self.files.insert(record.id, record.clone());
        for (name, value) in &file.properties {
            self.add_property(PropertyRef::File(record.id), name, value);
        }

        Ok((pkg, ver, record))
    }

    /// Bump a version's download counter.
    pub fn increment_downloads(&mut self, version_id: Id) {
        if let Some(ver) = self.versions.get_mut(&version_id) {
            ver.downloads += 1;
        }
    }

    /// Find a file by name and composite key within a version.
    pub fn find_file(
        &self,
        version_id: Id,
        name: &str,
        composite_key: Option<&str>,
    ) -> Option<PackageFile> {
        self.files
            .values()
            .find(|file| {
                file.version_id == version_id
                    && file.name == name
                    && file.composite_key.as_deref() == composite_key
            })
            .cloned()
    }

    /// Files of a version, sorted by name.
    pub fn files_for_version(&self, version_id: Id) -> Vec<PackageFile> {
        let mut files: Vec<_> = self
            .files
            .values()
            .filter(|file| file.version_id == version_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Delete a file and its properties. Blob rows are never deleted here;
    /// other files may share them.
    pub fn delete_file(&mut self, file_id: Id) {
        self.files.remove(&file_id);
        self.properties
            .retain(|_, prop| prop.subject != PropertyRef::File(file_id));
    }

    /// Delete a version, cascading to its files and properties.
    pub fn delete_version(&mut self, version_id: Id) {
        let file_ids: Vec<_> = self
            .files
            .values()
            .filter(|file| file.version_id == version_id)
            .map(|file| file.id)
            .collect();
        for file_id in file_ids {
            self.delete_file(file_id);
        }

        self.versions.remove(&version_id);
        self.properties
            .retain(|_, prop| prop.subject != PropertyRef::Version(version_id));
    }

    /// Delete a package if it has no versions left.
    pub fn delete_package_if_empty(&mut self, package_id: Id) {
        if self.versions.values().any(|ver| ver.package_id == package_id) {
            return;
        }
        self.packages.remove(&package_id);
        self.properties
            .retain(|_, prop| prop.subject != PropertyRef::Package(package_id));
    }

    /// Attach a property. Keys may repeat on a subject.
    pub fn add_property(&mut self, subject: PropertyRef, name: &str, value: &str) {
        let prop = Property {
            id: self.next_id(),
            subject,
            name: name.to_string(),
            value: value.to_string(),
        };
        self.properties.insert(prop.id, prop);
    }

    /// Remove all properties with this name on the subject, then add one.
    pub fn replace_property(&mut self, subject: PropertyRef, name: &str, value: &str) {
        self.properties
            .retain(|_, prop| !(prop.subject == subject && prop.name == name));
        self.add_property(subject, name, value);
    }

    /// Remove properties matching name (and value, when given) on the subject.
    pub fn remove_property(&mut self, subject: PropertyRef, name: &str, value: Option<&str>) {
        self.properties.retain(|_, prop| {
            !(prop.subject == subject
                && prop.name == name
                && value.is_none_or(|v| prop.value == v))
        });
    }

    /// Properties of a subject with a given name.
    pub fn properties_named(&self, subject: PropertyRef, name: &str) -> Vec<Property> {
        self.properties
            .values()
            .filter(|prop| prop.subject == subject && prop.name == name)
            .cloned()
            .collect()
    }
}

/// Natural ordering for version strings. Runs of digits compare by value
/// and everything else byte-wise, which handles the versioning schemes of
/// every ecosystem served here without assuming strict semver.
pub(crate) fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let mut a = a.as_bytes();
    let mut b = b.as_bytes();
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&x), Some(&y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let (run_a, rest_a) = take_digits(a);
                    let (run_b, rest_b) = take_digits(b);
                    match compare_digit_runs(run_a, run_b) {
                        Ordering::Equal => {
                            a = rest_a;
                            b = rest_b;
                        }
                        other => return other,
                    }
                } else {
                    match x.cmp(&y) {
                        Ordering::Equal => {
                            a = &a[1..];
                            b = &b[1..];
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

fn take_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let end = s
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(s.len());
    s.split_at(end)
}

fn compare_digit_runs(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    let trim = |s: &[u8]| {
        let start = s.iter().position(|&b| b != b'0').unwrap_or(s.len());
        s[start..].to_vec()
    };
    let (a, b) = (trim(a), trim(b));
    a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
}

/// Shared handle to the metadata tables.
#[derive(Debug, Clone, Default)]
pub struct PackageStore {
    inner: Arc<RwLock<Tables>>,
}

impl PackageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a read-write transaction. The closure holds the write lock, so a
    /// failed validation leaves the tables untouched and no other request
    /// observes intermediate state.
    pub fn tx<R>(&self, f: impl FnOnce(&mut Tables) -> RegistryResult<R>) -> RegistryResult<R> {
        let mut tables = self.inner.write();
        f(&mut tables)
    }

    /// Run a read-only query.
    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.inner.read();
        f(&tables)
    }

    /// Find a package by coordinate, failing with `PackageNotFound`.
    pub fn require_package(&self, coordinate: &PackageCoordinate) -> RegistryResult<Package> {
        self.read(|tables| tables.find_package(coordinate))
            .ok_or_else(|| RegistryError::PackageNotFound(coordinate.to_string()))
    }

    /// Find a version by coordinate and version string, failing with
    /// `VersionNotFound`.
    pub fn require_version(
        &self,
        coordinate: &PackageCoordinate,
        version: &str,
    ) -> RegistryResult<(Package, PackageVersion)> {
        let pkg = self.require_package(coordinate)?;
        let ver = self
            .read(|tables| tables.find_version(pkg.id, version))
            .ok_or_else(|| {
                RegistryError::VersionNotFound(format!("{coordinate}@{version}"))
            })?;
        Ok((pkg, ver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    fn coord(name: &str) -> PackageCoordinate {
        PackageCoordinate::new("alice", Ecosystem::Generic, name)
    }

    fn new_version(name: &str, version: &str) -> NewVersion {
        NewVersion {
            coordinate: coord(name),
            version: version.to_string(),
            metadata: None,
            properties: Vec::new(),
        }
    }

    fn new_file(name: &str) -> NewFile {
        NewFile {
            name: name.to_string(),
            composite_key: None,
            is_lead: true,
            properties: Vec::new(),
        }
    }

    #[test]
    fn blob_dedup() {
        let store = PackageStore::new();
        let (a, b) = store
            .tx(|tables| {
                let a = tables.get_or_insert_blob(5, hash_bytes(b"hello"));
                let b = tables.get_or_insert_blob(5, hash_bytes(b"hello"));
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn duplicate_version_rejected() {
        let store = PackageStore::new();
        store
            .tx(|tables| {
                let blob = tables.get_or_insert_blob(1, hash_bytes(b"a"));
                tables.create_package_and_add_file(
                    &new_version("pkg", "1.0"),
                    &new_file("pkg-1.0.bin"),
                    blob.id,
                    false,
                )
            })
            .unwrap();

        let err = store
            .tx(|tables| {
                let blob = tables.get_or_insert_blob(1, hash_bytes(b"b"));
                tables.create_package_and_add_file(
                    &new_version("pkg", "1.0"),
                    &new_file("other.bin"),
                    blob.id,
                    false,
                )
            })
            .expect_err("duplicate version");
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[test]
    fn duplicate_file_rejected_even_when_version_allowed() {
        let store = PackageStore::new();
        let add = |store: &PackageStore| {
            store.tx(|tables| {
                let blob = tables.get_or_insert_blob(1, hash_bytes(b"a"));
                tables.create_package_and_add_file(
                    &new_version("pkg", "1.0"),
                    &new_file("pkg-1.0.bin"),
                    blob.id,
                    true,
                )
            })
        };
        add(&store).unwrap();
        let err = add(&store).expect_err("duplicate file");
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[test]
    fn delete_version_cascades_but_keeps_blobs() {
        let store = PackageStore::new();
        let (pkg, ver, file) = store
            .tx(|tables| {
                let blob = tables.get_or_insert_blob(1, hash_bytes(b"a"));
                tables.create_package_and_add_file(
                    &new_version("pkg", "1.0"),
                    &new_file("pkg-1.0.bin"),
                    blob.id,
                    false,
                )
            })
            .unwrap();

        store
            .tx(|tables| {
                tables.delete_version(ver.id);
                tables.delete_package_if_empty(pkg.id);
                Ok(())
            })
            .unwrap();

        store.read(|tables| {
            assert!(tables.find_package(&coord("pkg")).is_none());
            assert!(tables.files_for_version(ver.id).is_empty());
            assert!(tables.blob(file.blob_id).is_ok());
        });
    }

    #[test]
    fn versions_order_numerically() {
        use std::cmp::Ordering;

        assert_eq!(compare_versions("1.9.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.10.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.0", "10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.09", "1.9"), Ordering::Equal);

        let store = PackageStore::new();
        let pkg_id = store
            .tx(|tables| {
                let mut pkg_id = 0;
                for version in ["1.10.0", "1.2.0", "1.9.0"] {
                    let blob = tables.get_or_insert_blob(1, hash_bytes(version.as_bytes()));
                    let (pkg, _, _) = tables.create_package_and_add_file(
                        &new_version("pkg", version),
                        &new_file(&format!("pkg-{version}.bin")),
                        blob.id,
                        false,
                    )?;
                    pkg_id = pkg.id;
                }
                Ok(pkg_id)
            })
            .unwrap();

        let order: Vec<String> = store.read(|tables| {
            tables
                .versions_of(pkg_id)
                .into_iter()
                .map(|ver| ver.version)
                .collect()
        });
        assert_eq!(order, vec!["1.2.0", "1.9.0", "1.10.0"]);
    }

    #[test]
    fn replace_property_is_single_valued() {
        let store = PackageStore::new();
        let ver_id = store
            .tx(|tables| {
                let blob = tables.get_or_insert_blob(1, hash_bytes(b"a"));
                let (_, ver, _) = tables.create_package_and_add_file(
                    &new_version("pkg", "1.0"),
                    &new_file("f"),
                    blob.id,
                    false,
                )?;
                Ok(ver.id)
            })
            .unwrap();

        store
            .tx(|tables| {
                let subject = PropertyRef::Version(ver_id);
                tables.add_property(subject, "tag", "old");
                tables.replace_property(subject, "tag", "new");
                Ok(())
            })
            .unwrap();

        let props = store.read(|tables| tables.properties_named(PropertyRef::Version(ver_id), "tag"));
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].value, "new");
    }
}
