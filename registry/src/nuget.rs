//! NuGet V3 registry adapter
//!
//! Serves the V3 service index and the resources it advertises: push
//! (multipart `.nupkg`), search, registration documents and downloads.
//! Package coordinates are read out of the `.nuspec` embedded in the
//! uploaded archive, never from the URL, and lookups are case-insensitive
//! by lowercasing ids and versions at the door.

use std::io::Read as _;

use axum::Json;
use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use serde_json::json;

use crate::api::Registry;
use crate::auth::Principal;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Ecosystem, PackageCoordinate, PropertyRef};
use crate::store::{NewFile, NewVersion};
use crate::xml::element_text;

/// Version property carrying the nuspec description.
pub const PROP_DESCRIPTION: &str = "nuget.description";

/// Routes for the NuGet adapter.
pub fn router() -> axum::Router<Registry> {
    axum::Router::new()
        .route("/{owner}/nuget/index.json", get(service_index))
        .route("/{owner}/nuget/", put(push))
        .route("/{owner}/nuget/symbolpackage/", put(push_symbols))
        .route("/{owner}/nuget/query", get(search))
        .route("/{owner}/nuget/registration/{id}/{leaf}", get(registration))
        .route(
            "/{owner}/nuget/package/{id}/{version}/{filename}",
            get(download),
        )
        .route("/{owner}/nuget/{id}/{version}", delete(remove_version))
}

fn coordinate(owner: &str, id: &str) -> RegistryResult<PackageCoordinate> {
    if id.is_empty() {
        return Err(RegistryError::InvalidName(id.to_string()));
    }
    Ok(PackageCoordinate::new(
        owner,
        Ecosystem::Nuget,
        id.to_lowercase(),
    ))
}

fn base_url(registry: &Registry, owner: &str) -> String {
    format!("{}/{}/nuget", registry.realm(), owner)
}

/// `GET /{owner}/nuget/index.json`: the V3 service index.
async fn service_index(
    State(registry): State<Registry>,
    Path(owner): Path<String>,
    Extension(_principal): Extension<Principal>,
) -> Json<serde_json::Value> {
    let base = base_url(&registry, &owner);
    Json(json!({
        "version": "3.0.0",
        "resources": [
            { "@id": format!("{base}/query"), "@type": "SearchQueryService" },
            { "@id": format!("{base}/registration"), "@type": "RegistrationsBaseUrl" },
            { "@id": format!("{base}/package"), "@type": "PackageBaseAddress/3.0.0" },
            { "@id": base, "@type": "PackagePublish/2.0.0" },
        ],
    }))
}

/// Coordinate and description read from a `.nuspec`.
#[derive(Debug, PartialEq, Eq)]
struct Nuspec {
    id: String,
    version: String,
    description: Option<String>,
}

/// Read the `.nuspec` entry out of an uploaded package archive.
fn read_nuspec(data: &[u8]) -> RegistryResult<Nuspec> {
    let malformed = |msg: String| RegistryError::MalformedPayload(msg);
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))
        .map_err(|err| malformed(format!("package archive: {err}")))?;

    let entry = archive
        .file_names()
        .find(|name| name.ends_with(".nuspec") && !name.contains('/'))
        .map(str::to_owned)
        .ok_or_else(|| malformed("package has no .nuspec".to_string()))?;

    let mut xml = String::new();
    archive
        .by_name(&entry)
        .map_err(|err| malformed(format!("package archive: {err}")))?
        .read_to_string(&mut xml)
        .map_err(|err| malformed(format!("nuspec: {err}")))?;

    let id = element_text(&xml, "id")
        .ok_or_else(|| malformed("nuspec missing id".to_string()))?;
    let version = element_text(&xml, "version")
        .ok_or_else(|| malformed("nuspec missing version".to_string()))?;

    Ok(Nuspec {
        id: id.to_lowercase(),
        version: version.to_lowercase(),
        description: element_text(&xml, "description"),
    })
}

async fn first_file(multipart: &mut Multipart) -> RegistryResult<Vec<u8>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?
        .ok_or_else(|| RegistryError::MalformedPayload("empty upload".to_string()))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?;
    Ok(bytes.to_vec())
}

/// `PUT /{owner}/nuget/`: push a `.nupkg`.
async fn push(
    State(registry): State<Registry>,
    Path(owner): Path<String>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let data = first_file(&mut multipart).await?;
    let nuspec = read_nuspec(&data)?;
    let coordinate = coordinate(&owner, &nuspec.id)?;

    let mut properties = Vec::new();
    if let Some(description) = &nuspec.description {
        properties.push((PROP_DESCRIPTION.to_string(), description.clone()));
    }

    registry
        .store_file(
            NewVersion {
                coordinate: coordinate.clone(),
                version: nuspec.version.clone(),
                metadata: None,
                properties,
            },
            NewFile {
                name: format!("{}.{}.nupkg", nuspec.id, nuspec.version),
                composite_key: None,
                is_lead: true,
                properties: Vec::new(),
            },
            &data,
            false,
        )
        .await?;

    tracing::debug!(%coordinate, version = nuspec.version, "Pushed NuGet package");
    Ok(StatusCode::CREATED)
}

/// `PUT /{owner}/nuget/symbolpackage/`: push a `.snupkg` for an existing
/// version.
async fn push_symbols(
    State(registry): State<Registry>,
    Path(owner): Path<String>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let data = first_file(&mut multipart).await?;
    let nuspec = read_nuspec(&data)?;
    let coordinate = coordinate(&owner, &nuspec.id)?;

    // symbols only attach to a version that was pushed first
    registry.store.require_version(&coordinate, &nuspec.version)?;

    registry
        .store_file(
            NewVersion {
                coordinate,
                version: nuspec.version.clone(),
                metadata: None,
                properties: Vec::new(),
            },
            NewFile {
                name: format!("{}.{}.snupkg", nuspec.id, nuspec.version),
                composite_key: None,
                is_lead: false,
                properties: Vec::new(),
            },
            &data,
            true,
        )
        .await?;

    Ok(StatusCode::CREATED)
}

#[derive(Debug, Default, serde::Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    skip: Option<usize>,
    #[serde(default)]
    take: Option<usize>,
}

fn package_summary(registry: &Registry, owner: &str, pkg: &crate::model::Package) -> serde_json::Value {
    let (versions, description) = registry.store.read(|tables| {
        let versions = tables.versions_of(pkg.id);
        let description = versions
            .iter()
            .rev()
            .find_map(|ver| {
                tables
                    .properties_named(PropertyRef::Version(ver.id), PROP_DESCRIPTION)
                    .into_iter()
                    .next()
            })
            .map(|prop| prop.value);
        (versions, description)
    });

    let latest = versions
        .last()
        .map(|ver| ver.version.clone())
        .unwrap_or_default();
    json!({
        "id": pkg.coordinate.name,
        "version": latest,
        "description": description,
        "versions": versions
            .iter()
            .map(|ver| json!({
                "version": ver.version,
                "downloads": ver.downloads,
                "@id": format!(
                    "{}/registration/{}/{}.json",
                    base_url(registry, owner), pkg.coordinate.name, ver.version
                ),
            }))
            .collect::<Vec<_>>(),
    })
}

/// `GET /{owner}/nuget/query?q&skip&take`: substring search over ids.
async fn search(
    State(registry): State<Registry>,
    Path(owner): Path<String>,
    Query(query): Query<SearchQuery>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let needle = query.q.unwrap_or_default().to_lowercase();
    let matches: Vec<_> = registry
        .store
        .read(|tables| tables.packages_in(&owner, Ecosystem::Nuget))
        .into_iter()
        .filter(|pkg| pkg.coordinate.name.contains(&needle))
        .collect();

    let total = matches.len();
    let skip = query.skip.unwrap_or(0);
    let take = query.take.unwrap_or(total.max(1)).min(100);
    let data: Vec<_> = matches
        .iter()
        .skip(skip)
        .take(take)
        .map(|pkg| package_summary(&registry, &owner, pkg))
        .collect();

    Ok(Json(json!({ "totalHits": total, "data": data })).into_response())
}

fn catalog_entry(
    registry: &Registry,
    owner: &str,
    id: &str,
    version: &str,
    description: Option<String>,
    published: chrono::DateTime<chrono::Utc>,
) -> serde_json::Value {
    let content = format!(
        "{}/package/{id}/{version}/{id}.{version}.nupkg",
        base_url(registry, owner)
    );
    json!({
        "catalogEntry": {
            "id": id,
            "version": version,
            "description": description,
            "published": published.to_rfc3339(),
            "packageContent": content,
        },
        "packageContent": content,
    })
}

/// `GET /{owner}/nuget/registration/{id}/index.json` or `.../{version}.json`.
async fn registration(
    State(registry): State<Registry>,
    Path((owner, id, leaf)): Path<(String, String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &id)?;
    let pkg = registry.store.require_package(&coordinate)?;
    let id = coordinate.name.clone();

    let versions = registry.store.read(|tables| {
        tables
            .versions_of(pkg.id)
            .into_iter()
            .map(|ver| {
                let description = tables
                    .properties_named(PropertyRef::Version(ver.id), PROP_DESCRIPTION)
                    .into_iter()
                    .next()
                    .map(|prop| prop.value);
                (ver.version, description, ver.created)
            })
            .collect::<Vec<_>>()
    });

    if leaf == "index.json" {
        let items: Vec<_> = versions
            .iter()
            .map(|(version, description, published)| {
                catalog_entry(&registry, &owner, &id, version, description.clone(), *published)
            })
            .collect();
        let lower = versions.first().map(|(v, ..)| v.clone()).unwrap_or_default();
        let upper = versions.last().map(|(v, ..)| v.clone()).unwrap_or_default();
        return Ok(Json(json!({
            "count": 1,
            "items": [{ "count": items.len(), "lower": lower, "upper": upper, "items": items }],
        }))
        .into_response());
    }

    let version = leaf
        .strip_suffix(".json")
        .ok_or_else(|| RegistryError::FileNotFound(leaf.clone()))?
        .to_lowercase();
    let (description, published) = versions
        .iter()
        .find(|(v, ..)| v == &version)
        .map(|(_, description, published)| (description.clone(), *published))
        .ok_or_else(|| RegistryError::VersionNotFound(format!("{coordinate}@{version}")))?;

    Ok(Json(catalog_entry(&registry, &owner, &id, &version, description, published)).into_response())
}

/// `GET /{owner}/nuget/package/{id}/{version}/{filename}`: download.
async fn download(
    State(registry): State<Registry>,
    Path((owner, id, version, filename)): Path<(String, String, String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &id)?;
    let version = version.to_lowercase();
    let filename = filename.to_lowercase();

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

/// `DELETE /{owner}/nuget/{id}/{version}`.
async fn remove_version(
    State(registry): State<Registry>,
    Path((owner, id, version)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = coordinate(&owner, &id)?;
    registry.delete_version(&coordinate, &version.to_lowercase())?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn nupkg(id: &str, version: &str, description: Option<&str>) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::FileOptions::default();
            writer.start_file(format!("{id}.nuspec"), options).unwrap();
            let description = description
                .map(|d| format!("<description>{d}</description>"))
                .unwrap_or_default();
            write!(
                writer,
                "<?xml version=\"1.0\"?><package><metadata><id>{id}</id>\
                 <version>{version}</version>{description}</metadata></package>"
            )
            .unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn nuspec_roundtrip() {
        let data = nupkg("My.Lib", "1.0.0", Some("a library"));
        let nuspec = read_nuspec(&data).unwrap();
        assert_eq!(
            nuspec,
            Nuspec {
                id: "my.lib".to_string(),
                version: "1.0.0".to_string(),
                description: Some("a library".to_string()),
            }
        );
    }

    #[test]
    fn rejects_archives_without_nuspec() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::FileOptions::default();
            writer.start_file("readme.txt", options).unwrap();
            write!(writer, "hi").unwrap();
            writer.finish().unwrap();
        }
        let err = read_nuspec(&buf.into_inner()).expect_err("no nuspec");
        assert!(matches!(err, RegistryError::MalformedPayload(_)));
    }

    #[test]
    fn rejects_non_zip_payloads() {
        assert!(read_nuspec(b"not a zip").is_err());
    }
}
