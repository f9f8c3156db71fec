//! PyPI registry adapter
//!
//! Accepts `twine upload`-style multipart posts and serves a PEP 503 simple
//! index. Package names are normalized (lowercase, separator runs collapsed
//! to `-`) before they touch the metadata store, so lookups match however
//! the client spells the name.

use axum::extract::{Extension, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};

use crate::api::Registry;
use crate::auth::Principal;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Ecosystem, PackageCoordinate};
use crate::store::{NewFile, NewVersion};

/// Routes for the PyPI adapter.
pub fn router() -> axum::Router<Registry> {
    axum::Router::new()
        .route("/{owner}/pypi/", post(upload))
        .route("/{owner}/pypi/simple/{package}/", get(simple_index))
        .route(
            "/{owner}/pypi/files/{package}/{version}/{filename}",
            get(download),
        )
}

/// PEP 503 name normalization: lowercase, runs of `-_.` become one `-`.
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.extend(c.to_lowercase());
            last_sep = false;
        }
    }
    out
}

fn coordinate(owner: &str, package: &str) -> RegistryResult<PackageCoordinate> {
    let normalized = normalize(package);
    if normalized.is_empty() || normalized.starts_with('-') || normalized.ends_with('-') {
        return Err(RegistryError::InvalidName(package.to_string()));
    }
    Ok(PackageCoordinate::new(owner, Ecosystem::Pypi, normalized))
}

#[derive(Debug, Default)]
struct UploadForm {
    name: Option<String>,
    version: Option<String>,
    sha256_digest: Option<String>,
    filename: Option<String>,
    content: Option<Vec<u8>>,
}

async fn read_form(multipart: &mut Multipart) -> RegistryResult<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?
    {
        let Some(field_name) = field.name().map(str::to_owned) else {
            continue;
        };
        match field_name.as_str() {
            "name" => form.name = Some(read_text(field).await?),
            "version" => form.version = Some(read_text(field).await?),
            "sha256_digest" => form.sha256_digest = Some(read_text(field).await?),
            "content" => {
                form.filename = field.file_name().map(str::to_owned);
                form.content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> RegistryResult<String> {
    field
        .text()
        .await
        .map_err(|err| RegistryError::MalformedPayload(err.to_string()))
}

/// `POST /{owner}/pypi/`: upload one distribution file.
///
/// The declared `sha256_digest` is verified before anything is stored; a
/// mismatch leaves no trace of the upload.
async fn upload(
    State(registry): State<Registry>,
    Path(owner): Path<String>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;

    let form = read_form(&mut multipart).await?;
    let missing = |what: &str| RegistryError::MalformedPayload(format!("missing field: {what}"));
    let name = form.name.ok_or_else(|| missing("name"))?;
    let version = form.version.ok_or_else(|| missing("version"))?;
    let declared = form
        .sha256_digest
        .ok_or_else(|| missing("sha256_digest"))?
        .to_lowercase();
    let filename = form.filename.ok_or_else(|| missing("content filename"))?;
    let content = form.content.ok_or_else(|| missing("content"))?;

    let coordinate = coordinate(&owner, &name)?;
    if version.trim().is_empty() || version != version.trim() {
        return Err(RegistryError::InvalidReference(version));
    }

    let actual = crate::hash::hash_bytes(&content).sha256;
    if actual != declared {
        return Err(RegistryError::DigestMismatch {
            expected: format!("sha256:{declared}"),
            actual: format!("sha256:{actual}"),
        });
    }

    registry
        .store_file(
            NewVersion {
                coordinate: coordinate.clone(),
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
            &content,
            true,
        )
        .await?;

    tracing::debug!(%coordinate, "Uploaded PyPI distribution");
    Ok(StatusCode::CREATED)
}

/// `GET /{owner}/pypi/simple/{package}/`: PEP 503 link page with
/// `#sha256=` fragments.
async fn simple_index(
    State(registry): State<Registry>,
    Path((owner, package)): Path<(String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &package)?;
    let pkg = registry.store.require_package(&coordinate)?;
    let name = coordinate.name.clone();

    let links = registry.store.read(|tables| {
        let mut links = Vec::new();
        for ver in tables.versions_of(pkg.id) {
            for file in tables.files_for_version(ver.id) {
                if let Ok(blob) = tables.blob(file.blob_id) {
                    links.push((ver.version.clone(), file.name, blob.hashes.sha256));
                }
            }
        }
        links
    });

    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Links for {name}</title></head>\n\
         <body>\n<h1>Links for {name}</h1>\n"
    );
    for (version, filename, sha256) in links {
        html.push_str(&format!(
            "<a href=\"{realm}/{owner}/pypi/files/{name}/{version}/{filename}#sha256={sha256}\">{filename}</a><br/>\n",
            realm = registry.realm(),
        ));
    }
    html.push_str("</body>\n</html>\n");

    Ok(Html(html).into_response())
}

/// `GET /{owner}/pypi/files/{package}/{version}/{filename}`: download.
async fn download(
    State(registry): State<Registry>,
    Path((owner, package, version, filename)): Path<(String, String, String, String)>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = coordinate(&owner, &package)?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pep503_normalization() {
        assert_eq!(normalize("Django"), "django");
        assert_eq!(normalize("my__pkg..name"), "my-pkg-name");
        assert_eq!(normalize("friendly-bard"), "friendly-bard");
    }

    #[test]
    fn coordinate_rejects_degenerate_names() {
        assert!(coordinate("o", "ok-name").is_ok());
        assert!(coordinate("o", "---").is_err());
        assert!(coordinate("o", "").is_err());
    }
}
