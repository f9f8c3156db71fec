//! Container (OCI / Docker) registry adapter
//!
//! Implements the pull and push protocol under `/v2`: chunked and monolithic
//! blob uploads, cross-repository blob mounts, manifest storage and
//! resolution, tag listing and the repository catalog. Every route except the
//! token endpoint requires a bearer token from [`crate::auth`].

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::api::Registry;
use crate::auth::{self, Principal};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{self, Reference};
use crate::pagination::{ListQuery, paginate};

const HEADER_CONTENT_DIGEST: &str = "docker-content-digest";
const HEADER_UPLOAD_UUID: &str = "docker-upload-uuid";
const API_VERSION_HEADER: &str = "docker-distribution-api-version";
const API_VERSION: &str = "registry/2.0";

/// The `/v2` router: token endpoint plus bearer-protected registry routes.
pub fn router(registry: Registry) -> axum::Router<Registry> {
    let protected = axum::Router::new()
        .route("/v2/", get(base))
        .route("/v2/_catalog", get(catalog))
        .route("/v2/{owner}/{image}/blobs/uploads/", post(start_upload))
        .route(
            "/v2/{owner}/{image}/blobs/uploads/{uuid}",
            get(upload_status)
                .patch(upload_chunk)
                .put(finish_upload)
                .delete(cancel_upload),
        )
        .route(
            "/v2/{owner}/{image}/blobs/{digest}",
            get(get_blob).delete(delete_blob),
        )
        .route(
            "/v2/{owner}/{image}/manifests/{reference}",
            get(get_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .route("/v2/{owner}/{image}/tags/list", get(list_tags))
        .layer(axum::middleware::from_fn_with_state(
            registry.clone(),
            auth::require_bearer,
        ));

    axum::Router::new()
        .route("/v2/token", get(auth::token))
        .merge(protected)
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static(API_VERSION_HEADER),
            header::HeaderValue::from_static(API_VERSION),
        ))
}

async fn base(Extension(_principal): Extension<Principal>) -> StatusCode {
    StatusCode::OK
}

fn range_header(received: u64) -> String {
    format!("0-{}", received.saturating_sub(1))
}

fn blob_location(owner: &str, image: &str, digest: &Digest) -> String {
    format!("/v2/{owner}/{image}/blobs/{digest}")
}

fn upload_location(owner: &str, image: &str, id: Uuid) -> String {
    format!("/v2/{owner}/{image}/blobs/uploads/{id}")
}

fn etag(digest: &Digest) -> String {
    format!("\"{digest}\"")
}

#[derive(Debug, Default, serde::Deserialize)]
struct UploadQuery {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
}

/// `POST /v2/{owner}/{image}/blobs/uploads/`
///
/// Three modes: monolithic put (`?digest=`), cross-repository mount
/// (`?mount=`), and session creation. A mount whose blob is unknown falls
/// through to session creation rather than failing.
async fn start_upload(
    State(registry): State<Registry>,
    Path((owner, image)): Path<(String, String)>,
    Query(query): Query<UploadQuery>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> RegistryResult<Response> {
    principal.require_write()?;
    let coordinate = manifest::image_coordinate(&owner, &image)?;

    if let Some(digest) = &query.digest {
        let digest: Digest = digest.parse()?;
        let hashes = registry.content.put(&digest, &body).await?;
        manifest::anchor_blob(&registry.store, &coordinate, &digest, body.len() as u64, hashes)?;

        return Ok((
            StatusCode::CREATED,
            [
                (header::LOCATION.as_str(), blob_location(&owner, &image, &digest)),
                (HEADER_CONTENT_DIGEST, digest.to_string()),
            ],
        )
            .into_response());
    }

    if let Some(mount) = &query.mount {
        let digest: Digest = mount.parse()?;
        let known = registry
            .store
            .read(|tables| tables.find_blob_by_sha256(digest.hex()));
        if let Some(blob) = known {
            if registry.content.exists(&digest).await {
                tracing::debug!(%digest, from = query.from.as_deref(), "Mounted blob");
                manifest::anchor_blob(
                    &registry.store,
                    &coordinate,
                    &digest,
                    blob.size,
                    blob.hashes,
                )?;
                return Ok((
                    StatusCode::CREATED,
                    [
                        (header::LOCATION.as_str(), blob_location(&owner, &image, &digest)),
                        (HEADER_CONTENT_DIGEST, digest.to_string()),
                    ],
                )
                    .into_response());
            }
        }
        // unknown blob: fall through to a fresh upload session
    }

    let id = registry.uploads.create();
    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION.as_str(), upload_location(&owner, &image, id)),
            (header::RANGE.as_str(), "0-0".to_string()),
            (HEADER_UPLOAD_UUID, id.to_string()),
        ],
    )
        .into_response())
}

/// `GET .../blobs/uploads/{uuid}`: bytes received so far.
async fn upload_status(
    State(registry): State<Registry>,
    Path((owner, image, id)): Path<(String, String, Uuid)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<Response> {
    principal.require_write()?;
    manifest::image_coordinate(&owner, &image)?;

    let received = registry.uploads.received(id).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [
            (header::RANGE.as_str(), range_header(received)),
            (HEADER_UPLOAD_UUID, id.to_string()),
        ],
    )
        .into_response())
}

fn parse_content_range(headers: &HeaderMap) -> RegistryResult<Option<u64>> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| RegistryError::MalformedPayload("content-range".to_string()))?;
    let (start, _end) = value
        .split_once('-')
        .ok_or_else(|| RegistryError::MalformedPayload(format!("content-range: {value}")))?;
    let start = start
        .parse()
        .map_err(|_| RegistryError::MalformedPayload(format!("content-range: {value}")))?;
    Ok(Some(start))
}

/// `PATCH .../blobs/uploads/{uuid}`: append a chunk.
async fn upload_chunk(
    State(registry): State<Registry>,
    Path((owner, image, id)): Path<(String, String, Uuid)>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    principal.require_write()?;
    manifest::image_coordinate(&owner, &image)?;

    let offset = parse_content_range(&headers)?;
    let received = registry.uploads.append(id, offset, &body).await?;

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION.as_str(), upload_location(&owner, &image, id)),
            (header::RANGE.as_str(), range_header(received)),
            (HEADER_UPLOAD_UUID, id.to_string()),
        ],
    )
        .into_response())
}

#[derive(Debug, serde::Deserialize)]
struct FinishQuery {
    digest: Option<String>,
}

/// `PUT .../blobs/uploads/{uuid}?digest=`: commit the session, storing the
/// accumulated bytes as a verified blob.
async fn finish_upload(
    State(registry): State<Registry>,
    Path((owner, image, id)): Path<(String, String, Uuid)>,
    Query(query): Query<FinishQuery>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> RegistryResult<Response> {
    principal.require_write()?;
    let coordinate = manifest::image_coordinate(&owner, &image)?;

    let digest: Digest = query
        .digest
        .as_deref()
        .ok_or_else(|| RegistryError::InvalidDigest("missing digest parameter".to_string()))?
        .parse()?;

    if !body.is_empty() {
        registry.uploads.append(id, None, &body).await?;
    }

    let (data, hashes) = registry.uploads.commit(id, &digest).await?;
    registry.content.put_verified(&hashes, &data).await?;
    manifest::anchor_blob(&registry.store, &coordinate, &digest, data.len() as u64, hashes)?;

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION.as_str(), blob_location(&owner, &image, &digest)),
            (HEADER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// `DELETE .../blobs/uploads/{uuid}`: discard the session.
async fn cancel_upload(
    State(registry): State<Registry>,
    Path((owner, image, id)): Path<(String, String, Uuid)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    manifest::image_coordinate(&owner, &image)?;
    registry.uploads.cancel(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET|HEAD .../blobs/{digest}`: blob download. HEAD answers from metadata
/// alone.
async fn get_blob(
    State(registry): State<Registry>,
    Path((owner, image, digest)): Path<(String, String, String)>,
    Extension(_principal): Extension<Principal>,
    method: Method,
) -> RegistryResult<Response> {
    let coordinate = manifest::image_coordinate(&owner, &image)?;
    let digest: Digest = digest.parse()?;

    let blob = manifest::find_blob(&registry.store, &coordinate, &digest)?;
    let headers = [
        (HEADER_CONTENT_DIGEST, digest.to_string()),
        (header::ETAG.as_str(), etag(&digest)),
        (header::CONTENT_LENGTH.as_str(), blob.size.to_string()),
        (
            header::CONTENT_TYPE.as_str(),
            "application/octet-stream".to_string(),
        ),
    ];

    if method == Method::HEAD {
        return Ok((StatusCode::OK, headers).into_response());
    }

    let bytes = registry.content.get(&digest).await?;
    Ok((StatusCode::OK, headers, bytes).into_response())
}

/// `DELETE .../blobs/{digest}`: detach the blob from this image.
async fn delete_blob(
    State(registry): State<Registry>,
    Path((owner, image, digest)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<Response> {
    principal.require_write()?;
    let coordinate = manifest::image_coordinate(&owner, &image)?;
    let digest: Digest = digest.parse()?;

    manifest::forget_blob(&registry.store, &coordinate, &digest)?;
    Ok((
        StatusCode::ACCEPTED,
        [(HEADER_CONTENT_DIGEST, digest.to_string())],
    )
        .into_response())
}

/// `PUT .../manifests/{reference}`: store a manifest under a tag or digest.
async fn put_manifest(
    State(registry): State<Registry>,
    Path((owner, image, reference)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    principal.require_write()?;
    let coordinate = manifest::image_coordinate(&owner, &image)?;
    let reference = Reference::parse(&reference)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| RegistryError::UnsupportedManifestType("missing".to_string()))?;

    let digest = manifest::put(
        &registry.content,
        &registry.store,
        &coordinate,
        &reference,
        content_type,
        &body,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        [
            (
                header::LOCATION.as_str(),
                format!("/v2/{owner}/{image}/manifests/{digest}"),
            ),
            (HEADER_CONTENT_DIGEST, digest.to_string()),
            (header::ETAG.as_str(), etag(&digest)),
        ],
    )
        .into_response())
}

/// `GET|HEAD .../manifests/{reference}`: the exact stored bytes. Only GET
/// counts as a pull.
async fn get_manifest(
    State(registry): State<Registry>,
    Path((owner, image, reference)): Path<(String, String, String)>,
    Extension(_principal): Extension<Principal>,
    method: Method,
) -> RegistryResult<Response> {
    let coordinate = manifest::image_coordinate(&owner, &image)?;
    let reference = Reference::parse(&reference)?;

    if method == Method::HEAD {
        let (digest, media_type, size) =
            manifest::resolve(&registry.store, &coordinate, &reference)?;
        return Ok((
            StatusCode::OK,
            [
                (HEADER_CONTENT_DIGEST, digest.to_string()),
                (header::ETAG.as_str(), etag(&digest)),
                (header::CONTENT_TYPE.as_str(), media_type),
                (header::CONTENT_LENGTH.as_str(), size.to_string()),
            ],
        )
            .into_response());
    }

    let stored = manifest::get(&registry.content, &registry.store, &coordinate, &reference).await?;
    Ok((
        StatusCode::OK,
        [
            (HEADER_CONTENT_DIGEST, stored.digest.to_string()),
            (header::ETAG.as_str(), etag(&stored.digest)),
            (header::CONTENT_TYPE.as_str(), stored.media_type.clone()),
            (
                header::CONTENT_LENGTH.as_str(),
                stored.bytes.len().to_string(),
            ),
        ],
        stored.bytes,
    )
        .into_response())
}

/// `DELETE .../manifests/{reference}`.
async fn delete_manifest(
    State(registry): State<Registry>,
    Path((owner, image, reference)): Path<(String, String, String)>,
    Extension(principal): Extension<Principal>,
) -> RegistryResult<StatusCode> {
    principal.require_write()?;
    let coordinate = manifest::image_coordinate(&owner, &image)?;
    let reference = Reference::parse(&reference)?;

    manifest::delete(&registry.store, &coordinate, &reference)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// `GET .../tags/list?n&last`: ascending tags with a `Link` to the next page.
async fn list_tags(
    State(registry): State<Registry>,
    Path((owner, image)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    let coordinate = manifest::image_coordinate(&owner, &image)?;

    let tags = manifest::tags(&registry.store, &coordinate)?;
    let base = format!("/v2/{owner}/{image}/tags/list");
    let page = paginate(tags, &query, &base);

    let body = Json(TagList {
        name: format!("{owner}/{image}"),
        tags: page.items,
    });
    Ok(match page.link {
        Some(link) => (StatusCode::OK, [(header::LINK.as_str(), link)], body).into_response(),
        None => (StatusCode::OK, body).into_response(),
    })
}

#[derive(Debug, serde::Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

/// `GET /v2/_catalog?n&last`: every repository, as `owner/image`.
async fn catalog(
    State(registry): State<Registry>,
    Query(query): Query<ListQuery>,
    Extension(_principal): Extension<Principal>,
) -> RegistryResult<Response> {
    // Images holding only pre-manifest blob anchors are not repositories yet.
    let repositories = registry.store.read(|tables| {
        tables
            .packages_for_ecosystem(crate::model::Ecosystem::Container)
            .into_iter()
            .filter(|pkg| {
                tables
                    .versions_of(pkg.id)
                    .iter()
                    .any(|ver| ver.version != manifest::UPLOAD_VERSION)
            })
            .map(|pkg| format!("{}/{}", pkg.coordinate.owner, pkg.coordinate.name))
            .collect::<Vec<_>>()
    });

    let page = paginate(repositories, &query, "/v2/_catalog");
    let body = Json(Catalog {
        repositories: page.items,
    });
    Ok(match page.link {
        Some(link) => (StatusCode::OK, [(header::LINK.as_str(), link)], body).into_response(),
        None => (StatusCode::OK, body).into_response(),
    })
}
