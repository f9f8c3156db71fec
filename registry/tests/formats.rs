//! Integration tests for the npm, NuGet, Maven, PyPI and generic adapters

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http_body_util::BodyExt;
use registry::RegistryBuilder;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write as _;
use storage::MemoryStorage;
use tower::ServiceExt;

fn test_registry() -> axum::Router {
    RegistryBuilder::new()
        .storage(MemoryStorage::new().into())
        .realm("http://localhost")
        .build()
}

fn basic() -> String {
    format!("Basic {}", BASE64.encode("tester:secret"))
}

fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, basic())
        .body(body)
        .unwrap()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---- generic ----

#[tokio::test]
async fn generic_roundtrip_and_prune() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/generic/tool/1.0.0/tool.bin",
            Body::from("binary payload"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // same coordinate again is a conflict
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/generic/tool/1.0.0/tool.bin",
            Body::from("other payload"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/generic/tool/1.0.0/tool.bin",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"binary payload");

    // deleting the only file removes the version too
    let response = app
        .clone()
        .oneshot(request(
            "DELETE",
            "/tester/generic/tool/1.0.0/tool.bin",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/generic/tool/1.0.0/tool.bin",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generic_requires_credentials_for_writes() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/tester/generic/tool/1.0.0/tool.bin")
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---- npm ----

fn npm_publish_body(name: &str, version: &str, tarball: &[u8]) -> Vec<u8> {
    let filename = format!("{}-{}.tgz", name.replace('/', "-"), version);
    serde_json::to_vec(&json!({
        "name": name,
        "dist-tags": { "latest": version },
        "versions": {
            version: { "name": name, "version": version, "description": "a test package" },
        },
        "_attachments": {
            filename: { "data": BASE64.encode(tarball), "content_type": "application/octet-stream" },
        },
    }))
    .unwrap()
}

#[tokio::test]
async fn npm_publish_and_install_flow() {
    let app = test_registry();
    let tarball = b"fake tarball bytes";

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/npm/left-pad",
            Body::from(npm_publish_body("left-pad", "1.3.0", tarball)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // duplicate version is rejected
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/npm/left-pad",
            Body::from(npm_publish_body("left-pad", "1.3.0", tarball)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // metadata document drives installs
    let response = app
        .clone()
        .oneshot(request("GET", "/tester/npm/left-pad", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dist-tags"]["latest"], "1.3.0");
    let dist = &body["versions"]["1.3.0"]["dist"];
    assert_eq!(
        dist["shasum"].as_str().unwrap(),
        hex::encode(sha1::Sha1::digest(tarball))
    );
    assert_eq!(
        dist["tarball"],
        "http://localhost/tester/npm/left-pad/-/left-pad-1.3.0.tgz"
    );

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/npm/left-pad/-/left-pad-1.3.0.tgz",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, tarball);
}

#[tokio::test]
async fn npm_dist_tag_management() {
    let app = test_registry();
    for version in ["1.0.0", "2.0.0"] {
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/tester/npm/pkg",
                Body::from(npm_publish_body("pkg", version, b"bytes")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    // retarget "beta" to the older version
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/npm/-/package/pkg/dist-tags/beta",
            Body::from("\"1.0.0\""),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // a semver-looking tag is rejected
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/npm/-/package/pkg/dist-tags/3.0.0",
            Body::from("\"1.0.0\""),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/npm/-/package/pkg/dist-tags",
            Body::empty(),
        ))
        .await
        .unwrap();
    let tags = body_json(response).await;
    assert_eq!(tags["latest"], "2.0.0");
    assert_eq!(tags["beta"], "1.0.0");

    let response = app
        .clone()
        .oneshot(request(
            "DELETE",
            "/tester/npm/-/package/pkg/dist-tags/beta",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/npm/-/package/pkg/dist-tags",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert!(body_json(response).await.get("beta").is_none());
}

// ---- NuGet ----

fn nupkg(id: &str, version: &str) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        writer
            .start_file(format!("{id}.nuspec"), zip::write::FileOptions::default())
            .unwrap();
        write!(
            writer,
            "<?xml version=\"1.0\"?><package><metadata><id>{id}</id>\
             <version>{version}</version><description>test package</description>\
             </metadata></package>"
        )
        .unwrap();
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn multipart_file(field: &str, filename: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "registrytestboundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

fn multipart_fields(fields: &[(&str, &str)], file: (&str, &str, &[u8])) -> (String, Vec<u8>) {
    let boundary = "registrytestboundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    let (name, filename, content) = file;
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

async fn nuget_push(app: &axum::Router, data: Vec<u8>) -> Response<Body> {
    let (content_type, body) = multipart_file("package", "package.nupkg", &data);
    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/tester/nuget/")
                .header(header::AUTHORIZATION, basic())
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn nuget_push_query_and_download() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(request("GET", "/tester/nuget/index.json", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let index = body_json(response).await;
    assert!(
        index["resources"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["@type"] == "PackageBaseAddress/3.0.0")
    );

    let data = nupkg("My.Library", "1.2.3");
    let response = nuget_push(&app, data.clone()).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // duplicate version is rejected
    let response = nuget_push(&app, data.clone()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(request("GET", "/tester/nuget/query?q=library", Body::empty()))
        .await
        .unwrap();
    let results = body_json(response).await;
    assert_eq!(results["totalHits"], 1);
    assert_eq!(results["data"][0]["id"], "my.library");
    assert_eq!(results["data"][0]["description"], "test package");

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/nuget/registration/My.Library/index.json",
            Body::empty(),
        ))
        .await
        .unwrap();
    let registration = body_json(response).await;
    assert_eq!(registration["items"][0]["items"][0]["catalogEntry"]["version"], "1.2.3");

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/nuget/package/my.library/1.2.3/my.library.1.2.3.nupkg",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, data);

    let response = app
        .clone()
        .oneshot(request(
            "DELETE",
            "/tester/nuget/my.library/1.2.3",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

// ---- Maven ----

#[tokio::test]
async fn maven_artifacts_checksums_and_metadata() {
    let app = test_registry();
    let jar = b"jar bytes";

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/maven/com/example/app/1.0.0/app-1.0.0.jar",
            Body::from(&jar[..]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // matching checksum upload verifies and is discarded
    let sha1 = hex::encode(sha1::Sha1::digest(jar));
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/maven/com/example/app/1.0.0/app-1.0.0.jar.sha1",
            Body::from(sha1.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // mismatching checksum is an error
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/maven/com/example/app/1.0.0/app-1.0.0.jar.sha1",
            Body::from("deadbeef"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // pom contributes the description
    let pom = "<project><description>demo app</description></project>";
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/tester/maven/com/example/app/1.0.0/app-1.0.0.pom",
            Body::from(pom),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // derived checksum download
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/maven/com/example/app/1.0.0/app-1.0.0.jar.sha1",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, sha1.as_bytes());

    // generated metadata lists the version
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/maven/com/example/app/maven-metadata.xml",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains("<version>1.0.0</version>"));
    assert!(xml.contains("<latest>1.0.0</latest>"));

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/maven/com/example/app/1.0.0/app-1.0.0.jar",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await, jar);
}

#[tokio::test]
async fn maven_latest_orders_versions_numerically() {
    let app = test_registry();

    for version in ["1.9.0", "1.10.0", "1.2.0"] {
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/tester/maven/com/example/app/{version}/app-{version}.jar"),
                Body::from(format!("jar {version}")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/maven/com/example/app/maven-metadata.xml",
            Body::empty(),
        ))
        .await
        .unwrap();
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.contains("<latest>1.10.0</latest>"));
    assert!(xml.contains(
        "<version>1.2.0</version><version>1.9.0</version><version>1.10.0</version>"
    ));
}

// ---- PyPI ----

#[tokio::test]
async fn pypi_upload_and_simple_index() {
    let app = test_registry();
    let wheel = b"wheel bytes";
    let sha256 = hex::encode(Sha256::digest(wheel));

    let (content_type, body) = multipart_fields(
        &[
            ("name", "My_Package"),
            ("version", "1.0.0"),
            ("sha256_digest", &sha256),
        ],
        ("content", "my_package-1.0.0-py3-none-any.whl", wheel),
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tester/pypi/")
                .header(header::AUTHORIZATION, basic())
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // normalized name resolves the simple index
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/pypi/simple/my-package/",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains(&format!("#sha256={sha256}")));
    assert!(html.contains("my_package-1.0.0-py3-none-any.whl"));

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            "/tester/pypi/files/my-package/1.0.0/my_package-1.0.0-py3-none-any.whl",
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, wheel);
}

#[tokio::test]
async fn pypi_digest_mismatch_stores_nothing() {
    let app = test_registry();
    let wheel = b"wheel bytes";
    let wrong = hex::encode(Sha256::digest(b"different bytes"));

    let (content_type, body) = multipart_fields(
        &[
            ("name", "pkg"),
            ("version", "1.0.0"),
            ("sha256_digest", &wrong),
        ],
        ("content", "pkg-1.0.0.tar.gz", wheel),
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tester/pypi/")
                .header(header::AUTHORIZATION, basic())
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // nothing was recorded
    let response = app
        .clone()
        .oneshot(request("GET", "/tester/pypi/simple/pkg/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
