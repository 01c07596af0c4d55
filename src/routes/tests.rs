use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use crate::{
    catalog::{InMemoryMetadataCatalog, MetadataCatalog},
    config::{
        CatalogConfig,
        CatalogFailurePolicy,
        CatalogKind,
        ListingMode,
        Profile,
        ServerConfig,
        TypePolicy,
        MAX_FILE_SIZE_BYTES,
    },
    testing::{
        json_request,
        multipart_request,
        request,
        Part,
        RefusingCatalog,
        TestService,
        UnreportedDeleteCatalog,
        TEST_HOST,
    },
};

const PDF: &str = "application/pdf";

async fn send(router: &Router, req: Request<Body>) -> Response {
    router.clone().oneshot(req).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn upload(router: &Router, parts: &[Part<'_>]) -> (StatusCode, Value) {
    let response = send(router, multipart_request("/api/upload-document", parts)).await;
    let status = response.status();
    (status, json_body(response).await)
}

fn memory_catalog() -> Option<Arc<dyn MetadataCatalog>> {
    Some(Arc::new(InMemoryMetadataCatalog::new()))
}

fn catalog_mode(cfg: &mut ServerConfig) {
    cfg.listing_mode = ListingMode::Catalog;
    cfg.catalog = Some(CatalogConfig {
        kind: CatalogKind::Memory,
        base_url: None,
        timeout_secs: 10,
    });
}

#[tokio::test]
async fn test_report_upload_round_trip() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();
    let content: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    let (status, body) = upload(
        &router,
        &[
            Part::text("title", "Q1 Report"),
            Part::text("category", "report"),
            Part::text("userId", "42"),
            Part::file("report.pdf", PDF, &content),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let data = &body["data"];
    assert_eq!(data["name"], json!("Q1 Report"));
    assert_eq!(data["type"], json!("PDF"));
    assert_eq!(data["category"], json!("report"));
    assert_eq!(data["userId"], json!(42));
    assert_eq!(data["description"], json!(""));
    assert_eq!(data["originalName"], json!("report.pdf"));
    assert_eq!(data["size"], json!(2 * 1024 * 1024));
    assert!(data["uploadDate"].as_str().unwrap().ends_with('Z'));

    let filename = data["filename"].as_str().unwrap();
    assert!(filename.starts_with("report-"));
    assert!(filename.ends_with(".pdf"));
    let middle = &filename["report-".len()..filename.len() - ".pdf".len()];
    let (millis, random) = middle.split_once('-').unwrap();
    assert!(millis.parse::<u64>().is_ok());
    assert!(random.parse::<u64>().unwrap() <= 1_000_000_000);
    assert_eq!(
        data["url"],
        json!(format!("http://{}/documents/{}", TEST_HOST, filename))
    );

    let response = send(&router, request("GET", &format!("/documents/{}", filename))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let served = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(served.as_ref(), content.as_slice());

    assert_eq!(test_srv.files_on_disk().await?, vec![filename.to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_descriptor_defaults_and_trailing_fields() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    let docx = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
    let (status, body) = upload(&router, &[Part::file("notes.docx", docx, b"docx")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], json!("notes.docx"));
    assert_eq!(body["data"]["category"], json!("Autre"));
    assert_eq!(body["data"]["userId"], json!(1));
    assert_eq!(body["data"]["type"], json!("DOCX"));

    // Text fields sent after the file still apply.
    let (status, body) = upload(
        &router,
        &[
            Part::file("scan.png", "image/png", b"png"),
            Part::text("title", "Scan"),
            Part::text("description", "front page"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], json!("Scan"));
    assert_eq!(body["data"]["description"], json!("front page"));
    Ok(())
}

#[tokio::test]
async fn test_forwarded_proto_and_configured_base() -> Result<()> {
    let test_srv = TestService::new().await?;
    let mut req = multipart_request("/api/upload-document", &[Part::file("a.pdf", PDF, b"a")]);
    req.headers_mut()
        .insert("x-forwarded-proto", "https".parse().unwrap());
    let body = json_body(send(&test_srv.router(), req).await).await;
    assert!(body["data"]["url"]
        .as_str()
        .unwrap()
        .starts_with(&format!("https://{}/documents/a-", TEST_HOST)));

    let configured = TestService::with_config(
        |cfg| cfg.public_base_url = Some("https://files.example.com/".to_string()),
        None,
    )
    .await?;
    let (_, body) = upload(&configured.router(), &[Part::file("a.pdf", PDF, b"a")]).await;
    assert!(body["data"]["url"]
        .as_str()
        .unwrap()
        .starts_with("https://files.example.com/documents/a-"));
    Ok(())
}

#[tokio::test]
async fn test_size_limit_is_inclusive() -> Result<()> {
    let test_srv =
        TestService::with_config(|cfg| cfg.upload.max_file_size_bytes = 1024, None).await?;
    let router = test_srv.router();

    let exact = vec![7u8; 1024];
    let (status, body) = upload(&router, &[Part::file("exact.pdf", PDF, &exact)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["size"], json!(1024));

    let over = vec![7u8; 1025];
    let (status, body) = upload(&router, &[Part::file("over.pdf", PDF, &over)]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["kind"], json!("payload_too_large"));

    let files = test_srv.files_on_disk().await?;
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("exact-"));
    Ok(())
}

#[tokio::test]
async fn test_oversized_upload_writes_nothing() -> Result<()> {
    let test_srv = TestService::new().await?;
    let content = vec![0u8; MAX_FILE_SIZE_BYTES as usize + 1];
    let (status, _) = upload(&test_srv.router(), &[Part::file("big.pdf", PDF, &content)]).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(test_srv.files_on_disk().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_strict_type_policy() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    let (status, body) = upload(&router, &[Part::file("notes.txt", "text/plain", b"hi")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], json!("validation"));
    assert!(test_srv.files_on_disk().await?.is_empty());

    for (name, mime) in [
        ("a.pdf", PDF),
        ("b.xls", "application/vnd.ms-excel"),
        ("c.jpg", "image/jpeg"),
        ("d.gif", "image/gif"),
    ] {
        let (status, _) = upload(&router, &[Part::file(name, mime, b"x")]).await;
        assert_eq!(status, StatusCode::OK, "{}", mime);
    }
    assert_eq!(test_srv.files_on_disk().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_upload_validation_errors() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    let (status, body) = upload(&router, &[Part::text("title", "nothing attached")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"success": false, "message": "no file provided", "kind": "validation"})
    );

    let (status, body) = upload(&router, &[Part::text("file", "report.pdf")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], json!("no file provided"));

    let (status, _) = upload(&router, &[Part::file("..", PDF, b"x")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = upload(
        &router,
        &[
            Part::file("one.pdf", PDF, b"1"),
            Part::file("two.pdf", PDF, b"2"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = send(
        &router,
        json_request("POST", "/api/upload-document", &json!({"file": "x"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(test_srv.files_on_disk().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_local_profile() -> Result<()> {
    let test_srv = TestService::with_config(|cfg| cfg.profile = Profile::Local, None).await?;
    let router = test_srv.router();

    let response = send(
        &router,
        multipart_request(
            "/api/local-upload",
            &[Part::file("script.sh", "application/x-sh", b"#!/bin/sh\n")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let data = &body["data"];
    let filename = data["filename"].as_str().unwrap();
    assert_eq!(
        data["localUrl"],
        json!(format!("http://localhost:3001/documents/{}", filename))
    );
    assert_eq!(data["originalName"], json!("script.sh"));
    assert_eq!(data["size"], json!(10));
    assert_eq!(data["type"], json!("SH"));

    let response = send(&router, request("GET", &format!("/documents/{}", filename))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &router,
        multipart_request("/api/upload-document", &[Part::file("a.pdf", PDF, b"a")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_delete_by_filename() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    let response = send(&router, request("DELETE", "/api/documents/missing-1-2.pdf")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&router, request("DELETE", "/api/documents/..")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (_, body) = upload(&router, &[Part::file("a.pdf", PDF, b"a")]).await;
    let filename = body["data"]["filename"].as_str().unwrap().to_string();
    let uri = format!("/api/documents/{}", filename);

    let response = send(&router, request("DELETE", &uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"success": true, "message": "document deleted"})
    );
    let response = send(&router, request("DELETE", &uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&router, request("GET", &format!("/documents/{}", filename))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_dotfile_upload_stays_addressable() -> Result<()> {
    let test_srv = TestService::with_config(
        |cfg| cfg.upload.type_policy = Some(TypePolicy::Permissive),
        None,
    )
    .await?;
    let router = test_srv.router();

    let (status, body) = upload(
        &router,
        &[Part::file(".env", "text/plain", b"SECRET=1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let filename = body["data"]["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with(".env-"), "{}", filename);
    assert_eq!(body["data"]["type"], json!(""));

    let response = send(&router, request("GET", &format!("/documents/{}", filename))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/api/documents/{}", filename);
    let response = send(&router, request("DELETE", &uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(test_srv.files_on_disk().await?.is_empty());
    let response = send(&router, request("DELETE", &uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_directory_listing_reports_requested_owner() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    let response = send(&router, request("GET", "/api/documents/7")).await;
    assert_eq!(json_body(response).await, json!({"success": true, "data": []}));

    upload(&router, &[Part::file("a.pdf", PDF, b"aa")]).await;
    upload(&router, &[Part::file("b.png", "image/png", b"bbb")]).await;

    let response = send(&router, request("GET", "/api/documents/7")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let docs = body["data"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    for doc in docs {
        assert_eq!(doc["userId"], json!(7));
        assert_eq!(doc["category"], json!("Autre"));
        assert_eq!(doc["id"], doc["name"]);
        let name = doc["name"].as_str().unwrap();
        assert_eq!(
            doc["url"],
            json!(format!("http://{}/documents/{}", TEST_HOST, name))
        );
    }
    let types: HashSet<_> = docs.iter().map(|d| d["type"].clone()).collect();
    assert_eq!(types, HashSet::from([json!("PDF"), json!("PNG")]));
    Ok(())
}

#[tokio::test]
async fn test_catalog_routes_require_catalog() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    for (method, uri) in [
        ("GET", "/api/documents/1/search?term=a"),
        ("GET", "/api/documents/1/count"),
        ("DELETE", "/api/documents/by-id/1"),
    ] {
        let response = send(&router, request(method, uri)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        assert_eq!(json_body(response).await["kind"], json!("catalog_unavailable"));
    }

    let response = send(
        &router,
        multipart_request("/api/documents", &[Part::file("a.pdf", PDF, b"a")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(test_srv.files_on_disk().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_catalog_listing_search_count_and_delete() -> Result<()> {
    let test_srv = TestService::with_config(catalog_mode, memory_catalog()).await?;
    let router = test_srv.router();

    for (owner, name) in [("1", "Quarterly Report"), ("1", "Invoice"), ("2", "Report copy")] {
        let response = send(
            &router,
            multipart_request(
                "/api/documents",
                &[
                    Part::text("userId", owner),
                    Part::text("title", name),
                    Part::file("doc.pdf", PDF, name.as_bytes()),
                ],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["name"], json!(name));
        assert!(body["data"]["id"].is_number());
    }

    let body = json_body(send(&router, request("GET", "/api/documents/1")).await).await;
    let docs = body["data"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d["userId"] == json!(1)));

    let body =
        json_body(send(&router, request("GET", "/api/documents/1/search?term=report")).await)
            .await;
    let found = body["data"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], json!("Quarterly Report"));

    let body = json_body(send(&router, request("GET", "/api/documents/2/count")).await).await;
    assert_eq!(body, json!({"success": true, "data": 1}));

    let id = docs[0]["id"].as_i64().unwrap();
    let filename = docs[0]["filename"].as_str().unwrap().to_string();
    assert!(test_srv.files_on_disk().await?.contains(&filename));

    let uri = format!("/api/documents/by-id/{}", id);
    let response = send(&router, request("DELETE", &uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!test_srv.files_on_disk().await?.contains(&filename));
    let response = send(&router, request("DELETE", &uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(send(&router, request("GET", "/api/documents/1/count")).await).await;
    assert_eq!(body["data"], json!(1));
    Ok(())
}

#[tokio::test]
async fn test_delete_by_id_without_echoed_record() -> Result<()> {
    let test_srv =
        TestService::with_config(|_| {}, Some(Arc::new(UnreportedDeleteCatalog))).await?;
    let router = test_srv.router();
    let (_, body) = upload(&router, &[Part::file("a.pdf", PDF, b"a")]).await;
    let filename = body["data"]["filename"].as_str().unwrap().to_string();

    let response = send(&router, request("DELETE", "/api/documents/by-id/1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "success": true,
            "message": "document record deleted, stored file unknown and may be orphaned"
        })
    );
    assert_eq!(test_srv.files_on_disk().await?, vec![filename]);
    Ok(())
}

#[tokio::test]
async fn test_failed_indexing_rolls_back_blob() -> Result<()> {
    let test_srv = TestService::with_config(|_| {}, Some(Arc::new(RefusingCatalog))).await?;
    let response = send(
        &test_srv.router(),
        multipart_request("/api/documents", &[Part::file("a.pdf", PDF, b"a")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["kind"], json!("upstream_catalog"));
    assert!(body.get("data").is_none());
    assert!(test_srv.files_on_disk().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_indexing_keeps_blob_when_configured() -> Result<()> {
    let test_srv = TestService::with_config(
        |cfg| cfg.on_catalog_failure = CatalogFailurePolicy::Keep,
        Some(Arc::new(RefusingCatalog)),
    )
    .await?;
    let response = send(
        &test_srv.router(),
        multipart_request("/api/documents", &[Part::file("a.pdf", PDF, b"a")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["message"], json!("document uploaded but not indexed"));
    let filename = body["data"]["filename"].as_str().unwrap().to_string();
    assert_eq!(test_srv.files_on_disk().await?, vec![filename]);
    Ok(())
}

#[tokio::test]
async fn test_index_uploaded_descriptor() -> Result<()> {
    let catalog = Arc::new(InMemoryMetadataCatalog::new());
    let test_srv = TestService::with_config(catalog_mode, Some(catalog.clone())).await?;
    let router = test_srv.router();

    let (_, body) = upload(
        &router,
        &[Part::text("userId", "5"), Part::file("a.pdf", PDF, b"a")],
    )
    .await;
    let descriptor = body["data"].clone();

    let response = send(
        &router,
        json_request("POST", "/api/documents/index", &descriptor),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["filename"], descriptor["filename"]);
    assert_eq!(
        catalog
            .count(&data_model::Identifier::Numeric(5))
            .await?,
        1
    );

    let mut unknown = descriptor.clone();
    unknown["filename"] = json!("never-uploaded-1-2.pdf");
    let response = send(&router, json_request("POST", "/api/documents/index", &unknown)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_liveness_and_openapi() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();

    let response = send(&router, request("GET", "/api/test")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"message": "document server running"})
    );

    let response = send(&router, request("GET", "/docs/openapi.json")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert!(doc["paths"]["/api/upload-document"].is_object());
    assert!(doc["paths"]["/api/documents/by-id/{id}"].is_object());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_same_name_uploads_get_distinct_names() -> Result<()> {
    const UPLOADS: usize = 1000;
    let test_srv = TestService::new().await?;
    let router = test_srv.router();
    // Bounded so the test stays under the open file limit.
    let permits = Arc::new(Semaphore::new(128));

    let mut handles = Vec::with_capacity(UPLOADS);
    for i in 0..UPLOADS {
        let router = router.clone();
        let permits = permits.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.unwrap();
            let content = format!("copy {}", i);
            let req = multipart_request(
                "/api/upload-document",
                &[Part::file("same.pdf", PDF, content.as_bytes())],
            );
            let response = router.oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            body["data"]["filename"].as_str().unwrap().to_string()
        }));
    }

    let mut names = HashSet::new();
    for handle in handles {
        names.insert(handle.await?);
    }
    assert_eq!(names.len(), UPLOADS);
    let on_disk: HashSet<_> = test_srv.files_on_disk().await?.into_iter().collect();
    assert_eq!(on_disk, names);
    Ok(())
}

#[tokio::test]
async fn test_root_recreated_between_uploads() -> Result<()> {
    let test_srv = TestService::new().await?;
    let router = test_srv.router();
    upload(&router, &[Part::file("a.pdf", PDF, b"a")]).await;
    tokio::fs::remove_dir_all(test_srv.service.blob_storage.root()).await?;

    let body = json_body(send(&router, request("GET", "/api/documents/1")).await).await;
    assert_eq!(body["data"], json!([]));

    let (status, _) = upload(&router, &[Part::file("b.pdf", PDF, b"b")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(test_srv.files_on_disk().await?.len(), 1);

    let response = send(
        &router,
        Request::builder()
            .method("GET")
            .uri("/api/test")
            .header(header::ORIGIN, "http://app.example.com")
            .body(Body::empty())?,
    )
    .await;
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    Ok(())
}
