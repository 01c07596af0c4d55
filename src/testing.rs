use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request},
    Router,
};
use blob_store::BlobStorageConfig;
use data_model::{CatalogDocument, DocumentDescriptor, DocumentId, OwnerId};
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    catalog::{CatalogError, Deletion, MetadataCatalog},
    config::ServerConfig,
    service::Service,
};

pub const TEST_HOST: &str = "docs.test:5000";
const BOUNDARY: &str = "docvault-test-boundary";

pub struct TestService {
    pub service: Service,
    // Removed with the service.
    pub temp_dir: TempDir,
}

impl TestService {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}, None).await
    }

    pub async fn with_config(
        customize: impl FnOnce(&mut ServerConfig),
        catalog: Option<Arc<dyn MetadataCatalog>>,
    ) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;
        let mut cfg = ServerConfig {
            blob_storage: BlobStorageConfig::new(
                temp_dir.path().join("documents").to_str().unwrap(),
            ),
            ..Default::default()
        };
        customize(&mut cfg);
        let service = Service::new_with_catalog(cfg, catalog)?;

        Ok(Self { service, temp_dir })
    }

    pub fn router(&self) -> Router {
        self.service.router()
    }

    /// Names of every file in the blob root, staging files included.
    pub async fn files_on_disk(&self) -> Result<Vec<String>> {
        let root = self.service.blob_storage.root();
        let mut names = Vec::new();
        if !root.exists() {
            return Ok(names);
        }
        let mut dir = tokio::fs::read_dir(root).await?;
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }
}

/// One part of a hand-built `multipart/form-data` body.
pub enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        content_type: Option<&'a str>,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

impl<'a> Part<'a> {
    pub fn file(filename: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Part::File {
            name: "file",
            filename,
            content_type: Some(content_type),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Part::Text { name, value }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                if let Some(content_type) = content_type {
                    body.extend_from_slice(
                        format!("Content-Type: {}\r\n", content_type).as_bytes(),
                    );
                }
                body.extend_from_slice(b"\r\n");
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, TEST_HOST)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, TEST_HOST)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, TEST_HOST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A catalog that refuses every write.
pub struct RefusingCatalog;

#[async_trait]
impl MetadataCatalog for RefusingCatalog {
    async fn create(&self, _: &DocumentDescriptor) -> Result<CatalogDocument, CatalogError> {
        Err(CatalogError::Status {
            status: 503,
            message: "catalog is read-only".to_string(),
        })
    }

    async fn list_by_owner(&self, _: &OwnerId) -> Result<Vec<CatalogDocument>, CatalogError> {
        Ok(vec![])
    }

    async fn search(&self, _: &OwnerId, _: &str) -> Result<Vec<CatalogDocument>, CatalogError> {
        Ok(vec![])
    }

    async fn count(&self, _: &OwnerId) -> Result<u64, CatalogError> {
        Ok(0)
    }

    async fn delete(&self, _: &DocumentId) -> Result<Deletion, CatalogError> {
        Ok(Deletion::NotFound)
    }
}

/// A catalog that confirms every delete without returning the record.
pub struct UnreportedDeleteCatalog;

#[async_trait]
impl MetadataCatalog for UnreportedDeleteCatalog {
    async fn create(&self, descriptor: &DocumentDescriptor) -> Result<CatalogDocument, CatalogError> {
        Ok(CatalogDocument {
            id: DocumentId::Numeric(1),
            descriptor: descriptor.clone(),
        })
    }

    async fn list_by_owner(&self, _: &OwnerId) -> Result<Vec<CatalogDocument>, CatalogError> {
        Ok(vec![])
    }

    async fn search(&self, _: &OwnerId, _: &str) -> Result<Vec<CatalogDocument>, CatalogError> {
        Ok(vec![])
    }

    async fn count(&self, _: &OwnerId) -> Result<u64, CatalogError> {
        Ok(0)
    }

    async fn delete(&self, _: &DocumentId) -> Result<Deletion, CatalogError> {
        Ok(Deletion::RemovedUnreported)
    }
}
