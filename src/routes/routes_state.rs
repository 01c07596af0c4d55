use std::sync::Arc;

use axum::http::{header, HeaderMap};
use blob_store::BlobStorage;
use metrics::api_io_stats;

use crate::{catalog::MetadataCatalog, config::ServerConfig, http_objects::DocumentAPIError};

#[derive(Clone)]
pub struct RouteState {
    pub config: Arc<ServerConfig>,
    pub blob_storage: Arc<BlobStorage>,
    pub catalog: Option<Arc<dyn MetadataCatalog>>,
    pub metrics: Arc<api_io_stats::Metrics>,
}

impl RouteState {
    pub fn catalog(&self) -> Result<&Arc<dyn MetadataCatalog>, DocumentAPIError> {
        self.catalog
            .as_ref()
            .ok_or_else(DocumentAPIError::catalog_unavailable)
    }

    /// Scheme and host that document URLs are built on. The configured base
    /// wins; otherwise it is taken from the request as the client sees it.
    pub fn public_base(&self, headers: &HeaderMap) -> String {
        if let Some(base) = self.config.public_base_url() {
            return base;
        }
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("http");
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        format!("{}://{}", proto, host)
    }

    pub fn document_url(&self, headers: &HeaderMap, storage_name: &str) -> String {
        self.blob_storage
            .public_url(&self.public_base(headers), storage_name)
    }
}
