use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use data_model::{CatalogDocument, DocumentDescriptor, DocumentId, OwnerId};

use crate::config::{CatalogConfig, CatalogKind};

mod http;
mod memory;

pub use http::HttpMetadataCatalog;
pub use memory::InMemoryMetadataCatalog;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog answered with a non-success status.
    #[error("metadata catalog returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The catalog could not be reached or its response could not be read.
    #[error("metadata catalog unreachable: {0}")]
    Transport(String),
    /// An owner or record id that cannot be sent as a single path segment.
    #[error("invalid catalog identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// Outcome of removing a catalog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    /// The record was removed and the catalog returned it.
    Removed(CatalogDocument),
    /// The catalog confirmed the removal without returning the record, so
    /// the stored file it named is unknown.
    RemovedUnreported,
    NotFound,
}

/// Store of document records, queried by owner.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    async fn create(&self, descriptor: &DocumentDescriptor) -> Result<CatalogDocument, CatalogError>;

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<CatalogDocument>, CatalogError>;

    async fn search(
        &self,
        owner: &OwnerId,
        term: &str,
    ) -> Result<Vec<CatalogDocument>, CatalogError>;

    async fn count(&self, owner: &OwnerId) -> Result<u64, CatalogError>;

    async fn delete(&self, id: &DocumentId) -> Result<Deletion, CatalogError>;
}

pub fn from_config(config: &CatalogConfig) -> Result<Arc<dyn MetadataCatalog>> {
    match config.kind {
        CatalogKind::Memory => Ok(Arc::new(InMemoryMetadataCatalog::new())),
        CatalogKind::Http => {
            let base_url = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("http catalog requires base_url"))?;
            let catalog = HttpMetadataCatalog::builder(base_url.as_str())
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?;
            Ok(Arc::new(catalog))
        }
    }
}
