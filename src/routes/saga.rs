// Indexing a document spans two stores: the blob is committed first, then the
// catalog record is created. The saga tracks the compensation needed when the
// second step fails. Compensation runs explicitly; nothing happens on drop.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::HeaderMap,
    Json,
};
use blob_store::BlobStorage;
use data_model::{CatalogDocument, DocumentDescriptor, IndexingState, UploadedBlob};
use metrics::Timer;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    upload::{descriptor_defaults, receive_upload, UploadForm},
    RouteState,
};
use crate::{
    catalog::{CatalogError, MetadataCatalog},
    config::CatalogFailurePolicy,
    http_objects::{ApiResponse, DocumentAPIError},
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum CompensationAction {
    DeleteBlob { storage_name: String },
}

pub struct IndexDocumentSaga {
    compensation_actions: Vec<CompensationAction>,
    state: IndexingState,
    blob_storage: Arc<BlobStorage>,
    catalog: Arc<dyn MetadataCatalog>,
    request_id: String,
}

impl IndexDocumentSaga {
    /// Starts the saga for a blob that has already been committed.
    pub fn new(
        blob_storage: Arc<BlobStorage>,
        catalog: Arc<dyn MetadataCatalog>,
        blob: &UploadedBlob,
    ) -> Self {
        Self {
            compensation_actions: vec![CompensationAction::DeleteBlob {
                storage_name: blob.storage_name.clone(),
            }],
            state: IndexingState::BlobWritten,
            blob_storage,
            catalog,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn state(&self) -> IndexingState {
        self.state
    }

    fn transition(&mut self, next: IndexingState) {
        if !self.state.can_transition_to(next) {
            error!(
                request_id = %self.request_id,
                from = %self.state,
                to = %next,
                "illegal indexing transition"
            );
            return;
        }
        info!(request_id = %self.request_id, from = %self.state, to = %next, "indexing transition");
        self.state = next;
    }

    pub async fn index(
        &mut self,
        descriptor: &DocumentDescriptor,
    ) -> Result<CatalogDocument, CatalogError> {
        self.transition(IndexingState::CatalogPending);
        match self.catalog.create(descriptor).await {
            Ok(document) => {
                self.transition(IndexingState::Indexed);
                Ok(document)
            }
            Err(err) => {
                warn!(request_id = %self.request_id, %err, "catalog create failed");
                self.transition(IndexingState::Failed);
                Err(err)
            }
        }
    }

    pub async fn compensate(&mut self) {
        if self.compensation_actions.is_empty() {
            return;
        }
        info!(
            "Running {} compensation action(s) for request {}",
            self.compensation_actions.len(),
            self.request_id
        );
        for action in self.compensation_actions.iter().rev() {
            match action {
                CompensationAction::DeleteBlob { storage_name } => {
                    match self.blob_storage.delete(storage_name).await {
                        Ok(_) => info!(%storage_name, "removed orphan blob"),
                        Err(err) => {
                            error!(%storage_name, ?err, "failed to remove orphan blob")
                        }
                    }
                }
            }
        }
        self.compensation_actions.clear();
    }

    pub fn commit(mut self) {
        info!("Committing saga for {}", self.request_id);
        self.compensation_actions.clear();
    }
}

/// Upload a document and index it in the metadata catalog
#[utoipa::path(
    post,
    path = "/api/documents",
    tag = "documents",
    request_body(content_type = "multipart/form-data", content = inline(UploadForm)),
    responses(
        (status = 200, description = "Document stored and indexed", body = ApiResponse<CatalogDocument>),
        (status = BAD_REQUEST, description = "No file, bad file name or disallowed type"),
        (status = PAYLOAD_TOO_LARGE, description = "File above the size limit"),
        (status = BAD_GATEWAY, description = "Catalog refused the record"),
        (status = SERVICE_UNAVAILABLE, description = "No catalog configured")
    ),
)]
pub async fn create_document(
    State(state): State<RouteState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<CatalogDocument>>, DocumentAPIError> {
    let catalog = state.catalog()?.clone();
    let _timer = Timer::start(&state.metrics.upload_latency);
    let upload = receive_upload(&state, multipart).await?;
    let url = state.document_url(&headers, &upload.blob.storage_name);
    let descriptor = DocumentDescriptor::from_upload(
        &upload.blob,
        url,
        &upload.metadata,
        &descriptor_defaults(&state),
    );

    let mut saga = IndexDocumentSaga::new(state.blob_storage.clone(), catalog, &upload.blob);
    match saga.index(&descriptor).await {
        Ok(document) => {
            saga.commit();
            Ok(Json(ApiResponse::with_message("document indexed", document)))
        }
        Err(err) => {
            state.metrics.catalog_failures.add(1, &[]);
            match state.config.on_catalog_failure {
                CatalogFailurePolicy::Compensate => {
                    saga.compensate().await;
                    Err(DocumentAPIError::upstream_catalog(&format!(
                        "document not indexed, upload rolled back: {}",
                        err
                    )))
                }
                CatalogFailurePolicy::Keep => {
                    saga.commit();
                    Err(
                        DocumentAPIError::upstream_catalog("document uploaded but not indexed")
                            .with_descriptor(descriptor),
                    )
                }
            }
        }
    }
}
