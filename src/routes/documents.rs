use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use blob_store::naming::{is_safe_storage_name, SplitName};
use data_model::{CatalogDocument, DocumentDescriptor, Identifier, ListedDocument, OwnerId};
use tracing::{error, info, warn};

use super::RouteState;
use crate::{
    catalog::Deletion,
    config::ListingMode,
    http_objects::{
        ApiResponse,
        DeleteResponse,
        DocumentAPIError,
        DocumentList,
        SearchParams,
    },
};

/// List an owner's documents
#[utoipa::path(
    get,
    path = "/api/documents/{userId}",
    tag = "documents",
    params(("userId" = String, Path, description = "Owner id")),
    responses(
        (status = 200, description = "Documents of the owner", body = ApiResponse<DocumentList>),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to list the blob store"),
        (status = BAD_GATEWAY, description = "Catalog query failed")
    ),
)]
pub async fn list_documents(
    Path(user_id): Path<String>,
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<DocumentList>>, DocumentAPIError> {
    let owner = Identifier::parse(&user_id);
    let documents = match state.config.listing_mode {
        ListingMode::Directory => {
            DocumentList::Directory(list_directory(&state, &headers, &owner).await?)
        }
        ListingMode::Catalog => {
            DocumentList::Catalog(state.catalog()?.list_by_owner(&owner).await?)
        }
    };
    info!(owner = %owner, count = documents.len(), "listed documents");
    Ok(Json(ApiResponse::ok(documents)))
}

// Every stored blob is reported as the requested owner's; the store keeps no
// ownership of its own.
async fn list_directory(
    state: &RouteState,
    headers: &HeaderMap,
    owner: &OwnerId,
) -> Result<Vec<ListedDocument>, DocumentAPIError> {
    let blobs = state
        .blob_storage
        .list()
        .await
        .map_err(|e| DocumentAPIError::storage("unable to list documents", e))?;
    let base = state.public_base(headers);
    Ok(blobs
        .into_iter()
        .map(|blob| ListedDocument {
            id: blob.storage_name.clone(),
            name: blob.storage_name.clone(),
            doc_type: SplitName::parse(&blob.storage_name)
                .map(|split| split.type_token())
                .unwrap_or_default(),
            category: state.config.upload.default_category.clone(),
            url: state.blob_storage.public_url(&base, &blob.storage_name),
            user_id: owner.clone(),
            size: blob.size_bytes,
            upload_date: blob.modified_at,
        })
        .collect())
}

/// Search an owner's documents by name
#[utoipa::path(
    get,
    path = "/api/documents/{userId}/search",
    tag = "documents",
    params(("userId" = String, Path, description = "Owner id"), SearchParams),
    responses(
        (status = 200, description = "Matching documents", body = ApiResponse<Vec<CatalogDocument>>),
        (status = BAD_GATEWAY, description = "Catalog query failed"),
        (status = SERVICE_UNAVAILABLE, description = "No catalog configured")
    ),
)]
pub async fn search_documents(
    Path(user_id): Path<String>,
    Query(params): Query<SearchParams>,
    State(state): State<RouteState>,
) -> Result<Json<ApiResponse<Vec<CatalogDocument>>>, DocumentAPIError> {
    let owner = Identifier::parse(&user_id);
    let documents = state.catalog()?.search(&owner, &params.term).await?;
    Ok(Json(ApiResponse::ok(documents)))
}

/// Count an owner's documents
#[utoipa::path(
    get,
    path = "/api/documents/{userId}/count",
    tag = "documents",
    params(("userId" = String, Path, description = "Owner id")),
    responses(
        (status = 200, description = "Number of documents", body = ApiResponse<u64>),
        (status = BAD_GATEWAY, description = "Catalog query failed"),
        (status = SERVICE_UNAVAILABLE, description = "No catalog configured")
    ),
)]
pub async fn count_documents(
    Path(user_id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<ApiResponse<u64>>, DocumentAPIError> {
    let owner = Identifier::parse(&user_id);
    let count = state.catalog()?.count(&owner).await?;
    Ok(Json(ApiResponse::ok(count)))
}

/// Delete a stored file
#[utoipa::path(
    delete,
    path = "/api/documents/{filename}",
    tag = "documents",
    params(("filename" = String, Path, description = "Storage name")),
    responses(
        (status = 200, description = "File deleted", body = DeleteResponse),
        (status = NOT_FOUND, description = "No such file"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to delete the file")
    ),
)]
pub async fn delete_document(
    Path(filename): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<DeleteResponse>, DocumentAPIError> {
    if !is_safe_storage_name(&filename) {
        return Err(DocumentAPIError::not_found("document not found"));
    }
    let deleted = state
        .blob_storage
        .delete(&filename)
        .await
        .map_err(|e| DocumentAPIError::storage("unable to delete document", e))?;
    if !deleted {
        return Err(DocumentAPIError::not_found("document not found"));
    }
    state.metrics.deletions.add(1, &[]);
    info!(%filename, "deleted document");
    Ok(Json(DeleteResponse {
        success: true,
        message: "document deleted".to_string(),
    }))
}

/// Delete a catalog record and its file
#[utoipa::path(
    delete,
    path = "/api/documents/by-id/{id}",
    tag = "documents",
    params(("id" = String, Path, description = "Catalog record id")),
    responses(
        (status = 200, description = "Record and file deleted", body = DeleteResponse),
        (status = NOT_FOUND, description = "No such record"),
        (status = INTERNAL_SERVER_ERROR, description = "Record deleted but the file could not be removed"),
        (status = BAD_GATEWAY, description = "Catalog delete failed"),
        (status = SERVICE_UNAVAILABLE, description = "No catalog configured")
    ),
)]
pub async fn delete_document_by_id(
    Path(id): Path<String>,
    State(state): State<RouteState>,
) -> Result<Json<DeleteResponse>, DocumentAPIError> {
    let catalog = state.catalog()?;
    let id = Identifier::parse(&id);
    let record = match catalog.delete(&id).await? {
        Deletion::Removed(record) => record,
        Deletion::NotFound => return Err(DocumentAPIError::not_found("document not found")),
        Deletion::RemovedUnreported => {
            warn!(%id, "catalog record deleted without naming its file, stored file may be orphaned");
            return Ok(Json(DeleteResponse {
                success: true,
                message: "document record deleted, stored file unknown and may be orphaned"
                    .to_string(),
            }));
        }
    };

    let filename = record.descriptor.filename;
    let message = if !is_safe_storage_name(&filename) {
        warn!(%id, %filename, "catalog record names an invalid file, nothing to remove");
        "document record deleted, no stored file"
    } else {
        match state.blob_storage.delete(&filename).await {
            Ok(true) => {
                state.metrics.deletions.add(1, &[]);
                "document deleted"
            }
            Ok(false) => {
                warn!(%id, %filename, "catalog record deleted but its file was already gone");
                "document record deleted, file was already absent"
            }
            Err(err) => {
                error!(%id, %filename, ?err, "catalog record deleted but file removal failed");
                return Err(DocumentAPIError::storage(
                    "document record deleted but file removal failed",
                    err,
                ));
            }
        }
    };
    Ok(Json(DeleteResponse {
        success: true,
        message: message.to_string(),
    }))
}

/// Submit a descriptor of a stored file to the catalog
#[utoipa::path(
    post,
    path = "/api/documents/index",
    tag = "documents",
    request_body = DocumentDescriptor,
    responses(
        (status = 200, description = "Record created", body = ApiResponse<CatalogDocument>),
        (status = NOT_FOUND, description = "Descriptor names no stored file"),
        (status = BAD_GATEWAY, description = "Catalog create failed"),
        (status = SERVICE_UNAVAILABLE, description = "No catalog configured")
    ),
)]
pub async fn index_document(
    State(state): State<RouteState>,
    Json(descriptor): Json<DocumentDescriptor>,
) -> Result<Json<ApiResponse<CatalogDocument>>, DocumentAPIError> {
    let catalog = state.catalog()?;
    let stored = is_safe_storage_name(&descriptor.filename) &&
        state
            .blob_storage
            .exists(&descriptor.filename)
            .await
            .map_err(DocumentAPIError::internal_error)?;
    if !stored {
        return Err(DocumentAPIError::not_found("no stored file for descriptor"));
    }
    let document = catalog.create(&descriptor).await.inspect_err(|_| {
        state.metrics.catalog_failures.add(1, &[]);
    })?;
    Ok(Json(ApiResponse::with_message("document indexed", document)))
}
