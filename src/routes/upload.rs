use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart,
        State,
    },
    http::{HeaderMap, StatusCode},
    Json,
};
use blob_store::naming::{NamingError, SplitName};
use bytes::Bytes;
use chrono::Utc;
use data_model::{
    DescriptorDefaults,
    DocumentDescriptor,
    Identifier,
    LocalUploadDescriptor,
    SubmittedMetadata,
    UploadedBlob,
};
use futures::{Stream, StreamExt};
use metrics::Timer;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::RouteState;
use crate::http_objects::{ApiResponse, DocumentAPIError};

pub const FILE_FIELD: &str = "file";

/// Raised by the byte counter wrapped around an incoming file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
}

/// Counts bytes as they pass and fails the stream once more than `limit`
/// bytes have been seen. The blob write is aborted by that error, so an
/// oversized file never reaches its storage name.
struct SizeLimited<S> {
    inner: S,
    limit: u64,
    seen: u64,
}

impl<S> SizeLimited<S> {
    fn new(inner: S, limit: u64) -> Self {
        Self {
            inner,
            limit,
            seen: 0,
        }
    }
}

impl<S> Stream for SizeLimited<S>
where
    S: Stream<Item = anyhow::Result<Bytes>> + Unpin,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.seen += chunk.len() as u64;
                if self.seen > self.limit {
                    let limit = self.limit;
                    return Poll::Ready(Some(Err(UploadError::TooLarge { limit }.into())));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// A committed file together with the text fields submitted next to it.
#[derive(Debug)]
pub struct ReceivedUpload {
    pub blob: UploadedBlob,
    pub metadata: SubmittedMetadata,
}

#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadForm {
    #[schema(format = "binary")]
    file: String,
    title: Option<String>,
    category: Option<String>,
    description: Option<String>,
    user_id: Option<String>,
}

fn multipart_error(err: &MultipartError) -> DocumentAPIError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DocumentAPIError::payload_too_large("file too large")
    } else {
        DocumentAPIError::bad_request(&err.body_text())
    }
}

// Maps a failed blob write back to the cause the client should see.
fn write_error(err: anyhow::Error) -> DocumentAPIError {
    if let Some(UploadError::TooLarge { .. }) = err.downcast_ref::<UploadError>() {
        return DocumentAPIError::payload_too_large("file too large");
    }
    if let Some(multipart) = err.downcast_ref::<MultipartError>() {
        return multipart_error(multipart);
    }
    if let Some(naming) = err.downcast_ref::<NamingError>() {
        return DocumentAPIError::bad_request(&naming.to_string());
    }
    DocumentAPIError::storage("upload failed", err)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, DocumentAPIError> {
    field.text().await.map_err(|e| multipart_error(&e))
}

/// Reads one multipart upload: exactly one `file` field, written to the blob
/// store under a fresh storage name, plus the optional `title`, `category`,
/// `description` and `userId` text fields in any order.
///
/// Nothing stays in the store when this returns an error.
pub async fn receive_upload(
    state: &RouteState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ReceivedUpload, DocumentAPIError> {
    let mut multipart =
        multipart.map_err(|rejection| DocumentAPIError::bad_request(&rejection.body_text()))?;
    let mut blob = None;
    let mut metadata = SubmittedMetadata::default();

    let result = read_fields(state, &mut multipart, &mut blob, &mut metadata).await;
    if let Err(err) = result {
        state.metrics.rejected_uploads.add(1, &[]);
        if let Some(blob) = blob {
            discard_blob(state, &blob.storage_name).await;
        }
        return Err(err);
    }

    match blob {
        Some(blob) => {
            state.metrics.uploads.add(1, &[]);
            state.metrics.upload_bytes.add(blob.size_bytes, &[]);
            Ok(ReceivedUpload { blob, metadata })
        }
        None => {
            state.metrics.rejected_uploads.add(1, &[]);
            Err(DocumentAPIError::bad_request("no file provided"))
        }
    }
}

async fn read_fields(
    state: &RouteState,
    multipart: &mut Multipart,
    blob: &mut Option<UploadedBlob>,
    metadata: &mut SubmittedMetadata,
) -> Result<(), DocumentAPIError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&e))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            // A `file` part without a filename is a plain text value, not a file.
            FILE_FIELD if field.file_name().is_none() => {
                info!("ignoring file field sent without a file name");
            }
            FILE_FIELD => {
                if blob.is_some() {
                    return Err(DocumentAPIError::bad_request(
                        "only one file can be uploaded per request",
                    ));
                }
                *blob = Some(store_file(state, field).await?);
            }
            "title" => metadata.title = Some(read_text(field).await?),
            "category" => metadata.category = Some(read_text(field).await?),
            "description" => metadata.description = Some(read_text(field).await?),
            "userId" => metadata.user_id = Identifier::parse_non_empty(&read_text(field).await?),
            other => {
                info!(field = other, "ignoring unknown upload field");
            }
        }
    }
    Ok(())
}

async fn store_file(
    state: &RouteState,
    field: axum::extract::multipart::Field<'_>,
) -> Result<UploadedBlob, DocumentAPIError> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let split = SplitName::parse(&original_name)
        .map_err(|e| DocumentAPIError::bad_request(&e.to_string()))?;

    let policy = state.config.type_policy();
    if !policy.allows(field.content_type()) {
        return Err(DocumentAPIError::bad_request(&format!(
            "file type not allowed: {}",
            field.content_type().unwrap_or("unknown")
        )));
    }

    let storage_name = state
        .blob_storage
        .allocate(&original_name)
        .await
        .map_err(write_error)?;

    let limit = state.config.upload.max_file_size_bytes;
    let stream = SizeLimited::new(field.map(|res| res.map_err(anyhow::Error::new)), limit);
    let put_result = state
        .blob_storage
        .put(storage_name.as_str(), stream)
        .await
        .map_err(write_error)?;

    info!(
        storage_name = %put_result.storage_name,
        %original_name,
        size_bytes = put_result.size_bytes,
        "stored uploaded file"
    );
    Ok(UploadedBlob {
        storage_name: put_result.storage_name,
        original_name,
        size_bytes: put_result.size_bytes,
        extension: split.type_token(),
        stored_at: Utc::now(),
    })
}

pub async fn discard_blob(state: &RouteState, storage_name: &str) {
    match state.blob_storage.delete(storage_name).await {
        Ok(_) => info!(%storage_name, "discarded uploaded file"),
        Err(err) => warn!(%storage_name, ?err, "unable to discard uploaded file"),
    }
}

pub fn descriptor_defaults(state: &RouteState) -> DescriptorDefaults {
    DescriptorDefaults {
        category: state.config.upload.default_category.clone(),
        owner: state.config.upload.default_owner.clone(),
    }
}

/// Upload a document
#[utoipa::path(
    post,
    path = "/api/upload-document",
    tag = "documents",
    request_body(content_type = "multipart/form-data", content = inline(UploadForm)),
    responses(
        (status = 200, description = "File stored", body = ApiResponse<DocumentDescriptor>),
        (status = BAD_REQUEST, description = "No file, bad file name or disallowed type"),
        (status = PAYLOAD_TOO_LARGE, description = "File above the size limit"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to store the file")
    ),
)]
pub async fn upload_document(
    State(state): State<RouteState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<DocumentDescriptor>>, DocumentAPIError> {
    let _timer = Timer::start(&state.metrics.upload_latency);
    let upload = receive_upload(&state, multipart).await?;
    let url = state.document_url(&headers, &upload.blob.storage_name);
    let descriptor = DocumentDescriptor::from_upload(
        &upload.blob,
        url,
        &upload.metadata,
        &descriptor_defaults(&state),
    );
    Ok(Json(ApiResponse::with_message(
        "document uploaded",
        descriptor,
    )))
}

/// Upload a file to the local development server
#[utoipa::path(
    post,
    path = "/api/local-upload",
    tag = "documents",
    request_body(content_type = "multipart/form-data", content = inline(UploadForm)),
    responses(
        (status = 200, description = "File stored", body = ApiResponse<LocalUploadDescriptor>),
        (status = BAD_REQUEST, description = "No file or bad file name"),
        (status = PAYLOAD_TOO_LARGE, description = "File above the size limit"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to store the file")
    ),
)]
pub async fn local_upload(
    State(state): State<RouteState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<LocalUploadDescriptor>>, DocumentAPIError> {
    let _timer = Timer::start(&state.metrics.upload_latency);
    let upload = receive_upload(&state, multipart).await?;
    let local_url = state.document_url(&headers, &upload.blob.storage_name);
    Ok(Json(ApiResponse::with_message(
        "file saved locally",
        LocalUploadDescriptor::from_upload(&upload.blob, local_url),
    )))
}
