use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use data_model::{CatalogDocument, DocumentDescriptor, ListedDocument};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

use crate::catalog::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    PayloadTooLarge,
    NotFound,
    Storage,
    UpstreamCatalog,
    CatalogUnavailable,
}

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct DocumentAPIError {
    #[serde(skip)]
    status_code: StatusCode,
    kind: ErrorKind,
    message: String,
    /// Descriptor of a blob that was kept after a failed catalog create.
    #[serde(skip)]
    descriptor: Option<DocumentDescriptor>,
}

impl DocumentAPIError {
    pub fn new(status_code: StatusCode, kind: ErrorKind, message: &str) -> Self {
        Self {
            status_code,
            kind,
            message: message.to_string(),
            descriptor: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, message)
    }

    pub fn payload_too_large(message: &str) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::PayloadTooLarge,
            message,
        )
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::NotFound, message)
    }

    /// Storage failures are logged in full and reported with a fixed message.
    pub fn storage(message: &str, e: anyhow::Error) -> Self {
        error!("storage failure: {:?}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Storage, message)
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::storage("internal error", e)
    }

    pub fn upstream_catalog(message: &str) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, ErrorKind::UpstreamCatalog, message)
    }

    pub fn catalog_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::CatalogUnavailable,
            "no metadata catalog configured",
        )
    }

    pub fn with_descriptor(mut self, descriptor: DocumentDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for DocumentAPIError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {}", self.status_code, self.message);
        } else {
            warn!("API Error: {} - {}", self.status_code, self.message);
        }
        let body = ErrorBody {
            success: false,
            message: self.message,
            kind: self.kind,
            data: self.descriptor,
        };
        (self.status_code, Json(body)).into_response()
    }
}

impl From<CatalogError> for DocumentAPIError {
    fn from(e: CatalogError) -> Self {
        if let CatalogError::InvalidIdentifier(_) = e {
            return Self::bad_request(&e.to_string());
        }
        error!("metadata catalog call failed: {}", e);
        Self::upstream_catalog(&e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DocumentDescriptor>,
}

/// Success envelope shared by the document endpoints.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(message: &str, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            data,
        }
    }
}

/// Listing result. Directory listings carry [`ListedDocument`]s, catalog
/// listings carry the catalog's records.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DocumentList {
    Directory(Vec<ListedDocument>),
    Catalog(Vec<CatalogDocument>),
}

impl DocumentList {
    pub fn len(&self) -> usize {
        match self {
            DocumentList::Directory(docs) => docs.len(),
            DocumentList::Catalog(docs) => docs.len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusMessage {
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    #[serde(default)]
    pub term: String,
}
