use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Json,
    Router,
};
use data_model::{
    CatalogDocument,
    DocumentDescriptor,
    Identifier,
    IndexingState,
    ListedDocument,
    LocalUploadDescriptor,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::{
    config::Profile,
    http_objects::{
        DeleteResponse,
        DocumentAPIError,
        DocumentList,
        ErrorBody,
        ErrorKind,
        StatusMessage,
    },
    middleware::InstanceRequestSpan,
};

mod documents;
mod routes_state;
pub mod saga;
pub mod upload;

use documents::{
    count_documents,
    delete_document,
    delete_document_by_id,
    index_document,
    list_documents,
    search_documents,
};
pub use routes_state::RouteState;
use saga::create_document;
use upload::{local_upload, upload_document};

#[derive(OpenApi)]
#[openapi(
        paths(
            upload::upload_document,
            upload::local_upload,
            saga::create_document,
            documents::index_document,
            documents::list_documents,
            documents::search_documents,
            documents::count_documents,
            documents::delete_document,
            documents::delete_document_by_id,
            liveness,
        ),
        components(
            schemas(
                DocumentDescriptor,
                LocalUploadDescriptor,
                ListedDocument,
                CatalogDocument,
                Identifier,
                IndexingState,
                DocumentList,
                DeleteResponse,
                StatusMessage,
                DocumentAPIError,
                ErrorBody,
                ErrorKind,
            )
        ),
        tags(
            (name = "documents", description = "Document upload and retrieval API")
        )
    )]
pub struct ApiDoc;

pub fn create_routes(route_state: RouteState) -> Router {
    let config = route_state.config.clone();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    let api = match config.profile {
        Profile::Local => Router::new().route("/api/local-upload", post(local_upload)),
        Profile::Full => Router::new()
            .route("/api/upload-document", post(upload_document))
            .route("/api/documents", post(create_document))
            .route("/api/documents/index", post(index_document))
            .route(
                "/api/documents/{key}",
                get(list_documents).delete(delete_document),
            )
            .route("/api/documents/{key}/search", get(search_documents))
            .route("/api/documents/{key}/count", get(count_documents))
            .route(
                "/api/documents/by-id/{id}",
                axum::routing::delete(delete_document_by_id),
            ),
    };

    api.route("/api/test", get(liveness))
        .route("/docs/openapi.json", get(openapi))
        .with_state(route_state.clone())
        .nest_service(
            blob_store::STATIC_MOUNT,
            ServeDir::new(route_state.blob_storage.root()),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(InstanceRequestSpan::new(&config.env, &config.instance_id()))
                .on_failure(()),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(cors)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes()))
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/test",
    tag = "documents",
    responses(
        (status = 200, description = "Server is up", body = StatusMessage),
    ),
)]
async fn liveness() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "document server running".to_string(),
    })
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests;
