//! HTTP API of the clario-sync document server
//!
//! A minimal document store satisfying the remote gateway contract:
//! list, upsert and delete JSON documents by collection and id.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;

/// Application state shared across handlers
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Arc<Self> {
        Arc::new(Self { db, config })
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/collections/{collection}", get(list_documents))
        .route(
            "/api/v1/collections/{collection}/{id}",
            get(get_document).put(put_document).delete(delete_document),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::PUT, Method::DELETE])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
        .with_state(state)
}

/// Health check endpoint (no auth required)
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "clario-sync",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Auth middleware - validates Bearer token
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    // Skip auth for health check
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        );
    };

    if !state.config.validate_token(token) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid API token");
    }

    next.run(request).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    user_id: Option<String>,
}

async fn list_documents(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let documents = state
        .db
        .list_documents(&collection, params.user_id.as_deref())?;

    tracing::info!(
        collection = %collection,
        user_id = ?params.user_id,
        count = documents.len(),
        "Listed documents"
    );

    Ok(Json(serde_json::json!({ "documents": documents })))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    Ok(match state.db.get_document(&collection, &id)? {
        Some(doc) => Json(doc).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Document not found"),
    })
}

async fn put_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    Json(document): Json<Value>,
) -> Result<Response, ApiError> {
    if !document.is_object() {
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            "Document must be a JSON object",
        ));
    }

    state.db.upsert_document(&collection, &id, &document)?;
    tracing::info!(collection = %collection, id = %id, "Document stored");

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let existed = state.db.delete_document(&collection, &id)?;
    tracing::info!(collection = %collection, id = %id, existed, "Document deleted");

    // Deleting an absent document is not an error
    Ok(StatusCode::NO_CONTENT)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// API error type
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "API error");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.0.to_string())
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
