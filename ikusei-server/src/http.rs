//! Ikusei HTTP REST API
//!
//! Axum-based server exposing workers, records, training sessions, replay,
//! dashboards and file storage under `/api`.
//!
//! Each endpoint has a thin axum handler that delegates to an `*_inner`
//! function returning `(StatusCode, body)`, so the business logic can be
//! exercised without the dispatch machinery. Every body uses the envelope
//! `{success, data?, error?, message?}`.

use std::sync::Arc;

use anyhow::Result;
use axum::async_trait;
use axum::extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Path, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ikusei_core::models::RecordKind;
use ikusei_core::{IkuseiConfig, Store};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::ApiError;
use crate::subsystems::auth::TokenRegistry;
use crate::subsystems::{auth, dashboard, files, records, sessions, workers};

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub store: Arc<dyn Store>,
    pub config: IkuseiConfig,
    pub tokens: TokenRegistry,
}

impl HttpState {
    pub fn new(store: Arc<dyn Store>, config: IkuseiConfig) -> Self {
        let tokens = TokenRegistry::new(config.auth.token_ttl_secs);
        Self {
            store,
            config,
            tokens,
        }
    }

    /// Render an inner result, logging rejections.
    pub fn respond(&self, result: ApiResult) -> Response {
        match result {
            Ok((status, body)) => (status, Json(body)).into_response(),
            Err(err) => {
                match &err {
                    ApiError::Internal { details, .. } => {
                        tracing::error!(details = ?details, "Request failed");
                    }
                    other => {
                        tracing::warn!(status = %other.status(), "Request rejected: {}", other)
                    }
                }
                err.redact(self.config.service.is_development()).into_response()
            }
        }
    }
}

pub type ApiResult = Result<(StatusCode, Value), ApiError>;

pub fn ok(data: Value) -> ApiResult {
    Ok((StatusCode::OK, json!({ "success": true, "data": data })))
}

pub fn created(data: Value) -> ApiResult {
    Ok((StatusCode::CREATED, json!({ "success": true, "data": data })))
}

pub fn done(message: &str) -> ApiResult {
    Ok((StatusCode::OK, json!({ "success": true, "message": message })))
}

// ============================================================================
// Extractors
// ============================================================================

/// `Json` whose rejection is rendered in the envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(v)| ApiJson(v))
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))
    }
}

/// `Path` whose rejection is rendered in the envelope.
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(v)| ApiPath(v))
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))
    }
}

// ============================================================================
// Router
// ============================================================================

const MIN_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    // base64 inflates uploads by a third
    let body_limit =
        (state.config.storage.max_upload_bytes / 3 * 4 + 64 * 1024).max(MIN_BODY_LIMIT);

    let mut router = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/api/auth/register", post(auth::register_handler))
        .route("/api/auth/logout", post(auth::logout_handler))
        .route("/api/auth/current", get(auth::current_handler))
        .route(
            "/api/workers",
            get(workers::list_handler).post(workers::create_handler),
        )
        .route(
            "/api/workers/:id",
            get(workers::get_handler)
                .put(workers::update_handler)
                .delete(workers::delete_handler),
        )
        .route(
            "/api/workers/:id/training-sessions",
            get(sessions::worker_sessions_handler),
        )
        .route(
            "/api/workers/:id/dashboard/integrated",
            get(dashboard::integrated_handler),
        )
        .route("/api/workers/:id/screenshots", post(files::screenshot_handler))
        .route(
            "/api/training-sessions",
            get(sessions::list_handler).post(sessions::ingest_handler),
        )
        .route("/api/training-sessions/:session_id", get(sessions::detail_handler))
        .route(
            "/api/training-sessions/:session_id/logs",
            post(sessions::append_handler),
        )
        .route(
            "/api/training-sessions/:session_id/finish",
            post(sessions::finish_handler),
        )
        .route("/api/replay/:session_id", get(sessions::replay_handler))
        .route("/api/admin/summary", get(dashboard::admin_summary_handler))
        .route("/api/files/*path", get(files::file_handler));

    for kind in RecordKind::ALL.into_iter().filter(|k| k.is_worker_scoped()) {
        router = records::mount_worker_kind(router, kind);
    }
    router = records::mount_shared(router);

    router
        .fallback(fallback_handler)
        .layer(middleware::map_response(method_not_allowed_envelope))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    store: Arc<dyn Store>,
    config: IkuseiConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState::new(store, config));

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Ikusei HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Health
// ============================================================================

/// Inner health check: probes the store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn Store) -> (StatusCode, Value) {
    match store.health_check().await {
        Ok(backend) => (
            StatusCode::OK,
            json!({
                "success": true,
                "data": {
                    "status": "healthy",
                    "version": env!("CARGO_PKG_VERSION"),
                    "store": backend,
                },
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "success": false,
                "error": e.to_string(),
                "data": { "status": "unhealthy" },
            }),
        ),
    }
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

async fn fallback_handler() -> ApiError {
    ApiError::not_found("Not found")
}

async fn method_not_allowed_envelope(res: Response) -> Response {
    if res.status() == StatusCode::METHOD_NOT_ALLOWED {
        ApiError::MethodNotAllowed.into_response()
    } else {
        res
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
