use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::{headers, metrics};
use crate::AppState;

pub mod compute;
pub mod handlers;

/// Request bodies are small JSON documents; anything bigger is refused by axum.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the full application router: public compute, dashboard management,
/// health and metrics. Every response gets a request id and security headers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_router())
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(headers::request_id))
        .layer(axum::middleware::from_fn(headers::security_headers))
}

/// Routes under `/api`. Management routes authenticate through the
/// `AuthUser` extractor; the compute route authenticates with its payment token.
fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/compute/solve", post(compute::solve))
        .route(
            "/keys",
            get(handlers::list_keys).post(handlers::create_key),
        )
        .route("/keys/:id", delete(handlers::delete_key))
        .route("/keys/:id/topup", post(handlers::top_up_key))
        .route("/transactions", get(handlers::list_transactions))
}

async fn fallback_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "message": "Not found" })),
    )
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}
