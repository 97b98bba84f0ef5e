pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod validation;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
    routing::{delete, get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tts_core::SpeechService;

use crate::config::ServerConfig;
use crate::handlers::{
    cache_stats_endpoint, clear_cache_endpoint, health_check, metrics_endpoint, models_endpoint,
    test_settings_endpoint, tts_endpoint,
};
use crate::metrics::AppMetrics;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub speech: Arc<SpeechService>,
    pub metrics: AppMetrics,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(speech: SpeechService, config: ServerConfig) -> Self {
        Self {
            speech: Arc::new(speech),
            metrics: AppMetrics::default(),
            request_count: Arc::new(AtomicU64::new(0)),
            config,
            started_at: Instant::now(),
        }
    }
}

/// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Application routes, served at the root and again under `/api`.
///
/// Cross-cutting layers (tracing, rate limiting, timeouts, CORS) are added
/// by the binary.
pub fn router(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/tts", post(tts_endpoint))
        .route("/tts/speech", post(tts_endpoint))
        .route("/tts/test", post(test_settings_endpoint))
        .route("/tts/models", get(models_endpoint));

    // Administrative routes
    let admin_api = Router::new()
        .route("/tts/cache/stats", get(cache_stats_endpoint))
        .route("/tts/cache", delete(clear_cache_endpoint))
        .route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(admin_api);

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}
