//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method, StatusCode},
    routing::{get, post},
    Router,
};
use icr_core::{IcrPipeline, MockOcrProvider};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::handlers::{
    approve_handler, delete_scan_handler, deny_handler, extract_handler, get_scan_handler,
    get_stitched_handler, health, list_scans_handler, list_stitched_handler, match_handler,
    no_match_handler, ocr_handler, ready, select_match_handler, status_handler, stitch_handler,
    upload_handler,
};
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Create the application router with default config and an in-memory
/// pipeline backed by the mock OCR provider (for testing)
pub fn create_router() -> Router {
    let config = Config::default();
    let pipeline = IcrPipeline::builder()
        .config(config.pipeline_config())
        .ocr_provider(Arc::new(MockOcrProvider::empty()))
        .build()
        .expect("in-memory pipeline with an OCR provider always builds");

    let state = AppState::new(Arc::new(pipeline)).with_max_file_size(config.max_file_size());
    create_router_with_config(state, &config)
}

/// `/api/icr` routes
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/extract", post(extract_handler))
        .route("/stitch", post(stitch_handler))
        .route("/match", post(match_handler))
        .route("/stitched", get(list_stitched_handler))
        .route("/stitched/{id}", get(get_stitched_handler))
        .route("/stitched/{id}/ocr", post(ocr_handler))
        .route("/scans", get(list_scans_handler))
        .route(
            "/scans/{id}",
            get(get_scan_handler).delete(delete_scan_handler),
        )
        .route("/scans/{id}/select", post(select_match_handler))
        .route("/scans/{id}/approve", post(approve_handler))
        .route("/scans/{id}/deny", post(deny_handler))
        .route("/scans/{id}/no-match", post(no_match_handler))
        .route("/status", get(status_handler))
}

/// Create the application router with custom configuration
pub fn create_router_with_config(state: AppState, config: &Config) -> Router {
    // Configure CORS based on allowed_origins
    let cors = match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        }
        _ => {
            tracing::warn!("CORS: Allowing all origins (dev mode)");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    // Request body limit; replaces axum's 2 MB default for multipart uploads
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_mb * 1024 * 1024);

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    // Base router with common layers
    let router = Router::new()
        .nest("/api/icr", api_routes())
        .route("/health", get(health))
        .route("/ready", get(ready))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(body_limit)
        .layer(timeout)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    if config.rate_limit_enabled {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_sec)
            .burst_size(config.rate_limit_burst)
            .finish();

        match governor_conf {
            Some(governor_conf) => {
                tracing::info!(
                    "Rate limiting: {} req/s (burst: {})",
                    config.rate_limit_per_sec,
                    config.rate_limit_burst
                );
                return router
                    .layer(GovernorLayer::new(Arc::new(governor_conf)))
                    .layer(TraceLayer::new_for_http());
            }
            None => tracing::error!(
                per_sec = config.rate_limit_per_sec,
                burst = config.rate_limit_burst,
                "Invalid rate limit settings, rate limiting DISABLED"
            ),
        }
    } else {
        tracing::warn!("Rate limiting: DISABLED");
    }

    router.layer(TraceLayer::new_for_http())
}
