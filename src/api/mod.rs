//! API module for handling HTTP requests and responses

pub(crate) mod handlers;
pub(crate) mod responses;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::state::AppState;

pub(crate) use handlers::*;

/// Create the application router with all routes.
///
/// `max_image_bytes` bounds request bodies; JSON bodies carry base64 and
/// multipart compare requests carry two images, so the limit is scaled up.
pub fn create_router(max_image_bytes: usize) -> Router<Arc<AppState>> {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = max_image_bytes.saturating_mul(3).saturating_add(64 * 1024);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/compare", post(compare_images))
        .route("/api/compare/upload", post(compare_uploads))
        .route("/api/extract", post(extract_features))
        // Proxies to the corpus search service
        .route("/api/search-similar", post(search_similar))
        .route("/api/similar-groups", get(similar_groups))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
