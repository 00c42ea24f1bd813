pub mod disease;
pub mod error;
pub mod health;
pub mod metrics;
pub mod recommend;

use axum::extract::DefaultBodyLimit;
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;

/// Pages and API routes, with the request body limit applied.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_request_bytes;

    Router::new()
        // Pages (embedded at compile time)
        .route("/", get(|| async { Html(include_str!("../../static/index.html")) }))
        .route(
            "/disease",
            get(|| async { Html(include_str!("../../static/disease.html")) })
                .post(disease::upload_images),
        )
        // API endpoints
        .route("/api/recommend-crop", post(recommend::recommend_crop))
        .route("/diagnosis-status", get(disease::latest_status))
        .route("/diagnosis-status/{job_id}", get(disease::job_status))
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
