pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::analysis::handlers as analysis;
use crate::resumes::handlers as resumes;
use crate::state::AppState;

/// Multipart framing overhead allowed on top of the file size limit, so an
/// oversized file reaches the handler's own size check.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/resumes",
            post(resumes::handle_upload).get(resumes::handle_list_resumes),
        )
        .route(
            "/api/v1/resumes/:id/download-url",
            get(resumes::handle_download_url),
        )
        .route(
            "/api/v1/analysis/resume/:id",
            get(analysis::handle_get_analysis),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
