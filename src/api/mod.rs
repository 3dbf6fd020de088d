use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

mod error;
pub mod torznab;

pub use error::ApiError;

/// Build the HTTP router: a single Torznab endpoint.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/api", get(torznab::torznab_api))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
