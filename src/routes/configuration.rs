//! Configuration administration routes. Submissions are bounded by `max_config_bytes`.

use crate::handlers::configuration::{
    get_openapi, get_status, post_configuration, post_configuration_v2, post_entity, post_reload,
};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

pub fn configuration_routes(state: AppState) -> Router {
    let limit = state.settings.max_config_bytes;
    Router::new()
        .route("/configuration", post(post_configuration))
        .route("/configuration/v2", post(post_configuration_v2))
        .route("/configuration/reload", post(post_reload))
        .route("/configuration/entities", post(post_entity))
        .route("/configuration/status", get(get_status))
        .route("/openapi", get(get_openapi))
        .route_layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .with_state(state)
}
