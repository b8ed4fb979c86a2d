pub mod common;
pub mod configuration;

pub use common::common_routes_with_ready;
pub use configuration::configuration_routes;

use crate::state::AppState;
use axum::Router;

/// Every administration route plus health, readiness and version.
pub fn app(state: AppState) -> Router {
    common_routes_with_ready(state.clone()).merge(configuration_routes(state))
}
