mod health;
mod rpc;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(rpc::router())
        .with_state(state)
}
