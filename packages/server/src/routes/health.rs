use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    chain_id: String,
    /// Block of the current node-list snapshot, if one has been synced.
    node_list_block: Option<u64>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ctx = state.handler.context();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        chain_id: ctx.config.chain_id.clone(),
        node_list_block: ctx.node_list().await.map(|list| list.last_block_number),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
