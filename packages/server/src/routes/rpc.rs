use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    handler::request_from_path,
    request::{ClientRequest, ClientResponse},
    state::AppState,
};

const INVALID_REQUEST: i64 = -32600;

fn parse_request(raw: Value) -> Result<ClientRequest, ClientResponse> {
    let id = raw.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(|e| {
        ClientResponse::error(id, json!({ "code": INVALID_REQUEST, "message": e.to_string() }))
    })
}

/// `POST /`: a single JSON-RPC request or a batch.
async fn rpc(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Json<Value> {
    let handler = &state.handler;
    match body {
        Value::Array(batch) => {
            let mut responses: Vec<Option<ClientResponse>> = Vec::with_capacity(batch.len());
            let mut valid = Vec::new();
            for raw in batch {
                match parse_request(raw) {
                    Ok(request) => {
                        responses.push(None);
                        valid.push(request);
                    }
                    Err(rejected) => responses.push(Some(rejected)),
                }
            }

            let mut handled = handler.handle_batch(valid).await.into_iter();
            let responses: Vec<ClientResponse> = responses
                .into_iter()
                .filter_map(|slot| slot.or_else(|| handled.next()))
                .collect();
            Json(json!(responses))
        }
        single => {
            let response = match parse_request(single) {
                Ok(request) => handler.handle(request).await,
                Err(rejected) => rejected,
            };
            Json(json!(response))
        }
    }
}

/// `GET /*path`: REST shortcut for common reads.
async fn rest(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<ClientResponse>, StatusCode> {
    let chain_id = &state.handler.context().config.chain_id;
    let request = request_from_path(&path, chain_id).ok_or(StatusCode::NOT_FOUND)?;
    tracing::debug!(%path, method = %request.method, "serving path request");
    Ok(Json(state.handler.handle(request).await))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(rpc))
        .route("/{*path}", get(rest))
}
