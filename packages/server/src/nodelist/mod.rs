//! `in3_nodeList`: a seeded, optionally proven sample of the registry.

mod sync;

pub use sync::NodeListSynchronizer;

use in3_core::{
    hex::{bytes32, parse_quantity},
    sample,
};
use serde_json::Value;

use crate::{
    context::HandlerContext,
    error::HandlerError,
    request::{ClientRequest, ClientResponse},
};

/// Params are `[limit, seed, addresses]`, all optional.
pub async fn handle_node_list(ctx: &HandlerContext, request: &ClientRequest) -> Result<ClientResponse, HandlerError> {
    let limit = match request.params.first() {
        None | Some(Value::Null) => 0,
        Some(value) => parse_limit(value)
            .ok_or_else(|| HandlerError::InvalidParams(format!("invalid limit {}", value)))?,
    };

    let seed = match request.params.get(1).and_then(Value::as_str) {
        Some(hex_seed) => bytes32(hex_seed).map_err(|e| HandlerError::InvalidParams(e.to_string()))?,
        None => rand::random::<[u8; 32]>(),
    };

    let required = match request.params.get(2) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(addresses)) => addresses
            .iter()
            .map(|a| {
                a.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| HandlerError::InvalidParams(format!("invalid address {}", a)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(HandlerError::InvalidParams(format!("invalid address list {}", other)));
        }
    };

    let snapshot = match ctx.node_list().await {
        Some(snapshot) => snapshot,
        None => NodeListSynchronizer::new(ctx).sync(None).await?,
    };

    let list = sample(&snapshot, limit, &seed, &required, request.wants_proof())?;
    let result = serde_json::to_value(&list).map_err(|e| HandlerError::Malformed(e.to_string()))?;
    Ok(ClientResponse::result(request.id.clone(), result))
}

/// A JSON number, a `0x` quantity or a decimal string.
fn parse_limit(value: &Value) -> Option<usize> {
    let limit = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) if s.starts_with("0x") => parse_quantity(s).ok()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    usize::try_from(limit).ok()
}
