//! Admission limits checked before a request is served.

use in3_core::hex::parse_quantity;
use serde_json::Value;

use crate::{context::HandlerContext, error::HandlerError, request::ClientRequest};

/// Highest `gas` an `eth_call` may ask for.
pub const MAX_CALL_GAS: u64 = 10_000_000;
/// Widest `eth_getLogs` block range when a proof is requested.
pub const MAX_LOG_RANGE_WITH_PROOF: u64 = 1_000;
pub const MAX_LOG_RANGE: u64 = 10_000;

pub async fn check_limits(ctx: &HandlerContext, request: &ClientRequest) -> Result<(), HandlerError> {
    match request.method.as_str() {
        "eth_call" => check_call(request),
        "eth_getLogs" => check_logs(ctx, request).await,
        _ => Ok(()),
    }
}

fn check_call(request: &ClientRequest) -> Result<(), HandlerError> {
    if request.params.len() < 2 {
        return Err(HandlerError::InvalidParams(
            "eth_call must have a transaction and a block as parameters".to_string(),
        ));
    }
    let Some(gas) = request.params[0].get("gas") else {
        return Ok(());
    };
    let gas = number(gas).ok_or_else(|| HandlerError::InvalidParams(format!("invalid gas {}", gas)))?;
    if gas > MAX_CALL_GAS {
        return Err(HandlerError::AdmissionRejected(format!(
            "eth_call with a gas limit above {} is not allowed",
            MAX_CALL_GAS
        )));
    }
    Ok(())
}

async fn check_logs(ctx: &HandlerContext, request: &ClientRequest) -> Result<(), HandlerError> {
    let Some(filter) = request.params.first().filter(|f| f.is_object()) else {
        return Err(HandlerError::InvalidParams(
            "eth_getLogs must have a filter as parameter".to_string(),
        ));
    };
    // a blockHash filter covers exactly one block
    if filter.get("blockHash").is_some() {
        return Ok(());
    }
    let Some(from) = filter.get("fromBlock").filter(|v| !v.is_null()) else {
        return Ok(());
    };

    let mut tip = None;
    let to_block = resolve_block(ctx, filter.get("toBlock"), &mut tip).await?;
    let from_block = resolve_block(ctx, Some(from), &mut tip).await?;

    let range = to_block.saturating_sub(from_block);
    let max = if request.wants_proof() {
        MAX_LOG_RANGE_WITH_PROOF
    } else {
        MAX_LOG_RANGE
    };
    if range > max {
        return Err(HandlerError::AdmissionRejected(format!(
            "eth_getLogs for a range of {} blocks is not allowed. limits: with proof: {}, without {}",
            range, MAX_LOG_RANGE_WITH_PROOF, MAX_LOG_RANGE
        )));
    }
    Ok(())
}

/// `latest`, `pending` and absent resolve to the tip, fetched at most once.
async fn resolve_block(
    ctx: &HandlerContext,
    tag: Option<&Value>,
    tip: &mut Option<u64>,
) -> Result<u64, HandlerError> {
    let tag = tag.filter(|v| !v.is_null());
    match tag.map(|v| (v, v.as_str())) {
        None | Some((_, Some("latest"))) | Some((_, Some("pending"))) => {
            if let Some(tip) = *tip {
                return Ok(tip);
            }
            let number = ctx.block_number().await?;
            *tip = Some(number);
            Ok(number)
        }
        Some((_, Some("earliest"))) => Ok(1),
        Some((value, _)) => number(value)
            .ok_or_else(|| HandlerError::InvalidParams(format!("invalid block {}", value))),
    }
}

fn number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_quantity(s).ok(),
        _ => None,
    }
}
