//! Discovery of the accounts an `eth_call` touches, so each can be proven.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{context::HandlerContext, error::HandlerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedAccount {
    pub address: String,
    /// Storage slots read during execution.
    pub storage_keys: Vec<String>,
}

/// Reports every account, including internally called contracts, that a call
/// reads when executed at `block`, a block parameter in upstream form.
#[async_trait]
pub trait CallTracer: Send + Sync {
    async fn touched_accounts(
        &self,
        ctx: &HandlerContext,
        tx: &Value,
        block: &Value,
    ) -> Result<Vec<TouchedAccount>, HandlerError>;
}

/// Uses the upstream `debug_traceCall` with the built-in `prestateTracer`,
/// whose result maps each touched address to the state it read.
pub struct PrestateTracer;

#[async_trait]
impl CallTracer for PrestateTracer {
    async fn touched_accounts(
        &self,
        ctx: &HandlerContext,
        tx: &Value,
        block: &Value,
    ) -> Result<Vec<TouchedAccount>, HandlerError> {
        let trace = ctx
            .fetch("debug_traceCall", json!([tx, block, { "tracer": "prestateTracer" }]))
            .await?;
        parse_prestate(&trace)
    }
}

pub fn parse_prestate(trace: &Value) -> Result<Vec<TouchedAccount>, HandlerError> {
    let accounts = trace
        .as_object()
        .ok_or_else(|| HandlerError::Malformed("prestate trace is not an object".to_string()))?;

    let mut touched: Vec<TouchedAccount> = accounts
        .iter()
        .map(|(address, state)| {
            let mut storage_keys: Vec<String> = state
                .get("storage")
                .and_then(Value::as_object)
                .map(|slots| slots.keys().cloned().collect())
                .unwrap_or_default();
            storage_keys.sort();
            TouchedAccount {
                address: address.to_ascii_lowercase(),
                storage_keys,
            }
        })
        .collect();
    touched.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(touched)
}
