//! Per-chain handler context: configuration, the upstream transport and the
//! state shared between requests (registry id and node-list snapshot).

use std::sync::{Arc, OnceLock};

use in3_core::{
    hex::{encode_hex, parse_quantity},
    AbiValue, NodeListSnapshot, Signature,
};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::{
    error::HandlerError,
    transport::{HttpTransport, RpcRequest, RpcResponse, Transport},
};

/// Chain settings, loaded by the binary and handed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: String,
    /// Registry contract address.
    pub registry: String,
    pub rpc_url: String,
    /// Distance from the tip below which registry proofs are not anchored.
    pub min_block_height: u64,
}

pub struct HandlerContext {
    pub config: ChainConfig,
    transport: Arc<dyn Transport>,
    /// Immutable per contract; set at most once.
    registry_id: OnceLock<String>,
    /// Replaced wholesale after each sync; readers keep their `Arc`.
    node_list: RwLock<Option<Arc<NodeListSnapshot>>>,
}

impl HandlerContext {
    pub fn new(config: ChainConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            registry_id: OnceLock::new(),
            node_list: RwLock::new(None),
        }
    }

    /// Context talking JSON-RPC over HTTP to `config.rpc_url`.
    pub fn connect(config: ChainConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.rpc_url.clone()));
        Self::new(config, transport)
    }

    pub fn registry_id(&self) -> Option<&str> {
        self.registry_id.get().map(String::as_str)
    }

    /// Cache the registry id. A concurrent writer holds the same value, so
    /// losing the race is harmless.
    pub fn set_registry_id(&self, registry_id: String) {
        let _ = self.registry_id.set(registry_id);
    }

    pub async fn node_list(&self) -> Option<Arc<NodeListSnapshot>> {
        self.node_list.read().await.clone()
    }

    pub async fn replace_node_list(&self, snapshot: NodeListSnapshot) -> Arc<NodeListSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.node_list.write().await = Some(snapshot.clone());
        snapshot
    }

    /// Send a request upstream and return the raw response.
    pub async fn relay(&self, request: RpcRequest) -> Result<RpcResponse, HandlerError> {
        Ok(self.transport.call(request).await?)
    }

    /// Send requests in one round trip; per-request errors are left in place.
    pub async fn relay_batch(&self, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>, HandlerError> {
        Ok(self.transport.call_batch(requests).await?)
    }

    /// Call `method` and return its result, turning an error member into
    /// [`HandlerError::Upstream`].
    pub async fn fetch(&self, method: &str, params: Value) -> Result<Value, HandlerError> {
        let request = RpcRequest::new(method, params);
        let response = self.relay(request.clone()).await?;
        into_result(&request, response)
    }

    /// Batched [`fetch`](Self::fetch); fails on the first error member.
    pub async fn fetch_all(&self, requests: Vec<RpcRequest>) -> Result<Vec<Value>, HandlerError> {
        let responses = self.relay_batch(requests.clone()).await?;
        if responses.len() != requests.len() {
            return Err(HandlerError::Malformed(format!(
                "expected {} batch responses, got {}",
                requests.len(),
                responses.len()
            )));
        }
        requests
            .iter()
            .zip(responses)
            .map(|(request, response)| into_result(request, response))
            .collect()
    }

    pub async fn block_number(&self) -> Result<u64, HandlerError> {
        let result = self.fetch("eth_blockNumber", json!([])).await?;
        result
            .as_str()
            .and_then(|s| parse_quantity(s).ok())
            .ok_or_else(|| HandlerError::Malformed(format!("eth_blockNumber returned {}", result)))
    }

    /// `eth_call` against `to` at `block`, decoded with the signature's return types.
    pub async fn call_contract(
        &self,
        to: &str,
        signature: &Signature,
        args: &[AbiValue],
        block: &str,
    ) -> Result<Vec<AbiValue>, HandlerError> {
        let result = self.fetch("eth_call", call_params(to, signature, args, block)?).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| HandlerError::Malformed(format!("eth_call returned {}", result)))?;
        Ok(in3_core::abi::decode_hex_output(signature, raw)?)
    }
}

/// Params of an `eth_call` invoking `signature` on `to`.
pub fn call_params(
    to: &str,
    signature: &Signature,
    args: &[AbiValue],
    block: &str,
) -> Result<Value, HandlerError> {
    let data = signature.encode_call(args)?;
    Ok(json!([{ "to": to, "data": encode_hex(&data) }, block]))
}

fn into_result(request: &RpcRequest, response: RpcResponse) -> Result<Value, HandlerError> {
    if let Some(payload) = response.error {
        return Err(HandlerError::Upstream {
            method: request.method.clone(),
            payload,
            request: serde_json::to_value(request).unwrap_or(Value::Null),
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChainConfig {
        ChainConfig {
            chain_id: "0x1".into(),
            registry: "0x6c095a05764a23156efd9d603eada144a9b1af33".into(),
            rpc_url: "http://127.0.0.1:8545".into(),
            min_block_height: 6,
        }
    }

    #[test]
    fn call_params_target_the_contract() {
        let signature = Signature::parse("totalNodes():(uint)").unwrap();
        let params = call_params("0x01", &signature, &[], "0x10").unwrap();
        assert_eq!(params[0]["to"], "0x01");
        assert_eq!(params[1], "0x10");
        assert_eq!(params[0]["data"].as_str().unwrap().len(), 2 + 8);
    }

    #[tokio::test]
    async fn connect_starts_without_shared_state() {
        let ctx = HandlerContext::connect(config());
        assert_eq!(ctx.config, config());
        assert!(ctx.registry_id().is_none());
        assert!(ctx.node_list().await.is_none());

        ctx.set_registry_id("0xaa".into());
        ctx.set_registry_id("0xbb".into());
        assert_eq!(ctx.registry_id(), Some("0xaa"));
    }
}
