//! Upstream chain-node transport.
//!
//! Everything above this module talks to the chain node through [`Transport`]
//! only; [`HttpTransport`] is the JSON-RPC-over-HTTP implementation used by the
//! binary.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// JSON-RPC request sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Value::from(1),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC response as returned by the chain node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

/// Narrow contract the request handlers depend on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, TransportError>;

    /// Send all requests in one round trip. Responses come back in request
    /// order, one per request.
    async fn call_batch(&self, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>, TransportError>;
}

/// JSON-RPC over HTTP.
pub struct HttpTransport {
    http: reqwest::Client,
    rpc_url: String,
}

impl HttpTransport {
    pub fn new(rpc_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, TransportError> {
        tracing::trace!(method = %request.method, "upstream call");
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json::<RpcResponse>()
            .await?;
        Ok(response)
    }

    async fn call_batch(&self, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>, TransportError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        // Renumber so responses can be matched regardless of their order.
        let numbered: Vec<RpcRequest> = requests
            .into_iter()
            .enumerate()
            .map(|(i, r)| RpcRequest {
                id: Value::from(i as u64 + 1),
                ..r
            })
            .collect();
        tracing::trace!(count = numbered.len(), "upstream batch");

        let responses = self
            .http
            .post(&self.rpc_url)
            .json(&numbered)
            .send()
            .await?
            .json::<Vec<RpcResponse>>()
            .await?;

        let mut by_id: HashMap<u64, RpcResponse> = responses
            .into_iter()
            .filter_map(|r| r.id.as_u64().map(|id| (id, r)))
            .collect();

        (1..=numbered.len() as u64)
            .map(|id| {
                by_id
                    .remove(&id)
                    .ok_or_else(|| TransportError::Malformed(format!("batch response {} missing", id)))
            })
            .collect()
    }
}
