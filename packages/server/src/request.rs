//! Client-facing JSON-RPC envelope with the `in3` side channel.

use in3_core::{abi::decode_hex_output, Proof, Signature};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::HandlerError, transport::RpcResponse};

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// `in3` member of a client request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct In3Params {
    /// `never`, `proof`, `proofWithSignature`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    /// Replace `latest` with the block this many blocks behind the tip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_block: Option<u64>,
}

/// Post-processing applied to a response before it is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseTransform {
    /// Decode `eth_call` return data with the signature's return types.
    DecodeReturn(Signature),
}

impl ResponseTransform {
    pub fn apply(&self, response: &mut ClientResponse) -> Result<(), HandlerError> {
        match self {
            Self::DecodeReturn(signature) => {
                let Some(raw) = response.result.as_ref().and_then(Value::as_str) else {
                    return Ok(());
                };
                let values: Vec<Value> = decode_hex_output(signature, raw)?
                    .iter()
                    .map(|v| v.to_json())
                    .collect();
                response.result = Some(if signature.tuple_output {
                    Value::Array(values)
                } else {
                    values.into_iter().next().unwrap_or(Value::Null)
                });
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<In3Params>,
    #[serde(skip)]
    pub transform: Option<ResponseTransform>,
}

impl ClientRequest {
    pub fn new(id: Value, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.to_string(),
            params,
            in3: None,
            transform: None,
        }
    }

    pub fn with_in3(mut self, in3: In3Params) -> Self {
        self.in3 = Some(in3);
        self
    }

    pub fn verification(&self) -> &str {
        self.in3
            .as_ref()
            .and_then(|in3| in3.verification.as_deref())
            .unwrap_or("never")
    }

    pub fn wants_proof(&self) -> bool {
        self.verification().starts_with("proof")
    }

    pub fn param_str(&self, index: usize) -> Option<&str> {
        self.params.get(index).and_then(Value::as_str)
    }
}

/// `in3` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct In3Result {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in3: Option<In3Result>,
}

impl ClientResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
            in3: None,
        }
    }

    pub fn error(id: Value, error: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
            in3: None,
        }
    }

    /// Relay an upstream response under the client's id.
    pub fn relayed(id: Value, upstream: RpcResponse) -> Self {
        Self {
            jsonrpc: upstream.jsonrpc,
            id,
            result: upstream.result,
            error: upstream.error,
            in3: None,
        }
    }

    pub fn with_proof(mut self, proof: Proof) -> Self {
        self.in3 = Some(In3Result { proof: Some(proof) });
        self
    }

    pub fn proof(&self) -> Option<&Proof> {
        self.in3.as_ref().and_then(|in3| in3.proof.as_ref())
    }
}
