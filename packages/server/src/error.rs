//! Errors raised while handling a client request.
//!
//! Every variant is rendered into a JSON-RPC error object by
//! [`HandlerError::to_rpc_error`] at the dispatcher boundary; nothing below
//! the dispatcher formats errors for the wire.

use in3_core::{AbiError, SampleError};
use serde_json::{json, Value};
use thiserror::Error;

use crate::transport::TransportError;

const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;
const SERVER_ERROR: i64 = -32000;
const LIMIT_EXCEEDED: i64 = -32005;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Bad contract signature, argument count or argument value.
    #[error("{0}")]
    Encoding(#[from] AbiError),

    /// The registry could not be read.
    #[error("could not sync the node list: {0}")]
    Sync(Box<HandlerError>),

    /// Required addresses missing from the node list, or an incomplete proof.
    #[error("{0}")]
    Sample(#[from] SampleError),

    /// The chain node answered with an error object.
    #[error("upstream error for {method}: {payload}")]
    Upstream {
        method: String,
        payload: Value,
        request: Value,
    },

    /// The request shape exceeds an admission limit.
    #[error("{0}")]
    AdmissionRejected(String),

    /// Methods this node never serves.
    #[error("{0}")]
    Refused(&'static str),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Signer(String),

    /// The chain node answered with something other than the expected shape.
    #[error("unexpected upstream response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HandlerError {
    pub fn sync(err: HandlerError) -> Self {
        match err {
            already @ Self::Sync(_) => already,
            other => Self::Sync(Box::new(other)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Encoding(_) | Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Sample(SampleError::MissingAddress(_)) => INVALID_PARAMS,
            Self::AdmissionRejected(_) => LIMIT_EXCEEDED,
            Self::Upstream { payload, .. } => payload
                .get("code")
                .and_then(Value::as_i64)
                .unwrap_or(SERVER_ERROR),
            Self::Transport(_) | Self::Malformed(_) => INTERNAL_ERROR,
            Self::Sync(_) | Self::Sample(_) | Self::Refused(_) | Self::Signer(_) => SERVER_ERROR,
        }
    }

    /// The upstream failure behind this error, looking through sync wrappers.
    fn upstream(&self) -> Option<(&Value, &Value)> {
        match self {
            Self::Upstream {
                payload, request, ..
            } => Some((payload, request)),
            Self::Sync(inner) => inner.upstream(),
            _ => None,
        }
    }

    /// JSON-RPC `error` member for this failure.
    pub fn to_rpc_error(&self) -> Value {
        match self.upstream() {
            Some((payload, request)) => json!({
                "code": self.code(),
                "message": self.to_string(),
                "data": { "error": payload, "request": request },
            }),
            None => json!({
                "code": self.code(),
                "message": self.to_string(),
            }),
        }
    }
}
