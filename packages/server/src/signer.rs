//! Signing backend for `in3_sign`.

use async_trait::async_trait;
use serde_json::Value;

use crate::{context::HandlerContext, error::HandlerError};

/// Signs block hashes on behalf of this node. The node never holds unlocked
/// account keys, so this is the only signing path it exposes.
#[async_trait]
pub trait BlockSigner: Send + Sync {
    async fn sign(&self, ctx: &HandlerContext, params: &[Value]) -> Result<Value, HandlerError>;
}
