//! Account and storage proofs anchored to a block header.

use std::{collections::BTreeMap, fmt};

use in3_core::{
    hex::{encode_hex, quantity, to_min_hex},
    AccountProof, Proof, ProofKind,
};
use serde_json::{json, Value};

use crate::{context::HandlerContext, error::HandlerError, header::block_to_hex, transport::RpcRequest};

/// Block a proof is anchored to.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockRef {
    /// Tag the upstream resolves itself, such as `latest`.
    Tag(String),
    Number(u64),
    /// EIP-1898 selector naming a block by hash; `selector` is the client's
    /// object and is passed upstream unchanged.
    Hash { hash: String, selector: Value },
}

impl BlockRef {
    /// Block parameter for upstream calls such as `eth_getProof`.
    pub fn param(&self) -> Value {
        match self {
            Self::Tag(tag) => json!(tag),
            Self::Number(n) => json!(quantity(*n)),
            Self::Hash { selector, .. } => selector.clone(),
        }
    }

    /// Request for the block's header.
    pub fn header_request(&self) -> RpcRequest {
        match self {
            Self::Hash { hash, .. } => RpcRequest::new("eth_getBlockByHash", json!([hash, false])),
            _ => RpcRequest::new("eth_getBlockByNumber", json!([self.param(), false])),
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => f.write_str(tag),
            Self::Number(n) => f.write_str(&quantity(*n)),
            Self::Hash { hash, .. } => f.write_str(hash),
        }
    }
}

pub struct ProofBuilder<'a> {
    ctx: &'a HandlerContext,
}

impl<'a> ProofBuilder<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    /// Block to anchor a proof to. An explicit height is raised to at least
    /// `tip - minBlockHeight`; without one the proof uses `latest`.
    pub async fn resolve_target(&self, explicit: Option<u64>) -> Result<BlockRef, HandlerError> {
        let Some(height) = explicit else {
            return Ok(BlockRef::Tag("latest".to_string()));
        };
        let tip = self.ctx.block_number().await?;
        let floor = tip.saturating_sub(self.ctx.config.min_block_height);
        Ok(BlockRef::Number(height.max(floor)))
    }

    /// `accountProof` for `address` covering `storage_keys`.
    pub async fn build_account_proof(
        &self,
        address: &str,
        storage_keys: &[[u8; 32]],
        target: Option<u64>,
    ) -> Result<Proof, HandlerError> {
        let block = self.resolve_target(target).await?;
        let keys = storage_keys.iter().map(|k| encode_hex(k)).collect();
        let (header, accounts) = self
            .accounts_at(&[(address.to_string(), keys)], &block)
            .await?;

        tracing::debug!(%address, %block, keys = storage_keys.len(), "built account proof");
        let mut proof = Proof::new(ProofKind::AccountProof, Some(header));
        proof.accounts = accounts;
        Ok(proof)
    }

    /// Header of `block` and one account proof per `(address, storage keys)`
    /// entry, fetched in a single batch.
    pub async fn accounts_at(
        &self,
        accounts: &[(String, Vec<String>)],
        block: &BlockRef,
    ) -> Result<(String, BTreeMap<String, AccountProof>), HandlerError> {
        let param = block.param();
        let mut requests = vec![block.header_request()];
        requests.extend(
            accounts
                .iter()
                .map(|(address, keys)| RpcRequest::new("eth_getProof", json!([address, keys, param]))),
        );

        let mut results = self.ctx.fetch_all(requests).await?.into_iter();
        let header = match results.next() {
            Some(block) if block.is_object() => block_to_hex(&block)?,
            _ => return Err(HandlerError::Malformed(format!("block {} not found", block))),
        };

        let mut proofs = BTreeMap::new();
        for ((address, _), raw) in accounts.iter().zip(results) {
            proofs.insert(address.clone(), parse_account_proof(raw)?);
        }
        Ok((header, proofs))
    }
}

/// Read an `eth_getProof` result, rewriting storage keys to minimal hex.
pub fn parse_account_proof(raw: Value) -> Result<AccountProof, HandlerError> {
    let mut account: AccountProof = serde_json::from_value(raw)
        .map_err(|e| HandlerError::Malformed(format!("eth_getProof: {}", e)))?;
    for entry in &mut account.storage_proof {
        entry.key = to_min_hex(&entry.key);
    }
    Ok(account)
}
