//! Merkle-Patricia witnesses for transactions and receipts of a block.

use async_trait::async_trait;
use in3_core::{
    hex::{bytes32, encode_hex, parse_hex_bytes, quantity},
    trie::index_key,
    Trie,
};
use serde_json::{json, Value};

use crate::{context::HandlerContext, error::HandlerError, transport::RpcRequest};

/// Produces inclusion witnesses for entries of a block's transactions and
/// receipts tries.
///
/// `block` is the block object as returned by `eth_getBlockBy*`. The result
/// holds one witness per entry of `indices`, in the same order; a witness is
/// the list of RLP-encoded trie nodes from the root to the entry. Transaction
/// witnesses hash up to `transactionsRoot`, receipt witnesses to
/// `receiptsRoot`.
#[async_trait]
pub trait TrieWitness: Send + Sync {
    async fn transaction_proofs(
        &self,
        ctx: &HandlerContext,
        block: &Value,
        indices: &[u64],
    ) -> Result<Vec<Vec<String>>, HandlerError>;

    async fn receipt_proofs(
        &self,
        ctx: &HandlerContext,
        block: &Value,
        indices: &[u64],
    ) -> Result<Vec<Vec<String>>, HandlerError>;
}

/// Rebuilds both tries from the upstream's consensus encodings:
/// `eth_getRawTransactionByBlockHashAndIndex` for every transaction and
/// `debug_getRawReceipts` for the receipts. The rebuilt root must equal the
/// one in the header.
pub struct RawTrieWitness;

#[async_trait]
impl TrieWitness for RawTrieWitness {
    async fn transaction_proofs(
        &self,
        ctx: &HandlerContext,
        block: &Value,
        indices: &[u64],
    ) -> Result<Vec<Vec<String>>, HandlerError> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let hash = block_hash(block)?;
        let count = block
            .get("transactions")
            .and_then(Value::as_array)
            .map_or(0, Vec::len) as u64;
        let requests = (0..count)
            .map(|i| RpcRequest::new("eth_getRawTransactionByBlockHashAndIndex", json!([hash, quantity(i)])))
            .collect();

        let trie = build_trie(ctx.fetch_all(requests).await?)?;
        check_root(&trie, block, "transactionsRoot")?;
        tracing::debug!(block = %hash, transactions = trie.len(), "rebuilt transactions trie");
        witnesses(&trie, indices, "transaction")
    }

    async fn receipt_proofs(
        &self,
        ctx: &HandlerContext,
        block: &Value,
        indices: &[u64],
    ) -> Result<Vec<Vec<String>>, HandlerError> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let hash = block_hash(block)?;
        let receipts = match ctx.fetch("debug_getRawReceipts", json!([hash])).await? {
            Value::Array(receipts) => receipts,
            other => {
                return Err(HandlerError::Malformed(format!("debug_getRawReceipts returned {}", other)));
            }
        };

        let trie = build_trie(receipts)?;
        check_root(&trie, block, "receiptsRoot")?;
        witnesses(&trie, indices, "receipt")
    }
}

fn block_hash(block: &Value) -> Result<&str, HandlerError> {
    block
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::Malformed("block has no hash".to_string()))
}

fn build_trie(entries: Vec<Value>) -> Result<Trie, HandlerError> {
    let values = entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .and_then(|raw| parse_hex_bytes(raw).ok())
                .ok_or_else(|| HandlerError::Malformed(format!("expected raw hex, got {}", entry)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Trie::from_indexed(values))
}

fn check_root(trie: &Trie, block: &Value, field: &str) -> Result<(), HandlerError> {
    let expected = block
        .get(field)
        .and_then(Value::as_str)
        .and_then(|root| bytes32(root).ok())
        .ok_or_else(|| HandlerError::Malformed(format!("block has no {}", field)))?;
    let computed = trie.root();
    if computed != expected {
        return Err(HandlerError::Malformed(format!(
            "rebuilt trie has root {}, header {} is {}",
            encode_hex(&computed),
            field,
            encode_hex(&expected)
        )));
    }
    Ok(())
}

fn witnesses(trie: &Trie, indices: &[u64], what: &str) -> Result<Vec<Vec<String>>, HandlerError> {
    indices
        .iter()
        .map(|&index| {
            trie.proof(&index_key(index))
                .map(|nodes| nodes.iter().map(|n| encode_hex(n)).collect())
                .ok_or_else(|| HandlerError::Malformed(format!("block has no {} at index {}", what, index)))
        })
        .collect()
}
