//! Proof-carrying handlers, one per method family.
//!
//! Each handler relays the client's request upstream and, when the chain node
//! returns a result, attaches a [`Proof`] anchored to the block the result
//! belongs to. Upstream error responses are relayed without a proof.

use std::collections::BTreeMap;

use in3_core::{
    hex::{bytes32, encode_hex, parse_quantity},
    BlockAnchor, Proof, ProofKind, ReceiptWitness,
};
use serde_json::{json, Value};

use super::{
    builder::{BlockRef, ProofBuilder},
    tracer::CallTracer,
    witness::TrieWitness,
};
use crate::{
    context::HandlerContext,
    error::HandlerError,
    header::block_to_hex,
    request::{ClientRequest, ClientResponse},
    transport::{RpcRequest, RpcResponse},
};

fn upstream_request(request: &ClientRequest, params: Vec<Value>) -> RpcRequest {
    RpcRequest::new(&request.method, Value::Array(params))
}

fn respond(request: &ClientRequest, upstream: RpcResponse, proof: Option<Proof>) -> ClientResponse {
    let response = ClientResponse::relayed(request.id.clone(), upstream);
    match proof {
        Some(proof) if response.error.is_none() => response.with_proof(proof),
        _ => response,
    }
}

fn required_str<'r>(request: &'r ClientRequest, index: usize, what: &str) -> Result<&'r str, HandlerError> {
    request
        .param_str(index)
        .ok_or_else(|| HandlerError::InvalidParams(format!("{} requires {} as param {}", request.method, what, index)))
}

/// Pin a block parameter so the relayed result and its proof refer to the
/// same block. Tags and numbers become a concrete number; an EIP-1898
/// `blockHash` selector is kept as the client sent it.
async fn resolve_block(ctx: &HandlerContext, param: Option<&Value>) -> Result<BlockRef, HandlerError> {
    match param {
        None | Some(Value::Null) => Ok(BlockRef::Number(ctx.block_number().await?)),
        Some(Value::String(tag)) => resolve_tag(ctx, tag).await,
        Some(Value::Object(selector)) => {
            if let Some(hash) = selector.get("blockHash").and_then(Value::as_str) {
                return Ok(BlockRef::Hash {
                    hash: hash.to_string(),
                    selector: Value::Object(selector.clone()),
                });
            }
            match selector.get("blockNumber").and_then(Value::as_str) {
                Some(tag) => resolve_tag(ctx, tag).await,
                None => Err(HandlerError::InvalidParams(
                    "block selector needs blockHash or blockNumber".to_string(),
                )),
            }
        }
        Some(other) => Err(HandlerError::InvalidParams(format!("invalid block parameter {}", other))),
    }
}

async fn resolve_tag(ctx: &HandlerContext, tag: &str) -> Result<BlockRef, HandlerError> {
    match tag {
        "latest" | "pending" => Ok(BlockRef::Number(ctx.block_number().await?)),
        "earliest" => Ok(BlockRef::Number(0)),
        number if number.starts_with("0x") => parse_quantity(number)
            .map(BlockRef::Number)
            .map_err(|e| HandlerError::InvalidParams(e.to_string())),
        // safe, finalized and other node-defined tags
        named => {
            let block = ctx.fetch("eth_getBlockByNumber", json!([named, false])).await?;
            block
                .get("number")
                .and_then(Value::as_str)
                .and_then(|n| parse_quantity(n).ok())
                .map(BlockRef::Number)
                .ok_or_else(|| HandlerError::Malformed(format!("no block for tag {}", named)))
        }
    }
}

fn transaction_hashes(block: &Value) -> Vec<String> {
    block
        .get("transactions")
        .and_then(Value::as_array)
        .map(|txs| {
            txs.iter()
                .filter_map(|tx| tx.as_str().or_else(|| tx.get("hash").and_then(Value::as_str)))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Header and transaction hashes of a block, for transaction-level anchors.
fn block_anchor(kind: ProofKind, block: &Value, tx_index: Option<u64>) -> Result<Proof, HandlerError> {
    let mut proof = Proof::new(kind, Some(block_to_hex(block)?));
    proof.transactions = Some(transaction_hashes(block));
    proof.tx_index = tx_index;
    Ok(proof)
}

/// `eth_getBlockByNumber/Hash` and `eth_getBlockTransactionCountByNumber/Hash`.
pub async fn handle_block(ctx: &HandlerContext, request: &ClientRequest) -> Result<ClientResponse, HandlerError> {
    let relay = upstream_request(request, request.params.clone());

    match request.method.as_str() {
        "eth_getBlockTransactionCountByHash" | "eth_getBlockTransactionCountByNumber" => {
            let block_ref = request
                .params
                .first()
                .cloned()
                .ok_or_else(|| HandlerError::InvalidParams(format!("{} requires a block", request.method)))?;
            let fetch_method = if request.method.ends_with("ByHash") {
                "eth_getBlockByHash"
            } else {
                "eth_getBlockByNumber"
            };

            let (upstream, block) =
                futures::try_join!(ctx.relay(relay), ctx.fetch(fetch_method, json!([block_ref, false])))?;
            let proof = if block.is_object() {
                Some(block_anchor(ProofKind::BlockProof, &block, None)?)
            } else {
                None
            };
            Ok(respond(request, upstream, proof))
        }
        _ => {
            let upstream = ctx.relay(relay).await?;
            let proof = match &upstream.result {
                Some(block) if block.is_object() => {
                    Some(Proof::new(ProofKind::BlockProof, Some(block_to_hex(block)?)))
                }
                _ => None,
            };
            Ok(respond(request, upstream, proof))
        }
    }
}

/// `transactionProof` for the transaction at `tx_index` of `block`.
async fn transaction_proof(
    ctx: &HandlerContext,
    witness: &dyn TrieWitness,
    block: &Value,
    tx_index: u64,
) -> Result<Proof, HandlerError> {
    let mut proof = block_anchor(ProofKind::TransactionProof, block, Some(tx_index))?;
    let witnesses = witness.transaction_proofs(ctx, block, &[tx_index]).await?;
    proof.merkle_proof = Some(single(witnesses)?);
    Ok(proof)
}

/// `receiptProof` for the receipt at `tx_index` of `block`, carrying the
/// transaction's witness as well.
async fn receipt_proof(
    ctx: &HandlerContext,
    witness: &dyn TrieWitness,
    block: &Value,
    tx_index: u64,
) -> Result<Proof, HandlerError> {
    let mut proof = block_anchor(ProofKind::ReceiptProof, block, Some(tx_index))?;
    let indices = [tx_index];
    let (receipts, transactions) = futures::try_join!(
        witness.receipt_proofs(ctx, block, &indices),
        witness.transaction_proofs(ctx, block, &indices)
    )?;
    proof.merkle_proof = Some(single(receipts)?);
    proof.tx_proof = Some(single(transactions)?);
    Ok(proof)
}

fn single(witnesses: Vec<Vec<String>>) -> Result<Vec<String>, HandlerError> {
    witnesses
        .into_iter()
        .next()
        .ok_or_else(|| HandlerError::Malformed("trie witness is missing".to_string()))
}

/// Block and index of a transaction or receipt result; `None` while pending.
async fn containing_block(ctx: &HandlerContext, result: &Value) -> Result<Option<(Value, u64)>, HandlerError> {
    let (Some(block_hash), Some(index)) = (
        result.get("blockHash").and_then(Value::as_str),
        result.get("transactionIndex").and_then(Value::as_str),
    ) else {
        // pending transactions have no block yet
        return Ok(None);
    };
    let tx_index = parse_quantity(index).map_err(|e| HandlerError::Malformed(e.to_string()))?;

    let block = ctx.fetch("eth_getBlockByHash", json!([block_hash, false])).await?;
    if !block.is_object() {
        return Err(HandlerError::Malformed(format!("block {} not found", block_hash)));
    }
    Ok(Some((block, tx_index)))
}

/// `eth_getTransactionByHash`.
pub async fn handle_transaction(
    ctx: &HandlerContext,
    witness: &dyn TrieWitness,
    request: &ClientRequest,
) -> Result<ClientResponse, HandlerError> {
    required_str(request, 0, "a transaction hash")?;
    let upstream = ctx.relay(upstream_request(request, request.params.clone())).await?;
    let proof = match &upstream.result {
        Some(tx) if tx.is_object() => match containing_block(ctx, tx).await? {
            Some((block, tx_index)) => Some(transaction_proof(ctx, witness, &block, tx_index).await?),
            None => None,
        },
        _ => None,
    };
    Ok(respond(request, upstream, proof))
}

/// `eth_getTransactionByBlockHashAndIndex` / `...ByBlockNumberAndIndex`.
pub async fn handle_transaction_from_block(
    ctx: &HandlerContext,
    witness: &dyn TrieWitness,
    request: &ClientRequest,
) -> Result<ClientResponse, HandlerError> {
    let block_ref = required_str(request, 0, "a block")?;
    let tx_index = parse_quantity(required_str(request, 1, "a transaction index")?)
        .map_err(|e| HandlerError::InvalidParams(e.to_string()))?;
    let fetch_method = if request.method.contains("ByBlockHash") {
        "eth_getBlockByHash"
    } else {
        "eth_getBlockByNumber"
    };

    let (upstream, block) = futures::try_join!(
        ctx.relay(upstream_request(request, request.params.clone())),
        ctx.fetch(fetch_method, json!([block_ref, false]))
    )?;
    let proof = match &upstream.result {
        Some(tx) if tx.is_object() && block.is_object() => {
            Some(transaction_proof(ctx, witness, &block, tx_index).await?)
        }
        _ => None,
    };
    Ok(respond(request, upstream, proof))
}

/// `eth_getTransactionReceipt`.
pub async fn handle_receipt(
    ctx: &HandlerContext,
    witness: &dyn TrieWitness,
    request: &ClientRequest,
) -> Result<ClientResponse, HandlerError> {
    required_str(request, 0, "a transaction hash")?;
    let upstream = ctx.relay(upstream_request(request, request.params.clone())).await?;
    let proof = match &upstream.result {
        Some(receipt) if receipt.is_object() => match containing_block(ctx, receipt).await? {
            Some((block, tx_index)) => Some(receipt_proof(ctx, witness, &block, tx_index).await?),
            None => None,
        },
        _ => None,
    };
    Ok(respond(request, upstream, proof))
}

/// Transactions that emitted `logs`, as `tx index -> tx hash` per block number.
fn log_sources(logs: &[Value]) -> Result<BTreeMap<String, BTreeMap<u64, String>>, HandlerError> {
    let mut blocks: BTreeMap<String, BTreeMap<u64, String>> = BTreeMap::new();
    for log in logs {
        let Some(number) = log.get("blockNumber").and_then(Value::as_str) else {
            // pending logs
            continue;
        };
        let txs = blocks.entry(number.to_string()).or_default();
        if let (Some(index), Some(hash)) = (
            log.get("transactionIndex").and_then(Value::as_str),
            log.get("transactionHash").and_then(Value::as_str),
        ) {
            let index = parse_quantity(index).map_err(|e| HandlerError::Malformed(e.to_string()))?;
            txs.insert(index, hash.to_string());
        }
    }
    Ok(blocks)
}

/// `eth_getLogs`: per block that produced a log, its header and the receipt
/// and transaction witnesses of every emitting transaction.
pub async fn handle_logs(
    ctx: &HandlerContext,
    witness: &dyn TrieWitness,
    request: &ClientRequest,
) -> Result<ClientResponse, HandlerError> {
    let upstream = ctx.relay(upstream_request(request, request.params.clone())).await?;
    let Some(logs) = upstream.result.as_ref().and_then(Value::as_array) else {
        return Ok(respond(request, upstream, None));
    };

    let sources = log_sources(logs)?;
    let requests = sources
        .keys()
        .map(|n| RpcRequest::new("eth_getBlockByNumber", json!([n, false])))
        .collect();
    let blocks = ctx.fetch_all(requests).await?;

    let anchors = futures::future::try_join_all(sources.into_iter().zip(blocks).map(
        |((number, txs), block)| async move {
            let header = block_to_hex(&block)?;
            let indices: Vec<u64> = txs.keys().copied().collect();
            let (receipts, transactions) = futures::try_join!(
                witness.receipt_proofs(ctx, &block, &indices),
                witness.transaction_proofs(ctx, &block, &indices)
            )?;
            let receipts = txs
                .into_iter()
                .zip(receipts.into_iter().zip(transactions))
                .map(|((tx_index, tx_hash), (proof, tx_proof))| {
                    let entry = ReceiptWitness { tx_hash: tx_hash.clone(), tx_index, proof, tx_proof };
                    (tx_hash, entry)
                })
                .collect();
            Ok::<_, HandlerError>((number, BlockAnchor { block: header, receipts }))
        },
    ))
    .await?;

    let mut proof = Proof::new(ProofKind::LogProof, None);
    proof.log_proof = Some(anchors.into_iter().collect());
    Ok(respond(request, upstream, Some(proof)))
}

/// `eth_getBalance`, `eth_getCode`, `eth_getTransactionCount`, `eth_getStorageAt`.
pub async fn handle_account(ctx: &HandlerContext, request: &ClientRequest) -> Result<ClientResponse, HandlerError> {
    let address = required_str(request, 0, "an address")?.to_ascii_lowercase();
    let (keys, block_pos) = if request.method == "eth_getStorageAt" {
        let slot = required_str(request, 1, "a storage position")?;
        let key = bytes32(slot).map_err(|e| HandlerError::InvalidParams(e.to_string()))?;
        (vec![encode_hex(&key)], 2)
    } else {
        (Vec::new(), 1)
    };

    let block = resolve_block(ctx, request.params.get(block_pos)).await?;
    let mut params = request.params.clone();
    params.resize(block_pos + 1, Value::Null);
    params[block_pos] = block.param();

    let builder = ProofBuilder::new(ctx);
    let accounts = [(address, keys)];
    let (upstream, (header, proofs)) = futures::try_join!(
        ctx.relay(upstream_request(request, params)),
        builder.accounts_at(&accounts, &block)
    )?;

    let mut proof = Proof::new(ProofKind::AccountProof, Some(header));
    proof.accounts = proofs;
    Ok(respond(request, upstream, Some(proof)))
}

/// `eth_call`: proves every account the tracer reports, plus the callee.
pub async fn handle_call(
    ctx: &HandlerContext,
    tracer: &dyn CallTracer,
    request: &ClientRequest,
) -> Result<ClientResponse, HandlerError> {
    let tx = request
        .params
        .first()
        .cloned()
        .ok_or_else(|| HandlerError::InvalidParams("eth_call requires a transaction".to_string()))?;
    let block = resolve_block(ctx, request.params.get(1)).await?;

    let mut touched: BTreeMap<String, Vec<String>> = tracer
        .touched_accounts(ctx, &tx, &block.param())
        .await?
        .into_iter()
        .map(|t| (t.address.to_ascii_lowercase(), t.storage_keys))
        .collect();
    if let Some(to) = tx.get("to").and_then(Value::as_str) {
        touched.entry(to.to_ascii_lowercase()).or_default();
    }
    let accounts: Vec<(String, Vec<String>)> = touched.into_iter().collect();

    let builder = ProofBuilder::new(ctx);
    let (upstream, (header, proofs)) = futures::try_join!(
        ctx.relay(upstream_request(request, vec![tx.clone(), block.param()])),
        builder.accounts_at(&accounts, &block)
    )?;

    tracing::debug!(accounts = proofs.len(), %block, "built call proof");
    let mut proof = Proof::new(ProofKind::CallProof, Some(header));
    proof.accounts = proofs;
    Ok(respond(request, upstream, Some(proof)))
}
