//! Rebuilds the node-list snapshot from the registry contract.

use std::sync::Arc;

use in3_core::{
    abi::decode_hex_output,
    derive_keys,
    hex::{encode_hex, quantity, to_checksum_address},
    AbiValue, NodeListSnapshot, NodeRecord, Signature,
};
use num_traits::ToPrimitive;

use crate::{
    context::{call_params, HandlerContext},
    error::HandlerError,
    proof::ProofBuilder,
    transport::{RpcRequest, RpcResponse},
};

const REGISTRY_ID: &str = "registryId():(bytes32)";
const TOTAL_NODES: &str = "totalNodes():(uint)";
const NODE: &str = "nodes(uint):(string,uint,uint64,uint64,uint64,uint64,uint64,address,bytes32)";

pub struct NodeListSynchronizer<'a> {
    ctx: &'a HandlerContext,
}

impl<'a> NodeListSynchronizer<'a> {
    pub fn new(ctx: &'a HandlerContext) -> Self {
        Self { ctx }
    }

    /// Read the whole registry, prove it and publish the new snapshot.
    ///
    /// `last_block` pins the snapshot height; otherwise the current tip is
    /// used. Nodes whose read fails become holes rather than failing the sync.
    pub async fn sync(&self, last_block: Option<u64>) -> Result<Arc<NodeListSnapshot>, HandlerError> {
        let contract = self.ctx.config.registry.clone();

        let registry_id = self.registry_id(&contract).await.map_err(HandlerError::sync)?;
        let total_servers = self.total_nodes(&contract).await.map_err(HandlerError::sync)?;
        let last_block_number = match last_block {
            Some(block) => block,
            None => self.ctx.block_number().await.map_err(HandlerError::sync)?,
        };

        let nodes = self
            .read_nodes(&contract, total_servers, last_block_number)
            .await
            .map_err(HandlerError::sync)?;

        let indices: Vec<u64> = (0..total_servers).collect();
        let proof = ProofBuilder::new(self.ctx)
            .build_account_proof(&contract, &derive_keys(&indices), Some(last_block_number))
            .await
            .map_err(HandlerError::sync)?;

        let holes = nodes.iter().filter(|n| n.is_none()).count();
        tracing::info!(
            %contract,
            total_servers,
            holes,
            last_block_number,
            "node list updated"
        );

        let snapshot = NodeListSnapshot {
            total_servers,
            contract,
            last_block_number,
            nodes,
            registry_id,
            proof: Some(proof),
        };
        Ok(self.ctx.replace_node_list(snapshot).await)
    }

    async fn registry_id(&self, contract: &str) -> Result<String, HandlerError> {
        if let Some(id) = self.ctx.registry_id() {
            return Ok(id.to_string());
        }

        let signature = Signature::parse(REGISTRY_ID)?;
        let id = match self.ctx.call_contract(contract, &signature, &[], "latest").await?.first() {
            Some(AbiValue::FixedBytes(bytes)) => encode_hex(bytes),
            other => {
                return Err(HandlerError::Malformed(format!("registryId() returned {:?}", other)));
            }
        };
        self.ctx.set_registry_id(id.clone());
        Ok(id)
    }

    async fn total_nodes(&self, contract: &str) -> Result<u64, HandlerError> {
        let signature = Signature::parse(TOTAL_NODES)?;
        match self.ctx.call_contract(contract, &signature, &[], "latest").await?.first() {
            Some(AbiValue::Uint(count)) => count
                .to_u64()
                .ok_or_else(|| HandlerError::Malformed(format!("totalNodes() returned {}", count))),
            other => Err(HandlerError::Malformed(format!("totalNodes() returned {:?}", other))),
        }
    }

    async fn read_nodes(
        &self,
        contract: &str,
        count: u64,
        block: u64,
    ) -> Result<Vec<Option<NodeRecord>>, HandlerError> {
        let signature = Signature::parse(NODE)?;
        let block = quantity(block);
        let requests = (0..count)
            .map(|i| {
                let args = [AbiValue::Uint(i.into())];
                Ok(RpcRequest::new("eth_call", call_params(contract, &signature, &args, &block)?))
            })
            .collect::<Result<Vec<_>, HandlerError>>()?;

        let responses = self.ctx.relay_batch(requests).await?;
        Ok((0..count)
            .map(|index| {
                let response = responses.get(index as usize)?;
                match self.decode_node(&signature, index, response) {
                    Ok(node) => Some(node),
                    Err(e) => {
                        tracing::warn!(index, error = %e, "skipping unreadable registry entry");
                        None
                    }
                }
            })
            .collect())
    }

    fn decode_node(&self, signature: &Signature, index: u64, response: &RpcResponse) -> Result<NodeRecord, HandlerError> {
        if let Some(error) = &response.error {
            return Err(HandlerError::Upstream {
                method: "eth_call".to_string(),
                payload: error.clone(),
                request: serde_json::Value::Null,
            });
        }
        let raw = response
            .result
            .as_ref()
            .and_then(|r| r.as_str())
            .ok_or_else(|| HandlerError::Malformed("nodes() returned no data".to_string()))?;

        match decode_hex_output(signature, raw)?.as_slice() {
            [AbiValue::String(url), AbiValue::Uint(deposit), AbiValue::Uint(timeout), AbiValue::Uint(register_time), AbiValue::Uint(unregister_time), AbiValue::Uint(props), AbiValue::Uint(weight), AbiValue::Address(signer), AbiValue::FixedBytes(proof_hash)] => {
                Ok(NodeRecord {
                    url: url.clone(),
                    address: to_checksum_address(signer),
                    index,
                    deposit: deposit.to_string(),
                    props: props.to_string(),
                    chain_ids: vec![self.ctx.config.chain_id.clone()],
                    register_time: register_time.to_string(),
                    unregister_request_time: unregister_time.to_string(),
                    timeout: timeout.to_string(),
                    weight: weight.to_string(),
                    proof_hash: encode_hex(proof_hash),
                })
            }
            other => Err(HandlerError::Malformed(format!("unexpected nodes() layout: {:?}", other))),
        }
    }
}
