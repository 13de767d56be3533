//! Request dispatcher for one chain.
//!
//! [`EthHandler::handle`] runs every client request through the same
//! pipeline: `latestBlock` normalization, `in3_call` expansion, admission
//! limits, proof routing and finally a plain relay. Failures at any stage are
//! rendered as a JSON-RPC error carrying the request id.

mod call;
mod limits;
mod path;

use std::sync::Arc;

use in3_core::hex::quantity;
use serde_json::Value;

pub use call::expand_in3_call;
pub use limits::{check_limits, MAX_CALL_GAS, MAX_LOG_RANGE, MAX_LOG_RANGE_WITH_PROOF};
pub use path::request_from_path;

use crate::{
    context::HandlerContext,
    error::HandlerError,
    nodelist::handle_node_list,
    proof::{handlers, CallTracer, PrestateTracer, RawTrieWitness, TrieWitness},
    request::{ClientRequest, ClientResponse, In3Params},
    signer::BlockSigner,
    transport::RpcRequest,
};

const NO_UNLOCKED_KEY: &str = "a in3 node can not sign messages, because no unlocked key is allowed";
const NO_MINING: &str = "in3 cannot be used for mining since there is no coinbase";

pub struct EthHandler {
    ctx: Arc<HandlerContext>,
    tracer: Arc<dyn CallTracer>,
    witness: Arc<dyn TrieWitness>,
    signer: Option<Arc<dyn BlockSigner>>,
}

impl EthHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self {
            ctx,
            tracer: Arc::new(PrestateTracer),
            witness: Arc::new(RawTrieWitness),
            signer: None,
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn CallTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_witness(mut self, witness: Arc<dyn TrieWitness>) -> Self {
        self.witness = witness;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn BlockSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.ctx
    }

    /// Serve one request. Never fails: errors become error responses.
    pub async fn handle(&self, request: ClientRequest) -> ClientResponse {
        let id = request.id.clone();
        let method = request.method.clone();

        match self.try_handle(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%method, error = %e, "request failed");
                ClientResponse::error(id, e.to_rpc_error())
            }
        }
    }

    /// Serve a batch concurrently, keeping the request order.
    pub async fn handle_batch(&self, requests: Vec<ClientRequest>) -> Vec<ClientResponse> {
        futures::future::join_all(requests.into_iter().map(|r| self.handle(r))).await
    }

    async fn try_handle(&self, mut request: ClientRequest) -> Result<ClientResponse, HandlerError> {
        self.normalize(&mut request).await?;

        if request.method == "in3_call" {
            expand_in3_call(&mut request)?;
        }
        check_limits(&self.ctx, &request).await?;

        tracing::debug!(
            method = %request.method,
            verification = request.verification(),
            "dispatching request"
        );
        let mut response = self.route(&request).await?;
        if let Some(transform) = &request.transform {
            if response.error.is_none() {
                transform.apply(&mut response)?;
            }
        }
        Ok(response)
    }

    /// Apply `in3.latestBlock` and fill in the default `in3` member.
    async fn normalize(&self, request: &mut ClientRequest) -> Result<(), HandlerError> {
        let offset = request.in3.as_ref().and_then(|in3| in3.latest_block).unwrap_or(0);
        if offset > 0 {
            if let Some(pos) = request.params.iter().position(|p| p.as_str() == Some("latest")) {
                let tip = self.ctx.block_number().await?;
                request.params[pos] = Value::String(quantity(tip.saturating_sub(offset)));
            }
        }

        let in3 = request.in3.get_or_insert_with(|| In3Params {
            chain_id: Some(self.ctx.config.chain_id.clone()),
            ..In3Params::default()
        });
        in3.verification.get_or_insert_with(|| "never".to_string());
        Ok(())
    }

    async fn route(&self, request: &ClientRequest) -> Result<ClientResponse, HandlerError> {
        let ctx = self.ctx.as_ref();
        let witness = self.witness.as_ref();

        if request.wants_proof() {
            match request.method.as_str() {
                "eth_getBlockByNumber"
                | "eth_getBlockByHash"
                | "eth_getBlockTransactionCountByHash"
                | "eth_getBlockTransactionCountByNumber" => return handlers::handle_block(ctx, request).await,
                "eth_getTransactionByBlockHashAndIndex" | "eth_getTransactionByBlockNumberAndIndex" => {
                    return handlers::handle_transaction_from_block(ctx, witness, request).await;
                }
                "eth_getTransactionByHash" => return handlers::handle_transaction(ctx, witness, request).await,
                "eth_getTransactionReceipt" => return handlers::handle_receipt(ctx, witness, request).await,
                "eth_getLogs" => return handlers::handle_logs(ctx, witness, request).await,
                "eth_call" => return handlers::handle_call(ctx, self.tracer.as_ref(), request).await,
                "eth_getCode" | "eth_getBalance" | "eth_getTransactionCount" | "eth_getStorageAt" => {
                    return handlers::handle_account(ctx, request).await;
                }
                _ => {}
            }
        }

        match request.method.as_str() {
            "eth_sign" | "eth_sendTransaction" => Err(HandlerError::Refused(NO_UNLOCKED_KEY)),
            "eth_submitWork" | "eth_submitHashrate" => Err(HandlerError::Refused(NO_MINING)),
            "in3_sign" => {
                let signer = self
                    .signer
                    .as_ref()
                    .ok_or_else(|| HandlerError::Signer("no signer configured".to_string()))?;
                let signed = signer.sign(ctx, &request.params).await?;
                Ok(ClientResponse::result(request.id.clone(), signed))
            }
            "in3_nodeList" => handle_node_list(ctx, request).await,
            method => {
                let upstream = ctx
                    .relay(RpcRequest::new(method, Value::Array(request.params.clone())))
                    .await?;
                Ok(ClientResponse::relayed(request.id.clone(), upstream))
            }
        }
    }
}
