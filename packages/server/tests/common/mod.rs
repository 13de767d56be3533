//! In-memory chain node for exercising the handler without a network.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use in3_core::{
    abi::encode,
    hex::{encode_hex, parse_hex_bytes, parse_quantity, quantity},
    keccak256, AbiType, AbiValue, Signature, Trie,
};
use in3_server::{
    context::{ChainConfig, HandlerContext},
    handler::EthHandler,
    header::block_to_hex,
    transport::{RpcRequest, RpcResponse, Transport, TransportError},
};
use serde_json::{json, Value};

pub const REGISTRY: &str = "0x6c095a05764a23156efd9d603eada144a9b1af33";
pub const TIP: u64 = 0x2000;
pub const REGISTRY_ID: [u8; 32] = [0x42; 32];

pub fn node_signer(index: u64) -> [u8; 20] {
    let mut address = [0u8; 20];
    address[12..].copy_from_slice(&(0x1000 + index).to_be_bytes());
    address
}

pub const TXS_PER_BLOCK: u64 = 2;

/// Consensus encoding of transaction `index` in block `number`.
pub fn raw_transaction(number: u64, index: u64) -> Vec<u8> {
    let mut raw = vec![0x02];
    raw.extend(number.to_be_bytes());
    raw.extend(index.to_be_bytes());
    raw.extend([0xee; 40]);
    raw
}

/// Consensus encoding of the receipt of transaction `index` in block `number`.
pub fn raw_receipt(number: u64, index: u64) -> Vec<u8> {
    let mut raw = vec![0x02];
    raw.extend(number.to_be_bytes());
    raw.extend(index.to_be_bytes());
    raw.extend([0xcc; 40]);
    raw
}

fn block_content(number: u64, raw: fn(u64, u64) -> Vec<u8>) -> Vec<Vec<u8>> {
    (0..TXS_PER_BLOCK).map(|i| raw(number, i)).collect()
}

/// Deterministic block `number` with transaction hashes. Its roots and
/// `hash` match the mock's raw transactions, receipts and header.
pub fn block(number: u64) -> Value {
    let transactions = block_content(number, raw_transaction);
    let receipts = block_content(number, raw_receipt);
    let tx_hashes: Vec<String> = transactions.iter().map(|tx| encode_hex(&keccak256(tx))).collect();

    let mut block = json!({
        "number": quantity(number),
        "parentHash": format!("0x{:064x}", number.saturating_sub(1)),
        "sha3Uncles": format!("0x{}", "1d".repeat(32)),
        "miner": format!("0x{}", "00".repeat(20)),
        "stateRoot": format!("0x{}", "aa".repeat(32)),
        "transactionsRoot": encode_hex(&Trie::from_indexed(transactions).root()),
        "receiptsRoot": encode_hex(&Trie::from_indexed(receipts).root()),
        "logsBloom": format!("0x{}", "00".repeat(256)),
        "difficulty": "0x0",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "timestamp": "0x6553f100",
        "extraData": "0x",
        "mixHash": format!("0x{}", "dd".repeat(32)),
        "nonce": "0x0000000000000000",
        "baseFeePerGas": "0x7",
        "transactions": tx_hashes,
    });
    let header = parse_hex_bytes(&block_to_hex(&block).unwrap()).unwrap();
    block["hash"] = json!(encode_hex(&keccak256(&header)));
    block
}

fn selector(signature: &str) -> String {
    encode_hex(&Signature::parse(signature).unwrap().selector())
}

/// Scriptable chain node. Unscripted methods answer from a small built-in
/// model: blocks, `eth_getProof`, and the registry contract.
pub struct MockChain {
    pub node_count: u64,
    /// Node indices whose `nodes(uint256)` read fails.
    pub broken_nodes: HashSet<u64>,
    overrides: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<RpcRequest>>,
    /// Hashes of every block served so far.
    hashes: Mutex<HashMap<String, u64>>,
}

impl MockChain {
    pub fn new(node_count: u64) -> Self {
        Self {
            node_count,
            broken_nodes: HashSet::new(),
            overrides: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_broken_node(mut self, index: u64) -> Self {
        self.broken_nodes.insert(index);
        self
    }

    /// Answer `method` with `response` (`{"result": ..}` or `{"error": ..}`).
    pub fn respond(&self, method: &str, response: Value) {
        self.overrides.lock().unwrap().insert(method.to_string(), response);
    }

    pub fn calls(&self, method: &str) -> Vec<RpcRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub fn eth_calls_to(&self, data_prefix: &str) -> usize {
        self.calls("eth_call")
            .iter()
            .filter(|r| {
                r.params[0]["data"]
                    .as_str()
                    .is_some_and(|d| d.starts_with(data_prefix))
            })
            .count()
    }

    fn answer(&self, request: &RpcRequest) -> RpcResponse {
        self.calls.lock().unwrap().push(request.clone());
        let id = request.id.clone();

        if let Some(scripted) = self.overrides.lock().unwrap().get(&request.method) {
            return match scripted.get("error") {
                Some(error) => RpcResponse::error(id, error.clone()),
                None => RpcResponse::result(id, scripted["result"].clone()),
            };
        }

        match request.method.as_str() {
            "eth_blockNumber" => RpcResponse::result(id, json!(quantity(TIP))),
            "eth_getBlockByNumber" => {
                let number = match request.params[0].as_str() {
                    Some("latest") | None => TIP,
                    Some(n) => parse_quantity(n).unwrap_or(TIP),
                };
                RpcResponse::result(id, self.serve_block(number))
            }
            "eth_getBlockByHash" => {
                let number = self.number_of(&request.params[0]).unwrap_or(TIP - 1);
                RpcResponse::result(id, self.serve_block(number))
            }
            "eth_getRawTransactionByBlockHashAndIndex" => {
                let index = request.params[1].as_str().and_then(|i| parse_quantity(i).ok());
                let raw = match (self.number_of(&request.params[0]), index) {
                    (Some(number), Some(index)) if index < TXS_PER_BLOCK => {
                        json!(encode_hex(&raw_transaction(number, index)))
                    }
                    _ => Value::Null,
                };
                RpcResponse::result(id, raw)
            }
            "debug_getRawReceipts" => match self.number_of(&request.params[0]) {
                Some(number) => {
                    let receipts: Vec<String> =
                        block_content(number, raw_receipt).iter().map(|r| encode_hex(r)).collect();
                    RpcResponse::result(id, json!(receipts))
                }
                None => RpcResponse::error(id, json!({"code": -32000, "message": "block not found"})),
            },
            "eth_getProof" => {
                let keys = request.params[1].as_array().cloned().unwrap_or_default();
                let storage: Vec<Value> = keys
                    .iter()
                    .map(|k| json!({"key": k, "value": "0x1", "proof": ["0xe2"]}))
                    .collect();
                RpcResponse::result(
                    id,
                    json!({
                        "address": request.params[0],
                        "balance": "0x64",
                        "nonce": "0x1",
                        "codeHash": format!("0x{}", "c0".repeat(32)),
                        "storageHash": format!("0x{}", "57".repeat(32)),
                        "accountProof": ["0xf901", "0xf851"],
                        "storageProof": storage,
                    }),
                )
            }
            "eth_call" => self.registry_call(id, &request.params[0]),
            "debug_traceCall" => {
                let to = request.params[0]["to"].clone();
                let mut trace = serde_json::Map::new();
                trace.insert(
                    to.as_str().unwrap_or_default().to_string(),
                    json!({"balance": "0x0", "storage": {format!("0x{:064x}", 3): "0x1"}}),
                );
                RpcResponse::result(id, Value::Object(trace))
            }
            _ => RpcResponse::error(id, json!({"code": -32601, "message": "method not found"})),
        }
    }

    fn serve_block(&self, number: u64) -> Value {
        let block = block(number);
        if let Some(hash) = block["hash"].as_str() {
            self.hashes.lock().unwrap().insert(hash.to_string(), number);
        }
        block
    }

    fn number_of(&self, hash: &Value) -> Option<u64> {
        let hash = hash.as_str()?;
        self.hashes.lock().unwrap().get(hash).copied()
    }

    fn registry_call(&self, id: Value, tx: &Value) -> RpcResponse {
        let data = tx["data"].as_str().unwrap_or_default().to_string();
        let word = |bytes: Vec<u8>| RpcResponse::result(id.clone(), json!(encode_hex(&bytes)));

        if data.starts_with(&selector("registryId()")) {
            return word(REGISTRY_ID.to_vec());
        }
        if data.starts_with(&selector("totalNodes()")) {
            return word(encode(&[AbiType::Uint(256)], &[AbiValue::Uint(self.node_count.into())]).unwrap());
        }
        if data.starts_with(&selector("nodes(uint256)")) {
            let arg = parse_hex_bytes(&data[10..]).unwrap();
            let index = u64::from_be_bytes(arg[24..32].try_into().unwrap());
            if self.broken_nodes.contains(&index) {
                return RpcResponse::error(id, json!({"code": -32000, "message": "execution reverted"}));
            }
            return word(node_output(index));
        }
        RpcResponse::result(id, json!(format!("0x{:064x}", 500)))
    }
}

fn node_output(index: u64) -> Vec<u8> {
    let types = [
        AbiType::String,
        AbiType::Uint(256),
        AbiType::Uint(64),
        AbiType::Uint(64),
        AbiType::Uint(64),
        AbiType::Uint(64),
        AbiType::Uint(64),
        AbiType::Address,
        AbiType::FixedBytes(32),
    ];
    let values = [
        AbiValue::String(format!("https://in3-{}.example.org", index)),
        AbiValue::Uint(10_000u64.into()),
        AbiValue::Uint(3_600u64.into()),
        AbiValue::Uint(1_560_000_000u64.into()),
        AbiValue::Uint(0u64.into()),
        AbiValue::Uint(0xffffu64.into()),
        AbiValue::Uint(1u64.into()),
        AbiValue::Address(node_signer(index)),
        AbiValue::FixedBytes(vec![index as u8; 32]),
    ];
    encode(&types, &values).unwrap()
}

pub struct MockTransport(pub Arc<MockChain>);

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, TransportError> {
        Ok(self.0.answer(&request))
    }

    async fn call_batch(&self, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>, TransportError> {
        Ok(requests.iter().map(|r| self.0.answer(r)).collect())
    }
}

pub fn config() -> ChainConfig {
    ChainConfig {
        chain_id: "0x1".to_string(),
        registry: REGISTRY.to_string(),
        rpc_url: "http://localhost:8545".to_string(),
        min_block_height: 6,
    }
}

pub fn handler(chain: Arc<MockChain>) -> EthHandler {
    let ctx = Arc::new(HandlerContext::new(config(), Arc::new(MockTransport(chain))));
    EthHandler::new(ctx)
}
