//! Wire model for node lists and proofs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One registered server as read from the registry contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub url: String,
    /// Signer address, checksummed.
    pub address: String,
    /// Position in the on-chain array; the key used for storage slots.
    pub index: u64,
    pub deposit: String,
    /// Opaque capability bitmask.
    pub props: String,
    pub chain_ids: Vec<String>,
    pub register_time: String,
    pub unregister_request_time: String,
    pub timeout: String,
    pub weight: String,
    pub proof_hash: String,
}

/// Point-in-time copy of the registry.
///
/// `nodes` is ordered by on-chain index. A `None` entry is a node whose read
/// failed during synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListSnapshot {
    pub total_servers: u64,
    pub contract: String,
    pub last_block_number: u64,
    pub nodes: Vec<Option<NodeRecord>>,
    pub registry_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

impl NodeListSnapshot {
    /// Position of the node signing with `address`, compared case-insensitively.
    pub fn position_of(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|n| {
            n.as_ref()
                .is_some_and(|n| n.address.eq_ignore_ascii_case(address))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofKind {
    AccountProof,
    BlockProof,
    TransactionProof,
    ReceiptProof,
    LogProof,
    CallProof,
}

/// Evidence attached to a response under `in3.proof`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub kind: ProofKind,
    /// RLP-encoded block header (0x hex) the proof is anchored to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accounts: BTreeMap<String, AccountProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_index: Option<u64>,
    /// Transaction hashes of the anchor block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<String>>,
    /// Witness under `transactionsRoot` for a transaction proof, or under
    /// `receiptsRoot` for a receipt proof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_proof: Option<Vec<String>>,
    /// Witness under `transactionsRoot` accompanying a receipt proof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_proof: Option<Vec<String>>,
    /// Anchor headers keyed by block number, one per block a log came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_proof: Option<BTreeMap<String, BlockAnchor>>,
}

impl Proof {
    pub fn new(kind: ProofKind, block: Option<String>) -> Self {
        Self {
            kind,
            block,
            accounts: BTreeMap::new(),
            tx_index: None,
            transactions: None,
            merkle_proof: None,
            tx_proof: None,
            log_proof: None,
        }
    }

    /// Look up an account entry by address regardless of hex case.
    pub fn account(&self, address: &str) -> Option<(&String, &AccountProof)> {
        self.accounts
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(address))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnchor {
    pub block: String,
    /// Receipt witnesses keyed by transaction hash.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub receipts: BTreeMap<String, ReceiptWitness>,
}

/// Inclusion of one receipt, and of the transaction that produced it, in a
/// block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptWitness {
    pub tx_hash: String,
    pub tx_index: u64,
    /// Nodes under `receiptsRoot`.
    pub proof: Vec<String>,
    /// Nodes under `transactionsRoot`.
    pub tx_proof: Vec<String>,
}

/// Account data plus Merkle witnesses, as returned by `eth_getProof`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProof {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub balance: String,
    pub nonce: String,
    pub code_hash: String,
    pub storage_hash: String,
    pub account_proof: Vec<String>,
    #[serde(default)]
    pub storage_proof: Vec<StorageProof>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub key: String,
    pub value: String,
    pub proof: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_serializes_with_wire_names() {
        let mut proof = Proof::new(ProofKind::AccountProof, Some("0xf9".into()));
        proof.accounts.insert(
            "0xabc".into(),
            AccountProof {
                address: None,
                balance: "0x0".into(),
                nonce: "0x0".into(),
                code_hash: "0x01".into(),
                storage_hash: "0x02".into(),
                account_proof: vec![],
                storage_proof: vec![StorageProof {
                    key: "0x1".into(),
                    value: "0x5".into(),
                    proof: vec![],
                }],
            },
        );

        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["type"], "accountProof");
        assert_eq!(json["accounts"]["0xabc"]["codeHash"], "0x01");
        assert_eq!(json["accounts"]["0xabc"]["storageProof"][0]["value"], "0x5");
        assert!(json.get("txIndex").is_none());
        assert!(json.get("merkleProof").is_none());
    }

    #[test]
    fn log_anchors_carry_receipt_witnesses() {
        let mut anchor = BlockAnchor { block: "0xf9".into(), receipts: BTreeMap::new() };
        assert!(serde_json::to_value(&anchor).unwrap().get("receipts").is_none());

        anchor.receipts.insert(
            "0xaa".into(),
            ReceiptWitness { tx_hash: "0xaa".into(), tx_index: 3, proof: vec!["0x01".into()], tx_proof: vec!["0x02".into()] },
        );
        let json = serde_json::to_value(&anchor).unwrap();
        assert_eq!(json["receipts"]["0xaa"]["txIndex"], 3);
        assert_eq!(json["receipts"]["0xaa"]["txProof"][0], "0x02");
    }

    #[test]
    fn holes_serialize_as_null() {
        let snapshot = NodeListSnapshot {
            total_servers: 1,
            nodes: vec![None],
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["nodes"][0].is_null());
        assert!(json.get("proof").is_none());
        assert_eq!(json["totalServers"], 1);
    }
}
