//! Pure building blocks for the INCUBED node: contract-call encoding, registry
//! storage layout, node-list sampling, Merkle-Patricia witnesses and the wire
//! proof model.
//!
//! Nothing in this crate performs I/O; the server crate drives these functions
//! with data fetched from the upstream chain node.

pub mod abi;
pub mod hex;
pub mod rlp;
pub mod sampling;
pub mod storage;
pub mod trie;
pub mod types;

pub use abi::{AbiError, AbiType, AbiValue, Signature};
pub use sampling::{sample, SampleError};
pub use storage::derive_keys;
pub use trie::Trie;
pub use types::{AccountProof, BlockAnchor, NodeListSnapshot, NodeRecord, Proof, ProofKind, ReceiptWitness, StorageProof};

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut keccak = Keccak::v256();
    keccak.update(data);
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            ::hex::encode(keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
