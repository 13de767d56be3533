//! Storage layout of the node registry contract.
//!
//! Slot 0 holds the dynamic array of node structs, slot 1 the node counter.
//! Each struct spans [`NODE_STRUCT_WORDS`] words starting at
//! `keccak256(slot 0) + index * 5`; word [`NODE_PROOF_WORD`] carries the
//! node's metadata commitment and is the one proven per node.

use num_bigint::BigUint;

use crate::{abi::biguint_word, keccak256};

pub const NODE_ARRAY_SLOT: u64 = 0;
pub const NODE_COUNT_SLOT: u64 = 1;
pub const NODE_STRUCT_WORDS: u64 = 5;
pub const NODE_PROOF_WORD: u64 = 4;

/// The 32-byte key of a plain storage slot.
pub fn slot_key(slot: u64) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[24..].copy_from_slice(&slot.to_be_bytes());
    key
}

/// Key of word `struct_pos` of element `index` in the dynamic array at `slot`.
pub fn array_element_key(slot: u64, index: u64, struct_size: u64, struct_pos: u64) -> [u8; 32] {
    let base = BigUint::from_bytes_be(&keccak256(&slot_key(slot)));
    let offset = BigUint::from(index) * BigUint::from(struct_size) + BigUint::from(struct_pos);
    biguint_word(&(base + offset))
}

pub fn node_key(index: u64) -> [u8; 32] {
    array_element_key(NODE_ARRAY_SLOT, index, NODE_STRUCT_WORDS, NODE_PROOF_WORD)
}

/// Keys to prove for the given node indices: the two fixed slots, then one key
/// per index in input order. Duplicates in `indices` are kept.
pub fn derive_keys(indices: &[u64]) -> Vec<[u8; 32]> {
    let mut keys = Vec::with_capacity(2 + indices.len());
    keys.push(slot_key(NODE_ARRAY_SLOT));
    keys.push(slot_key(NODE_COUNT_SLOT));
    keys.extend(indices.iter().map(|i| node_key(*i)));
    keys
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn fixed_slots_come_first() {
        let keys = derive_keys(&[]);
        assert_eq!(keys, vec![slot_key(0), slot_key(1)]);
        assert_eq!(keys[1][31], 1);
    }

    #[test]
    fn first_node_key_is_array_base_plus_proof_word() {
        // keccak256(bytes32(0))
        let base = "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563";
        let mut expected = ::hex::decode(base).unwrap();
        expected[31] += 4;
        assert_eq!(node_key(0).to_vec(), expected);
    }

    #[test]
    fn keys_follow_input_order() {
        let keys = derive_keys(&[7, 2]);
        assert_eq!(keys[2], node_key(7));
        assert_eq!(keys[3], node_key(2));
    }

    #[test]
    fn derivation_is_injective_on_index() {
        let keys: HashSet<[u8; 32]> = (0..500).map(node_key).collect();
        assert_eq!(keys.len(), 500);
        assert!(!keys.contains(&slot_key(0)));
        assert!(!keys.contains(&slot_key(1)));
    }
}
