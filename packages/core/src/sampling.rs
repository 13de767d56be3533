//! Seeded selection of a node subset and narrowing of the registry proof.

use std::collections::{BTreeMap, HashSet};

use crate::{
    hex::{bytes32, encode_hex},
    keccak256,
    storage::derive_keys,
    types::{AccountProof, NodeListSnapshot, Proof},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleError {
    /// Required addresses that are not in the node list, all of them.
    MissingAddress(Vec<String>),
    /// The parent proof lacks an entry the narrowed proof must contain.
    IncompleteProof(String),
}

impl core::fmt::Display for SampleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingAddress(addresses) => {
                write!(f, "address {} not registered", addresses.join(", "))
            }
            Self::IncompleteProof(what) => write!(f, "node list proof has no entry for {}", what),
        }
    }
}

impl std::error::Error for SampleError {}

/// Stream of bounded integers driven only by re-hashing a 32-byte seed.
struct SeedStream {
    state: [u8; 32],
}

impl SeedStream {
    fn new(seed: [u8; 32]) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = keccak256(&self.state);
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.state[..8]);
        u64::from_be_bytes(word)
    }

    /// Uniform value in `0..bound`; draws above the largest multiple of
    /// `bound` are rejected.
    fn below(&mut self, bound: u64) -> u64 {
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let v = self.next_u64();
            if v < zone {
                return v % bound;
            }
        }
    }
}

/// Pick `limit` distinct entries of `population`.
///
/// `required` entries come first, in their given order and without
/// duplicates, and count towards `limit`. The remaining slots are filled by a
/// partial Fisher–Yates shuffle of the other entries, so the same
/// `(population, limit, seed, required)` always yields the same selection.
pub fn select_indexes(
    population: &[usize],
    limit: usize,
    seed: &[u8; 32],
    required: &[usize],
) -> Vec<usize> {
    let mut result = Vec::with_capacity(limit.max(required.len()));
    let mut taken = HashSet::new();
    for r in required {
        if taken.insert(*r) {
            result.push(*r);
        }
    }

    let mut candidates: Vec<usize> = population
        .iter()
        .copied()
        .filter(|i| !taken.contains(i))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let wanted = limit.saturating_sub(result.len()).min(candidates.len());
    let mut stream = SeedStream::new(*seed);
    for k in 0..wanted {
        let j = k + stream.below((candidates.len() - k) as u64) as usize;
        candidates.swap(k, j);
        result.push(candidates[k]);
    }
    result
}

/// Derive a snapshot holding at most `limit` nodes.
///
/// `limit == 0` or a limit covering the whole list returns a clone. Otherwise
/// every address in `required` must be registered; the error lists all that
/// are not. Holes left by failed node reads are never drawn.
pub fn sample(
    snapshot: &NodeListSnapshot,
    limit: usize,
    seed: &[u8; 32],
    required: &[String],
    include_proof: bool,
) -> Result<NodeListSnapshot, SampleError> {
    if limit == 0 || limit >= snapshot.nodes.len() {
        let mut full = snapshot.clone();
        if !include_proof {
            full.proof = None;
        }
        return Ok(full);
    }

    let mut missing = Vec::new();
    let mut required_positions = Vec::with_capacity(required.len());
    for address in required {
        match snapshot.position_of(address) {
            Some(pos) => required_positions.push(pos),
            None => missing.push(address.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(SampleError::MissingAddress(missing));
    }

    let population: Vec<usize> = snapshot
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(pos, n)| n.as_ref().map(|_| pos))
        .collect();
    let selected = select_indexes(&population, limit, seed, &required_positions);

    let nodes: Vec<_> = selected
        .iter()
        .map(|pos| snapshot.nodes[*pos].clone())
        .collect();
    let indices: Vec<u64> = nodes.iter().flatten().map(|n| n.index).collect();

    let proof = match (&snapshot.proof, include_proof) {
        (Some(parent), true) => Some(narrow_proof(parent, &snapshot.contract, &indices)?),
        _ => None,
    };

    Ok(NodeListSnapshot {
        total_servers: snapshot.total_servers,
        contract: snapshot.contract.clone(),
        last_block_number: snapshot.last_block_number,
        nodes,
        registry_id: snapshot.registry_id.clone(),
        proof,
    })
}

/// Keep only the registry account, with storage entries for the fixed slots
/// and the given node indices. Keys are matched by 32-byte value, so minimal
/// and padded hex spellings of the same key are equal.
fn narrow_proof(parent: &Proof, contract: &str, indices: &[u64]) -> Result<Proof, SampleError> {
    let (address, account) = parent
        .account(contract)
        .ok_or_else(|| SampleError::IncompleteProof(format!("account {}", contract)))?;

    let storage_proof = derive_keys(indices)
        .iter()
        .map(|key| {
            account
                .storage_proof
                .iter()
                .find(|entry| bytes32(&entry.key).is_ok_and(|k| k == *key))
                .cloned()
                .ok_or_else(|| SampleError::IncompleteProof(format!("storage key {}", encode_hex(key))))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut narrowed = parent.clone();
    narrowed.accounts = BTreeMap::from([(
        address.clone(),
        AccountProof {
            storage_proof,
            ..account.clone()
        },
    )]);
    Ok(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hex::to_min_hex,
        types::{NodeRecord, ProofKind, StorageProof},
    };

    const CONTRACT: &str = "0x6C095A05764A23156eFD9D603eaDa144a9B1AF33";

    fn node(index: u64) -> NodeRecord {
        NodeRecord {
            url: format!("https://node{}.example.org", index),
            address: format!("0x{:040x}", index + 1),
            index,
            deposit: "10000".into(),
            props: "65535".into(),
            chain_ids: vec!["0x1".into()],
            register_time: "1560000000".into(),
            unregister_request_time: "0".into(),
            timeout: "3600".into(),
            weight: "1".into(),
            proof_hash: format!("0x{:064x}", index),
        }
    }

    fn snapshot(count: u64) -> NodeListSnapshot {
        let all: Vec<u64> = (0..count).collect();
        let storage_proof = derive_keys(&all)
            .iter()
            .enumerate()
            .map(|(i, k)| StorageProof {
                key: to_min_hex(&encode_hex(k)),
                value: format!("0x{:x}", i),
                proof: vec![format!("0xf8{:02x}", i)],
            })
            .collect();

        let mut proof = Proof::new(ProofKind::AccountProof, Some("0xf90200".into()));
        proof.accounts.insert(
            CONTRACT.into(),
            AccountProof {
                address: None,
                balance: "0x0".into(),
                nonce: "0x1".into(),
                code_hash: "0xc0de".into(),
                storage_hash: "0x5707".into(),
                account_proof: vec!["0xf851".into()],
                storage_proof,
            },
        );

        NodeListSnapshot {
            total_servers: count,
            contract: CONTRACT.into(),
            last_block_number: 1234,
            nodes: all.iter().map(|i| Some(node(*i))).collect(),
            registry_id: format!("0x{}", "ab".repeat(32)),
            proof: Some(proof),
        }
    }

    fn seed(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn zero_limit_returns_full_list_with_proof() {
        let full = snapshot(10);
        let out = sample(&full, 0, &seed(1), &[], true).unwrap();
        assert_eq!(out, full);
    }

    #[test]
    fn full_clone_can_strip_proof() {
        let full = snapshot(4);
        let out = sample(&full, 4, &seed(1), &[], false).unwrap();
        assert_eq!(out.nodes, full.nodes);
        assert!(out.proof.is_none());
    }

    #[test]
    fn returns_exactly_limit_distinct_members() {
        let full = snapshot(25);
        for limit in 1..25 {
            let out = sample(&full, limit, &seed(limit as u8), &[], false).unwrap();
            assert_eq!(out.nodes.len(), limit);
            let indices: HashSet<u64> = out.nodes.iter().flatten().map(|n| n.index).collect();
            assert_eq!(indices.len(), limit);
            assert!(out.nodes.iter().flatten().all(|n| full.nodes.contains(&Some(n.clone()))));
        }
    }

    #[test]
    fn required_addresses_are_always_included() {
        let full = snapshot(20);
        let required = vec![node(17).address, node(3).address.to_uppercase().replace("0X", "0x")];
        let out = sample(&full, 5, &seed(9), &required, false).unwrap();
        assert_eq!(out.nodes.len(), 5);
        assert_eq!(out.nodes[0].as_ref().unwrap().index, 17);
        assert_eq!(out.nodes[1].as_ref().unwrap().index, 3);
        let indices: HashSet<u64> = out.nodes.iter().flatten().map(|n| n.index).collect();
        assert_eq!(indices.len(), 5);
    }

    #[test]
    fn duplicate_required_addresses_are_not_repeated() {
        let full = snapshot(10);
        let required = vec![node(4).address, node(4).address];
        let out = sample(&full, 3, &seed(2), &required, false).unwrap();
        let positions: Vec<u64> = out.nodes.iter().flatten().map(|n| n.index).collect();
        assert_eq!(positions.iter().filter(|i| **i == 4).count(), 1);
        assert_eq!(positions.len(), 3);
    }

    #[test]
    fn all_missing_addresses_are_reported() {
        let full = snapshot(10);
        let required = vec![
            "0x00000000000000000000000000000000000000aa".to_string(),
            node(2).address,
            "0x00000000000000000000000000000000000000bb".to_string(),
        ];
        let err = sample(&full, 3, &seed(2), &required, false).unwrap_err();
        assert_eq!(
            err,
            SampleError::MissingAddress(vec![
                "0x00000000000000000000000000000000000000aa".into(),
                "0x00000000000000000000000000000000000000bb".into(),
            ])
        );
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn sampling_is_deterministic() {
        let full = snapshot(50);
        let required = vec![node(8).address];
        let a = sample(&full, 7, &seed(42), &required, true).unwrap();
        let b = sample(&full, 7, &seed(42), &required, true).unwrap();
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );

        let other = sample(&full, 7, &seed(43), &required, true).unwrap();
        assert_ne!(a.nodes, other.nodes);
    }

    #[test]
    fn narrowed_proof_covers_fixed_slots_and_selected_nodes() {
        let full = snapshot(10);
        let out = sample(&full, 2, &seed(7), &[], true).unwrap();
        assert_eq!(out.nodes.len(), 2);

        let proof = out.proof.unwrap();
        assert_eq!(proof.block, full.proof.as_ref().unwrap().block);
        let (_, account) = proof.account(CONTRACT).unwrap();
        assert_eq!(account.storage_proof.len(), 4);

        let indices: Vec<u64> = out.nodes.iter().flatten().map(|n| n.index).collect();
        let expected: Vec<[u8; 32]> = derive_keys(&indices);
        let actual: Vec<[u8; 32]> = account
            .storage_proof
            .iter()
            .map(|e| bytes32(&e.key).unwrap())
            .collect();
        assert_eq!(actual, expected);
        assert_eq!(out.total_servers, 10);
        assert_eq!(out.registry_id, full.registry_id);
    }

    #[test]
    fn narrowing_fails_when_parent_lacks_an_entry() {
        let mut full = snapshot(10);
        if let Some(proof) = full.proof.as_mut() {
            for account in proof.accounts.values_mut() {
                account.storage_proof.truncate(2);
            }
        }
        let err = sample(&full, 2, &seed(7), &[], true).unwrap_err();
        assert!(matches!(err, SampleError::IncompleteProof(_)));
    }

    #[test]
    fn holes_are_never_selected() {
        let mut full = snapshot(10);
        for pos in [1, 3, 5, 7] {
            full.nodes[pos] = None;
        }
        for s in 0..50u8 {
            let out = sample(&full, 6, &seed(s), &[], false).unwrap();
            assert_eq!(out.nodes.len(), 6);
            assert!(out.nodes.iter().all(Option::is_some));
        }
    }

    #[test]
    fn draws_are_roughly_uniform() {
        let population: Vec<usize> = (0..10).collect();
        let mut counts = [0usize; 10];
        for i in 0..10_000u32 {
            let mut s = [0u8; 32];
            s[28..].copy_from_slice(&i.to_be_bytes());
            let picked = select_indexes(&population, 1, &s, &[]);
            counts[picked[0]] += 1;
        }
        assert!(counts.iter().all(|c| (800..1200).contains(c)), "{:?}", counts);
    }
}
