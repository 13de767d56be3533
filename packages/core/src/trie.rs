//! In-memory Merkle-Patricia trie, built once from a full key set.
//!
//! Used for the per-block transactions and receipts tries, where the whole
//! content is known up front and only the root and inclusion witnesses are
//! needed.

use std::collections::BTreeMap;

use crate::{keccak256, rlp};

/// Root of a trie with no entries: `keccak256(rlp(""))`.
pub const EMPTY_ROOT: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
];

#[derive(Debug, Clone, Default)]
pub struct Trie {
    /// Keys as nibble paths.
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trie keyed by `rlp(index)`, the layout of block transaction and
    /// receipt tries.
    pub fn from_indexed<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut trie = Self::new();
        for (i, value) in values.into_iter().enumerate() {
            trie.insert(&index_key(i as u64), value);
        }
        trie
    }

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        self.entries.insert(to_nibbles(key), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> [u8; 32] {
        if self.entries.is_empty() {
            return EMPTY_ROOT;
        }
        let items: Vec<(&[u8], &[u8])> = self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        keccak256(&encode_node(&items, 0, None, &mut Vec::new()))
    }

    /// RLP-encoded nodes on the path from the root to `key`, root first.
    ///
    /// Nodes shorter than 32 bytes are embedded in their parent and do not
    /// appear on their own. Returns `None` when `key` is absent.
    pub fn proof(&self, key: &[u8]) -> Option<Vec<Vec<u8>>> {
        let target = to_nibbles(key);
        if !self.entries.contains_key(&target) {
            return None;
        }
        let items: Vec<(&[u8], &[u8])> = self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        let mut path = Vec::new();
        let root = encode_node(&items, 0, Some(&target), &mut path);
        // Children are emitted before their parents; the root is always kept.
        path.push(root);
        path.reverse();
        Some(path)
    }
}

/// `rlp(index)`, the trie key of the `index`-th transaction or receipt.
pub fn index_key(index: u64) -> Vec<u8> {
    if index == 0 {
        return rlp::encode_bytes(&[]);
    }
    let bytes = index.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    rlp::encode_bytes(&bytes[first..])
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

/// Hex-prefix encoding of a nibble path.
fn compact(path: &[u8], leaf: bool) -> Vec<u8> {
    let flag = if leaf { 2 } else { 0 };
    let mut out = Vec::with_capacity(path.len() / 2 + 1);
    let rest = if path.len() % 2 == 1 {
        out.push(((flag + 1) << 4) | path[0]);
        &path[1..]
    } else {
        out.push(flag << 4);
        path
    };
    out.extend(rest.chunks(2).map(|pair| (pair[0] << 4) | pair[1]));
    out
}

/// Reference to a child node inside its parent.
fn child_ref(encoded: Vec<u8>) -> Vec<u8> {
    if encoded.len() < 32 {
        encoded
    } else {
        rlp::encode_bytes(&keccak256(&encoded))
    }
}

/// Encode the node holding `items`, all of which share their first `depth`
/// nibbles. Hashed nodes below this one that lie on the path to `target`
/// are appended to `path`.
fn encode_node(items: &[(&[u8], &[u8])], depth: usize, target: Option<&[u8]>, path: &mut Vec<Vec<u8>>) -> Vec<u8> {
    if let [(key, value)] = items {
        return rlp::encode_list(&[rlp::encode_bytes(&compact(&key[depth..], true)), rlp::encode_bytes(value)]);
    }

    let shared = common_prefix(items, depth);
    if shared > 0 {
        let child = encode_node(items, depth + shared, target, path);
        let encoded_path = compact(&items[0].0[depth..depth + shared], false);
        return rlp::encode_list(&[rlp::encode_bytes(&encoded_path), reference(child, target.is_some(), path)]);
    }

    let mut slots = Vec::with_capacity(17);
    let mut value = rlp::encode_bytes(&[]);
    let mut rest = items;
    if let Some(((key, v), tail)) = rest.split_first() {
        if key.len() == depth {
            value = rlp::encode_bytes(v);
            rest = tail;
        }
    }
    for nibble in 0..16u8 {
        let split = rest.iter().position(|(k, _)| k[depth] != nibble).unwrap_or(rest.len());
        let (group, tail) = rest.split_at(split);
        rest = tail;
        if group.is_empty() {
            slots.push(rlp::encode_bytes(&[]));
            continue;
        }
        let on_path = target.filter(|t| t.len() > depth && t[depth] == nibble);
        let child = encode_node(group, depth + 1, on_path, path);
        slots.push(reference(child, on_path.is_some(), path));
    }
    slots.push(value);
    rlp::encode_list(&slots)
}

fn reference(child: Vec<u8>, on_path: bool, path: &mut Vec<Vec<u8>>) -> Vec<u8> {
    if on_path && child.len() >= 32 {
        path.push(child.clone());
    }
    child_ref(child)
}

fn common_prefix(items: &[(&[u8], &[u8])], depth: usize) -> usize {
    let (Some((first, _)), Some((last, _))) = (items.first(), items.last()) else {
        return 0;
    };
    // Keys are sorted, so the first and last bound the shared prefix.
    first[depth..]
        .iter()
        .zip(&last[depth..])
        .take_while(|(a, b)| a == b)
        .count()
}
