//! Block header RLP encoding from a JSON-RPC block object.

use in3_core::{
    hex::{encode_hex, parse_hex_bytes, strip_0x},
    keccak256, rlp,
};
use serde_json::{Map, Value};

use crate::error::HandlerError;

/// Fields present in every header, in RLP order, up to the seal.
const BASE_FIELDS: [(&str, FieldKind); 13] = [
    ("parentHash", FieldKind::Bytes),
    ("sha3Uncles", FieldKind::Bytes),
    ("miner", FieldKind::Bytes),
    ("stateRoot", FieldKind::Bytes),
    ("transactionsRoot", FieldKind::Bytes),
    ("receiptsRoot", FieldKind::Bytes),
    ("logsBloom", FieldKind::Bytes),
    ("difficulty", FieldKind::Quantity),
    ("number", FieldKind::Quantity),
    ("gasLimit", FieldKind::Quantity),
    ("gasUsed", FieldKind::Quantity),
    ("timestamp", FieldKind::Quantity),
    ("extraData", FieldKind::Bytes),
];

/// Proof-of-work seal, used when the node reports no `sealFields`.
const POW_SEAL: [(&str, FieldKind); 2] = [("mixHash", FieldKind::Bytes), ("nonce", FieldKind::Bytes)];

/// Fields added by later forks (London through Prague), appended while present.
const FORK_FIELDS: [(&str, FieldKind); 6] = [
    ("baseFeePerGas", FieldKind::Quantity),
    ("withdrawalsRoot", FieldKind::Bytes),
    ("blobGasUsed", FieldKind::Quantity),
    ("excessBlobGas", FieldKind::Quantity),
    ("parentBeaconBlockRoot", FieldKind::Bytes),
    ("requestsHash", FieldKind::Bytes),
];

#[derive(Clone, Copy)]
enum FieldKind {
    Bytes,
    Quantity,
}

/// Encode the header of `block` as RLP.
pub fn encode_block_header(block: &Map<String, Value>) -> Result<Vec<u8>, HandlerError> {
    let mut items = Vec::with_capacity(BASE_FIELDS.len() + POW_SEAL.len() + FORK_FIELDS.len());

    for (key, kind) in BASE_FIELDS {
        items.push(required_field(block, key, kind)?);
    }

    // Aura and other PoA engines report their seal as already RLP-encoded items.
    match block.get("sealFields").and_then(Value::as_array) {
        Some(seal) => {
            for item in seal {
                let encoded = item
                    .as_str()
                    .and_then(|raw| parse_hex_bytes(raw).ok())
                    .filter(|bytes| !bytes.is_empty())
                    .ok_or_else(|| HandlerError::Malformed(format!("invalid seal field {}", item)))?;
                items.push(encoded);
            }
        }
        None => {
            for (key, kind) in POW_SEAL {
                items.push(required_field(block, key, kind)?);
            }
        }
    }

    for (key, kind) in FORK_FIELDS {
        let Some(raw) = block.get(key).and_then(Value::as_str) else {
            break;
        };
        items.push(rlp::encode_bytes(&field_bytes(key, raw, kind)?));
    }

    let encoded = rlp::encode_list(&items);

    if let Some(reported) = block.get("hash").and_then(Value::as_str) {
        let hash = keccak256(&encoded);
        if !reported.eq_ignore_ascii_case(&encode_hex(&hash)) {
            tracing::warn!(
                reported = %reported,
                computed = %encode_hex(&hash),
                "encoded header does not hash to the reported block hash"
            );
        }
    }

    Ok(encoded)
}

/// The header of a block object as `0x` hex.
pub fn block_to_hex(block: &Value) -> Result<String, HandlerError> {
    let block = block
        .as_object()
        .ok_or_else(|| HandlerError::Malformed("expected a block object".to_string()))?;
    Ok(encode_hex(&encode_block_header(block)?))
}

fn required_field(block: &Map<String, Value>, key: &str, kind: FieldKind) -> Result<Vec<u8>, HandlerError> {
    let raw = block
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::Malformed(format!("block header is missing {}", key)))?;
    Ok(rlp::encode_bytes(&field_bytes(key, raw, kind)?))
}

fn field_bytes(key: &str, raw: &str, kind: FieldKind) -> Result<Vec<u8>, HandlerError> {
    let invalid = || HandlerError::Malformed(format!("block header field {} is not hex", key));
    match kind {
        FieldKind::Bytes => parse_hex_bytes(raw).map_err(|_| invalid()),
        FieldKind::Quantity => {
            // Quantities are encoded as minimal big-endian integers; zero is empty.
            let trimmed = strip_0x(raw).trim_start_matches('0');
            parse_hex_bytes(trimmed).map_err(|_| invalid())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_block() -> Value {
        json!({
            "parentHash": format!("0x{}", "11".repeat(32)),
            "sha3Uncles": format!("0x{}", "22".repeat(32)),
            "miner": format!("0x{}", "33".repeat(20)),
            "stateRoot": format!("0x{}", "44".repeat(32)),
            "transactionsRoot": format!("0x{}", "55".repeat(32)),
            "receiptsRoot": format!("0x{}", "66".repeat(32)),
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "difficulty": "0x0",
            "number": "0x10",
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x0",
            "timestamp": "0x5f5e100",
            "extraData": "0x",
            "mixHash": format!("0x{}", "77".repeat(32)),
            "nonce": "0x0000000000000000",
            "baseFeePerGas": "0x7",
        })
    }

    #[test]
    fn zero_quantities_encode_as_empty_strings() {
        assert!(field_bytes("difficulty", "0x0", FieldKind::Quantity).unwrap().is_empty());
        assert_eq!(field_bytes("number", "0x0100", FieldKind::Quantity).unwrap(), vec![1, 0]);
    }

    #[test]
    fn header_is_a_list_of_present_fields() {
        let encoded = encode_block_header(sample_block().as_object().unwrap()).unwrap();
        // long list prefix with a two-byte length
        assert_eq!(encoded[0], 0xf9);
        let payload_len = u16::from_be_bytes([encoded[1], encoded[2]]) as usize;
        assert_eq!(encoded.len(), 3 + payload_len);
        // baseFeePerGas 0x07 is the last item
        assert_eq!(*encoded.last().unwrap(), 0x07);
    }

    #[test]
    fn fork_fields_stop_at_first_missing() {
        let mut block = sample_block();
        block["blobGasUsed"] = json!("0x1");
        let with_gap = encode_block_header(block.as_object().unwrap()).unwrap();
        let without = encode_block_header(sample_block().as_object().unwrap()).unwrap();
        assert_eq!(with_gap, without);
    }

    #[test]
    fn seal_fields_replace_the_pow_seal() {
        let mut aura = sample_block();
        let fields = aura.as_object_mut().unwrap();
        fields.remove("mixHash");
        fields.remove("nonce");
        fields.remove("baseFeePerGas");
        // step 0x0123 and a 65-byte signature, each RLP-encoded
        let signature = format!("0xb841{}", "ee".repeat(65));
        fields.insert("sealFields".into(), json!(["0x820123", signature]));

        let encoded = encode_block_header(aura.as_object().unwrap()).unwrap();
        let tail = [vec![0x82, 0x01, 0x23], vec![0xb8, 0x41], vec![0xee; 65]].concat();
        assert!(encoded.ends_with(&tail));

        let mut pow = sample_block();
        pow.as_object_mut().unwrap().remove("baseFeePerGas");
        let pow = encode_block_header(pow.as_object().unwrap()).unwrap();
        // 0x88 + 8 nonce bytes close the PoW header instead
        assert!(pow.ends_with(&[0x88, 0, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn invalid_seal_fields_are_rejected() {
        let mut block = sample_block();
        block["sealFields"] = json!(["0x", 5]);
        assert!(matches!(block_to_hex(&block), Err(HandlerError::Malformed(_))));
    }

    #[test]
    fn missing_base_field_is_an_error() {
        let mut block = sample_block();
        block.as_object_mut().unwrap().remove("stateRoot");
        assert!(matches!(
            block_to_hex(&block),
            Err(HandlerError::Malformed(_))
        ));
    }
}
