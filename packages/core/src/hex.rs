//! Hex, quantity and address helpers shared by the codec and the server.

use crate::keccak256;

/// A string that could not be read as the expected hex value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidHex {
    pub input: String,
    pub reason: &'static str,
}

impl InvalidHex {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

impl core::fmt::Display for InvalidHex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "invalid hex value {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for InvalidHex {}

pub fn strip_0x(hex_str: &str) -> &str {
    hex_str
        .strip_prefix("0x")
        .or_else(|| hex_str.strip_prefix("0X"))
        .unwrap_or(hex_str)
}

/// Decode a hex string, tolerating a missing prefix and an odd digit count.
pub fn parse_hex_bytes(hex_str: &str) -> Result<Vec<u8>, InvalidHex> {
    let stripped = strip_0x(hex_str.trim());
    if stripped.is_empty() {
        return Ok(Vec::new());
    }

    let padded = if stripped.len() % 2 == 1 {
        format!("0{}", stripped)
    } else {
        stripped.to_string()
    };

    ::hex::decode(&padded).map_err(|_| InvalidHex::new(hex_str, "not a hex string"))
}

/// Decode a hex value into a left-padded 32-byte word.
pub fn bytes32(hex_str: &str) -> Result<[u8; 32], InvalidHex> {
    let bytes = parse_hex_bytes(hex_str)?;
    if bytes.len() > 32 {
        return Err(InvalidHex::new(hex_str, "longer than 32 bytes"));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

pub fn parse_address(hex_str: &str) -> Result<[u8; 20], InvalidHex> {
    let bytes = parse_hex_bytes(hex_str)?;
    if bytes.len() != 20 {
        return Err(InvalidHex::new(hex_str, "address must be 20 bytes"));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn parse_quantity(hex_str: &str) -> Result<u64, InvalidHex> {
    let stripped = strip_0x(hex_str.trim());
    if stripped.is_empty() {
        return Err(InvalidHex::new(hex_str, "empty quantity"));
    }
    u64::from_str_radix(stripped, 16).map_err(|_| InvalidHex::new(hex_str, "not a u64 quantity"))
}

pub fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", ::hex::encode(bytes))
}

/// Strip leading zero digits: `0x000a` becomes `0xa`, an all-zero value `0x0`.
pub fn to_min_hex(hex_str: &str) -> String {
    let trimmed = strip_0x(hex_str.trim()).trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed.to_ascii_lowercase())
    }
}

/// EIP-55 mixed-case rendering of an address.
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = ::hex::encode(address);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
