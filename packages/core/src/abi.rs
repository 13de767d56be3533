//! Contract-call encoding for human-readable `name(types):(returns)` signatures.
//!
//! Only the elementary types a registry or `in3_call` needs are supported:
//! `uint<N>`, `int<N>`, `address`, `bool`, `bytes<N>`, `bytes` and `string`.
//! Arrays and tuples as arguments are rejected as unsupported.

use std::str::FromStr;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive};
use serde_json::Value;

use crate::{
    hex::{encode_hex, parse_address, parse_hex_bytes, strip_0x, to_checksum_address},
    keccak256,
};

const WORD: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiError {
    InvalidSignature(String),
    UnsupportedType(String),
    ArityMismatch { expected: usize, actual: usize },
    InvalidValue { ty: String, reason: String },
    InvalidData(&'static str),
}

impl core::fmt::Display for AbiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidSignature(sig) => write!(f, "no valid method signature for {}", sig),
            Self::UnsupportedType(ty) => write!(f, "unsupported abi type {}", ty),
            Self::ArityMismatch { expected, actual } => write!(
                f,
                "invalid number of arguments: expected {}, got {}",
                expected, actual
            ),
            Self::InvalidValue { ty, reason } => write!(f, "invalid {} value: {}", ty, reason),
            Self::InvalidData(reason) => write!(f, "invalid abi data: {}", reason),
        }
    }
}

impl std::error::Error for AbiError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
}

impl AbiType {
    pub fn parse(raw: &str) -> Result<Self, AbiError> {
        let ty = raw.trim();
        let unsupported = || AbiError::UnsupportedType(ty.to_string());

        let parsed = match ty {
            "address" => Self::Address,
            "bool" => Self::Bool,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            "uint" => Self::Uint(256),
            "int" => Self::Int(256),
            _ => {
                if let Some(bits) = ty.strip_prefix("uint") {
                    Self::Uint(parse_bits(bits).ok_or_else(unsupported)?)
                } else if let Some(bits) = ty.strip_prefix("int") {
                    Self::Int(parse_bits(bits).ok_or_else(unsupported)?)
                } else if let Some(len) = ty.strip_prefix("bytes") {
                    match len.parse::<usize>() {
                        Ok(n) if (1..=32).contains(&n) => Self::FixedBytes(n),
                        _ => return Err(unsupported()),
                    }
                } else {
                    return Err(unsupported());
                }
            }
        };
        Ok(parsed)
    }

    /// Name used when hashing the function selector.
    pub fn canonical(&self) -> String {
        match self {
            Self::Uint(bits) => format!("uint{}", bits),
            Self::Int(bits) => format!("int{}", bits),
            Self::Address => "address".to_string(),
            Self::Bool => "bool".to_string(),
            Self::FixedBytes(n) => format!("bytes{}", n),
            Self::Bytes => "bytes".to_string(),
            Self::String => "string".to_string(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Bytes | Self::String)
    }
}

fn parse_bits(bits: &str) -> Option<usize> {
    let bits: usize = bits.parse().ok()?;
    (bits > 0 && bits <= 256 && bits % 8 == 0).then_some(bits)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiValue {
    Uint(BigUint),
    Int(BigInt),
    Address([u8; 20]),
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
}

impl AbiValue {
    /// Interpret a JSON request parameter as a value of type `ty`.
    pub fn from_json(ty: &AbiType, value: &Value) -> Result<Self, AbiError> {
        let invalid = |reason: &str| AbiError::InvalidValue {
            ty: ty.canonical(),
            reason: reason.to_string(),
        };

        match (ty, value) {
            (AbiType::Uint(_), Value::Number(n)) => n
                .as_u64()
                .map(|v| Self::Uint(BigUint::from(v)))
                .ok_or_else(|| invalid("expected an unsigned integer")),
            (AbiType::Uint(_), Value::String(s)) => {
                if s.starts_with("0x") || s.starts_with("0X") {
                    let bytes = parse_hex_bytes(s).map_err(|e| invalid(e.reason))?;
                    Ok(Self::Uint(BigUint::from_bytes_be(&bytes)))
                } else {
                    BigUint::from_str(s.trim())
                        .map(Self::Uint)
                        .map_err(|_| invalid("expected a decimal or hex number"))
                }
            }
            (AbiType::Int(_), Value::Number(n)) => n
                .as_i64()
                .map(|v| Self::Int(BigInt::from(v)))
                .ok_or_else(|| invalid("expected an integer")),
            (AbiType::Int(_), Value::String(s)) => BigInt::from_str(s.trim())
                .map(Self::Int)
                .map_err(|_| invalid("expected a decimal number")),
            (AbiType::Address, Value::String(s)) => parse_address(s)
                .map(Self::Address)
                .map_err(|e| invalid(e.reason)),
            (AbiType::Bool, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (AbiType::Bool, Value::String(s)) => match s.as_str() {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(invalid("expected true or false")),
            },
            (AbiType::FixedBytes(_), Value::String(s)) => parse_hex_bytes(s)
                .map(Self::FixedBytes)
                .map_err(|e| invalid(e.reason)),
            (AbiType::Bytes, Value::String(s)) => parse_hex_bytes(s)
                .map(Self::Bytes)
                .map_err(|e| invalid(e.reason)),
            (AbiType::String, Value::String(s)) => Ok(Self::String(s.clone())),
            (AbiType::String, Value::Number(n)) => Ok(Self::String(n.to_string())),
            _ => Err(invalid("unexpected json type")),
        }
    }

    /// Render for a JSON-RPC response: integers as decimal strings, addresses
    /// checksummed, byte values as `0x` hex.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Uint(v) => Value::String(v.to_str_radix(10)),
            Self::Int(v) => Value::String(v.to_str_radix(10)),
            Self::Address(a) => Value::String(to_checksum_address(a)),
            Self::Bool(b) => Value::Bool(*b),
            Self::FixedBytes(b) | Self::Bytes(b) => Value::String(encode_hex(b)),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// A parsed `name(inputs)` signature with optional return types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub inputs: Vec<AbiType>,
    pub outputs: Option<Vec<AbiType>>,
    /// `true` for `:(t)` return specs, whose decoded result stays a list.
    pub tuple_output: bool,
}

impl Signature {
    /// Parse `name(t1,t2)`, `name(t1):(r1,r2)` or `name(t1):r1`.
    /// A bare `name` is read as `name()`.
    pub fn parse(raw: &str) -> Result<Self, AbiError> {
        let raw = raw.trim();
        let invalid = || AbiError::InvalidSignature(raw.to_string());

        let (call, returns) = match raw.split_once(':') {
            Some((call, returns)) => (call.trim(), Some(returns.trim())),
            None => (raw, None),
        };

        let call = if call.contains('(') {
            call.to_string()
        } else {
            format!("{}()", call)
        };
        let open = call.find('(').ok_or_else(invalid)?;
        if !call.ends_with(')') {
            return Err(invalid());
        }

        let name = &call[..open];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
        let inputs = parse_type_list(&call[open + 1..call.len() - 1])?;

        let (outputs, tuple_output) = match returns {
            None => (None, false),
            Some(r) if r.starts_with('(') && r.ends_with(')') => {
                (Some(parse_type_list(&r[1..r.len() - 1])?), true)
            }
            Some(r) => (Some(parse_type_list(r)?), false),
        };

        Ok(Self {
            name: name.to_string(),
            inputs,
            outputs,
            tuple_output,
        })
    }

    pub fn canonical(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(AbiType::canonical).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.canonical().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Selector followed by the encoded arguments.
    pub fn encode_call(&self, args: &[AbiValue]) -> Result<Vec<u8>, AbiError> {
        let mut out = self.selector().to_vec();
        out.extend(encode(&self.inputs, args)?);
        Ok(out)
    }

    /// Decode return data with the declared return types (none declared: empty).
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
        match &self.outputs {
            Some(types) => decode(types, data),
            None => Ok(Vec::new()),
        }
    }
}

fn parse_type_list(list: &str) -> Result<Vec<AbiType>, AbiError> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(AbiType::parse)
        .collect()
}

pub fn encode(types: &[AbiType], values: &[AbiValue]) -> Result<Vec<u8>, AbiError> {
    if types.len() != values.len() {
        return Err(AbiError::ArityMismatch {
            expected: types.len(),
            actual: values.len(),
        });
    }

    let head_len = types.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for (ty, value) in types.iter().zip(values) {
        if ty.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            tail.extend(encode_dynamic(ty, value)?);
        } else {
            head.extend_from_slice(&encode_static(ty, value)?);
        }
    }

    head.extend(tail);
    Ok(head)
}

fn mismatch(ty: &AbiType, value: &AbiValue) -> AbiError {
    AbiError::InvalidValue {
        ty: ty.canonical(),
        reason: format!("cannot encode {:?}", value),
    }
}

fn encode_static(ty: &AbiType, value: &AbiValue) -> Result<[u8; WORD], AbiError> {
    let out_of_range = || AbiError::InvalidValue {
        ty: ty.canonical(),
        reason: "value out of range".to_string(),
    };

    match (ty, value) {
        (AbiType::Uint(bits), AbiValue::Uint(v)) => {
            if v.bits() > *bits as u64 {
                return Err(out_of_range());
            }
            Ok(biguint_word(v))
        }
        (AbiType::Int(bits), AbiValue::Int(v)) => {
            let bound = BigInt::one() << (*bits - 1);
            if *v >= bound || *v < -bound {
                return Err(out_of_range());
            }
            let unsigned = if v.sign() == Sign::Minus {
                ((BigInt::one() << 256usize) + v).magnitude().clone()
            } else {
                v.magnitude().clone()
            };
            Ok(biguint_word(&unsigned))
        }
        (AbiType::Address, AbiValue::Address(a)) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(a);
            Ok(word)
        }
        (AbiType::Bool, AbiValue::Bool(b)) => {
            let mut word = [0u8; WORD];
            word[31] = *b as u8;
            Ok(word)
        }
        (AbiType::FixedBytes(n), AbiValue::FixedBytes(bytes)) => {
            if bytes.len() > *n {
                return Err(out_of_range());
            }
            let mut word = [0u8; WORD];
            word[..bytes.len()].copy_from_slice(bytes);
            Ok(word)
        }
        _ => Err(mismatch(ty, value)),
    }
}

fn encode_dynamic(ty: &AbiType, value: &AbiValue) -> Result<Vec<u8>, AbiError> {
    let bytes = match (ty, value) {
        (AbiType::Bytes, AbiValue::Bytes(b)) => b.as_slice(),
        (AbiType::String, AbiValue::String(s)) => s.as_bytes(),
        _ => return Err(mismatch(ty, value)),
    };

    let padded_len = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded_len);
    out.extend_from_slice(&usize_word(bytes.len()));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded_len, 0);
    Ok(out)
}

pub fn decode(types: &[AbiType], data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let word = read_word(data, i * WORD)?;
            if ty.is_dynamic() {
                decode_dynamic(ty, data, word_to_usize(&word)?)
            } else {
                Ok(decode_static(ty, &word))
            }
        })
        .collect()
}

fn decode_static(ty: &AbiType, word: &[u8; WORD]) -> AbiValue {
    match ty {
        AbiType::Uint(_) => AbiValue::Uint(BigUint::from_bytes_be(word)),
        AbiType::Int(_) => {
            let magnitude = BigInt::from_bytes_be(Sign::Plus, word);
            if word[0] & 0x80 != 0 {
                AbiValue::Int(magnitude - (BigInt::one() << 256usize))
            } else {
                AbiValue::Int(magnitude)
            }
        }
        AbiType::Address => {
            let mut address = [0u8; 20];
            address.copy_from_slice(&word[12..]);
            AbiValue::Address(address)
        }
        AbiType::Bool => AbiValue::Bool(word.iter().any(|b| *b != 0)),
        AbiType::FixedBytes(n) => AbiValue::FixedBytes(word[..*n].to_vec()),
        AbiType::Bytes | AbiType::String => unreachable!("dynamic types are decoded from the tail"),
    }
}

fn decode_dynamic(ty: &AbiType, data: &[u8], offset: usize) -> Result<AbiValue, AbiError> {
    let len = word_to_usize(&read_word(data, offset)?)?;
    let start = offset
        .checked_add(WORD)
        .ok_or(AbiError::InvalidData("offset overflow"))?;
    let end = start
        .checked_add(len)
        .ok_or(AbiError::InvalidData("length overflow"))?;
    let bytes = data
        .get(start..end)
        .ok_or(AbiError::InvalidData("dynamic value out of bounds"))?
        .to_vec();

    match ty {
        AbiType::String => String::from_utf8(bytes)
            .map(AbiValue::String)
            .map_err(|_| AbiError::InvalidData("string is not utf-8")),
        _ => Ok(AbiValue::Bytes(bytes)),
    }
}

fn read_word(data: &[u8], offset: usize) -> Result<[u8; WORD], AbiError> {
    let end = offset
        .checked_add(WORD)
        .ok_or(AbiError::InvalidData("offset overflow"))?;
    let slice = data
        .get(offset..end)
        .ok_or(AbiError::InvalidData("word out of bounds"))?;
    let mut word = [0u8; WORD];
    word.copy_from_slice(slice);
    Ok(word)
}

fn word_to_usize(word: &[u8; WORD]) -> Result<usize, AbiError> {
    BigUint::from_bytes_be(word)
        .to_usize()
        .ok_or(AbiError::InvalidData("offset does not fit in usize"))
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// Low 32 bytes of `value`, big-endian.
pub fn biguint_word(value: &BigUint) -> [u8; WORD] {
    let bytes = value.to_bytes_be();
    let bytes = &bytes[bytes.len().saturating_sub(WORD)..];
    let mut word = [0u8; WORD];
    word[WORD - bytes.len()..].copy_from_slice(bytes);
    word
}

/// Decode `0x` return data for a call result.
pub fn decode_hex_output(signature: &Signature, hex_data: &str) -> Result<Vec<AbiValue>, AbiError> {
    let data = ::hex::decode(strip_0x(hex_data))
        .map_err(|_| AbiError::InvalidData("return data is not hex"))?;
    signature.decode_output(&data)
}
