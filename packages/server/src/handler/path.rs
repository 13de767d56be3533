//! REST-style GET paths mapped onto JSON-RPC requests.
//!
//! | path | request |
//! |---|---|
//! | `/<address>/balance` | `eth_getBalance` |
//! | `/<address>/nonce` | `eth_getTransactionCount` |
//! | `/<address>/code` | `eth_getCode` |
//! | `/<address>/storage/<key>` | `eth_getStorageAt` |
//! | `/<address>/<method(types)>/<a,b,...>` | `in3_call` |
//! | `/<txhash>` | `eth_getTransactionReceipt` |
//! | `/<number>` or `/latest` | `eth_getBlockByNumber` |

use in3_core::hex::quantity;
use serde_json::{json, Value};

use crate::request::{ClientRequest, In3Params};

/// Length of a `0x`-prefixed address.
const ADDRESS_LEN: usize = 42;

pub fn request_from_path(path: &str, chain_id: &str) -> Option<ClientRequest> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let first = *segments.first()?;

    let (method, params) = if first.starts_with("0x") && first.len() <= ADDRESS_LEN {
        let account = json!(first);
        match *segments.get(1)? {
            "balance" => ("eth_getBalance", vec![account, json!("latest")]),
            "nonce" => ("eth_getTransactionCount", vec![account, json!("latest")]),
            "code" => ("eth_getCode", vec![account, json!("latest")]),
            "storage" => {
                let key = *segments.get(2)?;
                ("eth_getStorageAt", vec![account, json!(key), json!("latest")])
            }
            "" => return None,
            method => {
                let mut params = vec![account, json!(method)];
                params.extend(
                    segments[2..]
                        .join("/")
                        .split(',')
                        .filter(|arg| !arg.is_empty())
                        .map(|arg| match arg {
                            "true" => Value::Bool(true),
                            "false" => Value::Bool(false),
                            other => json!(other),
                        }),
                );
                ("in3_call", params)
            }
        }
    } else if first.starts_with("0x") {
        ("eth_getTransactionReceipt", vec![json!(first)])
    } else if first == "latest" {
        ("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
    } else {
        let number: u64 = first.parse().ok()?;
        ("eth_getBlockByNumber", vec![json!(quantity(number)), json!(false)])
    };

    let in3 = In3Params {
        chain_id: Some(chain_id.to_string()),
        ..In3Params::default()
    };
    Some(ClientRequest::new(json!(1), method, params).with_in3(in3))
}
