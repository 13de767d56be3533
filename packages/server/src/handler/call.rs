//! `in3_call [contract, signature, args..., block?]` → `eth_call`.

use in3_core::{hex::encode_hex, AbiValue, Signature};
use serde_json::{json, Value};

use crate::{
    error::HandlerError,
    request::{ClientRequest, ResponseTransform},
};

fn is_balanced(signature: &str) -> bool {
    signature.matches('(').count() <= signature.matches(')').count()
}

/// Rewrite an `in3_call` request into an `eth_call` in place.
///
/// Clients that split arguments on `,` also split the signature; the pieces
/// are joined back until its parentheses balance. Declared return types
/// attach a [`ResponseTransform::DecodeReturn`].
pub fn expand_in3_call(request: &mut ClientRequest) -> Result<(), HandlerError> {
    let mut params = std::mem::take(&mut request.params).into_iter();

    let contract = match params.next() {
        Some(Value::String(contract)) if !contract.is_empty() => contract,
        _ => {
            return Err(HandlerError::InvalidParams(
                "in3_call needs a contract address as first param".to_string(),
            ));
        }
    };
    let mut signature = match params.next() {
        Some(Value::String(signature)) if !signature.is_empty() => signature,
        _ => {
            return Err(HandlerError::InvalidParams(
                "in3_call needs a method signature as second param".to_string(),
            ));
        }
    };

    let mut rest: Vec<Value> = params.collect();
    while !is_balanced(&signature) && !rest.is_empty() {
        let piece = rest.remove(0);
        signature.push(',');
        match piece {
            Value::String(s) => signature.push_str(&s),
            other => signature.push_str(&other.to_string()),
        }
    }

    let signature = Signature::parse(&signature)?;
    let arity = signature.inputs.len();
    if rest.len() < arity {
        return Err(HandlerError::InvalidParams(format!(
            "{} needs {} arguments, got {}",
            signature.canonical(),
            arity,
            rest.len()
        )));
    }

    let args = signature
        .inputs
        .iter()
        .zip(&rest)
        .map(|(ty, value)| AbiValue::from_json(ty, value))
        .collect::<Result<Vec<_>, _>>()?;
    let block = rest
        .get(arity)
        .and_then(Value::as_str)
        .unwrap_or("latest")
        .to_string();

    let data = signature.encode_call(&args)?;

    request.method = "eth_call".to_string();
    request.params = vec![json!({ "to": contract, "data": encode_hex(&data) }), json!(block)];
    if signature.outputs.is_some() {
        request.transform = Some(ResponseTransform::DecodeReturn(signature));
    }
    Ok(())
}
