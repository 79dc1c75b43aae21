//! Base64 JSON helpers for the x402 headers.
//!
//! The protocol carries whole JSON documents inside HTTP headers
//! (`payment-required`, `payment-signature`, `payment-response`), always as
//! standard-alphabet base64 of the serialized JSON.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Errors raised while decoding a base64-JSON header value.
#[derive(Debug, thiserror::Error)]
pub enum B64JsonError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `value` to JSON and encodes it as base64.
pub fn encode_b64_json<T: Serialize>(value: &T) -> Result<String, B64JsonError> {
    let json = serde_json::to_vec(value)?;
    Ok(B64.encode(json))
}

/// Decodes a base64 header value and parses the contained JSON document.
pub fn decode_b64_json<T: DeserializeOwned>(header: &[u8]) -> Result<T, B64JsonError> {
    let raw = B64.decode(header)?;
    Ok(serde_json::from_slice(&raw)?)
}
