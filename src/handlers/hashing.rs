//! Hashing endpoints.
//!
//! Each algorithm is a standard-tier endpoint producing output bit-identical
//! to the corresponding on-chain primitive. Input starting with `0x` is
//! treated as hex, anything else as UTF-8 bytes; output encoding is hex by
//! default or base64 on request.

use axum::Extension;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512, Sha512_256};
use sha3::Keccak256;
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::handlers::{api_error, request_id_of, token_of};
use crate::payment::PayerContext;
use crate::stacks::hash160;
use crate::trace_id::TraceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Sha512_256,
    Keccak256,
    Hash160,
    Ripemd160,
}

impl HashAlgorithm {
    /// All algorithms with their route segments, in registration order.
    pub fn variants() -> &'static [(HashAlgorithm, &'static str)] {
        &[
            (HashAlgorithm::Sha256, "sha256"),
            (HashAlgorithm::Sha512, "sha512"),
            (HashAlgorithm::Sha512_256, "sha512-256"),
            (HashAlgorithm::Keccak256, "keccak256"),
            (HashAlgorithm::Hash160, "hash160"),
            (HashAlgorithm::Ripemd160, "ripemd160"),
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha512 => "SHA-512",
            HashAlgorithm::Sha512_256 => "SHA-512/256",
            HashAlgorithm::Keccak256 => "Keccak-256",
            HashAlgorithm::Hash160 => "HASH-160",
            HashAlgorithm::Ripemd160 => "RIPEMD-160",
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
            HashAlgorithm::Sha512_256 => Sha512_256::digest(data).to_vec(),
            HashAlgorithm::Keccak256 => Keccak256::digest(data).to_vec(),
            HashAlgorithm::Hash160 => hash160(data).to_vec(),
            HashAlgorithm::Ripemd160 => ripemd::Ripemd160::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    #[default]
    Hex,
    Base64,
}

#[derive(Debug, Deserialize)]
pub struct HashRequest {
    pub data: String,
    #[serde(default)]
    pub encoding: Option<OutputEncoding>,
}

/// Decodes the request's `data` field: `0x`-prefixed hex or raw UTF-8.
fn input_bytes(data: &str) -> Result<Vec<u8>, String> {
    match data.strip_prefix("0x") {
        Some(stripped) => hex::decode(stripped).map_err(|e| format!("invalid hex input: {e}")),
        None => Ok(data.as_bytes().to_vec()),
    }
}

/// Builds the handler for one algorithm. The registry registers one route
/// per algorithm, each a closure over its digest function.
pub fn hash_route(algorithm: HashAlgorithm) -> MethodRouter<Arc<Gateway>> {
    post(
        move |ctx: Option<Extension<PayerContext>>,
              trace: Option<Extension<TraceId>>,
              body: Result<axum::Json<HashRequest>, JsonRejection>| async move {
            let request_id = request_id_of(&trace);
            let token = token_of(&ctx);
            let request = match crate::handlers::parse_body(body, token, &request_id) {
                Ok(request) => request,
                Err(response) => return response,
            };
            let bytes = match input_bytes(&request.data) {
                Ok(bytes) => bytes,
                Err(message) => {
                    return api_error(StatusCode::BAD_REQUEST, token, message, &request_id);
                }
            };
            let digest = algorithm.digest(&bytes);
            let encoding = request.encoding.unwrap_or_default();
            let hash = match encoding {
                OutputEncoding::Hex => hex::encode(&digest),
                OutputEncoding::Base64 => B64.encode(&digest),
            };
            let encoding_name = match encoding {
                OutputEncoding::Hex => "hex",
                OutputEncoding::Base64 => "base64",
            };
            axum::Json(json!({
                "ok": true,
                "hash": hash,
                "algorithm": algorithm.display_name(),
                "encoding": encoding_name,
                "inputLength": bytes.len(),
                "tokenType": token,
            }))
            .into_response()
        },
    )
}
