//! Stacks chain endpoints.
//!
//! Address and signature checks run locally against the codecs in
//! [`crate::stacks`]; balance, name, and transaction lookups go through the
//! node API adapter.

use axum::Extension;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::adapters::AdapterError;
use crate::gateway::Gateway;
use crate::handlers::{api_error, parse_body, request_id_of, token_of};
use crate::payment::PayerContext;
use crate::stacks::{
    address_of_public_key, decode_address, decode_clarity_hex, is_mainnet_version, message_digest,
    recover_public_key, structured_digest,
};
use crate::trace_id::TraceId;

fn adapter_failure(err: AdapterError, token: &str, request_id: &str) -> Response {
    api_error(err.surface_status(), token, err.to_string(), request_id)
}

/// `GET /stacks/address/{address}`: validate locally, then fetch account
/// state from the node.
pub async fn get_address(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    Path(address): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let (version, _) = match decode_address(&address) {
        Ok(decoded) => decoded,
        Err(err) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                token,
                format!("invalid address: {err}"),
                &request_id,
            );
        }
    };
    match gateway.stacks_api.account(&address).await {
        Ok(account) => axum::Json(json!({
            "ok": true,
            "address": address,
            "network": if is_mainnet_version(version) { "mainnet" } else { "testnet" },
            "account": account,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => adapter_failure(err, token, &request_id),
    }
}

/// `GET /stacks/profile/{address}`: BNS names held by the address.
pub async fn get_profile(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    Path(address): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    if decode_address(&address).is_err() {
        return api_error(
            StatusCode::BAD_REQUEST,
            token,
            "invalid address",
            &request_id,
        );
    }
    match gateway.stacks_api.names(&address).await {
        Ok(names) => axum::Json(json!({
            "ok": true,
            "address": address,
            "profile": names,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => adapter_failure(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeClarityRequest {
    pub hex: String,
}

/// `POST /stacks/decode/clarity`: local wire-value decode.
pub async fn decode_clarity(
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    body: Result<axum::Json<DecodeClarityRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match decode_clarity_hex(&request.hex) {
        Ok(decoded) => axum::Json(json!({
            "ok": true,
            "decoded": decoded,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => api_error(
            StatusCode::BAD_REQUEST,
            token,
            format!("failed to decode clarity value: {err}"),
            &request_id,
        ),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeTransactionRequest {
    pub tx_id: String,
}

/// `POST /stacks/decode/transaction`: node lookup by transaction id.
pub async fn decode_transaction(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    body: Result<axum::Json<DecodeTransactionRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match gateway.stacks_api.transaction(&request.tx_id).await {
        Ok(transaction) => axum::Json(json!({
            "ok": true,
            "transaction": transaction,
            "tokenType": token,
        }))
        .into_response(),
        Err(err) => adapter_failure(err, token, &request_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMessageRequest {
    pub message: String,
    /// 65-byte signature, hex.
    pub signature: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// `POST /stacks/verify/message`: recover the signer over the Stacks
/// signed-message digest.
pub async fn verify_message(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    body: Result<axum::Json<VerifyMessageRequest>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let digest = message_digest(request.message.as_bytes());
    verify_against(
        &gateway,
        digest,
        &request.signature,
        request.address.as_deref(),
        request.public_key.as_deref(),
        token,
        &request_id,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySip018Request {
    /// 32-byte hash of the clarity-encoded domain tuple, hex.
    pub domain_hash: String,
    /// 32-byte hash of the clarity-encoded message, hex.
    pub message_hash: String,
    pub signature: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

/// `POST /stacks/verify/sip018`: recover the signer over the SIP-018
/// structured-data digest.
pub async fn verify_sip018(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    body: Result<axum::Json<VerifySip018Request>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let request = match parse_body(body, token, &request_id) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let domain = match hash32(&request.domain_hash) {
        Ok(hash) => hash,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, token, message, &request_id),
    };
    let message = match hash32(&request.message_hash) {
        Ok(hash) => hash,
        Err(message) => return api_error(StatusCode::BAD_REQUEST, token, message, &request_id),
    };
    let digest = structured_digest(&domain, &message);
    verify_against(
        &gateway,
        digest,
        &request.signature,
        request.address.as_deref(),
        request.public_key.as_deref(),
        token,
        &request_id,
    )
}

fn hash32(input: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(input.strip_prefix("0x").unwrap_or(input))
        .map_err(|e| format!("invalid hash hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|_| "hash must be exactly 32 bytes".to_string())
}

fn verify_against(
    gateway: &Gateway,
    digest: [u8; 32],
    signature_hex: &str,
    expected_address: Option<&str>,
    expected_public_key: Option<&str>,
    token: &str,
    request_id: &str,
) -> Response {
    let signature = match hex::decode(signature_hex.strip_prefix("0x").unwrap_or(signature_hex)) {
        Ok(signature) => signature,
        Err(err) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                token,
                format!("invalid signature hex: {err}"),
                request_id,
            );
        }
    };
    let recovered = match recover_public_key(&digest, &signature) {
        Ok(key) => key,
        Err(err) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                token,
                format!("signature recovery failed: {err}"),
                request_id,
            );
        }
    };
    let public_key = hex::encode(recovered.to_encoded_point(true).as_bytes());
    let mainnet = matches!(gateway.network, crate::network::StacksNetwork::Mainnet);
    let derived_address = address_of_public_key(&recovered, mainnet);

    let mut valid = true;
    if let Some(expected) = expected_public_key {
        let expected = expected.strip_prefix("0x").unwrap_or(expected);
        valid &= expected.eq_ignore_ascii_case(&public_key);
    }
    if let Some(expected) = expected_address {
        // Compare hash160s so mainnet/testnet encodings of the same key
        // still match.
        match (decode_address(expected), decode_address(&derived_address)) {
            (Ok((_, expected_hash)), Ok((_, derived_hash))) => {
                valid &= expected_hash == derived_hash;
            }
            _ => valid = false,
        }
    }

    axum::Json(json!({
        "ok": true,
        "valid": valid,
        "publicKey": public_key,
        "address": derived_address,
        "tokenType": token,
    }))
    .into_response()
}
