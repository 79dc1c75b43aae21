//! HTTP handlers and the shared request/response helpers they use.
//!
//! Every error body has the same shape: `{ok: false, tokenType, error,
//! requestId}`. Handlers reach the payer's shard through the context bound
//! by the payment gate; calling the shard accessor without an authenticated
//! context is a server bug and reports as 500.

pub mod hashing;
pub mod inference;
pub mod meta;
pub mod stacks;
pub mod storage;

use axum::Extension;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::payment::PayerContext;
use crate::shard::{PayerShard, ShardError};
use crate::trace_id::TraceId;

/// The uniform error response.
pub fn api_error(
    status: StatusCode,
    token_type: &str,
    error: impl Into<String>,
    request_id: &str,
) -> Response {
    let body = json!({
        "ok": false,
        "tokenType": token_type,
        "error": error.into(),
        "requestId": request_id,
    });
    (status, axum::Json(body)).into_response()
}

/// Token name for error bodies when no payment context exists.
pub fn token_of(ctx: &Option<Extension<PayerContext>>) -> &'static str {
    ctx.as_ref()
        .map(|Extension(ctx)| ctx.token.wire_name())
        .unwrap_or("Native")
}

pub fn request_id_of(trace: &Option<Extension<TraceId>>) -> String {
    trace
        .as_ref()
        .map(|Extension(TraceId(id))| id.clone())
        .unwrap_or_default()
}

/// Payer-address accessor; the settlement result is the only identity source.
pub fn require_payer(
    ctx: &Option<Extension<PayerContext>>,
    request_id: &str,
) -> Result<PayerContext, Response> {
    match ctx {
        Some(Extension(ctx)) => Ok(ctx.clone()),
        None => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Native",
            "handler invoked without an authenticated payment context",
            request_id,
        )),
    }
}

/// Shard accessor over the authenticated payer.
pub fn require_shard(
    gateway: &Gateway,
    ctx: &Option<Extension<PayerContext>>,
    request_id: &str,
) -> Result<(Arc<PayerShard>, PayerContext), Response> {
    let context = require_payer(ctx, request_id)?;
    let shard = gateway.shards.shard(&context.payer).map_err(|err| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            context.token.wire_name(),
            format!("failed to open storage shard: {err}"),
            request_id,
        )
    })?;
    Ok((shard, context))
}

/// Maps a JSON extractor rejection into the uniform 400 body.
pub fn parse_body<T>(
    parsed: Result<axum::Json<T>, JsonRejection>,
    token_type: &str,
    request_id: &str,
) -> Result<T, Response> {
    match parsed {
        Ok(axum::Json(body)) => Ok(body),
        Err(rejection) => Err(api_error(
            StatusCode::BAD_REQUEST,
            token_type,
            format!("malformed request body: {rejection}"),
            request_id,
        )),
    }
}

/// Maps shard errors onto HTTP statuses.
pub fn shard_error(err: ShardError, token_type: &str, request_id: &str) -> Response {
    let status = match &err {
        ShardError::Forbidden(_) | ShardError::InvalidInput(_) | ShardError::InvalidPayer(_) => {
            StatusCode::BAD_REQUEST
        }
        ShardError::Sqlite(rusqlite::Error::SqlInputError { .. }) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, token_type, err.to_string(), request_id)
}
