//! Inference endpoints.
//!
//! Chat completions are forwarded verbatim to the provider and provider JSON
//! comes back unchanged; the payment gate has already priced the request
//! (dynamically for OpenRouter, standard tier for Cloudflare) and cached the
//! parsed body. Streaming is not supported under the paid path.

use axum::Extension;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::handlers::{api_error, parse_body, request_id_of, token_of};
use crate::payment::{CachedJsonBody, PayerContext};
use crate::trace_id::TraceId;

/// `POST /inference/openrouter/chat` (dynamic tier).
///
/// The pricing step already parsed the body once; it arrives through the
/// request extensions, never re-parsed here.
pub async fn openrouter_chat(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    cached: Option<Extension<CachedJsonBody>>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let Some(Extension(CachedJsonBody(body))) = cached else {
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            token,
            "chat body missing from request context",
            &request_id,
        );
    };
    match gateway.inference.chat_openrouter(&body).await {
        Ok(completion) => axum::Json(completion).into_response(),
        Err(err) => api_error(err.surface_status(), token, err.to_string(), &request_id),
    }
}

/// `POST /inference/cloudflare/chat` (standard tier).
pub async fn cloudflare_chat(
    State(gateway): State<Arc<Gateway>>,
    ctx: Option<Extension<PayerContext>>,
    trace: Option<Extension<TraceId>>,
    body: Result<axum::Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let request_id = request_id_of(&trace);
    let token = token_of(&ctx);
    let body = match parse_body(body, token, &request_id) {
        Ok(body) => body,
        Err(response) => return response,
    };
    if body.get("stream").and_then(|s| s.as_bool()) == Some(true) {
        return api_error(
            StatusCode::BAD_REQUEST,
            token,
            "streaming is not supported on paid endpoints",
            &request_id,
        );
    }
    match gateway.inference.chat_cloudflare(&body).await {
        Ok(completion) => axum::Json(completion).into_response(),
        Err(err) => api_error(err.surface_status(), token, err.to_string(), &request_id),
    }
}

/// `GET /inference/openrouter/models` (free): the upstream model list.
pub async fn openrouter_models(
    State(gateway): State<Arc<Gateway>>,
    trace: Option<Extension<TraceId>>,
) -> Response {
    let request_id = request_id_of(&trace);
    match gateway.inference.openrouter_models().await {
        Ok(models) => axum::Json(models).into_response(),
        Err(err) => api_error(
            StatusCode::BAD_GATEWAY,
            "Native",
            format!("model list unavailable: {err}"),
            &request_id,
        ),
    }
}
