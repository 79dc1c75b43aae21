//! Free meta endpoints: banner, health, and the OpenAPI summary.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::pricing::PriceSpec;
use crate::registry::endpoints;
use crate::util::now_secs;

/// `GET /`: service banner.
pub async fn root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    let pkg_version = env!("CARGO_PKG_VERSION");
    (StatusCode::OK, format!("{pkg_name} v{pkg_version}"))
}

/// `GET /health`: liveness plus the global metrics snapshot.
pub async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let snapshot = gateway.metrics.snapshot();
    axum::Json(json!({
        "ok": true,
        "network": gateway.network.to_string(),
        "chainId": gateway.network.chain_id(),
        "uptimeSeconds": now_secs() - snapshot.started_at,
        "metrics": snapshot,
    }))
    .into_response()
}

/// `GET /openapi.json`: a generated summary of the registered surface.
///
/// Schemas here are intentionally shallow; the discovery manifest carries
/// the richer per-endpoint extension data.
pub async fn openapi(State(gateway): State<Arc<Gateway>>) -> Response {
    let mut paths = serde_json::Map::new();
    for endpoint in endpoints() {
        let operation = json!({
            "summary": endpoint.description,
            "tags": [endpoint.category],
            "x-price-tier": endpoint.tier.tier_name(),
            "responses": match endpoint.tier {
                PriceSpec::Free => json!({"200": {"description": "OK"}}),
                _ => json!({
                    "200": {"description": "OK"},
                    "402": {"description": "Payment required; see payment-required header"},
                }),
            },
        });
        let entry = paths
            .entry(endpoint.path.to_string())
            .or_insert_with(|| json!({}));
        entry[endpoint.method.to_lowercase()] = operation;
    }
    axum::Json(json!({
        "openapi": "3.1.0",
        "info": {
            "title": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
        },
        "servers": [{"url": gateway.base_url.to_string()}],
        "paths": paths,
    }))
    .into_response()
}
