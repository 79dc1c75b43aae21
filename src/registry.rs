//! Endpoint registry and dispatcher.
//!
//! One declarative table maps each `(method, path)` to its price tier,
//! handler, category, and discovery metadata. The same table drives route
//! registration (attaching the payment gate with the declared tier) and the
//! machine-readable discovery manifest. Registering the same method and path
//! twice is a startup error, not a last-one-wins surprise.

use axum::Router;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{MethodRouter, delete, get, post};
use futures_util::FutureExt;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::discovery;
use crate::gateway::Gateway;
use crate::handlers::{api_error, hashing, inference, meta, stacks, storage};
use crate::handlers::hashing::HashAlgorithm;
use crate::payment::PaymentGateLayer;
use crate::pricing::{EstimatorId, PriceSpec};
use crate::trace_id::TraceId;

/// Metadata for one registered endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub method: &'static str,
    pub path: &'static str,
    pub tier: PriceSpec,
    pub category: &'static str,
    pub description: &'static str,
    /// Input/output schema hints surfaced through the discovery manifest.
    pub schema: Option<serde_json::Value>,
}

pub struct RouteEntry {
    pub endpoint: Endpoint,
    route: MethodRouter<Arc<Gateway>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate route registration: {method} {path}")]
    Duplicate {
        method: &'static str,
        path: &'static str,
    },
}

fn entry(
    method: &'static str,
    path: &'static str,
    tier: PriceSpec,
    category: &'static str,
    description: &'static str,
    schema: Option<serde_json::Value>,
    route: MethodRouter<Arc<Gateway>>,
) -> RouteEntry {
    RouteEntry {
        endpoint: Endpoint {
            method,
            path,
            tier,
            category,
            description,
            schema,
        },
        route,
    }
}

/// The full route table. Order is registration order; free endpoints carry
/// `PriceSpec::Free` and bypass the payment gate.
pub fn route_table() -> Vec<RouteEntry> {
    let mut table = Vec::new();

    // Hashing: one standard-tier route per algorithm, each handler produced
    // by the same factory.
    for &(algorithm, segment) in HashAlgorithm::variants() {
        let path: &'static str = match segment {
            "sha256" => "/hashing/sha256",
            "sha512" => "/hashing/sha512",
            "sha512-256" => "/hashing/sha512-256",
            "keccak256" => "/hashing/keccak256",
            "hash160" => "/hashing/hash160",
            _ => "/hashing/ripemd160",
        };
        table.push(entry(
            "POST",
            path,
            PriceSpec::Standard,
            "hashing",
            algorithm.display_name(),
            Some(json!({
                "input": {"data": "string; 0x-prefixed hex or UTF-8", "encoding": "hex|base64 (optional)"},
                "output": {"hash": "string"},
            })),
            hashing::hash_route(algorithm),
        ));
    }

    // Stacks chain utilities.
    table.push(entry(
        "GET",
        "/stacks/address/{address}",
        PriceSpec::Standard,
        "stacks",
        "Validate an address and fetch its account state",
        None,
        get(stacks::get_address),
    ));
    table.push(entry(
        "GET",
        "/stacks/profile/{address}",
        PriceSpec::Standard,
        "stacks",
        "BNS names held by an address",
        None,
        get(stacks::get_profile),
    ));
    table.push(entry(
        "POST",
        "/stacks/decode/clarity",
        PriceSpec::Standard,
        "stacks",
        "Decode a hex-encoded Clarity value",
        Some(json!({"input": {"hex": "string"}})),
        post(stacks::decode_clarity),
    ));
    table.push(entry(
        "POST",
        "/stacks/decode/transaction",
        PriceSpec::Standard,
        "stacks",
        "Look up and decode a transaction by id",
        Some(json!({"input": {"txId": "string"}})),
        post(stacks::decode_transaction),
    ));
    table.push(entry(
        "POST",
        "/stacks/verify/message",
        PriceSpec::Standard,
        "stacks",
        "Verify a signed Stacks message",
        Some(json!({"input": {"message": "string", "signature": "65-byte hex", "address": "optional"}})),
        post(stacks::verify_message),
    ));
    table.push(entry(
        "POST",
        "/stacks/verify/sip018",
        PriceSpec::Standard,
        "stacks",
        "Verify a SIP-018 structured-data signature",
        None,
        post(stacks::verify_sip018),
    ));

    // Inference.
    table.push(entry(
        "POST",
        "/inference/openrouter/chat",
        PriceSpec::Dynamic(EstimatorId::OpenRouterChat),
        "inference",
        "OpenAI-compatible chat completion via OpenRouter",
        Some(json!({
            "input": {"model": "string", "messages": "array", "max_tokens": "optional"},
            "output": "OpenAI chat completion object",
        })),
        post(inference::openrouter_chat),
    ));
    table.push(entry(
        "POST",
        "/inference/cloudflare/chat",
        PriceSpec::Standard,
        "inference",
        "OpenAI-compatible chat completion via Cloudflare Workers AI",
        None,
        post(inference::cloudflare_chat),
    ));
    table.push(entry(
        "GET",
        "/inference/openrouter/models",
        PriceSpec::Free,
        "inference",
        "Upstream model list",
        None,
        get(inference::openrouter_models),
    ));

    // Storage: KV.
    table.push(entry(
        "POST",
        "/storage/kv",
        PriceSpec::Standard,
        "storage",
        "Set a key",
        Some(json!({"input": {"key": "string", "value": "any JSON", "ttl": "seconds (optional)"}})),
        post(storage::kv_set),
    ));
    table.push(entry(
        "GET",
        "/storage/kv",
        PriceSpec::Standard,
        "storage",
        "List keys",
        None,
        get(storage::kv_list),
    ));
    table.push(entry(
        "GET",
        "/storage/kv/{key}",
        PriceSpec::Standard,
        "storage",
        "Get a key",
        None,
        get(storage::kv_get),
    ));
    table.push(entry(
        "DELETE",
        "/storage/kv/{key}",
        PriceSpec::Standard,
        "storage",
        "Delete a key",
        None,
        delete(storage::kv_delete),
    ));

    // Storage: paste.
    table.push(entry(
        "POST",
        "/storage/paste",
        PriceSpec::Standard,
        "storage",
        "Create an immutable paste",
        None,
        post(storage::paste_create),
    ));
    table.push(entry(
        "GET",
        "/storage/paste/{id}",
        PriceSpec::Standard,
        "storage",
        "Fetch a paste",
        None,
        get(storage::paste_get),
    ));
    table.push(entry(
        "DELETE",
        "/storage/paste/{id}",
        PriceSpec::Standard,
        "storage",
        "Delete a paste",
        None,
        delete(storage::paste_delete),
    ));

    // Storage: SQL sandbox.
    table.push(entry(
        "POST",
        "/storage/db/query",
        PriceSpec::Standard,
        "storage",
        "Run a SELECT against your own tables",
        Some(json!({"input": {"sql": "SELECT ...", "params": "array (optional)"}})),
        post(storage::db_query),
    ));
    table.push(entry(
        "POST",
        "/storage/db/execute",
        PriceSpec::Standard,
        "storage",
        "Run a mutating statement against your own tables",
        None,
        post(storage::db_execute),
    ));
    table.push(entry(
        "GET",
        "/storage/db/schema",
        PriceSpec::Standard,
        "storage",
        "Introspect your own tables",
        None,
        get(storage::db_schema),
    ));

    // Storage: sync (locks).
    table.push(entry(
        "POST",
        "/storage/sync/lock",
        PriceSpec::Standard,
        "storage",
        "Acquire a named lock",
        Some(json!({"input": {"name": "string", "ttl": "10..300 seconds (optional)"}})),
        post(storage::sync_lock),
    ));
    table.push(entry(
        "POST",
        "/storage/sync/unlock",
        PriceSpec::Standard,
        "storage",
        "Release a lock using its holder token",
        None,
        post(storage::sync_unlock),
    ));
    table.push(entry(
        "POST",
        "/storage/sync/extend",
        PriceSpec::Standard,
        "storage",
        "Extend a held lock",
        None,
        post(storage::sync_extend),
    ));
    table.push(entry(
        "GET",
        "/storage/sync/status/{name}",
        PriceSpec::Standard,
        "storage",
        "Lock status",
        None,
        get(storage::sync_status),
    ));
    table.push(entry(
        "GET",
        "/storage/sync/list",
        PriceSpec::Standard,
        "storage",
        "List held locks",
        None,
        get(storage::sync_list),
    ));

    // Storage: queue.
    table.push(entry(
        "POST",
        "/storage/queue/push",
        PriceSpec::Standard,
        "storage",
        "Push jobs onto a queue",
        Some(json!({"input": {"queue": "string", "items": "array", "priority": "integer (optional)"}})),
        post(storage::queue_push),
    ));
    table.push(entry(
        "POST",
        "/storage/queue/pop",
        PriceSpec::Standard,
        "storage",
        "Check out jobs in priority order under a visibility window",
        Some(json!({"input": {"queue": "string", "count": "<=100", "visibility": "seconds (optional)"}})),
        post(storage::queue_pop),
    ));
    table.push(entry(
        "POST",
        "/storage/queue/complete",
        PriceSpec::Standard,
        "storage",
        "Acknowledge checked-out jobs",
        None,
        post(storage::queue_complete),
    ));
    table.push(entry(
        "POST",
        "/storage/queue/peek",
        PriceSpec::Standard,
        "storage",
        "Inspect jobs without removing them",
        None,
        post(storage::queue_peek),
    ));
    table.push(entry(
        "POST",
        "/storage/queue/status",
        PriceSpec::Standard,
        "storage",
        "Job counts by status",
        None,
        post(storage::queue_status),
    ));
    table.push(entry(
        "POST",
        "/storage/queue/clear",
        PriceSpec::Standard,
        "storage",
        "Clear a queue",
        None,
        post(storage::queue_clear),
    ));

    // Storage: vector memory.
    table.push(entry(
        "POST",
        "/storage/memory/store",
        PriceSpec::Standard,
        "storage",
        "Upsert memory items with embeddings",
        Some(json!({"input": {"items": [{"id": "string", "text": "string", "embedding": "number[]"}]}})),
        post(storage::memory_store),
    ));
    table.push(entry(
        "POST",
        "/storage/memory/search",
        PriceSpec::Standard,
        "storage",
        "Cosine-similarity search over stored memories",
        Some(json!({"input": {"queryEmbedding": "number[]", "limit": "<=100", "threshold": "0..1"}})),
        post(storage::memory_search),
    ));
    table.push(entry(
        "POST",
        "/storage/memory/delete",
        PriceSpec::Standard,
        "storage",
        "Delete memories by id",
        None,
        post(storage::memory_delete),
    ));
    table.push(entry(
        "POST",
        "/storage/memory/list",
        PriceSpec::Standard,
        "storage",
        "List stored memories",
        None,
        post(storage::memory_list),
    ));
    table.push(entry(
        "POST",
        "/storage/memory/clear",
        PriceSpec::Standard,
        "storage",
        "Clear all stored memories",
        None,
        post(storage::memory_clear),
    ));

    // Free meta and discovery surface.
    table.push(entry(
        "GET",
        "/",
        PriceSpec::Free,
        "meta",
        "Service banner",
        None,
        get(meta::root),
    ));
    table.push(entry(
        "GET",
        "/health",
        PriceSpec::Free,
        "meta",
        "Health and metrics snapshot",
        None,
        get(meta::health),
    ));
    table.push(entry(
        "GET",
        "/openapi.json",
        PriceSpec::Free,
        "meta",
        "OpenAPI summary",
        None,
        get(meta::openapi),
    ));
    table.push(entry(
        "GET",
        "/x402.json",
        PriceSpec::Free,
        "discovery",
        "x402 discovery manifest",
        None,
        get(discovery::manifest_handler),
    ));
    table.push(entry(
        "GET",
        "/.well-known/agent.json",
        PriceSpec::Free,
        "discovery",
        "Agent card",
        None,
        get(discovery::agent_card),
    ));
    table.push(entry(
        "GET",
        "/llms.txt",
        PriceSpec::Free,
        "discovery",
        "LLM-readable service summary",
        None,
        get(discovery::llms_txt),
    ));
    table.push(entry(
        "GET",
        "/llms-full.txt",
        PriceSpec::Free,
        "discovery",
        "LLM-readable full endpoint listing",
        None,
        get(discovery::llms_full_txt),
    ));
    table.push(entry(
        "GET",
        "/topics",
        PriceSpec::Free,
        "discovery",
        "Topic index",
        None,
        get(discovery::topics),
    ));
    table.push(entry(
        "GET",
        "/topics/{topic}",
        PriceSpec::Free,
        "discovery",
        "Topic detail",
        None,
        get(discovery::topic_detail),
    ));

    table
}

/// Endpoint metadata only, for the discovery manifest.
pub fn endpoints() -> Vec<Endpoint> {
    route_table()
        .into_iter()
        .map(|entry| entry.endpoint)
        .collect()
}

/// Builds the router: every table entry registered once, priced entries
/// wrapped with the payment gate, the whole tree wrapped with panic
/// recovery.
pub fn build_router(gateway: Arc<Gateway>) -> Result<Router, RegistryError> {
    let mut seen: HashSet<(&'static str, &'static str)> = HashSet::new();
    let mut by_path: HashMap<&'static str, MethodRouter<Arc<Gateway>>> = HashMap::new();

    for entry in route_table() {
        let endpoint = entry.endpoint;
        if !seen.insert((endpoint.method, endpoint.path)) {
            return Err(RegistryError::Duplicate {
                method: endpoint.method,
                path: endpoint.path,
            });
        }
        let mut route = entry.route;
        if !matches!(endpoint.tier, PriceSpec::Free) {
            route = route.layer(PaymentGateLayer::new(
                gateway.clone(),
                Arc::new(endpoint.clone()),
            ));
        }
        let path = endpoint.path;
        match by_path.remove(path) {
            Some(existing) => {
                by_path.insert(path, existing.merge(route));
            }
            None => {
                by_path.insert(path, route);
            }
        }
    }

    let mut router = Router::new();
    for (path, route) in by_path {
        router = router.route(path, route);
    }
    Ok(router.layer(RecoverLayer).with_state(gateway))
}

// ============================================================================
// Panic recovery
// ============================================================================

/// Top-level recovery: a panicking handler becomes a 500 carrying the
/// correlation id instead of tearing down the connection task.
#[derive(Clone)]
pub struct RecoverLayer;

impl<S> Layer<S> for RecoverLayer {
    type Service = RecoverService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoverService { inner }
    }
}

#[derive(Clone)]
pub struct RecoverService<S> {
    inner: S,
}

impl<S> Service<Request> for RecoverService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let request_id = req
            .extensions()
            .get::<TraceId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        let future = self.inner.call(req);
        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&panic);
                    tracing::error!(request_id = %request_id, panic = %message, "handler panicked");
                    Ok(api_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Native",
                        "internal server error",
                        &request_id,
                    ))
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_route_is_registered_twice() {
        let mut seen = HashSet::new();
        for entry in route_table() {
            assert!(
                seen.insert((entry.endpoint.method, entry.endpoint.path)),
                "duplicate: {} {}",
                entry.endpoint.method,
                entry.endpoint.path
            );
        }
    }

    #[test]
    fn every_priced_endpoint_declares_a_category() {
        for entry in route_table() {
            assert!(!entry.endpoint.category.is_empty());
            assert!(!entry.endpoint.description.is_empty());
        }
    }

    #[test]
    fn hashing_routes_cover_all_algorithms() {
        let paths: Vec<_> = route_table()
            .into_iter()
            .filter(|e| e.endpoint.category == "hashing")
            .map(|e| e.endpoint.path)
            .collect();
        assert_eq!(paths.len(), 6);
        assert!(paths.contains(&"/hashing/sha256"));
        assert!(paths.contains(&"/hashing/keccak256"));
    }

    #[test]
    fn free_endpoints_include_the_discovery_surface() {
        let free: Vec<_> = route_table()
            .into_iter()
            .filter(|e| matches!(e.endpoint.tier, PriceSpec::Free))
            .map(|e| e.endpoint.path)
            .collect();
        for path in ["/", "/health", "/x402.json", "/.well-known/agent.json", "/llms.txt"] {
            assert!(free.contains(&path), "{path} missing from free surface");
        }
    }
}
