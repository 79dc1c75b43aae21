//! The payment state machine.
//!
//! Every priced route is wrapped by [`PaymentGateLayer`]. Per request the
//! gate derives the price, emits a 402 challenge when no payment header is
//! present, decodes and matches the signed payload on retry, settles through
//! the external relay, classifies failures into the retry-aware taxonomy,
//! and on success binds the payer identity into the request before invoking
//! the handler. The settlement receipt is attached to the response headers
//! whether or not the handler itself succeeds: payment was executed, and no
//! refund channel exists.

pub mod classify;

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use crate::gateway::Gateway;
use crate::handlers::api_error;
use crate::payment::classify::classify;
use crate::pricing::{ChatRequest, PriceEstimate, PriceSpec, PricingEngine};
use crate::proto::{
    PaymentPayload, PaymentRequired, PaymentRequirements, ResourceInfo, Scheme, SettleRequest,
    SettlementResult, X402Version2,
};
use crate::registry::Endpoint;
use crate::tokens::TokenKind;
use crate::trace_id::TraceId;
use crate::util::{decode_b64_json, encode_b64_json};

pub const PAYMENT_SIGNATURE_HEADER: &str = "payment-signature";
pub const PAYMENT_REQUIRED_HEADER: &str = "payment-required";
pub const PAYMENT_RESPONSE_HEADER: &str = "payment-response";
pub const PAYER_ADDRESS_HEADER: &str = "x-payer-address";
pub const TOKEN_TYPE_HEADER: &str = "payment-token-type";
/// Legacy header names kept for older clients.
pub const LEGACY_PAYMENT_HEADER: &str = "x-payment";
pub const LEGACY_PAYMENT_RESPONSE_HEADER: &str = "x-payment-response";

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Identity and payment context bound after successful settlement.
///
/// The payer address comes from the settlement result and is the only
/// identity the gateway trusts; shard routing keys off it.
#[derive(Debug, Clone)]
pub struct PayerContext {
    pub payer: String,
    pub token: TokenKind,
    pub estimate: PriceEstimate,
    pub settlement: SettlementResult,
}

/// The request body, parsed once by the pricing step and cached so handlers
/// do not re-parse.
#[derive(Debug, Clone)]
pub struct CachedJsonBody(pub Arc<serde_json::Value>);

/// Tower layer enforcing payment on one registered endpoint.
#[derive(Clone)]
pub struct PaymentGateLayer {
    gateway: Arc<Gateway>,
    endpoint: Arc<Endpoint>,
}

impl PaymentGateLayer {
    pub fn new(gateway: Arc<Gateway>, endpoint: Arc<Endpoint>) -> Self {
        Self { gateway, endpoint }
    }
}

impl<S> Layer<S> for PaymentGateLayer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentGateService;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            gateway: self.gateway.clone(),
            endpoint: self.endpoint.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

#[derive(Clone)]
pub struct PaymentGateService {
    gateway: Arc<Gateway>,
    endpoint: Arc<Endpoint>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for PaymentGateService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gateway = self.gateway.clone();
        let endpoint = self.endpoint.clone();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(gate_request(gateway, endpoint, inner, req).await) })
    }
}

/// Runs the per-request state machine.
async fn gate_request(
    gateway: Arc<Gateway>,
    endpoint: Arc<Endpoint>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Response {
    let request_id = req
        .extensions()
        .get::<TraceId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    if matches!(endpoint.tier, PriceSpec::Free) {
        return call_inner(inner, req).await;
    }

    // Token selection: header wins over query parameter, defaulting to
    // native. Unknown values are rejected before any pricing work.
    let token = match select_token(&req) {
        Ok(token) => token,
        Err(raw) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                &raw,
                format!("unknown token type: {raw}"),
                &request_id,
            );
        }
    };

    // Price derivation. Dynamic endpoints parse the body exactly once here;
    // the parsed document rides along in the request extensions.
    let (mut req, chat) = match endpoint.tier {
        PriceSpec::Dynamic(_) => match buffer_chat_body(req).await {
            Ok((req, chat)) => (req, Some(chat)),
            Err(message) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    token.wire_name(),
                    message,
                    &request_id,
                );
            }
        },
        _ => (req, None),
    };

    let accepts = match build_accepts(&gateway, &endpoint, chat.as_ref()).await {
        Ok(accepts) => accepts,
        Err(message) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                token.wire_name(),
                message,
                &request_id,
            );
        }
    };
    let chosen = accepts
        .iter()
        .find(|(kind, _)| *kind == token)
        .map(|(_, pair)| pair.clone());
    let Some((chosen_requirement, chosen_estimate)) = chosen else {
        return api_error(
            StatusCode::BAD_REQUEST,
            token.wire_name(),
            format!(
                "token {} is not accepted on {}",
                token.wire_name(),
                gateway.network
            ),
            &request_id,
        );
    };

    // Challenge on first hit.
    let payment_header = req
        .headers()
        .get(PAYMENT_SIGNATURE_HEADER)
        .or_else(|| req.headers().get(LEGACY_PAYMENT_HEADER))
        .map(|value| value.as_bytes().to_vec());
    let Some(payment_header) = payment_header else {
        return challenge_response(&gateway, &endpoint, &accepts, req.uri().path());
    };

    // Decode the signed payload.
    let payload: PaymentPayload = match decode_b64_json(&payment_header) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::debug!(error = %err, "malformed payment header");
            return payment_failure(
                token,
                "malformed payment header: invalid payload",
                &request_id,
            );
        }
    };
    let offered: Vec<&PaymentRequirements> = accepts.iter().map(|(_, (r, _))| r).collect();
    if !offered.iter().any(|r| **r == payload.accepted) {
        return payment_failure(
            token,
            "invalid payload: accepted requirement does not match any offered requirement",
            &request_id,
        );
    }

    // Settlement. The settle future is spawned so a client disconnect cannot
    // cancel it: the transfer may still land on chain, and aborting locally
    // would corrupt usage accounting.
    let settle_request = SettleRequest {
        x402_version: X402Version2,
        payment_payload: payload,
        payment_requirements: chosen_requirement.clone(),
    };
    let facilitator = gateway.facilitator.clone();
    let settle_task =
        tokio::spawn(async move { facilitator.settle(&settle_request).await });
    let settle_outcome = match settle_task.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            tracing::error!(error = %join_err, "settlement task failed");
            return classified_failure(token, "settlement task failed", &request_id);
        }
    };

    let settlement = match settle_outcome {
        Ok(settlement) => settlement,
        Err(err) => {
            let detail = err.detail();
            tracing::warn!(error = %detail, "settlement transport failure");
            return classified_failure(token, &detail, &request_id);
        }
    };
    if !settlement.success {
        let detail = settlement
            .error_reason
            .clone()
            .unwrap_or_else(|| "settlement rejected".to_string());
        tracing::info!(reason = %detail, "settlement rejected");
        return classified_failure(token, &detail, &request_id);
    }
    let Some(payer) = settlement.payer.clone().filter(|p| !p.is_empty()) else {
        tracing::error!("settlement result missing payer");
        return classified_failure(token, "settlement result missing payer", &request_id);
    };

    // Identity binding: the settlement's payer is authoritative from here.
    let context = PayerContext {
        payer: payer.clone(),
        token,
        estimate: chosen_estimate.clone(),
        settlement: settlement.clone(),
    };
    req.extensions_mut().insert(context);

    let mut response = call_inner(inner, req).await;
    attach_receipt(&mut response, &settlement, &payer);

    record_usage(&gateway, &endpoint, &payer, token, &chosen_estimate, &settlement);
    response
}

async fn call_inner(
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Response {
    match inner.call(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

fn select_token(req: &Request) -> Result<TokenKind, String> {
    let raw = req
        .headers()
        .get(TOKEN_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .or_else(|| {
            req.uri().query().and_then(|query| {
                query.split('&').find_map(|pair| {
                    pair.strip_prefix("tokenType=").map(|value| value.to_string())
                })
            })
        });
    match raw {
        None => Ok(TokenKind::Stx),
        Some(raw) => raw.parse::<TokenKind>().map_err(|_| raw),
    }
}

async fn buffer_chat_body(req: Request) -> Result<(Request, ChatRequest), String> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| "request body too large or unreadable".to_string())?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| format!("malformed JSON body: {e}"))?;
    let chat: ChatRequest = serde_json::from_value(value.clone())
        .map_err(|e| format!("invalid chat request: {e}"))?;
    if chat.stream == Some(true) {
        return Err("streaming is not supported on paid endpoints".to_string());
    }
    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut()
        .insert(CachedJsonBody(Arc::new(value)));
    Ok((req, chat))
}

type AcceptEntry = (TokenKind, (PaymentRequirements, PriceEstimate));

/// Builds one payment requirement per supported token. Native is always
/// included; bridged tokens only when a contract exists on the configured
/// network. Zero-amount quotes are dropped.
async fn build_accepts(
    gateway: &Gateway,
    endpoint: &Endpoint,
    chat: Option<&ChatRequest>,
) -> Result<Vec<AcceptEntry>, String> {
    let mut accepts = Vec::new();
    for &kind in TokenKind::variants() {
        if !kind.supported_on(gateway.network) {
            continue;
        }
        let estimate = match (&endpoint.tier, chat) {
            (PriceSpec::Dynamic(_), Some(chat)) => gateway
                .pricing
                .chat_estimate(chat, kind)
                .await
                .map_err(|e| e.to_string())?,
            _ => PricingEngine::standard_estimate(kind),
        };
        if estimate.amount.0 == 0 {
            continue;
        }
        let mut extra = json!({
            "tier": endpoint.tier.tier_name(),
            "tokenType": kind.wire_name(),
        });
        if matches!(endpoint.tier, PriceSpec::Dynamic(_)) {
            extra["estimate"] = serde_json::to_value(&estimate).unwrap_or_default();
        }
        if let Some(schema) = &endpoint.schema {
            extra["bazaar"] = schema.clone();
        }
        let requirement = PaymentRequirements {
            scheme: Scheme::Exact,
            network: gateway.network.chain_id().to_string(),
            max_amount_required: estimate.amount,
            asset: kind.asset(gateway.network),
            pay_to: gateway.pay_to.clone(),
            max_timeout_seconds: endpoint.tier.max_timeout_seconds(),
            extra: Some(extra),
        };
        accepts.push((kind, (requirement, estimate)));
    }
    Ok(accepts)
}

/// Emits the 402 challenge, both as the JSON body and base64-encoded in the
/// `payment-required` header.
fn challenge_response(
    gateway: &Gateway,
    endpoint: &Endpoint,
    accepts: &[AcceptEntry],
    request_path: &str,
) -> Response {
    let resource_url = gateway.resource_url(request_path);
    let challenge = PaymentRequired {
        x402_version: X402Version2,
        resource: ResourceInfo {
            url: resource_url,
            description: endpoint.description.to_string(),
            mime_type: "application/json".to_string(),
        },
        accepts: accepts.iter().map(|(_, (r, _))| r.clone()).collect(),
        error: Some("payment required".to_string()),
    };
    let mut response = (
        StatusCode::PAYMENT_REQUIRED,
        axum::Json(serde_json::to_value(&challenge).unwrap_or_default()),
    )
        .into_response();
    if let Ok(encoded) = encode_b64_json(&challenge)
        && let Ok(value) = HeaderValue::from_str(&encoded)
    {
        response.headers_mut().insert(PAYMENT_REQUIRED_HEADER, value);
    }
    response
}

/// A 400 for protocol-level payload problems, bypassing classification.
fn payment_failure(token: TokenKind, message: &str, request_id: &str) -> Response {
    let mut response = api_error(StatusCode::BAD_REQUEST, token.wire_name(), message, request_id);
    annotate_taxonomy(&mut response, "InvalidPayload");
    response
}

/// Classifies a relay failure and renders the taxonomy response.
fn classified_failure(token: TokenKind, detail: &str, request_id: &str) -> Response {
    let classified = classify(detail);
    let taxonomy = format!("{:?}", classified.kind);
    let body = json!({
        "ok": false,
        "tokenType": token.wire_name(),
        "error": detail,
        "taxonomy": taxonomy,
        "requestId": request_id,
    });
    let mut response = (classified.status, axum::Json(body)).into_response();
    if let Some(seconds) = classified.retry_after
        && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn annotate_taxonomy(response: &mut Response, taxonomy: &str) {
    if let Ok(value) = HeaderValue::from_str(taxonomy) {
        response.headers_mut().insert("x-payment-taxonomy", value);
    }
}

/// Attaches the settlement receipt headers. Done for every post-settlement
/// response, including handler 5xx: the transfer did settle.
fn attach_receipt(response: &mut Response, settlement: &SettlementResult, payer: &str) {
    if let Ok(encoded) = encode_b64_json(settlement)
        && let Ok(value) = HeaderValue::from_str(&encoded)
    {
        response
            .headers_mut()
            .insert(PAYMENT_RESPONSE_HEADER, value.clone());
        response
            .headers_mut()
            .insert(LEGACY_PAYMENT_RESPONSE_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(payer) {
        response.headers_mut().insert(PAYER_ADDRESS_HEADER, value);
    }
}

/// Best-effort usage recording, spawned off the response path.
fn record_usage(
    gateway: &Arc<Gateway>,
    endpoint: &Arc<Endpoint>,
    payer: &str,
    token: TokenKind,
    estimate: &PriceEstimate,
    settlement: &SettlementResult,
) {
    let gateway = gateway.clone();
    let endpoint = endpoint.clone();
    let payer = payer.to_string();
    let amount = estimate.amount.0;
    let transaction = settlement.transaction.clone();
    tokio::spawn(async move {
        gateway
            .metrics
            .record_payment(endpoint.category, token.wire_name(), amount);
        match gateway.shards.shard(&payer) {
            Ok(shard) => {
                if let Err(err) = shard
                    .usage_record(
                        endpoint.path,
                        endpoint.category,
                        token.wire_name(),
                        amount,
                        transaction.clone(),
                    )
                    .await
                {
                    tracing::warn!(error = %err, "failed to record payer usage");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to open payer shard for usage"),
        }
        gateway.log_sink.submit(json!({
            "event": "payment_settled",
            "endpoint": endpoint.path,
            "category": endpoint.category,
            "payer": payer,
            "tokenType": token.wire_name(),
            "amount": amount.to_string(),
            "transaction": transaction,
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::test_gateway;
    use crate::registry::build_router;
    use crate::trace_id::TraceIdLayer;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAYER_A: &str = "SPA11111111111111111111111111111111111";
    const PAYER_B: &str = "SPB22222222222222222222222222222222222";

    async fn router_with_relay(relay: &MockServer) -> (Router, Arc<Gateway>) {
        let gateway = test_gateway(relay.uri().as_str());
        let router = build_router(gateway.clone()).unwrap().layer(TraceIdLayer);
        (router, gateway)
    }

    fn settled(payer: &str) -> serde_json::Value {
        json!({
            "success": true,
            "transaction": "0xfeed",
            "payer": payer,
            "network": "stacks:1",
        })
    }

    async fn mount_settle(relay: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(relay)
            .await;
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Fetches the 402 challenge for a request and returns it decoded.
    async fn challenge_for(
        router: &Router,
        method_name: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> PaymentRequired {
        let request = HttpRequest::builder()
            .method(method_name)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let header = response
            .headers()
            .get(PAYMENT_REQUIRED_HEADER)
            .expect("challenge header")
            .as_bytes()
            .to_vec();
        decode_b64_json(&header).unwrap()
    }

    fn payment_header_for(challenge: &PaymentRequired, token_asset: &str) -> String {
        let accepted = challenge
            .accepts
            .iter()
            .find(|requirement| requirement.asset == token_asset)
            .expect("requirement for token")
            .clone();
        let payload = PaymentPayload {
            x402_version: X402Version2,
            accepted,
            payload: serde_json::value::to_raw_value(&json!({"transaction": "00deadbeef"}))
                .unwrap(),
        };
        encode_b64_json(&payload).unwrap()
    }

    #[tokio::test]
    async fn unpaid_request_gets_a_challenge_with_all_tokens() {
        let relay = MockServer::start().await;
        let (router, _) = router_with_relay(&relay).await;

        let challenge = challenge_for(
            &router,
            "POST",
            "/hashing/sha256",
            json!({"data": "hello world"}),
        )
        .await;

        // Native plus both bridged tokens on mainnet, nonzero amounts.
        assert_eq!(challenge.accepts.len(), 3);
        let native = challenge
            .accepts
            .iter()
            .find(|r| r.asset == "STX")
            .unwrap();
        assert_eq!(native.max_amount_required.0, 1000);
        assert_eq!(native.network, "stacks:1");
        assert_eq!(native.max_timeout_seconds, 60);
        assert!(challenge.accepts.iter().all(|r| r.max_amount_required.0 > 0));
    }

    #[tokio::test]
    async fn paid_hashing_request_round_trips() {
        let relay = MockServer::start().await;
        mount_settle(&relay, settled(PAYER_A)).await;
        let (router, _) = router_with_relay(&relay).await;

        let challenge = challenge_for(
            &router,
            "POST",
            "/hashing/sha256",
            json!({"data": "hello world"}),
        )
        .await;
        let header = payment_header_for(&challenge, "STX");

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/hashing/sha256")
            .header("content-type", "application/json")
            .header(PAYMENT_SIGNATURE_HEADER, header)
            .body(Body::from(json!({"data": "hello world"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let receipt_header = response
            .headers()
            .get(PAYMENT_RESPONSE_HEADER)
            .expect("receipt header")
            .as_bytes()
            .to_vec();
        let receipt: SettlementResult = decode_b64_json(&receipt_header).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.payer.as_deref(), Some(PAYER_A));
        assert_eq!(
            response.headers().get(PAYER_ADDRESS_HEADER).unwrap(),
            PAYER_A
        );

        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(
            body["hash"],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(body["algorithm"], "SHA-256");
        assert_eq!(body["inputLength"], 11);
        assert_eq!(body["tokenType"], "Native");
    }

    #[tokio::test]
    async fn broadcast_failure_is_502_with_retry_hint() {
        let relay = MockServer::start().await;
        mount_settle(
            &relay,
            json!({"success": false, "errorReason": "broadcast_failed"}),
        )
        .await;
        let (router, _) = router_with_relay(&relay).await;

        let challenge = challenge_for(
            &router,
            "POST",
            "/hashing/sha256",
            json!({"data": "x"}),
        )
        .await;
        let header = payment_header_for(&challenge, "STX");
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/hashing/sha256")
            .header("content-type", "application/json")
            .header(PAYMENT_SIGNATURE_HEADER, header)
            .body(Body::from(json!({"data": "x"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers().get("retry-after").unwrap(), "5");
        let body = body_json(response).await;
        assert_eq!(body["taxonomy"], "UnexpectedSettle");
    }

    #[tokio::test]
    async fn shards_are_isolated_between_payers() {
        let relay = MockServer::start().await;
        // First settlement is payer A, every later one payer B.
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(settled(PAYER_A)))
            .up_to_n_times(1)
            .mount(&relay)
            .await;
        mount_settle(&relay, settled(PAYER_B)).await;
        let (router, _) = router_with_relay(&relay).await;

        // Payer A writes k.
        let challenge = challenge_for(
            &router,
            "POST",
            "/storage/kv",
            json!({"key": "k", "value": "A"}),
        )
        .await;
        let header = payment_header_for(&challenge, "STX");
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/storage/kv")
            .header("content-type", "application/json")
            .header(PAYMENT_SIGNATURE_HEADER, &header)
            .body(Body::from(json!({"key": "k", "value": "A"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Payer B reads k through its own challenge: not found.
        let challenge = challenge_for(&router, "GET", "/storage/kv/k", json!({})).await;
        let header = payment_header_for(&challenge, "STX");
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/storage/kv/k")
            .header(PAYMENT_SIGNATURE_HEADER, &header)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_token_type_is_rejected() {
        let relay = MockServer::start().await;
        let (router, _) = router_with_relay(&relay).await;
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/hashing/sha256")
            .header("content-type", "application/json")
            .header(TOKEN_TYPE_HEADER, "DOGE")
            .body(Body::from(json!({"data": "x"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn malformed_payment_header_is_400() {
        let relay = MockServer::start().await;
        let (router, _) = router_with_relay(&relay).await;
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/hashing/sha256")
            .header("content-type", "application/json")
            .header(PAYMENT_SIGNATURE_HEADER, "%%%not-base64%%%")
            .body(Body::from(json!({"data": "x"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mismatched_requirement_is_rejected() {
        let relay = MockServer::start().await;
        mount_settle(&relay, settled(PAYER_A)).await;
        let (router, _) = router_with_relay(&relay).await;

        let challenge = challenge_for(
            &router,
            "POST",
            "/hashing/sha256",
            json!({"data": "x"}),
        )
        .await;
        let mut accepted = challenge.accepts[0].clone();
        // Tamper with the amount: no offered requirement matches.
        accepted.max_amount_required = crate::tokens::TokenAmount(1);
        let payload = PaymentPayload {
            x402_version: X402Version2,
            accepted,
            payload: serde_json::value::to_raw_value(&json!({})).unwrap(),
        };
        let header = encode_b64_json(&payload).unwrap();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/hashing/sha256")
            .header("content-type", "application/json")
            .header(PAYMENT_SIGNATURE_HEADER, header)
            .body(Body::from(json!({"data": "x"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dynamic_challenge_quotes_from_the_body() {
        let relay = MockServer::start().await;
        let (router, _) = router_with_relay(&relay).await;

        let challenge = challenge_for(
            &router,
            "POST",
            "/inference/openrouter/chat",
            json!({"model": "test/model", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;
        let native = challenge
            .accepts
            .iter()
            .find(|r| r.asset == "STX")
            .unwrap();
        // Cost clamps to the $0.001 floor: 500 micro-STX at $2/STX.
        assert_eq!(native.max_amount_required.0, 500);
        assert_eq!(native.max_timeout_seconds, 120);
    }

    #[tokio::test]
    async fn dynamic_endpoint_rejects_streaming_and_unknown_models() {
        let relay = MockServer::start().await;
        let (router, _) = router_with_relay(&relay).await;

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/inference/openrouter/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"model": "test/model", "messages": [{"role": "user", "content": "hi"}], "stream": true})
                    .to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/inference/openrouter/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"model": "nope/unknown", "messages": [{"role": "user", "content": "hi"}]})
                    .to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn free_endpoints_bypass_payment() {
        let relay = MockServer::start().await;
        let (router, _) = router_with_relay(&relay).await;
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn legacy_payment_header_is_accepted() {
        let relay = MockServer::start().await;
        mount_settle(&relay, settled(PAYER_A)).await;
        let (router, _) = router_with_relay(&relay).await;

        let challenge = challenge_for(
            &router,
            "POST",
            "/hashing/sha256",
            json!({"data": "x"}),
        )
        .await;
        let header = payment_header_for(&challenge, "STX");
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/hashing/sha256")
            .header("content-type", "application/json")
            .header(LEGACY_PAYMENT_HEADER, header)
            .body(Body::from(json!({"data": "x"}).to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(LEGACY_PAYMENT_RESPONSE_HEADER)
                .is_some()
        );
    }
}
