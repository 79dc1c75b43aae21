//! Discovery surface.
//!
//! `/x402.json` is the machine-readable catalog of priced resources: a pure
//! function of the registry and server configuration, with no live network
//! calls. Free endpoints are excluded; token/tier combinations that would
//! quote zero are dropped. The companion documents (`agent.json`,
//! `llms.txt`, `/topics`) render the same registry for agent and human
//! consumers.

use axum::Extension;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::gateway::Gateway;
use crate::handlers::{api_error, request_id_of};
use crate::pricing::{PriceSpec, PricingEngine};
use crate::proto::{PaymentRequirements, Scheme};
use crate::registry::{Endpoint, endpoints};
use crate::tokens::TokenKind;
use crate::trace_id::TraceId;
use crate::util::now_secs;

/// Builds the acceptable payment requirements for one endpoint, one entry
/// per supported token. Dynamic endpoints advertise their floor quote; the
/// real amount is quoted per-request in the challenge.
fn accepts_for(gateway: &Gateway, endpoint: &Endpoint) -> Vec<PaymentRequirements> {
    let mut accepts = Vec::new();
    for &kind in TokenKind::variants() {
        if !kind.supported_on(gateway.network) {
            continue;
        }
        let estimate = match endpoint.tier {
            PriceSpec::Dynamic(_) => PricingEngine::dynamic_floor_estimate(kind),
            _ => PricingEngine::standard_estimate(kind),
        };
        if estimate.amount.0 == 0 {
            continue;
        }
        accepts.push(PaymentRequirements {
            scheme: Scheme::Exact,
            network: gateway.network.chain_id().to_string(),
            max_amount_required: estimate.amount,
            asset: kind.asset(gateway.network),
            pay_to: gateway.pay_to.clone(),
            max_timeout_seconds: endpoint.tier.max_timeout_seconds(),
            extra: Some(json!({
                "tier": endpoint.tier.tier_name(),
                "tokenType": kind.wire_name(),
            })),
        });
    }
    accepts
}

/// The versioned discovery manifest.
pub fn build_manifest(gateway: &Gateway) -> serde_json::Value {
    let now = now_secs();
    let items: Vec<serde_json::Value> = endpoints()
        .iter()
        .filter(|endpoint| !matches!(endpoint.tier, PriceSpec::Free))
        .map(|endpoint| {
            let mut item = json!({
                "resource": gateway.resource_url(endpoint.path),
                "type": "http",
                "x402Version": 2,
                "accepts": accepts_for(gateway, endpoint),
                "lastUpdated": now,
                "metadata": {
                    "method": endpoint.method,
                    "category": endpoint.category,
                    "description": endpoint.description,
                    "tier": endpoint.tier.tier_name(),
                },
            });
            if let Some(schema) = &endpoint.schema {
                item["extensions"] = json!({ "bazaar": schema });
            }
            item
        })
        .collect();
    json!({
        "x402Version": 2,
        "items": items,
    })
}

pub async fn manifest_handler(State(gateway): State<Arc<Gateway>>) -> Response {
    axum::Json(build_manifest(&gateway)).into_response()
}

/// `/.well-known/agent.json`: the agent card.
pub async fn agent_card(State(gateway): State<Arc<Gateway>>) -> Response {
    let categories: BTreeSet<&'static str> = endpoints()
        .iter()
        .filter(|e| !matches!(e.tier, PriceSpec::Free))
        .map(|e| e.category)
        .collect();
    axum::Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "url": gateway.base_url.to_string(),
        "capabilities": categories,
        "payments": {
            "protocol": "x402",
            "x402Version": 2,
            "network": gateway.network.chain_id(),
            "payTo": gateway.pay_to,
            "tokens": TokenKind::variants()
                .iter()
                .filter(|t| t.supported_on(gateway.network))
                .map(|t| t.wire_name())
                .collect::<Vec<_>>(),
            "discovery": gateway.resource_url("/x402.json"),
        },
    }))
    .into_response()
}

/// `/llms.txt`: terse service summary for agent consumption.
pub async fn llms_txt(State(gateway): State<Arc<Gateway>>) -> Response {
    let text = format!(
        "# {name}\n\n{description}\n\nNetwork: {network}\nDiscovery: {manifest}\n\
         Payment: HTTP 402 challenge/response (x402 v2). Send payment-signature \
         header with a signed transfer matching one advertised requirement.\n\n\
         Topics: {topics}\n",
        name = env!("CARGO_PKG_NAME"),
        description = env!("CARGO_PKG_DESCRIPTION"),
        network = gateway.network,
        manifest = gateway.resource_url("/x402.json"),
        topics = topic_names().join(", "),
    );
    text.into_response()
}

/// `/llms-full.txt`: every endpoint with tier and price.
pub async fn llms_full_txt(State(gateway): State<Arc<Gateway>>) -> Response {
    let mut text = format!(
        "# {name}: full endpoint listing\n\n",
        name = env!("CARGO_PKG_NAME")
    );
    for endpoint in endpoints() {
        let price = match endpoint.tier {
            PriceSpec::Free => "free".to_string(),
            PriceSpec::Standard => {
                let quote = PricingEngine::standard_estimate(TokenKind::Stx);
                format!("standard ({} uSTX)", quote.amount)
            }
            PriceSpec::Dynamic(_) => "dynamic (quoted per request)".to_string(),
        };
        text.push_str(&format!(
            "{method} {path}: {description} [{price}]\n",
            method = endpoint.method,
            path = endpoint.path,
            description = endpoint.description,
        ));
    }
    text.push_str(&format!(
        "\nDiscovery manifest: {}\n",
        gateway.resource_url("/x402.json")
    ));
    text.into_response()
}

fn topic_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = endpoints()
        .iter()
        .map(|e| e.category)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    names.sort();
    names
}

/// `/topics`: category index.
pub async fn topics() -> Response {
    axum::Json(json!({ "topics": topic_names() })).into_response()
}

/// `/topics/{topic}`: endpoints in one category.
pub async fn topic_detail(
    State(gateway): State<Arc<Gateway>>,
    trace: Option<Extension<TraceId>>,
    Path(topic): Path<String>,
) -> Response {
    let request_id = request_id_of(&trace);
    let matching: Vec<serde_json::Value> = endpoints()
        .iter()
        .filter(|e| e.category == topic)
        .map(|e| {
            json!({
                "method": e.method,
                "path": e.path,
                "resource": gateway.resource_url(e.path),
                "tier": e.tier.tier_name(),
                "description": e.description,
            })
        })
        .collect();
    if matching.is_empty() {
        return api_error(StatusCode::NOT_FOUND, "Native", "unknown topic", &request_id);
    }
    axum::Json(json!({ "topic": topic, "endpoints": matching })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::test_gateway;

    #[test]
    fn manifest_lists_only_priced_endpoints() {
        let gateway = test_gateway("https://relay.test/");
        let manifest = build_manifest(&gateway);
        assert_eq!(manifest["x402Version"], 2);
        let items = manifest["items"].as_array().unwrap();
        assert!(!items.is_empty());
        for item in items {
            let resource = item["resource"].as_str().unwrap();
            assert!(!resource.contains("/health"));
            assert!(!resource.contains("x402.json"));
            assert_eq!(item["type"], "http");
        }
    }

    #[test]
    fn manifest_accepts_are_nonzero_and_per_token() {
        let gateway = test_gateway("https://relay.test/");
        let manifest = build_manifest(&gateway);
        for item in manifest["items"].as_array().unwrap() {
            let accepts = item["accepts"].as_array().unwrap();
            // Mainnet supports all three tokens.
            assert_eq!(accepts.len(), 3);
            for accept in accepts {
                let amount: u128 = accept["maxAmountRequired"]
                    .as_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                assert!(amount > 0);
                assert_eq!(accept["network"], "stacks:1");
                assert_eq!(
                    accept["payTo"],
                    "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7"
                );
            }
        }
    }

    #[test]
    fn manifest_is_deterministic() {
        let gateway = test_gateway("https://relay.test/");
        let a = build_manifest(&gateway);
        let b = build_manifest(&gateway);
        // lastUpdated may tick between builds; compare the items modulo it.
        let strip = |mut v: serde_json::Value| {
            for item in v["items"].as_array_mut().unwrap() {
                item["lastUpdated"] = json!(0);
            }
            v
        };
        assert_eq!(strip(a), strip(b));
    }

    #[test]
    fn path_templates_use_brace_syntax() {
        let gateway = test_gateway("https://relay.test/");
        let manifest = build_manifest(&gateway);
        let resources: Vec<String> = manifest["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["resource"].as_str().unwrap().to_string())
            .collect();
        assert!(
            resources
                .iter()
                .any(|r| r.contains("/stacks/address/{address}"))
        );
        assert!(resources.iter().all(|r| !r.contains(":address")));
    }
}
