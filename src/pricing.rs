//! Pricing engine.
//!
//! Two surfaces: fixed-tier quotes (a constant STX-denominated price
//! converted into each accepted token) and dynamic quotes for chat
//! completions (estimated from the request body against the model catalog).
//! All conversions run through `rust_decimal` and land on atomic units; a
//! per-token minimum is enforced on every quote.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model_cache::{ModelCache, ModelLookup, ModelPricing};
use crate::tokens::{TokenAmount, TokenKind};

/// Multiplier applied on top of the estimated upstream cost.
pub const DYNAMIC_MARGIN: f64 = 0.20;
/// Floor for any dynamic quote, in USD.
pub const MINIMUM_DYNAMIC_USD: f64 = 0.001;
/// Output-token assumption when the request does not cap `max_tokens`.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 512;
/// Standard tier price: 0.001 STX.
pub const STANDARD_TIER_MICRO_STX: u128 = 1000;

/// How a registered endpoint is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSpec {
    /// No payment; bypasses the payment state machine entirely.
    Free,
    /// The fixed price shared by all non-LLM priced endpoints.
    Standard,
    /// Price computed per-request by the named estimator.
    Dynamic(EstimatorId),
}

impl PriceSpec {
    pub fn tier_name(&self) -> &'static str {
        match self {
            PriceSpec::Free => "free",
            PriceSpec::Standard => "standard",
            PriceSpec::Dynamic(_) => "dynamic",
        }
    }

    /// Transfer timeout quoted in challenges: dynamic quotes get a longer
    /// window because the client must re-derive the body-dependent amount.
    pub fn max_timeout_seconds(&self) -> u64 {
        match self {
            PriceSpec::Dynamic(_) => 120,
            _ => 60,
        }
    }
}

/// Statically registered dynamic estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorId {
    /// Chat-completion estimator over the OpenRouter model catalog.
    OpenRouterChat,
}

/// A quoted price for one request in one token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEstimate {
    pub amount: TokenAmount,
    pub token: TokenKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Estimated upstream cost before margin, USD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_cost: Option<f64>,
    /// Quoted price after margin and floor, USD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_total: Option<f64>,
}

/// The subset of a chat-completion body the estimator reads.
///
/// Unknown fields are preserved elsewhere (the raw body is forwarded to the
/// provider); this type only drives pricing.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[allow(dead_code)]
    pub role: String,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("chat request has no messages")]
    EmptyMessages,
}

/// Compiled-in fallback prices used when the catalog cache has no snapshot.
fn fallback_pricing(model: &str) -> ModelPricing {
    match model {
        "anthropic/claude-3.5-haiku" => ModelPricing {
            prompt_per_k: 0.0008,
            completion_per_k: 0.004,
        },
        "openai/gpt-4o-mini" => ModelPricing {
            prompt_per_k: 0.00015,
            completion_per_k: 0.0006,
        },
        "meta-llama/llama-3.1-8b-instruct" => ModelPricing {
            prompt_per_k: 0.00005,
            completion_per_k: 0.00005,
        },
        _ => ModelPricing {
            prompt_per_k: 0.002,
            completion_per_k: 0.006,
        },
    }
}

pub struct PricingEngine {
    catalog: Arc<ModelCache>,
}

impl PricingEngine {
    pub fn new(catalog: Arc<ModelCache>) -> Self {
        Self { catalog }
    }

    /// Quote for a fixed-tier endpoint in `token` atomic units.
    ///
    /// The standard tier is STX-denominated; bridged tokens get the USD
    /// equivalent through the fixed symmetry rates, clamped to the token's
    /// minimum.
    pub fn standard_estimate(token: TokenKind) -> PriceEstimate {
        let stx = Decimal::from(STANDARD_TIER_MICRO_STX as u64)
            / Decimal::from(10u64.pow(TokenKind::Stx.decimals()));
        let usd = stx * TokenKind::Stx.usd_rate();
        let amount = usd_to_atomic(usd, token);
        PriceEstimate {
            amount: TokenAmount(amount.max(token.minimum_atomic())),
            token,
            model: None,
            input_tokens: None,
            output_tokens: None,
            usd_cost: None,
            usd_total: usd.to_f64(),
        }
    }

    /// The smallest quote a dynamic endpoint can produce, used by the
    /// discovery manifest where no request body exists to estimate from.
    pub fn dynamic_floor_estimate(token: TokenKind) -> PriceEstimate {
        let usd = Decimal::from_f64(MINIMUM_DYNAMIC_USD).unwrap_or(Decimal::ZERO);
        let amount = usd_to_atomic(usd, token);
        PriceEstimate {
            amount: TokenAmount(amount.max(token.minimum_atomic())),
            token,
            model: None,
            input_tokens: None,
            output_tokens: None,
            usd_cost: None,
            usd_total: Some(MINIMUM_DYNAMIC_USD),
        }
    }

    /// Quote for a chat-completion request in `token` atomic units.
    pub async fn chat_estimate(
        &self,
        request: &ChatRequest,
        token: TokenKind,
    ) -> Result<PriceEstimate, PricingError> {
        if request.messages.is_empty() {
            return Err(PricingError::EmptyMessages);
        }
        let pricing = match self.catalog.lookup(&request.model).await {
            ModelLookup::Priced(pricing) => pricing,
            ModelLookup::Fallback => fallback_pricing(&request.model),
            ModelLookup::Unknown => {
                return Err(PricingError::UnknownModel(request.model.clone()));
            }
        };

        let total_chars: u64 = request
            .messages
            .iter()
            .map(|m| m.content.chars().count() as u64)
            .sum();
        let input_tokens = total_chars.div_ceil(4).max(1);
        let output_tokens = request
            .max_tokens
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS)
            .min(2 * input_tokens);

        let usd_cost = (input_tokens as f64) * pricing.prompt_per_k / 1000.0
            + (output_tokens as f64) * pricing.completion_per_k / 1000.0;
        let usd_total = (usd_cost * (1.0 + DYNAMIC_MARGIN)).max(MINIMUM_DYNAMIC_USD);

        let usd = Decimal::from_f64(usd_total).unwrap_or(Decimal::ZERO);
        let amount = usd_to_atomic(usd, token);
        Ok(PriceEstimate {
            amount: TokenAmount(amount.max(token.minimum_atomic())),
            token,
            model: Some(request.model.clone()),
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            usd_cost: Some(usd_cost),
            usd_total: Some(usd_total),
        })
    }
}

/// Converts a USD figure into atomic units of `token` through its fixed rate.
fn usd_to_atomic(usd: Decimal, token: TokenKind) -> u128 {
    let scale = Decimal::from(10u64.pow(token.decimals()));
    let atomic = usd / token.usd_rate() * scale;
    atomic
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u128()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_cache::{CatalogFetch, CatalogFetchError};
    use std::collections::HashMap;

    fn engine_with(entries: Vec<(&'static str, ModelPricing)>) -> PricingEngine {
        let fetch: CatalogFetch = Arc::new(move || {
            let entries: HashMap<String, ModelPricing> = entries
                .iter()
                .map(|(name, pricing)| (name.to_string(), *pricing))
                .collect();
            Box::pin(async move { Ok(entries) })
        });
        PricingEngine::new(Arc::new(ModelCache::new(fetch)))
    }

    fn engine_without_catalog() -> PricingEngine {
        let fetch: CatalogFetch =
            Arc::new(|| Box::pin(async { Err(CatalogFetchError::Upstream("down".to_string())) }));
        PricingEngine::new(Arc::new(ModelCache::new(fetch)))
    }

    fn chat(model: &str, content: &str, max_tokens: Option<u64>) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: content.to_string(),
            }],
            max_tokens,
            stream: None,
        }
    }

    #[test]
    fn standard_tier_is_1000_micro_stx() {
        let estimate = PricingEngine::standard_estimate(TokenKind::Stx);
        assert_eq!(estimate.amount, TokenAmount(1000));
    }

    #[test]
    fn standard_tier_converts_across_tokens() {
        // 0.001 STX at $2/STX is $0.002: 2000 micro-sUSD, and 2 sats which
        // clamps up to the 10-sat minimum.
        assert_eq!(
            PricingEngine::standard_estimate(TokenKind::Susd).amount,
            TokenAmount(2000)
        );
        assert_eq!(
            PricingEngine::standard_estimate(TokenKind::Sbtc).amount,
            TokenAmount(10)
        );
    }

    #[tokio::test]
    async fn dynamic_estimate_clamps_to_the_usd_floor() {
        let engine = engine_with(vec![(
            "x",
            ModelPricing {
                prompt_per_k: 0.001,
                completion_per_k: 0.002,
            },
        )]);
        let estimate = engine
            .chat_estimate(&chat("x", "hi", None), TokenKind::Susd)
            .await
            .unwrap();
        assert_eq!(estimate.input_tokens, Some(1));
        assert_eq!(estimate.output_tokens, Some(2));
        assert!((estimate.usd_cost.unwrap() - 5e-6).abs() < 1e-12);
        assert_eq!(estimate.usd_total, Some(MINIMUM_DYNAMIC_USD));
        // $0.001 in micro-sUSD.
        assert_eq!(estimate.amount, TokenAmount(1000));
    }

    #[tokio::test]
    async fn dynamic_estimate_in_native_uses_the_stx_rate() {
        let engine = engine_with(vec![(
            "x",
            ModelPricing {
                prompt_per_k: 0.001,
                completion_per_k: 0.002,
            },
        )]);
        let estimate = engine
            .chat_estimate(&chat("x", "hi", None), TokenKind::Stx)
            .await
            .unwrap();
        // $0.001 at $2/STX = 0.0005 STX = 500 micro-STX.
        assert_eq!(estimate.amount, TokenAmount(500));
    }

    #[tokio::test]
    async fn output_tokens_cap_at_twice_input() {
        let engine = engine_with(vec![(
            "x",
            ModelPricing {
                prompt_per_k: 1.0,
                completion_per_k: 1.0,
            },
        )]);
        let long_prompt = "a".repeat(400); // 100 input tokens
        let estimate = engine
            .chat_estimate(&chat("x", &long_prompt, Some(100_000)), TokenKind::Susd)
            .await
            .unwrap();
        assert_eq!(estimate.input_tokens, Some(100));
        assert_eq!(estimate.output_tokens, Some(200));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_when_catalog_is_populated() {
        let engine = engine_with(vec![(
            "known",
            ModelPricing {
                prompt_per_k: 0.001,
                completion_per_k: 0.002,
            },
        )]);
        let result = engine
            .chat_estimate(&chat("unknown", "hi", None), TokenKind::Stx)
            .await;
        assert!(matches!(result, Err(PricingError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn empty_catalog_falls_back_to_compiled_table() {
        let engine = engine_without_catalog();
        let estimate = engine
            .chat_estimate(&chat("anything/odd-model", "hi", None), TokenKind::Susd)
            .await
            .unwrap();
        assert!(estimate.amount.0 >= 1000);
    }

    #[tokio::test]
    async fn quotes_are_deterministic() {
        let engine = engine_with(vec![(
            "x",
            ModelPricing {
                prompt_per_k: 0.01,
                completion_per_k: 0.02,
            },
        )]);
        let request = chat("x", "determinism check prompt", Some(64));
        let a = engine
            .chat_estimate(&request, TokenKind::Susd)
            .await
            .unwrap();
        let b = engine
            .chat_estimate(&request, TokenKind::Susd)
            .await
            .unwrap();
        assert_eq!(a.amount, b.amount);
    }
}
