//! Inference provider clients: OpenRouter and Cloudflare Workers AI.
//!
//! Both speak the OpenAI-compatible chat-completion shape, so the gateway
//! forwards request bodies verbatim and returns provider JSON unchanged.
//! The OpenRouter model list doubles as the source behind the model catalog
//! cache.

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::adapters::{AdapterError, send_json, shared_client};
use crate::model_cache::{CatalogFetch, CatalogFetchError, ModelPricing};

const DEFAULT_OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1/";
const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    openrouter_base: Url,
    openrouter_key: Option<String>,
    cloudflare_base: Option<Url>,
    cloudflare_key: Option<String>,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(
        openrouter_key: Option<String>,
        cloudflare_account_id: Option<String>,
        cloudflare_key: Option<String>,
    ) -> Result<Self, AdapterError> {
        let openrouter_base =
            Url::parse(DEFAULT_OPENROUTER_BASE).map_err(|source| AdapterError::BadUrl {
                context: "openrouter base",
                source,
            })?;
        let cloudflare_base = cloudflare_account_id
            .map(|account| {
                Url::parse(&format!(
                    "https://api.cloudflare.com/client/v4/accounts/{account}/ai/v1/"
                ))
            })
            .transpose()
            .map_err(|source| AdapterError::BadUrl {
                context: "cloudflare base",
                source,
            })?;
        Ok(Self {
            client: shared_client(),
            openrouter_base,
            openrouter_key,
            cloudflare_base,
            cloudflare_key,
            timeout: DEFAULT_CHAT_TIMEOUT,
        })
    }

    /// Points the OpenRouter side at a different base URL (tests).
    pub fn with_openrouter_base(mut self, base: Url) -> Self {
        self.openrouter_base = base;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn openrouter_url(&self, path: &str) -> Result<Url, AdapterError> {
        self.openrouter_base
            .join(path)
            .map_err(|source| AdapterError::BadUrl {
                context: "openrouter",
                source,
            })
    }

    /// `POST /chat/completions` against OpenRouter, body forwarded verbatim.
    pub async fn chat_openrouter(
        &self,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError> {
        let key = self
            .openrouter_key
            .as_deref()
            .ok_or(AdapterError::MissingCredentials("OPENROUTER_API_KEY"))?;
        let url = self.openrouter_url("chat/completions")?;
        let request = self
            .client
            .post(url)
            .bearer_auth(key)
            .timeout(self.timeout)
            .json(body);
        send_json(request, "POST openrouter/chat/completions").await
    }

    /// `POST /chat/completions` against Cloudflare Workers AI.
    pub async fn chat_cloudflare(
        &self,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError> {
        let base = self
            .cloudflare_base
            .as_ref()
            .ok_or(AdapterError::MissingCredentials("CLOUDFLARE_ACCOUNT_ID"))?;
        let key = self
            .cloudflare_key
            .as_deref()
            .ok_or(AdapterError::MissingCredentials("CLOUDFLARE_API_KEY"))?;
        let url = base
            .join("chat/completions")
            .map_err(|source| AdapterError::BadUrl {
                context: "cloudflare",
                source,
            })?;
        let request = self
            .client
            .post(url)
            .bearer_auth(key)
            .timeout(self.timeout)
            .json(body);
        send_json(request, "POST cloudflare/chat/completions").await
    }

    /// Raw `GET /models` list, served on the free models endpoint.
    pub async fn openrouter_models(&self) -> Result<serde_json::Value, AdapterError> {
        let url = self.openrouter_url("models")?;
        let request = self.client.get(url).timeout(Duration::from_secs(10));
        send_json(request, "GET openrouter/models").await
    }

    /// One-shot classification call used by the safety scanner: fixed model,
    /// temperature zero, small completion.
    pub async fn classify(
        &self,
        system_prompt: &str,
        content: &str,
    ) -> Result<String, AdapterError> {
        let body = serde_json::json!({
            "model": "openai/gpt-4o-mini",
            "temperature": 0,
            "max_tokens": 200,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": content},
            ],
        });
        let response = self.chat_openrouter(&body).await?;
        Ok(response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// Builds the catalog fetch closure behind the model cache. OpenRouter
    /// reports USD per token; the cache stores USD per thousand.
    pub fn catalog_fetch(self: &Arc<Self>) -> CatalogFetch {
        let this = self.clone();
        Arc::new(move || {
            let this = this.clone();
            Box::pin(async move {
                let listing = this
                    .openrouter_models()
                    .await
                    .map_err(|e| CatalogFetchError::Upstream(e.to_string()))?;
                Ok(parse_catalog(&listing))
            })
        })
    }
}

fn parse_catalog(listing: &serde_json::Value) -> HashMap<String, ModelPricing> {
    let mut catalog = HashMap::new();
    let Some(models) = listing["data"].as_array() else {
        return catalog;
    };
    for model in models {
        let Some(id) = model["id"].as_str() else {
            continue;
        };
        let prompt = per_token_price(&model["pricing"]["prompt"]);
        let completion = per_token_price(&model["pricing"]["completion"]);
        if let (Some(prompt), Some(completion)) = (prompt, completion) {
            catalog.insert(
                id.to_string(),
                ModelPricing {
                    prompt_per_k: prompt * 1000.0,
                    completion_per_k: completion * 1000.0,
                },
            );
        }
    }
    catalog
}

fn per_token_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openrouter_pricing_into_per_k() {
        let listing = serde_json::json!({
            "data": [
                {"id": "a/b", "pricing": {"prompt": "0.000001", "completion": "0.000002"}},
                {"id": "no-pricing"},
                {"id": "c/d", "pricing": {"prompt": 0.00001, "completion": "garbage"}},
            ]
        });
        let catalog = parse_catalog(&listing);
        assert_eq!(catalog.len(), 1);
        let pricing = catalog["a/b"];
        assert!((pricing.prompt_per_k - 0.001).abs() < 1e-12);
        assert!((pricing.completion_per_k - 0.002).abs() < 1e-12);
    }

    #[tokio::test]
    async fn models_endpoint_round_trips() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "x/y", "pricing": {"prompt": "0.000001", "completion": "0.000001"}}]
            })))
            .mount(&server)
            .await;

        let client = Arc::new(
            InferenceClient::new(None, None, None)
                .unwrap()
                .with_openrouter_base(Url::parse(&format!("{}/", server.uri())).unwrap()),
        );
        let fetch = client.catalog_fetch();
        let catalog = fetch().await.unwrap();
        assert!(catalog.contains_key("x/y"));
    }

    #[tokio::test]
    async fn chat_without_credentials_is_a_config_error() {
        let client = InferenceClient::new(None, None, None).unwrap();
        let err = client
            .chat_openrouter(&serde_json::json!({"model": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::MissingCredentials(_)));
    }
}
