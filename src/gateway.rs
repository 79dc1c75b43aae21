//! Shared gateway state.
//!
//! One [`Gateway`] is built at startup from configuration and injected into
//! dispatch as axum state. All process-global mutable pieces (the model
//! catalog, the metrics plane, the shard map) live here rather than in
//! module statics, so tests can instantiate private copies.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::adapters::embeddings::EmbeddingsClient;
use crate::adapters::inference::InferenceClient;
use crate::adapters::log_sink::LogSink;
use crate::adapters::stacks_api::StacksApiClient;
use crate::adapters::AdapterError;
use crate::config::Config;
use crate::facilitator::{FacilitatorClient, FacilitatorError};
use crate::metrics::GlobalMetrics;
use crate::model_cache::ModelCache;
use crate::network::StacksNetwork;
use crate::pricing::PricingEngine;
use crate::safety::SafetyScanner;
use crate::shard::{ShardError, ShardManager};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Shard(#[from] ShardError),
}

pub struct Gateway {
    pub network: StacksNetwork,
    pub pay_to: String,
    pub base_url: Url,
    pub pricing: PricingEngine,
    pub catalog: Arc<ModelCache>,
    pub facilitator: FacilitatorClient,
    pub shards: Arc<ShardManager>,
    pub metrics: Arc<GlobalMetrics>,
    pub inference: Arc<InferenceClient>,
    pub stacks_api: StacksApiClient,
    pub embeddings: Option<EmbeddingsClient>,
    pub safety: SafetyScanner,
    pub log_sink: LogSink,
}

impl Gateway {
    pub fn from_config(config: &Config) -> Result<Arc<Self>, GatewayError> {
        let inference = Arc::new(InferenceClient::new(
            config.openrouter_api_key.clone(),
            config.cloudflare_account_id.clone(),
            config.cloudflare_api_key.clone(),
        )?);
        let catalog = Arc::new(ModelCache::new(inference.catalog_fetch()));
        let facilitator = FacilitatorClient::try_new(config.facilitator_url.clone())?;
        let shards = Arc::new(ShardManager::new(config.data_dir.clone())?);
        let stacks_api = StacksApiClient::new(config.stacks_api_root());
        let embeddings = config
            .embeddings_url
            .clone()
            .map(|url| EmbeddingsClient::new(url, config.embeddings_api_key.clone()));

        Ok(Arc::new(Self {
            network: config.network,
            pay_to: config.pay_to.clone(),
            base_url: config.public_base_url(),
            pricing: PricingEngine::new(catalog.clone()),
            catalog,
            facilitator,
            shards,
            metrics: Arc::new(GlobalMetrics::new()),
            inference,
            stacks_api,
            embeddings,
            safety: SafetyScanner::new(),
            log_sink: LogSink::new(),
        }))
    }

    /// Starts the background side-channel workers.
    pub fn spawn_workers(&self, log_sink_url: Option<Url>, cancel: CancellationToken) {
        self.log_sink.spawn_worker(log_sink_url, cancel.clone());
        self.safety
            .spawn_worker(self.inference.clone(), self.shards.clone(), cancel);
    }

    /// Absolute URL of a gateway path, for challenges and discovery entries.
    ///
    /// Built by concatenation rather than `Url::join` so `{name}` path
    /// templates survive into the manifest without percent-encoding.
    pub fn resource_url(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::model_cache::{CatalogFetch, ModelPricing};
    use std::collections::HashMap;

    /// A gateway wired for tests: in-memory shards, canned catalog, and a
    /// facilitator pointing at the given URL (usually a wiremock server).
    pub fn test_gateway(facilitator_url: &str) -> Arc<Gateway> {
        let fetch: CatalogFetch = Arc::new(|| {
            Box::pin(async {
                let mut entries = HashMap::new();
                entries.insert(
                    "test/model".to_string(),
                    ModelPricing {
                        prompt_per_k: 0.001,
                        completion_per_k: 0.002,
                    },
                );
                Ok(entries)
            })
        });
        let catalog = Arc::new(ModelCache::new(fetch));
        let inference = Arc::new(InferenceClient::new(None, None, None).unwrap());
        Arc::new(Gateway {
            network: StacksNetwork::Mainnet,
            pay_to: "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            base_url: Url::parse("https://gateway.test/").unwrap(),
            pricing: PricingEngine::new(catalog.clone()),
            catalog,
            facilitator: FacilitatorClient::try_from(facilitator_url).unwrap(),
            shards: Arc::new(ShardManager::in_memory()),
            metrics: Arc::new(GlobalMetrics::new()),
            inference,
            stacks_api: StacksApiClient::new(Url::parse("https://api.hiro.so/").unwrap()),
            embeddings: None,
            safety: SafetyScanner::new(),
            log_sink: LogSink::new(),
        })
    }
}
