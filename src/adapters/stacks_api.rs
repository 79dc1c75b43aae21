//! Stacks chain lookup client (Hiro-style node API).
//!
//! Serves the `/stacks/*` endpoints that need chain state: account balances,
//! BNS names, and transaction lookups. Responses are forwarded as-is; the
//! node API is authoritative for their shape.

use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::adapters::{AdapterError, send_json, shared_client};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct StacksApiClient {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl StacksApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            client: shared_client(),
            base,
            timeout: LOOKUP_TIMEOUT,
        }
    }

    fn url(&self, path: &str) -> Result<Url, AdapterError> {
        self.base.join(path).map_err(|source| AdapterError::BadUrl {
            context: "stacks api",
            source,
        })
    }

    /// `GET /v2/accounts/{address}`: balance and nonce.
    pub async fn account(&self, address: &str) -> Result<serde_json::Value, AdapterError> {
        let url = self.url(&format!("v2/accounts/{address}?proof=0"))?;
        let request = self.client.get(url).timeout(self.timeout);
        send_json(request, "GET /v2/accounts").await
    }

    /// `GET /v1/addresses/stacks/{address}`: BNS names held by the address.
    pub async fn names(&self, address: &str) -> Result<serde_json::Value, AdapterError> {
        let url = self.url(&format!("v1/addresses/stacks/{address}"))?;
        let request = self.client.get(url).timeout(self.timeout);
        send_json(request, "GET /v1/addresses/stacks").await
    }

    /// `GET /extended/v1/tx/{txid}`: decoded transaction by id.
    pub async fn transaction(&self, txid: &str) -> Result<serde_json::Value, AdapterError> {
        let url = self.url(&format!("extended/v1/tx/{txid}"))?;
        let request = self.client.get(url).timeout(self.timeout);
        send_json(request, "GET /extended/v1/tx").await
    }
}
