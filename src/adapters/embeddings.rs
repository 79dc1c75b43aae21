//! Embedding service client (OpenAI-compatible `/embeddings`).
//!
//! Used when a memory search supplies text instead of a precomputed vector.
//! Optional: without a configured endpoint, text search is rejected and
//! vector search keeps working.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::adapters::{AdapterError, send_json, shared_client};

const EMBED_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Clone)]
pub struct EmbeddingsClient {
    client: Client,
    base: Url,
    api_key: Option<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f64>,
}

impl EmbeddingsClient {
    pub fn new(base: Url, api_key: Option<String>) -> Self {
        Self {
            client: shared_client(),
            base,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
        let url = self
            .base
            .join("embeddings")
            .map_err(|source| AdapterError::BadUrl {
                context: "embeddings",
                source,
            })?;
        let mut request = self
            .client
            .post(url)
            .timeout(EMBED_TIMEOUT)
            .json(&serde_json::json!({ "model": self.model, "input": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: EmbeddingResponse = send_json(request, "POST /embeddings").await?;
        response
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or(AdapterError::UpstreamStatus {
                context: "POST /embeddings",
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: "embedding response carried no vectors".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn embed_returns_the_first_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let client = EmbeddingsClient::new(Url::parse(&format!("{}/", server.uri())).unwrap(), None);
        let embedding = client.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }
}
