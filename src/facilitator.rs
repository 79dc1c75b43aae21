//! Client for the external settlement relay (the x402 "facilitator").
//!
//! The relay verifies the client's signed transfer, submits it on-chain, and
//! reports the payer address. The gateway never signs or broadcasts anything
//! itself. This client is cheap to clone and shares a connection pool via
//! `reqwest::Client`.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::proto::{SettleRequest, SettlementResult};

/// Settlement calls get a generous timeout: the relay waits on chain
/// confirmation.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Ways a settlement attempt can fail before a result is in hand.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error("cannot build the relay {which} URL: {source}")]
    BadUrl {
        which: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("settlement request never completed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("relay sent a settlement result that does not parse: {source}")]
    BadSettlementBody {
        #[source]
        source: reqwest::Error,
    },
    #[error("relay answered {status} instead of a settlement result: {body}")]
    RelayStatus { status: StatusCode, body: String },
}

impl FacilitatorError {
    /// Flattens the error into the free-form string fed to the failure
    /// classifier. Wording matters here: the classifier keys on substrings
    /// like `timeout`, `network`, `503`, and `unavailable`.
    pub fn detail(&self) -> String {
        match self {
            FacilitatorError::Transport { source } if source.is_timeout() => {
                format!("timeout waiting for the settlement relay: {source}")
            }
            FacilitatorError::Transport { source } if source.is_connect() => {
                format!("network trouble reaching the settlement relay: {source}")
            }
            FacilitatorError::RelayStatus { status, body }
                if *status == StatusCode::SERVICE_UNAVAILABLE =>
            {
                format!("settlement relay unavailable (503): {body}")
            }
            other => other.to_string(),
        }
    }
}

/// A client for the relay's `POST /settle` endpoint.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    settle_url: Url,
    client: Client,
    timeout: Duration,
}

impl FacilitatorClient {
    /// Constructs a client from the relay base URL.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorError> {
        let settle_url = base_url
            .join("./settle")
            .map_err(|source| FacilitatorError::BadUrl {
                which: "settle",
                source,
            })?;
        Ok(Self {
            base_url,
            settle_url,
            client: Client::new(),
            timeout: SETTLE_TIMEOUT,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Hands a signed transfer to the relay for verification and on-chain
    /// settlement.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettlementResult, FacilitatorError> {
        let http_response = self
            .client
            .post(self.settle_url.clone())
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|source| FacilitatorError::Transport { source })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<SettlementResult>()
                .await
                .map_err(|source| FacilitatorError::BadSettlementBody { source })
        } else {
            let status = http_response.status();
            let body = http_response.text().await.unwrap_or_default();
            Err(FacilitatorError::RelayStatus { status, body })
        }
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorError;

    /// Accepts a relay URL with or without a trailing slash. The slash must
    /// be present before joining, otherwise `Url::join` treats the last path
    /// segment as a file and replaces it.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let base = format!("{}/", value.trim_end_matches('/'));
        let url = Url::parse(&base).map_err(|source| FacilitatorError::BadUrl {
            which: "base",
            source,
        })?;
        FacilitatorClient::try_new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PaymentPayload, PaymentRequirements, Scheme, X402Version2};
    use crate::tokens::TokenAmount;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settle_request() -> SettleRequest {
        let requirements = PaymentRequirements {
            scheme: Scheme::Exact,
            network: "stacks:1".to_string(),
            max_amount_required: TokenAmount(1000),
            asset: "STX".to_string(),
            pay_to: "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            max_timeout_seconds: 60,
            extra: None,
        };
        SettleRequest {
            x402_version: X402Version2,
            payment_payload: PaymentPayload {
                x402_version: X402Version2,
                accepted: requirements.clone(),
                payload: serde_json::value::to_raw_value(&serde_json::json!({"transaction": "00"}))
                    .unwrap(),
            },
            payment_requirements: requirements,
        }
    }

    #[test]
    fn base_url_is_normalized() {
        let client = FacilitatorClient::try_from("https://relay.example//").unwrap();
        assert_eq!(client.base_url().as_str(), "https://relay.example/");
    }

    #[tokio::test]
    async fn settle_parses_a_successful_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "transaction": "0xabc",
                "payer": "SPPAYER111111111111111111111111111111111",
                "network": "stacks:1"
            })))
            .mount(&server)
            .await;
        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let result = client.settle(&settle_request()).await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.payer.as_deref(),
            Some("SPPAYER111111111111111111111111111111111")
        );
    }

    #[tokio::test]
    async fn non_200_becomes_a_relay_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let err = client.settle(&settle_request()).await.unwrap_err();
        assert!(matches!(err, FacilitatorError::RelayStatus { .. }));
        assert!(err.detail().contains("unavailable"));
    }
}
