//! Thin typed clients for the gateway's HTTP dependencies.
//!
//! Each adapter wraps one upstream with timeouts set at construction and
//! structured error conversion. Adapters are stateless except for
//! configuration and never cache (the model catalog cache is a separate
//! component sitting in front of its adapter).

pub mod embeddings;
pub mod inference;
pub mod log_sink;
pub mod stacks_api;

use reqwest::{Client, RequestBuilder, StatusCode};

/// Ways a call to an upstream dependency can go wrong.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("cannot build the {context} URL: {source}")]
    BadUrl {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{context} did not answer: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context} sent a body that does not parse as JSON: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context} answered {status}: {body}")]
    UpstreamStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

impl AdapterError {
    /// Status the gateway should surface when this dependency failure
    /// reaches the caller.
    pub fn surface_status(&self) -> StatusCode {
        match self {
            AdapterError::UpstreamStatus { status, .. } if status.is_client_error() => *status,
            AdapterError::MissingCredentials(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Sends a prepared request and parses the JSON response, mapping transport,
/// status, and decode failures into [`AdapterError`].
pub(crate) async fn send_json<R>(
    request: RequestBuilder,
    context: &'static str,
) -> Result<R, AdapterError>
where
    R: serde::de::DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|source| AdapterError::Transport { context, source })?;
    if response.status().is_success() {
        response
            .json::<R>()
            .await
            .map_err(|source| AdapterError::Decode { context, source })
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AdapterError::UpstreamStatus {
            context,
            status,
            body,
        })
    }
}

pub(crate) fn shared_client() -> Client {
    Client::new()
}
