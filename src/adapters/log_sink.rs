//! Structured-log sink adapter.
//!
//! Events are submitted fire-and-forget into a bounded side channel; one
//! worker task drains it and POSTs JSON events to the configured sink.
//! Without a sink URL, events fall through to local tracing at debug level.
//! The request path is never delayed and delivery is best-effort.

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::util::SideChannel;

const SINK_TIMEOUT: Duration = Duration::from_secs(5);
const SINK_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LogSink {
    channel: Arc<SideChannel<serde_json::Value>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            channel: SideChannel::new("log-sink", SINK_QUEUE_CAPACITY),
        }
    }

    /// Enqueues an event; never blocks, drops oldest on overflow.
    pub fn submit(&self, event: serde_json::Value) {
        self.channel.submit(event);
    }

    /// Spawns the drain worker. Runs until the cancellation token fires.
    pub fn spawn_worker(&self, sink_url: Option<Url>, cancel: CancellationToken) {
        let channel = self.channel.clone();
        let client = Client::new();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = channel.next() => event,
                    _ = cancel.cancelled() => break,
                };
                match &sink_url {
                    Some(url) => {
                        let result = client
                            .post(url.clone())
                            .timeout(SINK_TIMEOUT)
                            .json(&event)
                            .send()
                            .await;
                        if let Err(err) = result {
                            tracing::debug!(error = %err, "log sink delivery failed");
                        }
                    }
                    None => tracing::debug!(event = %event, "log event"),
                }
            }
        });
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn worker_delivers_submitted_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1..)
            .mount(&server)
            .await;

        let sink = LogSink::new();
        let cancel = CancellationToken::new();
        sink.spawn_worker(Some(Url::parse(&server.uri()).unwrap()), cancel.clone());
        sink.submit(serde_json::json!({"event": "test"}));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        server.verify().await;
    }
}
