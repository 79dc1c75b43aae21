//! Content-safety scan side channel.
//!
//! Handlers that persist user-provided content schedule a scan here. Scans
//! run on a background worker: the classifier is called with a fixed system
//! prompt at temperature zero, the verdict is parsed strictly, confidence is
//! clamped to `[0, 1]`, and the result is upserted into the payer's shard.
//! Any parse or transport failure stores the `scan_unavailable` fallback
//! verdict. A scan must never delay the handler response.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::inference::InferenceClient;
use crate::shard::ShardManager;
use crate::shard::scans::{ScanContentType, ScanVerdict};
use crate::util::SideChannel;

const SCAN_QUEUE_CAPACITY: usize = 256;

const CLASSIFIER_PROMPT: &str = "You are a content safety classifier. Respond with only a JSON \
object of the form {\"safe\": boolean, \"confidence\": number, \"reason\": string} judging \
whether the given content is safe to store. No prose, no markdown.";

#[derive(Debug, Clone)]
pub struct ScanJob {
    pub payer: String,
    pub content_id: String,
    pub content_type: ScanContentType,
    pub content: String,
}

#[derive(Clone)]
pub struct SafetyScanner {
    channel: Arc<SideChannel<ScanJob>>,
}

impl SafetyScanner {
    pub fn new() -> Self {
        Self {
            channel: SideChannel::new("safety-scan", SCAN_QUEUE_CAPACITY),
        }
    }

    /// Schedules a scan; never blocks the caller.
    pub fn schedule(&self, job: ScanJob) {
        self.channel.submit(job);
    }

    /// Spawns the scan worker.
    pub fn spawn_worker(
        &self,
        inference: Arc<InferenceClient>,
        shards: Arc<ShardManager>,
        cancel: CancellationToken,
    ) {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    job = channel.next() => job,
                    _ = cancel.cancelled() => break,
                };
                let verdict = match inference.classify(CLASSIFIER_PROMPT, &job.content).await {
                    Ok(raw) => parse_verdict(&raw).unwrap_or_else(unavailable_verdict),
                    Err(err) => {
                        tracing::debug!(error = %err, "safety classifier unavailable");
                        unavailable_verdict()
                    }
                };
                match shards.shard(&job.payer) {
                    Ok(shard) => {
                        if let Err(err) = shard
                            .scan_store(&job.content_id, job.content_type, verdict)
                            .await
                        {
                            tracing::warn!(error = %err, "failed to store scan verdict");
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to open shard for scan"),
                }
            }
        });
    }
}

impl Default for SafetyScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Strict parse of the classifier's JSON verdict. Confidence clamps into
/// `[0, 1]`; anything unparseable is `None`.
fn parse_verdict(raw: &str) -> Option<ScanVerdict> {
    let trimmed = raw.trim().trim_start_matches("```json").trim_matches('`').trim();
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let safe = value.get("safe")?.as_bool()?;
    let confidence = value.get("confidence")?.as_f64()?.clamp(0.0, 1.0);
    let reason = value
        .get("reason")
        .and_then(|r| r.as_str())
        .map(|r| r.to_string());
    Some(ScanVerdict {
        safe,
        confidence,
        reason,
    })
}

fn unavailable_verdict() -> ScanVerdict {
    ScanVerdict {
        safe: true,
        confidence: 0.0,
        reason: Some("scan_unavailable".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_verdicts() {
        let verdict = parse_verdict(r#"{"safe": false, "confidence": 0.93, "reason": "spam"}"#).unwrap();
        assert!(!verdict.safe);
        assert!((verdict.confidence - 0.93).abs() < 1e-9);
        assert_eq!(verdict.reason.as_deref(), Some("spam"));
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        let verdict = parse_verdict(r#"{"safe": true, "confidence": 42.0}"#).unwrap();
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn tolerates_code_fences_but_nothing_else() {
        assert!(parse_verdict("```json\n{\"safe\": true, \"confidence\": 0.5}\n```").is_some());
        assert!(parse_verdict("The content looks fine to me.").is_none());
        assert!(parse_verdict(r#"{"confidence": 0.5}"#).is_none());
    }

    #[test]
    fn fallback_verdict_is_safe_with_zero_confidence() {
        let verdict = unavailable_verdict();
        assert!(verdict.safe);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.reason.as_deref(), Some("scan_unavailable"));
    }
}
