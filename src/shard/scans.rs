//! Content-scan verdict subsystem.
//!
//! Verdicts arrive from the asynchronous safety classifier and are upserted
//! by content id: the latest verdict wins.

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

pub const SCAN_LIST_LIMIT: usize = 1000;

/// What kind of stored content a verdict refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanContentType {
    Paste,
    Kv,
    Memory,
}

impl Display for ScanContentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanContentType::Paste => write!(f, "paste"),
            ScanContentType::Kv => write!(f, "kv"),
            ScanContentType::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for ScanContentType {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paste" => Ok(ScanContentType::Paste),
            "kv" => Ok(ScanContentType::Kv),
            "memory" => Ok(ScanContentType::Memory),
            other => Err(ShardError::InvalidInput(format!(
                "unknown content type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanVerdict {
    pub safe: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRow {
    pub content_id: String,
    pub content_type: String,
    pub safe: bool,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub scanned_at: i64,
}

impl PayerShard {
    pub async fn scan_store(
        &self,
        content_id: &str,
        content_type: ScanContentType,
        verdict: ScanVerdict,
    ) -> Result<(), ShardError> {
        if content_id.is_empty() {
            return Err(ShardError::InvalidInput("content id must not be empty".to_string()));
        }
        let content_id = content_id.to_string();
        self.call(move |conn| {
            let confidence = verdict.confidence.clamp(0.0, 1.0);
            conn.execute(
                "INSERT INTO content_scans (content_id, content_type, safe, confidence, reason, scanned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(content_id) DO UPDATE SET
                   content_type = excluded.content_type,
                   safe = excluded.safe,
                   confidence = excluded.confidence,
                   reason = excluded.reason,
                   scanned_at = excluded.scanned_at",
                params![
                    content_id,
                    content_type.to_string(),
                    verdict.safe,
                    confidence,
                    verdict.reason,
                    now_secs()
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn scan_get(&self, content_id: &str) -> Result<Option<ScanRow>, ShardError> {
        let content_id = content_id.to_string();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT content_id, content_type, safe, confidence, reason, scanned_at
                     FROM content_scans WHERE content_id = ?1",
                    params![content_id],
                    |row| {
                        Ok(ScanRow {
                            content_id: row.get(0)?,
                            content_type: row.get(1)?,
                            safe: row.get(2)?,
                            confidence: row.get(3)?,
                            reason: row.get(4)?,
                            scanned_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn scan_list(
        &self,
        content_type: Option<ScanContentType>,
        safe_only: bool,
        limit: usize,
    ) -> Result<Vec<ScanRow>, ShardError> {
        let limit = limit.clamp(1, SCAN_LIST_LIMIT);
        self.call(move |conn| {
            let type_pattern = content_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "%".to_string());
            let mut stmt = conn.prepare(
                "SELECT content_id, content_type, safe, confidence, reason, scanned_at
                 FROM content_scans
                 WHERE content_type LIKE ?1 AND (?2 = 0 OR safe = 1)
                 ORDER BY scanned_at DESC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![type_pattern, safe_only, limit as i64], |row| {
                    Ok(ScanRow {
                        content_id: row.get(0)?,
                        content_type: row.get(1)?,
                        safe: row.get(2)?,
                        confidence: row.get(3)?,
                        reason: row.get(4)?,
                        scanned_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::test_shard;

    fn verdict(safe: bool, confidence: f64) -> ScanVerdict {
        ScanVerdict {
            safe,
            confidence,
            reason: None,
        }
    }

    #[tokio::test]
    async fn latest_verdict_wins() {
        let shard = test_shard();
        shard
            .scan_store("p1", ScanContentType::Paste, verdict(true, 0.9))
            .await
            .unwrap();
        shard
            .scan_store("p1", ScanContentType::Paste, verdict(false, 0.7))
            .await
            .unwrap();
        let row = shard.scan_get("p1").await.unwrap().unwrap();
        assert!(!row.safe);
        assert!((row.confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn confidence_is_clamped() {
        let shard = test_shard();
        shard
            .scan_store("k1", ScanContentType::Kv, verdict(true, 7.5))
            .await
            .unwrap();
        let row = shard.scan_get("k1").await.unwrap().unwrap();
        assert_eq!(row.confidence, 1.0);
    }

    #[tokio::test]
    async fn list_filters_by_type_and_safety() {
        let shard = test_shard();
        shard
            .scan_store("p1", ScanContentType::Paste, verdict(true, 0.9))
            .await
            .unwrap();
        shard
            .scan_store("p2", ScanContentType::Paste, verdict(false, 0.8))
            .await
            .unwrap();
        shard
            .scan_store("m1", ScanContentType::Memory, verdict(true, 0.5))
            .await
            .unwrap();

        let pastes = shard
            .scan_list(Some(ScanContentType::Paste), false, 100)
            .await
            .unwrap();
        assert_eq!(pastes.len(), 2);

        let safe = shard.scan_list(None, true, 100).await.unwrap();
        assert_eq!(safe.len(), 2);
        assert!(safe.iter().all(|r| r.safe));
    }
}
