//! Vector memory subsystem.
//!
//! Items carry a text, an embedding vector, and optional metadata. Search is
//! a full scan under cosine similarity: results below the threshold are
//! dropped, the rest sorted descending and truncated to the limit. The store
//! is small per shard by construction, so no index structure is kept.

use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

pub const MEMORY_SEARCH_LIMIT: usize = 100;
pub const MEMORY_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct MemoryUpsert {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f64>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStored {
    pub stored: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryHit {
    pub id: String,
    pub text: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDeleted {
    pub deleted: Vec<String>,
}

/// Cosine similarity of two vectors. Mismatched lengths and zero-magnitude
/// vectors compare as 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl PayerShard {
    pub async fn memory_store(&self, items: Vec<MemoryUpsert>) -> Result<MemoryStored, ShardError> {
        if items.is_empty() {
            return Err(ShardError::InvalidInput("items must not be empty".to_string()));
        }
        for item in &items {
            if item.id.is_empty() {
                return Err(ShardError::InvalidInput("item id must not be empty".to_string()));
            }
            if item.embedding.is_empty() {
                return Err(ShardError::InvalidInput(format!(
                    "item {} has an empty embedding",
                    item.id
                )));
            }
        }
        self.call(move |conn| {
            let now = now_secs();
            let tx = conn.transaction()?;
            for item in &items {
                let embedding = serde_json::to_string(&item.embedding)
                    .map_err(|e| ShardError::InvalidInput(e.to_string()))?;
                let metadata = item
                    .metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| ShardError::InvalidInput(e.to_string()))?;
                tx.execute(
                    "INSERT INTO memory_items (id, text, embedding, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                       text = excluded.text,
                       embedding = excluded.embedding,
                       metadata = excluded.metadata,
                       updated_at = excluded.updated_at",
                    params![item.id, item.text, embedding, metadata, now],
                )?;
            }
            tx.commit()?;
            Ok(MemoryStored { stored: items.len() })
        })
        .await
    }

    pub async fn memory_search(
        &self,
        query: Vec<f64>,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<MemoryHit>, ShardError> {
        if query.is_empty() {
            return Err(ShardError::InvalidInput(
                "query embedding must not be empty".to_string(),
            ));
        }
        let limit = limit.clamp(1, MEMORY_SEARCH_LIMIT);
        let threshold = threshold.clamp(0.0, 1.0);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, text, embedding, metadata, created_at, updated_at FROM memory_items",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut hits: Vec<MemoryHit> = rows
                .into_iter()
                .filter_map(|(id, text, embedding, metadata, created_at, updated_at)| {
                    let embedding: Vec<f64> = serde_json::from_str(&embedding).ok()?;
                    let similarity = cosine_similarity(&query, &embedding);
                    if similarity < threshold {
                        return None;
                    }
                    Some(MemoryHit {
                        id,
                        text,
                        similarity,
                        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                        created_at,
                        updated_at,
                    })
                })
                .collect();
            hits.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(limit);
            Ok(hits)
        })
        .await
    }

    /// Deletes only ids that existed and reports the actual set deleted.
    pub async fn memory_delete(&self, ids: Vec<String>) -> Result<MemoryDeleted, ShardError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = Vec::new();
            for id in &ids {
                let existed: bool = tx
                    .query_row(
                        "SELECT 1 FROM memory_items WHERE id = ?1",
                        params![id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if existed {
                    tx.execute("DELETE FROM memory_items WHERE id = ?1", params![id])?;
                    deleted.push(id.clone());
                }
            }
            tx.commit()?;
            Ok(MemoryDeleted { deleted })
        })
        .await
    }

    pub async fn memory_list(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryItem>, ShardError> {
        let limit = limit.clamp(1, MEMORY_LIST_LIMIT);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, text, embedding, metadata, created_at, updated_at
                 FROM memory_items ORDER BY created_at ASC, id ASC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .map(|(id, text, embedding, metadata, created_at, updated_at)| MemoryItem {
                    id,
                    text,
                    embedding: serde_json::from_str(&embedding).unwrap_or_default(),
                    metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                    created_at,
                    updated_at,
                })
                .collect())
        })
        .await
    }

    pub async fn memory_clear(&self) -> Result<usize, ShardError> {
        self.call(|conn| Ok(conn.execute("DELETE FROM memory_items", [])?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::test_shard;

    fn item(id: &str, embedding: Vec<f64>) -> MemoryUpsert {
        MemoryUpsert {
            id: id.to_string(),
            text: format!("text for {id}"),
            embedding,
            metadata: None,
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        // Mismatched lengths and zero vectors compare as 0.
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn exact_match_round_trip() {
        let shard = test_shard();
        shard
            .memory_store(vec![item("1", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        let hits = shard
            .memory_search(vec![1.0, 0.0, 0.0], 10, 0.99)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
        assert!((hits[0].similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_orders_descending_and_respects_threshold() {
        let shard = test_shard();
        shard
            .memory_store(vec![
                item("exact", vec![1.0, 0.0]),
                item("close", vec![0.9, 0.1]),
                item("orthogonal", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        let hits = shard.memory_search(vec![1.0, 0.0], 10, 0.5).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close"]);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn zero_threshold_returns_up_to_limit() {
        let shard = test_shard();
        let items: Vec<_> = (0..5).map(|i| item(&format!("i{i}"), vec![1.0, i as f64])).collect();
        shard.memory_store(items).await.unwrap();
        let hits = shard.memory_search(vec![1.0, 0.0], 3, 0.0).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let shard = test_shard();
        shard.memory_store(vec![item("1", vec![1.0])]).await.unwrap();
        let before = shard.memory_list(10, 0).await.unwrap();
        shard
            .memory_store(vec![MemoryUpsert {
                id: "1".to_string(),
                text: "updated".to_string(),
                embedding: vec![0.5],
                metadata: None,
            }])
            .await
            .unwrap();
        let after = shard.memory_list(10, 0).await.unwrap();
        assert_eq!(after[0].created_at, before[0].created_at);
        assert!(after[0].updated_at >= after[0].created_at);
        assert_eq!(after[0].text, "updated");
    }

    #[tokio::test]
    async fn delete_reports_only_existing_ids() {
        let shard = test_shard();
        shard.memory_store(vec![item("a", vec![1.0])]).await.unwrap();
        let deleted = shard
            .memory_delete(vec!["a".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted.deleted, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn empty_embeddings_are_rejected() {
        let shard = test_shard();
        assert!(shard.memory_store(vec![item("bad", vec![])]).await.is_err());
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let shard = test_shard();
        shard
            .memory_store(vec![item("a", vec![1.0]), item("b", vec![2.0])])
            .await
            .unwrap();
        assert_eq!(shard.memory_clear().await.unwrap(), 2);
        assert!(shard.memory_list(10, 0).await.unwrap().is_empty());
    }
}
