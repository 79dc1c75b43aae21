//! Key-value subsystem.
//!
//! Upsert semantics: overwriting preserves `created_at`. Rows may carry a
//! TTL; expired rows are swept lazily ahead of every read or write so the
//! store never serves a value past its expiry.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

pub const KV_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KvRow {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KvSetOutcome {
    /// True iff the key did not previously exist.
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KvListEntry {
    pub key: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

fn sweep_expired(conn: &Connection) -> Result<(), ShardError> {
    conn.execute(
        "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        params![now_secs()],
    )?;
    Ok(())
}

impl PayerShard {
    pub async fn kv_set(
        &self,
        key: &str,
        value: serde_json::Value,
        metadata: Option<serde_json::Value>,
        ttl_seconds: Option<u64>,
    ) -> Result<KvSetOutcome, ShardError> {
        if key.is_empty() || key.len() > 512 {
            return Err(ShardError::InvalidInput(
                "key must be 1..=512 characters".to_string(),
            ));
        }
        let key = key.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let now = now_secs();
            let expires_at = ttl_seconds.map(|ttl| now + ttl as i64);
            let existed: bool = conn
                .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |_| Ok(()))
                .optional()?
                .is_some();
            let value_json = serde_json::to_string(&value)
                .map_err(|e| ShardError::InvalidInput(e.to_string()))?;
            let metadata_json = metadata
                .map(|m| serde_json::to_string(&m))
                .transpose()
                .map_err(|e| ShardError::InvalidInput(e.to_string()))?;
            conn.execute(
                "INSERT INTO kv (key, value, metadata, created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   metadata = excluded.metadata,
                   updated_at = excluded.updated_at,
                   expires_at = excluded.expires_at",
                params![key, value_json, metadata_json, now, expires_at],
            )?;
            Ok(KvSetOutcome {
                created: !existed,
                expires_at,
            })
        })
        .await
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<KvRow>, ShardError> {
        let key = key.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let row = conn
                .query_row(
                    "SELECT key, value, metadata, created_at, updated_at, expires_at
                     FROM kv WHERE key = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, Option<i64>>(5)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(
                |(key, value, metadata, created_at, updated_at, expires_at)| KvRow {
                    key,
                    value: serde_json::from_str(&value).unwrap_or(serde_json::Value::Null),
                    metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                    created_at,
                    updated_at,
                    expires_at,
                },
            ))
        })
        .await
    }

    pub async fn kv_delete(&self, key: &str) -> Result<bool, ShardError> {
        let key = key.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let deleted = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn kv_list(
        &self,
        prefix: Option<String>,
        limit: usize,
    ) -> Result<Vec<KvListEntry>, ShardError> {
        let limit = limit.clamp(1, KV_LIST_LIMIT);
        self.call(move |conn| {
            sweep_expired(conn)?;
            let pattern = prefix
                .map(|p| format!("{}%", p.replace('%', "\\%").replace('_', "\\_")))
                .unwrap_or_else(|| "%".to_string());
            let mut stmt = conn.prepare(
                "SELECT key, created_at, updated_at, expires_at FROM kv
                 WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key ASC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![pattern, limit as i64], |row| {
                    Ok(KvListEntry {
                        key: row.get(0)?,
                        created_at: row.get(1)?,
                        updated_at: row.get(2)?,
                        expires_at: row.get(3)?,
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
    use crate::shard::test_shard;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let shard = test_shard();
        let outcome = shard.kv_set("k", json!({"v": 1}), None, None).await.unwrap();
        assert!(outcome.created);
        let row = shard.kv_get("k").await.unwrap().unwrap();
        assert_eq!(row.value, json!({"v": 1}));
        assert!(shard.kv_delete("k").await.unwrap());
        assert!(shard.kv_get("k").await.unwrap().is_none());
        assert!(!shard.kv_delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_preserves_created_at() {
        let shard = test_shard();
        shard.kv_set("k", json!("a"), None, None).await.unwrap();
        let first = shard.kv_get("k").await.unwrap().unwrap();
        let outcome = shard.kv_set("k", json!("b"), None, None).await.unwrap();
        assert!(!outcome.created);
        let second = shard.kv_get("k").await.unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.value, json!("b"));
    }

    #[tokio::test]
    async fn expired_rows_are_invisible() {
        let shard = test_shard();
        shard.kv_set("gone", json!(1), None, Some(0)).await.unwrap();
        assert!(shard.kv_get("gone").await.unwrap().is_none());

        shard.kv_set("alive", json!(1), None, Some(3600)).await.unwrap();
        assert!(shard.kv_get("alive").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_clamps_limit() {
        let shard = test_shard();
        for key in ["app:a", "app:b", "other"] {
            shard.kv_set(key, json!(1), None, None).await.unwrap();
        }
        let listed = shard.kv_list(Some("app:".to_string()), 5000).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|e| e.key.starts_with("app:")));
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let shard = test_shard();
        shard
            .kv_set("k", json!(1), Some(json!({"source": "test"})), None)
            .await
            .unwrap();
        let row = shard.kv_get("k").await.unwrap().unwrap();
        assert_eq!(row.metadata, Some(json!({"source": "test"})));
    }
}
