//! Paste subsystem.
//!
//! Pastes are immutable after creation and addressed by a random 8-character
//! id. Expiry is lazy, as for the key-value store.

use rand::distr::{Alphanumeric, SampleString};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

pub const PASTE_ID_LEN: usize = 8;
const MAX_PASTE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteCreated {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasteRow {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

fn sweep_expired(conn: &Connection) -> Result<(), ShardError> {
    conn.execute(
        "DELETE FROM paste WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        params![now_secs()],
    )?;
    Ok(())
}

impl PayerShard {
    pub async fn paste_create(
        &self,
        content: String,
        title: Option<String>,
        language: Option<String>,
        ttl_seconds: Option<u64>,
    ) -> Result<PasteCreated, ShardError> {
        if content.is_empty() {
            return Err(ShardError::InvalidInput("content must not be empty".to_string()));
        }
        if content.len() > MAX_PASTE_BYTES {
            return Err(ShardError::InvalidInput(format!(
                "content exceeds {MAX_PASTE_BYTES} bytes"
            )));
        }
        self.call(move |conn| {
            sweep_expired(conn)?;
            let now = now_secs();
            let expires_at = ttl_seconds.map(|ttl| now + ttl as i64);
            // Random ids collide with negligible probability; retry a few
            // times anyway rather than surfacing a constraint error.
            for _ in 0..4 {
                let id = Alphanumeric.sample_string(&mut rand::rng(), PASTE_ID_LEN);
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO paste (id, content, title, language, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id, content, title, language, now, expires_at],
                )?;
                if inserted == 1 {
                    return Ok(PasteCreated { id, expires_at });
                }
            }
            Err(ShardError::InvalidInput(
                "could not allocate a paste id".to_string(),
            ))
        })
        .await
    }

    pub async fn paste_get(&self, id: &str) -> Result<Option<PasteRow>, ShardError> {
        let id = id.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let row = conn
                .query_row(
                    "SELECT id, content, title, language, created_at, expires_at
                     FROM paste WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(PasteRow {
                            id: row.get(0)?,
                            content: row.get(1)?,
                            title: row.get(2)?,
                            language: row.get(3)?,
                            created_at: row.get(4)?,
                            expires_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn paste_delete(&self, id: &str) -> Result<bool, ShardError> {
        let id = id.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let deleted = conn.execute("DELETE FROM paste WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::shard::test_shard;

    #[tokio::test]
    async fn create_get_delete_round_trip() {
        let shard = test_shard();
        let created = shard
            .paste_create("fn main() {}".to_string(), Some("demo".to_string()), Some("rust".to_string()), None)
            .await
            .unwrap();
        assert_eq!(created.id.len(), 8);

        let row = shard.paste_get(&created.id).await.unwrap().unwrap();
        assert_eq!(row.content, "fn main() {}");
        assert_eq!(row.language.as_deref(), Some("rust"));

        assert!(shard.paste_delete(&created.id).await.unwrap());
        assert!(shard.paste_get(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_pastes_vanish() {
        let shard = test_shard();
        let created = shard
            .paste_create("temp".to_string(), None, None, Some(0))
            .await
            .unwrap();
        assert!(shard.paste_get(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let shard = test_shard();
        assert!(shard
            .paste_create(String::new(), None, None, None)
            .await
            .is_err());
    }
}
