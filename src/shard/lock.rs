//! Distributed lock subsystem.
//!
//! A lock is acquired iff no unexpired row exists for its name. The holder
//! receives a random 32-character token; unlock and extend require the exact
//! token. TTLs are clamped into `[10, 300]` seconds, defaulting to 60.
//! Expired rows are swept lazily on every operation, which is what makes a
//! lock re-acquirable after its TTL elapses without any background job.

use rand::distr::{Alphanumeric, SampleString};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

pub const LOCK_TTL_DEFAULT: u64 = 60;
pub const LOCK_TTL_MIN: u64 = 10;
pub const LOCK_TTL_MAX: u64 = 300;
const HOLDER_TOKEN_LEN: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquire {
    pub acquired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// When not acquired: the current holder's expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_until: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRelease {
    pub released: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockExtend {
    pub extended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Public view of a lock; the holder token is never listed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub name: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}

pub fn clamp_ttl(ttl: Option<u64>) -> u64 {
    ttl.unwrap_or(LOCK_TTL_DEFAULT).clamp(LOCK_TTL_MIN, LOCK_TTL_MAX)
}

fn sweep_expired(conn: &Connection) -> Result<(), ShardError> {
    conn.execute(
        "DELETE FROM locks WHERE expires_at <= ?1",
        params![now_secs()],
    )?;
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ShardError> {
    if name.is_empty() || name.len() > 256 {
        return Err(ShardError::InvalidInput(
            "lock name must be 1..=256 characters".to_string(),
        ));
    }
    Ok(())
}

impl PayerShard {
    pub async fn lock_acquire(
        &self,
        name: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<LockAcquire, ShardError> {
        validate_name(name)?;
        let name = name.to_string();
        let ttl = clamp_ttl(ttl_seconds);
        self.call(move |conn| {
            sweep_expired(conn)?;
            let held_until: Option<i64> = conn
                .query_row(
                    "SELECT expires_at FROM locks WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(held_until) = held_until {
                return Ok(LockAcquire {
                    acquired: false,
                    token: None,
                    expires_at: None,
                    held_until: Some(held_until),
                });
            }
            let now = now_secs();
            let expires_at = now + ttl as i64;
            let token = Alphanumeric.sample_string(&mut rand::rng(), HOLDER_TOKEN_LEN);
            conn.execute(
                "INSERT INTO locks (name, holder_token, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, token, now, expires_at],
            )?;
            Ok(LockAcquire {
                acquired: true,
                token: Some(token),
                expires_at: Some(expires_at),
                held_until: None,
            })
        })
        .await
    }

    pub async fn lock_release(&self, name: &str, token: &str) -> Result<LockRelease, ShardError> {
        validate_name(name)?;
        let name = name.to_string();
        let token = token.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let released = conn.execute(
                "DELETE FROM locks WHERE name = ?1 AND holder_token = ?2",
                params![name, token],
            )?;
            Ok(LockRelease {
                released: released > 0,
            })
        })
        .await
    }

    pub async fn lock_extend(
        &self,
        name: &str,
        token: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<LockExtend, ShardError> {
        validate_name(name)?;
        let name = name.to_string();
        let token = token.to_string();
        let ttl = clamp_ttl(ttl_seconds);
        self.call(move |conn| {
            sweep_expired(conn)?;
            let now = now_secs();
            let expires_at = now + ttl as i64;
            let extended = conn.execute(
                "UPDATE locks SET expires_at = ?3 WHERE name = ?1 AND holder_token = ?2",
                params![name, token, expires_at],
            )?;
            Ok(LockExtend {
                extended: extended > 0,
                expires_at: (extended > 0).then_some(expires_at),
            })
        })
        .await
    }

    pub async fn lock_status(&self, name: &str) -> Result<Option<LockStatus>, ShardError> {
        validate_name(name)?;
        let name = name.to_string();
        self.call(move |conn| {
            sweep_expired(conn)?;
            let status = conn
                .query_row(
                    "SELECT name, acquired_at, expires_at FROM locks WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(LockStatus {
                            name: row.get(0)?,
                            acquired_at: row.get(1)?,
                            expires_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(status)
        })
        .await
    }

    pub async fn lock_list(&self) -> Result<Vec<LockStatus>, ShardError> {
        self.call(move |conn| {
            sweep_expired(conn)?;
            let mut stmt =
                conn.prepare("SELECT name, acquired_at, expires_at FROM locks ORDER BY name ASC")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LockStatus {
                        name: row.get(0)?,
                        acquired_at: row.get(1)?,
                        expires_at: row.get(2)?,
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

    #[tokio::test]
    async fn acquire_release_reacquire() {
        let shard = test_shard();
        let first = shard.lock_acquire("job", None).await.unwrap();
        assert!(first.acquired);
        let token = first.token.unwrap();

        let contended = shard.lock_acquire("job", None).await.unwrap();
        assert!(!contended.acquired);
        assert_eq!(contended.held_until, first.expires_at);

        let released = shard.lock_release("job", &token).await.unwrap();
        assert!(released.released);

        let again = shard.lock_acquire("job", None).await.unwrap();
        assert!(again.acquired);
    }

    #[tokio::test]
    async fn unlock_requires_the_holder_token() {
        let shard = test_shard();
        shard.lock_acquire("job", None).await.unwrap();
        let bogus = shard.lock_release("job", "not-the-token").await.unwrap();
        assert!(!bogus.released);
        assert!(shard.lock_status("job").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn extend_requires_token_and_liveness() {
        let shard = test_shard();
        let acquired = shard.lock_acquire("job", Some(30)).await.unwrap();
        let token = acquired.token.unwrap();

        let extended = shard.lock_extend("job", &token, Some(120)).await.unwrap();
        assert!(extended.extended);
        assert!(extended.expires_at.unwrap() >= acquired.expires_at.unwrap());

        let wrong = shard.lock_extend("job", "bogus", Some(120)).await.unwrap();
        assert!(!wrong.extended);
    }

    #[tokio::test]
    async fn ttl_is_clamped_into_range() {
        assert_eq!(clamp_ttl(Some(1)), LOCK_TTL_MIN);
        assert_eq!(clamp_ttl(Some(9999)), LOCK_TTL_MAX);
        assert_eq!(clamp_ttl(None), LOCK_TTL_DEFAULT);
        assert_eq!(clamp_ttl(Some(45)), 45);
    }

    #[tokio::test]
    async fn tokens_are_32_chars() {
        let shard = test_shard();
        let acquired = shard.lock_acquire("job", None).await.unwrap();
        assert_eq!(acquired.token.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn list_never_exposes_tokens() {
        let shard = test_shard();
        shard.lock_acquire("a", None).await.unwrap();
        shard.lock_acquire("b", None).await.unwrap();
        let listed = shard.lock_list().await.unwrap();
        assert_eq!(listed.len(), 2);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("token"));
    }
}
