//! Priority queue subsystem.
//!
//! Jobs are ordered by `(priority DESC, created_at ASC)` with insertion order
//! breaking ties, so equal-priority jobs pop FIFO. `pop` atomically checks
//! pending jobs out into `processing` and hides them for a visibility
//! window; `complete` acknowledges checked-out jobs and deletes them. A job
//! that is never acknowledged returns to `pending` with its attempt counter
//! bumped once the window elapses. That hygiene step runs ahead of every
//! pop, peek, and status call.

use rusqlite::{Connection, params};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

pub const QUEUE_POP_LIMIT: usize = 100;
/// Default visibility window for checked-out jobs, seconds.
pub const QUEUE_VISIBILITY_DEFAULT: u64 = 60;
pub const QUEUE_VISIBILITY_MAX: u64 = 3600;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePush {
    pub pushed: usize,
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub job_id: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub attempts: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue: String,
    pub counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueComplete {
    pub completed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueClear {
    pub cleared: usize,
}

fn validate_queue_name(queue: &str) -> Result<(), ShardError> {
    if queue.is_empty() || queue.len() > 256 {
        return Err(ShardError::InvalidInput(
            "queue name must be 1..=256 characters".to_string(),
        ));
    }
    Ok(())
}

/// Returns timed-out `processing` jobs to `pending`, counting the attempt.
fn release_expired(conn: &Connection, queue: &str) -> Result<(), ShardError> {
    conn.execute(
        "UPDATE queue_jobs
         SET status = 'pending', attempts = attempts + 1, invisible_until = NULL
         WHERE queue = ?1 AND status = 'processing'
           AND invisible_until IS NOT NULL AND invisible_until <= ?2",
        params![queue, now_secs()],
    )?;
    Ok(())
}

fn select_ordered(
    conn: &Connection,
    queue: &str,
    count: usize,
) -> Result<Vec<QueueJob>, ShardError> {
    let mut stmt = conn.prepare(
        "SELECT job_id, payload, priority, attempts, created_at FROM queue_jobs
         WHERE queue = ?1 AND status = 'pending'
         ORDER BY priority DESC, created_at ASC, rowid ASC
         LIMIT ?2",
    )?;
    let jobs = stmt
        .query_map(params![queue, count as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs
        .into_iter()
        .map(|(job_id, payload, priority, attempts, created_at)| QueueJob {
            job_id,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            priority,
            attempts,
            created_at,
        })
        .collect())
}

impl PayerShard {
    pub async fn queue_push(
        &self,
        queue: &str,
        items: Vec<serde_json::Value>,
        priority: i64,
    ) -> Result<QueuePush, ShardError> {
        validate_queue_name(queue)?;
        if items.is_empty() {
            return Err(ShardError::InvalidInput("items must not be empty".to_string()));
        }
        let queue = queue.to_string();
        self.call(move |conn| {
            let now = now_secs();
            let tx = conn.transaction()?;
            let mut job_ids = Vec::with_capacity(items.len());
            for item in &items {
                let job_id = Uuid::now_v7().to_string();
                let payload = serde_json::to_string(item)
                    .map_err(|e| ShardError::InvalidInput(e.to_string()))?;
                tx.execute(
                    "INSERT INTO queue_jobs
                       (queue, job_id, payload, priority, status, attempts, created_at)
                     VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)",
                    params![queue, job_id, payload, priority, now],
                )?;
                job_ids.push(job_id);
            }
            tx.commit()?;
            Ok(QueuePush {
                pushed: job_ids.len(),
                job_ids,
            })
        })
        .await
    }

    /// Atomically checks out up to `count` pending jobs in priority order.
    ///
    /// Checked-out jobs move to `processing` and stay hidden for the
    /// visibility window; [`PayerShard::queue_complete`] deletes them for
    /// good, otherwise they come back as `pending` with `attempts + 1`.
    pub async fn queue_pop(
        &self,
        queue: &str,
        count: usize,
        visibility_seconds: Option<u64>,
    ) -> Result<Vec<QueueJob>, ShardError> {
        validate_queue_name(queue)?;
        let queue = queue.to_string();
        let count = count.clamp(1, QUEUE_POP_LIMIT);
        let visibility = visibility_seconds
            .unwrap_or(QUEUE_VISIBILITY_DEFAULT)
            .min(QUEUE_VISIBILITY_MAX);
        self.call(move |conn| {
            let tx = conn.transaction()?;
            release_expired(&tx, &queue)?;
            let jobs = select_ordered(&tx, &queue, count)?;
            let invisible_until = now_secs() + visibility as i64;
            for job in &jobs {
                tx.execute(
                    "UPDATE queue_jobs SET status = 'processing', invisible_until = ?3
                     WHERE queue = ?1 AND job_id = ?2",
                    params![queue, job.job_id, invisible_until],
                )?;
            }
            tx.commit()?;
            Ok(jobs)
        })
        .await
    }

    /// Like pop, but non-destructive: no checkout, no visibility window.
    pub async fn queue_peek(&self, queue: &str, count: usize) -> Result<Vec<QueueJob>, ShardError> {
        validate_queue_name(queue)?;
        let queue = queue.to_string();
        let count = count.clamp(1, QUEUE_POP_LIMIT);
        self.call(move |conn| {
            release_expired(conn, &queue)?;
            select_ordered(conn, &queue, count)
        })
        .await
    }

    /// Acknowledges checked-out jobs, deleting them permanently. Only ids
    /// that were actually in `processing` are reported back.
    pub async fn queue_complete(
        &self,
        queue: &str,
        job_ids: Vec<String>,
    ) -> Result<QueueComplete, ShardError> {
        validate_queue_name(queue)?;
        if job_ids.is_empty() {
            return Err(ShardError::InvalidInput("jobIds must not be empty".to_string()));
        }
        let queue = queue.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut completed = Vec::new();
            for job_id in &job_ids {
                let deleted = tx.execute(
                    "DELETE FROM queue_jobs
                     WHERE queue = ?1 AND job_id = ?2 AND status = 'processing'",
                    params![queue, job_id],
                )?;
                if deleted > 0 {
                    completed.push(job_id.clone());
                }
            }
            tx.commit()?;
            Ok(QueueComplete { completed })
        })
        .await
    }

    pub async fn queue_status(&self, queue: &str) -> Result<QueueStatus, ShardError> {
        validate_queue_name(queue)?;
        let queue = queue.to_string();
        self.call(move |conn| {
            release_expired(conn, &queue)?;
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM queue_jobs WHERE queue = ?1 GROUP BY status",
            )?;
            let mut counts: BTreeMap<String, i64> = BTreeMap::new();
            let rows = stmt.query_map(params![queue], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                counts.insert(status, count);
            }
            counts.entry("pending".to_string()).or_insert(0);
            counts.entry("processing".to_string()).or_insert(0);
            Ok(QueueStatus { queue, counts })
        })
        .await
    }

    pub async fn queue_clear(
        &self,
        queue: &str,
        status: Option<String>,
    ) -> Result<QueueClear, ShardError> {
        validate_queue_name(queue)?;
        let queue = queue.to_string();
        self.call(move |conn| {
            let cleared = match status {
                Some(status) => conn.execute(
                    "DELETE FROM queue_jobs WHERE queue = ?1 AND status = ?2",
                    params![queue, status],
                )?,
                None => conn.execute("DELETE FROM queue_jobs WHERE queue = ?1", params![queue])?,
            };
            Ok(QueueClear { cleared })
        })
        .await
    }
}
