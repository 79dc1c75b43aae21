//! Per-payer isolated storage shards.
//!
//! Every payer address owns one embedded SQLite database holding all of that
//! payer's state: key-value rows, pastes, a SQL sandbox, distributed locks, a
//! priority queue, vector memory, content-scan verdicts, and usage records.
//! A shard is the identity: no method takes a caller, and cross-shard
//! operations never occur. Operations within a shard are serialized by an
//! async mutex around the connection; schema initialization happens exactly
//! once, under the shard-map entry lock, so no request ever observes a
//! partially initialized shard.

pub mod kv;
pub mod lock;
pub mod memory;
pub mod paste;
pub mod queue;
pub mod scans;
pub mod sqlbox;
pub mod usage;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Table names owned by the gateway inside every shard. The SQL sandbox can
/// neither read nor drop these.
pub const RESERVED_TABLES: &[&str] = &[
    "kv",
    "paste",
    "locks",
    "queue_jobs",
    "memory_items",
    "content_scans",
    "usage_records",
    "usage_daily",
    "sqlite_sequence",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  metadata TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  expires_at INTEGER
);
CREATE TABLE IF NOT EXISTS paste (
  id TEXT PRIMARY KEY,
  content TEXT NOT NULL,
  title TEXT,
  language TEXT,
  created_at INTEGER NOT NULL,
  expires_at INTEGER
);
CREATE TABLE IF NOT EXISTS locks (
  name TEXT PRIMARY KEY,
  holder_token TEXT NOT NULL,
  acquired_at INTEGER NOT NULL,
  expires_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS queue_jobs (
  queue TEXT NOT NULL,
  job_id TEXT NOT NULL,
  payload TEXT NOT NULL,
  priority INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL DEFAULT 'pending',
  attempts INTEGER NOT NULL DEFAULT 0,
  created_at INTEGER NOT NULL,
  invisible_until INTEGER,
  PRIMARY KEY (queue, job_id)
);
CREATE INDEX IF NOT EXISTS queue_jobs_order
  ON queue_jobs (queue, status, priority DESC, created_at ASC);
CREATE TABLE IF NOT EXISTS memory_items (
  id TEXT PRIMARY KEY,
  text TEXT NOT NULL,
  embedding TEXT NOT NULL,
  metadata TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS content_scans (
  content_id TEXT PRIMARY KEY,
  content_type TEXT NOT NULL,
  safe INTEGER NOT NULL,
  confidence REAL NOT NULL,
  reason TEXT,
  scanned_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS usage_records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  endpoint TEXT NOT NULL,
  category TEXT NOT NULL,
  token_type TEXT NOT NULL,
  amount TEXT NOT NULL,
  transaction_id TEXT,
  created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS usage_daily (
  day TEXT NOT NULL,
  category TEXT NOT NULL,
  token_type TEXT NOT NULL,
  requests INTEGER NOT NULL DEFAULT 0,
  revenue TEXT NOT NULL DEFAULT '0',
  PRIMARY KEY (day, category, token_type)
);
";

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    InvalidInput(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid payer address: {0}")]
    InvalidPayer(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One payer's persistent actor.
pub struct PayerShard {
    payer: String,
    conn: Mutex<Connection>,
}

impl PayerShard {
    fn open(payer: &str, path: Option<PathBuf>) -> Result<Self, ShardError> {
        let conn = match path {
            Some(path) => {
                let conn = Connection::open(path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn
            }
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            payer: payer.to_string(),
            conn: Mutex::new(conn),
        })
    }

    pub fn payer(&self) -> &str {
        &self.payer
    }

    /// Runs `f` with exclusive access to the shard's connection.
    ///
    /// This is the per-shard serialization point: a `set` followed by a `get`
    /// on the same shard always observes the write. Callers must not perform
    /// network I/O inside `f`.
    pub(crate) async fn call<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, ShardError>,
    ) -> Result<T, ShardError> {
        let mut conn = self.conn.lock().await;
        f(&mut conn)
    }
}

/// The process-global map of payer address to shard.
pub struct ShardManager {
    dir: Option<PathBuf>,
    shards: DashMap<String, Arc<PayerShard>>,
}

impl ShardManager {
    /// Shards persisted under `dir`, one database file per payer.
    pub fn new(dir: PathBuf) -> Result<Self, ShardError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            shards: DashMap::new(),
        })
    }

    /// Ephemeral in-memory shards.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            shards: DashMap::new(),
        }
    }

    /// Returns the shard for `payer`, creating and initializing it on first
    /// use. Creation holds the map entry lock, so concurrent first requests
    /// for the same payer race on exactly one initialization.
    pub fn shard(&self, payer: &str) -> Result<Arc<PayerShard>, ShardError> {
        validate_payer(payer)?;
        if let Some(shard) = self.shards.get(payer) {
            return Ok(shard.clone());
        }
        match self.shards.entry(payer.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let path = self.dir.as_ref().map(|dir| dir.join(format!("{payer}.db")));
                let shard = Arc::new(PayerShard::open(payer, path)?);
                vacant.insert(shard.clone());
                Ok(shard)
            }
        }
    }
}

/// Payer addresses become database file names, so the charset is restricted
/// to what a Stacks principal can contain.
fn validate_payer(payer: &str) -> Result<(), ShardError> {
    let ok = !payer.is_empty()
        && payer.len() <= 64
        && payer.starts_with('S')
        && payer.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(ShardError::InvalidPayer(payer.to_string()))
    }
}

#[cfg(test)]
pub(crate) fn test_shard() -> PayerShard {
    PayerShard::open("SPTESTPAYER000000000000000000000000000", None).unwrap()
}
