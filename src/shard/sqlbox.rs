//! SQL sandbox subsystem.
//!
//! Payers can create and query their own tables inside their shard. The
//! sandbox enforces three rules: `query` must be a single SELECT with no
//! mutating keywords, `execute` may mutate but can never touch the gateway's
//! reserved tables or issue PRAGMA assignments, and reserved tables are
//! non-addressable from either surface. Keyword checks run over a normalized
//! token stream, never raw substring matching, so a column named
//! `last_update` does not trip the `UPDATE` filter.

use rusqlite::types::ValueRef;
use serde::Serialize;

use crate::shard::{PayerShard, RESERVED_TABLES, ShardError};

const FORBIDDEN_IN_QUERY: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "CREATE", "ALTER", "PRAGMA",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutput {
    pub rows_affected: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaOutput {
    pub tables: Vec<TableInfo>,
}

/// Uppercased identifier-ish tokens of a SQL string.
fn sql_tokens(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in sql.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c.to_ascii_uppercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn references_reserved(tokens: &[String]) -> Option<&str> {
    for token in tokens {
        if token.starts_with("SQLITE_") {
            return Some("sqlite internals");
        }
        if let Some(reserved) = RESERVED_TABLES
            .iter()
            .find(|t| t.eq_ignore_ascii_case(token))
        {
            return Some(reserved);
        }
    }
    None
}

fn check_query(sql: &str) -> Result<(), ShardError> {
    let trimmed = sql.trim_start();
    if !trimmed
        .get(..6)
        .map(|s| s.eq_ignore_ascii_case("SELECT"))
        .unwrap_or(false)
    {
        return Err(ShardError::Forbidden(
            "query must begin with SELECT".to_string(),
        ));
    }
    let tokens = sql_tokens(sql);
    if let Some(keyword) = tokens
        .iter()
        .find(|t| FORBIDDEN_IN_QUERY.contains(&t.as_str()))
    {
        return Err(ShardError::Forbidden(format!(
            "keyword not allowed in query: {keyword}"
        )));
    }
    if let Some(table) = references_reserved(&tokens) {
        return Err(ShardError::Forbidden(format!(
            "table is not addressable: {table}"
        )));
    }
    Ok(())
}

fn check_execute(sql: &str) -> Result<(), ShardError> {
    let tokens = sql_tokens(sql);
    if tokens.iter().any(|t| t == "PRAGMA") && sql.contains('=') {
        return Err(ShardError::Forbidden(
            "PRAGMA assignments are not allowed".to_string(),
        ));
    }
    if let Some(table) = references_reserved(&tokens) {
        return Err(ShardError::Forbidden(format!(
            "table is not addressable: {table}"
        )));
    }
    Ok(())
}

fn to_sqlite_params(params: Vec<serde_json::Value>) -> Result<Vec<rusqlite::types::Value>, ShardError> {
    params
        .into_iter()
        .map(|value| {
            Ok(match value {
                serde_json::Value::Null => rusqlite::types::Value::Null,
                serde_json::Value::Bool(b) => rusqlite::types::Value::Integer(b as i64),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        rusqlite::types::Value::Integer(i)
                    } else if let Some(f) = n.as_f64() {
                        rusqlite::types::Value::Real(f)
                    } else {
                        return Err(ShardError::InvalidInput(format!(
                            "unsupported numeric parameter: {n}"
                        )));
                    }
                }
                serde_json::Value::String(s) => rusqlite::types::Value::Text(s),
                other => rusqlite::types::Value::Text(other.to_string()),
            })
        })
        .collect()
}

fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(hex::encode(b)),
    }
}

impl PayerShard {
    /// Runs a read-only SELECT against the payer's own tables.
    pub async fn sql_query(
        &self,
        sql: String,
        params: Vec<serde_json::Value>,
    ) -> Result<QueryOutput, ShardError> {
        check_query(&sql)?;
        let params = to_sqlite_params(params)?;
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = serde_json::Map::new();
                for (i, column) in columns.iter().enumerate() {
                    object.insert(column.clone(), value_ref_to_json(row.get_ref(i)?));
                }
                out.push(serde_json::Value::Object(object));
            }
            let row_count = out.len();
            Ok(QueryOutput {
                rows: out,
                row_count,
                columns,
            })
        })
        .await
    }

    /// Runs a single mutating statement against the payer's own tables.
    pub async fn sql_execute(
        &self,
        sql: String,
        params: Vec<serde_json::Value>,
    ) -> Result<ExecuteOutput, ShardError> {
        check_execute(&sql)?;
        let params = to_sqlite_params(params)?;
        self.call(move |conn| {
            let rows_affected = conn.execute(&sql, rusqlite::params_from_iter(params))?;
            Ok(ExecuteOutput { rows_affected })
        })
        .await
    }

    /// Introspects the payer's own tables; reserved tables are omitted.
    pub async fn sql_schema(&self) -> Result<SchemaOutput, ShardError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, sql FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name ASC",
            )?;
            let tables = stmt
                .query_map([], |row| {
                    Ok(TableInfo {
                        name: row.get(0)?,
                        sql: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(SchemaOutput {
                tables: tables
                    .into_iter()
                    .filter(|t| !RESERVED_TABLES.contains(&t.name.as_str()))
                    .collect(),
            })
        })
        .await
    }
}
