//! Per-payer usage plane.
//!
//! Every settled request appends one record and bumps the payer's daily
//! aggregate. Writers are fire-and-forget relative to the response; a lost
//! record is acceptable, the settlement receipt in the response is not.

use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::shard::{PayerShard, ShardError};
use crate::util::now_secs;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub day: String,
    pub category: String,
    pub token_type: String,
    pub requests: i64,
    pub revenue: String,
}

/// UTC calendar day for a Unix timestamp, `YYYY-MM-DD`.
pub fn utc_day(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    format!("{year:04}-{month:02}-{day:02}")
}

impl PayerShard {
    pub async fn usage_record(
        &self,
        endpoint: &str,
        category: &str,
        token_type: &str,
        amount_atomic: u128,
        transaction_id: Option<String>,
    ) -> Result<(), ShardError> {
        let endpoint = endpoint.to_string();
        let category = category.to_string();
        let token_type = token_type.to_string();
        self.call(move |conn| {
            let now = now_secs();
            let day = utc_day(now);
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO usage_records
                   (endpoint, category, token_type, amount, transaction_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    endpoint,
                    category,
                    token_type,
                    amount_atomic.to_string(),
                    transaction_id,
                    now
                ],
            )?;
            let revenue: Option<String> = tx
                .query_row(
                    "SELECT revenue FROM usage_daily
                     WHERE day = ?1 AND category = ?2 AND token_type = ?3",
                    params![day, category, token_type],
                    |row| row.get(0),
                )
                .optional()?;
            let total = revenue
                .and_then(|r| r.parse::<u128>().ok())
                .unwrap_or(0)
                .saturating_add(amount_atomic);
            tx.execute(
                "INSERT INTO usage_daily (day, category, token_type, requests, revenue)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(day, category, token_type) DO UPDATE SET
                   requests = requests + 1,
                   revenue = ?4",
                params![day, category, token_type, total.to_string()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn usage_daily(&self, limit: usize) -> Result<Vec<DailyUsage>, ShardError> {
        let limit = limit.clamp(1, 1000);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT day, category, token_type, requests, revenue FROM usage_daily
                 ORDER BY day DESC, category ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(DailyUsage {
                        day: row.get(0)?,
                        category: row.get(1)?,
                        token_type: row.get(2)?,
                        requests: row.get(3)?,
                        revenue: row.get(4)?,
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

    #[test]
    fn utc_day_handles_known_dates() {
        assert_eq!(utc_day(0), "1970-01-01");
        assert_eq!(utc_day(86_400), "1970-01-02");
        // 2024-02-29 12:00:00 UTC, a leap day.
        assert_eq!(utc_day(1_709_208_000), "2024-02-29");
        // 2026-08-01 00:00:00 UTC.
        assert_eq!(utc_day(1_785_542_400), "2026-08-01");
    }

    #[tokio::test]
    async fn records_aggregate_into_daily_rows() {
        let shard = test_shard();
        shard
            .usage_record("/hashing/sha256", "hashing", "Native", 1000, Some("0xabc".to_string()))
            .await
            .unwrap();
        shard
            .usage_record("/hashing/sha256", "hashing", "Native", 1000, None)
            .await
            .unwrap();
        shard
            .usage_record("/inference/openrouter/chat", "inference", "BridgedUSD", 2500, None)
            .await
            .unwrap();

        let daily = shard.usage_daily(10).await.unwrap();
        assert_eq!(daily.len(), 2);
        let hashing = daily.iter().find(|d| d.category == "hashing").unwrap();
        assert_eq!(hashing.requests, 2);
        assert_eq!(hashing.revenue, "2000");
    }
}
