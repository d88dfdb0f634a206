//! `CandleStore` implementation over SQLite. Inserts are `INSERT ... ON CONFLICT DO NOTHING`,
//! so repeated ingestion of the same period is idempotent: an exact duplicate by key is
//! skipped and the existing row is left untouched rather than overwritten.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::errors::StoreError;
use crate::domain::ports::{CandleStore, GapInterval, UpsertOutcome};
use crate::infrastructure::persistence::database::Database;
use async_trait::async_trait;
use std::str::FromStr;

fn tf_to_str(tf: Timeframe) -> &'static str {
    tf.to_oanda_string()
}

fn tf_from_str(s: &str) -> Result<Timeframe, StoreError> {
    Timeframe::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub struct SqliteCandleStore {
    db: Database,
}

impl SqliteCandleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();
        let mut tx = self.db.pool.begin().await?;

        for c in candles {
            if !c.is_valid() {
                outcome.errors += 1;
                continue;
            }
            let tf = tf_to_str(c.timeframe);
            let result = sqlx::query(
                r#"
                INSERT INTO candles (pair, timeframe, timestamp, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (pair, timeframe, timestamp) DO NOTHING
                "#,
            )
            .bind(&c.pair)
            .bind(tf)
            .bind(c.timestamp)
            .bind(c.open)
            .bind(c.high)
            .bind(c.low)
            .bind(c.close)
            .bind(c.volume)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(r) if r.rows_affected() > 0 => outcome.inserted += 1,
                Ok(_) => outcome.skipped += 1,
                Err(_) => outcome.errors += 1,
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query_as::<_, CandleRow>(
            r#"
            SELECT pair, timeframe, timestamp, open, high, low, close, volume
            FROM candles
            WHERE pair = ?1 AND timeframe = ?2 AND timestamp >= ?3 AND timestamp < ?4
            ORDER BY timestamp ASC
            "#,
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(CandleRow::into_domain).collect()
    }

    async fn get_after(
        &self,
        pair: &str,
        timeframe: Timeframe,
        after_ms: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query_as::<_, CandleRow>(
            r#"
            SELECT pair, timeframe, timestamp, open, high, low, close, volume
            FROM candles
            WHERE pair = ?1 AND timeframe = ?2 AND timestamp > ?3
            ORDER BY timestamp ASC
            "#,
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .bind(after_ms)
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(CandleRow::into_domain).collect()
    }

    async fn get_latest_timestamp(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT MAX(timestamp) FROM candles WHERE pair = ?1 AND timeframe = ?2 AND timestamp IS NOT NULL",
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(|(ts,)| ts))
    }

    async fn detect_gaps(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
        expected_step_ms: i64,
    ) -> Result<Vec<GapInterval>, StoreError> {
        let candles = self.get_range(pair, timeframe, from_ms, to_ms).await?;
        let mut gaps = Vec::new();
        let mut cursor = from_ms;

        for c in &candles {
            if c.timestamp > cursor {
                gaps.push(GapInterval {
                    from_ms: cursor,
                    to_ms: c.timestamp,
                });
            }
            cursor = c.timestamp + expected_step_ms;
        }
        if cursor < to_ms {
            gaps.push(GapInterval {
                from_ms: cursor,
                to_ms,
            });
        }
        Ok(gaps)
    }
}

#[derive(sqlx::FromRow)]
struct CandleRow {
    pair: String,
    timeframe: String,
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl CandleRow {
    fn into_domain(self) -> Result<Candle, StoreError> {
        Ok(Candle {
            pair: self.pair,
            timeframe: tf_from_str(&self.timeframe)?,
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }
}
