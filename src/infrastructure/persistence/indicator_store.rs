//! `IndicatorStore` implementation over SQLite. EMA/ATR live in period-keyed tables;
//! swings live in their own table keyed by swing type, mirroring the three `IndicatorValue`
//! variants.

use crate::domain::candle::Timeframe;
use crate::domain::errors::StoreError;
use crate::domain::indicator::{IndicatorValue, SwingType};
use crate::domain::ports::IndicatorStore;
use crate::infrastructure::persistence::database::Database;
use async_trait::async_trait;

fn tf_to_str(tf: Timeframe) -> &'static str {
    tf.to_oanda_string()
}

fn swing_to_str(s: SwingType) -> &'static str {
    match s {
        SwingType::High => "high",
        SwingType::Low => "low",
    }
}

fn swing_from_str(s: &str) -> Result<SwingType, StoreError> {
    match s {
        "high" => Ok(SwingType::High),
        "low" => Ok(SwingType::Low),
        other => Err(StoreError::Serialization(format!("unknown swing_type '{other}'"))),
    }
}

pub struct SqliteIndicatorStore {
    db: Database,
}

impl SqliteIndicatorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IndicatorStore for SqliteIndicatorStore {
    async fn save_batch(&self, values: &[IndicatorValue]) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;

        for v in values {
            match v {
                IndicatorValue::Ema {
                    pair,
                    timeframe,
                    period,
                    timestamp,
                    value,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO ema_values (pair, timeframe, period, timestamp, value)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT (pair, timeframe, period, timestamp) DO UPDATE SET value = excluded.value
                        "#,
                    )
                    .bind(pair)
                    .bind(tf_to_str(*timeframe))
                    .bind(*period)
                    .bind(*timestamp)
                    .bind(*value)
                    .execute(&mut *tx)
                    .await?;
                }
                IndicatorValue::Atr {
                    pair,
                    timeframe,
                    period,
                    timestamp,
                    value,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO atr_values (pair, timeframe, period, timestamp, value)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT (pair, timeframe, period, timestamp) DO UPDATE SET value = excluded.value
                        "#,
                    )
                    .bind(pair)
                    .bind(tf_to_str(*timeframe))
                    .bind(*period)
                    .bind(*timestamp)
                    .bind(*value)
                    .execute(&mut *tx)
                    .await?;
                }
                IndicatorValue::Swing {
                    pair,
                    timeframe,
                    timestamp,
                    swing_type,
                    price,
                    left_lookback,
                    right_lookback,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO swings (pair, timeframe, timestamp, swing_type, price, left_lookback, right_lookback)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        ON CONFLICT (pair, timeframe, timestamp, swing_type) DO UPDATE SET
                            price = excluded.price,
                            left_lookback = excluded.left_lookback,
                            right_lookback = excluded.right_lookback
                        "#,
                    )
                    .bind(pair)
                    .bind(tf_to_str(*timeframe))
                    .bind(*timestamp)
                    .bind(swing_to_str(*swing_type))
                    .bind(*price)
                    .bind(*left_lookback)
                    .bind(*right_lookback)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, pair: &str, timeframe: Timeframe) -> Result<(), StoreError> {
        let tf = tf_to_str(timeframe);
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("DELETE FROM ema_values WHERE pair = ?1 AND timeframe = ?2")
            .bind(pair)
            .bind(tf)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM atr_values WHERE pair = ?1 AND timeframe = ?2")
            .bind(pair)
            .bind(tf)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM swings WHERE pair = ?1 AND timeframe = ?2")
            .bind(pair)
            .bind(tf)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest_ema(
        &self,
        pair: &str,
        timeframe: Timeframe,
        period: u32,
    ) -> Result<Option<(i64, f64)>, StoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            r#"
            SELECT timestamp, value FROM ema_values
            WHERE pair = ?1 AND timeframe = ?2 AND period = ?3
            ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .bind(period)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    async fn latest_atr(
        &self,
        pair: &str,
        timeframe: Timeframe,
        period: u32,
    ) -> Result<Option<(i64, f64)>, StoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            r#"
            SELECT timestamp, value FROM atr_values
            WHERE pair = ?1 AND timeframe = ?2 AND period = ?3
            ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .bind(period)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    async fn latest_swing(
        &self,
        pair: &str,
        timeframe: Timeframe,
        swing_type: SwingType,
    ) -> Result<Option<(i64, f64)>, StoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            r#"
            SELECT timestamp, price FROM swings
            WHERE pair = ?1 AND timeframe = ?2 AND swing_type = ?3
            ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .bind(swing_to_str(swing_type))
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    async fn all_for_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<IndicatorValue>, StoreError> {
        let tf = tf_to_str(timeframe);
        let mut out = Vec::new();

        let emas: Vec<(u32, i64, f64)> = sqlx::query_as(
            "SELECT period, timestamp, value FROM ema_values WHERE pair = ?1 AND timeframe = ?2 AND timestamp >= ?3 AND timestamp < ?4",
        )
        .bind(pair)
        .bind(tf)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.db.pool)
        .await?;
        for (period, timestamp, value) in emas {
            out.push(IndicatorValue::Ema {
                pair: pair.to_string(),
                timeframe,
                period,
                timestamp,
                value,
            });
        }

        let atrs: Vec<(u32, i64, f64)> = sqlx::query_as(
            "SELECT period, timestamp, value FROM atr_values WHERE pair = ?1 AND timeframe = ?2 AND timestamp >= ?3 AND timestamp < ?4",
        )
        .bind(pair)
        .bind(tf)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.db.pool)
        .await?;
        for (period, timestamp, value) in atrs {
            out.push(IndicatorValue::Atr {
                pair: pair.to_string(),
                timeframe,
                period,
                timestamp,
                value,
            });
        }

        let swings: Vec<(i64, String, f64, u32, u32)> = sqlx::query_as(
            "SELECT timestamp, swing_type, price, left_lookback, right_lookback FROM swings WHERE pair = ?1 AND timeframe = ?2 AND timestamp >= ?3 AND timestamp < ?4",
        )
        .bind(pair)
        .bind(tf)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.db.pool)
        .await?;
        for (timestamp, swing_type, price, left_lookback, right_lookback) in swings {
            out.push(IndicatorValue::Swing {
                pair: pair.to_string(),
                timeframe,
                timestamp,
                swing_type: swing_from_str(&swing_type)?,
                price,
                left_lookback,
                right_lookback,
            });
        }

        out.sort_by_key(|v| v.timestamp());
        Ok(out)
    }
}
