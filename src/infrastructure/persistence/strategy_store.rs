//! `StrategyStore` implementation over SQLite. A decision, its audit trail, and its
//! optional trade signal are written as one transaction so a reader never observes a decision
//! without its audit records.

use crate::domain::candle::Timeframe;
use crate::domain::errors::StoreError;
use crate::domain::ports::StrategyStore;
use crate::domain::strategy::{
    AuditRecord, Decision, Direction, Regime, SetupType, Stage, StageStatus, StrategyDecision,
    TradeSignal,
};
use crate::infrastructure::persistence::database::Database;
use async_trait::async_trait;
use uuid::Uuid;

fn tf_to_str(tf: Timeframe) -> &'static str {
    tf.to_oanda_string()
}

fn decision_to_str(d: Decision) -> &'static str {
    match d {
        Decision::Buy => "buy",
        Decision::Sell => "sell",
        Decision::NoTrade => "no_trade",
    }
}

fn regime_to_str(r: Regime) -> &'static str {
    match r {
        Regime::BullishTrend => "bullish_trend",
        Regime::BearishTrend => "bearish_trend",
        Regime::Ranging => "ranging",
        Regime::NoTrade => "no_trade",
    }
}

fn setup_to_str(s: SetupType) -> &'static str {
    match s {
        SetupType::PullbackToEma20 => "pullback_ema20",
        SetupType::PullbackToEma50 => "pullback_ema50",
        SetupType::StructureBreakout => "structure_breakout",
        SetupType::ContinuationAfterSweep => "continuation_after_sweep",
    }
}

fn stage_to_str(s: Stage) -> &'static str {
    match s {
        Stage::Regime => "regime",
        Stage::Setup => "setup",
        Stage::Qualification => "qualification",
        Stage::Risk => "risk",
        Stage::Rr => "rr",
        Stage::Confidence => "confidence",
        Stage::Time => "time",
    }
}

fn status_to_str(s: StageStatus) -> &'static str {
    match s {
        StageStatus::Passed => "passed",
        StageStatus::Failed => "failed",
    }
}

fn direction_to_str(d: Direction) -> &'static str {
    match d {
        Direction::Buy => "buy",
        Direction::Sell => "sell",
    }
}

fn direction_from_str(s: &str) -> Result<Direction, StoreError> {
    match s {
        "buy" => Ok(Direction::Buy),
        "sell" => Ok(Direction::Sell),
        other => Err(StoreError::Serialization(format!("unknown direction '{other}'"))),
    }
}

pub struct SqliteStrategyStore {
    db: Database,
}

impl SqliteStrategyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StrategyStore for SqliteStrategyStore {
    async fn save_decision(
        &self,
        decision: &StrategyDecision,
        audit: &[AuditRecord],
        signal: Option<&TradeSignal>,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO strategy_decisions
                (id, candle_timestamp, pair, timeframe, decision, regime, setup_type,
                 confidence_score, reason, trading_window, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(decision.id.to_string())
        .bind(decision.candle_timestamp)
        .bind(&decision.pair)
        .bind(tf_to_str(decision.timeframe))
        .bind(decision_to_str(decision.decision))
        .bind(regime_to_str(decision.regime))
        .bind(decision.setup_type.map(setup_to_str))
        .bind(decision.confidence_score)
        .bind(&decision.reason)
        .bind(decision.trading_window)
        .bind(decision.created_at)
        .execute(&mut *tx)
        .await?;

        for record in audit {
            sqlx::query(
                r#"
                INSERT INTO strategy_audit_log (decision_id, stage, status, details)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(record.decision_id.to_string())
            .bind(stage_to_str(record.stage))
            .bind(status_to_str(record.status))
            .bind(&record.details)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(signal) = signal {
            sqlx::query(
                r#"
                INSERT INTO trade_signals
                    (decision_id, direction, entry_price, stop_loss, take_profit, rr_ratio,
                     risk_percent, leverage, position_size, margin_required)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(signal.decision_id.to_string())
            .bind(direction_to_str(signal.direction))
            .bind(signal.entry_price)
            .bind(signal.stop_loss)
            .bind(signal.take_profit)
            .bind(signal.rr_ratio)
            .bind(signal.risk_percent)
            .bind(signal.leverage)
            .bind(signal.position_size)
            .bind(signal.margin_required)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn decision_exists(
        &self,
        pair: &str,
        timeframe: Timeframe,
        candle_timestamp: i64,
    ) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM strategy_decisions WHERE pair = ?1 AND timeframe = ?2 AND candle_timestamp = ?3",
        )
        .bind(pair)
        .bind(tf_to_str(timeframe))
        .bind(candle_timestamp)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn get_signal(&self, decision_id: Uuid) -> Result<Option<TradeSignal>, StoreError> {
        let row: Option<SignalRow> = sqlx::query_as(
            r#"
            SELECT decision_id, direction, entry_price, stop_loss, take_profit, rr_ratio,
                   risk_percent, leverage, position_size, margin_required
            FROM trade_signals WHERE decision_id = ?1
            "#,
        )
        .bind(decision_id.to_string())
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(SignalRow::into_domain).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    decision_id: String,
    direction: String,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    rr_ratio: f64,
    risk_percent: f64,
    leverage: f64,
    position_size: f64,
    margin_required: f64,
}

impl SignalRow {
    fn into_domain(self) -> Result<TradeSignal, StoreError> {
        Ok(TradeSignal {
            decision_id: Uuid::parse_str(&self.decision_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            direction: direction_from_str(&self.direction)?,
            entry_price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            rr_ratio: self.rr_ratio,
            risk_percent: self.risk_percent,
            leverage: self.leverage,
            position_size: self.position_size,
            margin_required: self.margin_required,
        })
    }
}
