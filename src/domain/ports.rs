//! Port interfaces (hexagonal seams) implemented by `infrastructure`, split between
//! market-data capabilities and execution/persistence capabilities.

use crate::domain::candle::{Candle, RawCandle, Timeframe};
use crate::domain::errors::{BrokerError, StoreError};
use crate::domain::indicator::IndicatorValue;
use crate::domain::job::Job;
use crate::domain::ledger::{BalanceEvent, Position, PositionEvent};
use crate::domain::strategy::{AuditRecord, StrategyDecision, TradeSignal};
use async_trait::async_trait;

/// Capability set exposed by every broker variant. Fetched sequences must be
/// chronologically ordered and contain only completed candles.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<RawCandle>, BrokerError>;

    async fn validate_connection(&self) -> Result<bool, BrokerError>;
}

/// Gap interval returned by `detect_gaps`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapInterval {
    pub from_ms: i64,
    pub to_ms: i64,
}

/// Result of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<UpsertOutcome, StoreError>;

    async fn get_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, StoreError>;

    async fn get_after(
        &self,
        pair: &str,
        timeframe: Timeframe,
        after_ms: i64,
    ) -> Result<Vec<Candle>, StoreError>;

    async fn get_latest_timestamp(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Option<i64>, StoreError>;

    async fn detect_gaps(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
        expected_step_ms: i64,
    ) -> Result<Vec<GapInterval>, StoreError>;
}

#[async_trait]
pub trait IndicatorStore: Send + Sync {
    async fn save_batch(&self, values: &[IndicatorValue]) -> Result<(), StoreError>;

    async fn clear(&self, pair: &str, timeframe: Timeframe) -> Result<(), StoreError>;

    async fn latest_ema(
        &self,
        pair: &str,
        timeframe: Timeframe,
        period: u32,
    ) -> Result<Option<(i64, f64)>, StoreError>;

    async fn latest_atr(
        &self,
        pair: &str,
        timeframe: Timeframe,
        period: u32,
    ) -> Result<Option<(i64, f64)>, StoreError>;

    async fn latest_swing(
        &self,
        pair: &str,
        timeframe: Timeframe,
        swing_type: crate::domain::indicator::SwingType,
    ) -> Result<Option<(i64, f64)>, StoreError>;

    async fn all_for_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<IndicatorValue>, StoreError>;
}

#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn save_decision(
        &self,
        decision: &StrategyDecision,
        audit: &[AuditRecord],
        signal: Option<&TradeSignal>,
    ) -> Result<(), StoreError>;

    async fn decision_exists(
        &self,
        pair: &str,
        timeframe: Timeframe,
        candle_timestamp: i64,
    ) -> Result<bool, StoreError>;

    async fn get_signal(
        &self,
        decision_id: uuid::Uuid,
    ) -> Result<Option<TradeSignal>, StoreError>;
}

/// Ledger persistence seam. Implementations must make `append_position_event` /
/// `append_balance_event` part of the same atomic unit of work as the caller's transaction;
/// the trait is expressed in terms of a whole-command apply so that invariant is structural
/// rather than convention.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn latest_balance(&self, account_id: &str) -> Result<f64, StoreError>;

    async fn get_position(&self, id: uuid::Uuid) -> Result<Option<Position>, StoreError>;

    async fn position_events(&self, id: uuid::Uuid) -> Result<Vec<PositionEvent>, StoreError>;

    async fn account_events(&self, account_id: &str) -> Result<Vec<BalanceEvent>, StoreError>;

    /// Appends a position plus its initial events and balance events as one atomic write.
    async fn apply_position_write(
        &self,
        position: &Position,
        position_events: &[PositionEvent],
        balance_events: &[BalanceEvent],
    ) -> Result<(), crate::domain::errors::LedgerError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &Job) -> Result<(), StoreError>;
    async fn find_active_by_key(
        &self,
        key: &crate::domain::job::JobKey,
    ) -> Result<Option<Job>, StoreError>;
}
