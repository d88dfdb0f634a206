//! Strategy decision, audit trail, and trade signal types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Buy,
    Sell,
    NoTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    BullishTrend,
    BearishTrend,
    Ranging,
    NoTrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupType {
    PullbackToEma20,
    PullbackToEma50,
    StructureBreakout,
    ContinuationAfterSweep,
}

/// The seven fixed-order stages of the decision machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Regime,
    Setup,
    Qualification,
    Risk,
    Rr,
    Confidence,
    Time,
}

impl Stage {
    pub const ORDER: [Stage; 7] = [
        Stage::Regime,
        Stage::Setup,
        Stage::Qualification,
        Stage::Risk,
        Stage::Rr,
        Stage::Confidence,
        Stage::Time,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Passed,
    Failed,
}

/// One record per stage a decision reached. A `Failed` record short-circuits later stages,
/// but earlier `Passed` records are retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub decision_id: Uuid,
    pub stage: Stage,
    pub status: StageStatus,
    pub details: String,
}

/// Exactly one decision is produced per candle per `(pair, timeframe)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub id: Uuid,
    pub candle_timestamp: i64,
    pub pair: String,
    pub timeframe: crate::domain::candle::Timeframe,
    pub decision: Decision,
    pub regime: Regime,
    pub setup_type: Option<SetupType>,
    pub confidence_score: f64,
    pub reason: String,
    pub trading_window: bool,
    pub created_at: i64,
}

/// Exists iff the associated decision is not `NoTrade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub decision_id: Uuid,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub rr_ratio: f64,
    pub risk_percent: f64,
    pub leverage: f64,
    pub position_size: f64,
    pub margin_required: f64,
}

impl TradeSignal {
    /// Direction-consistency invariant: stop/target must sit on the correct side of entry.
    pub fn is_well_formed(&self, min_rr: f64) -> bool {
        let ordering_ok = match self.direction {
            Direction::Buy => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Direction::Sell => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        };
        ordering_ok
            && self.rr_ratio >= min_rr
            && self.risk_percent > 0.0
            && self.risk_percent <= 10.0
    }
}
