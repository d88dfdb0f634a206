//! Position lifecycle and double-entry ledger types.

use crate::domain::strategy::Direction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub status: PositionStatus,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub margin_required: f64,
    pub realized_pnl: Option<f64>,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionEventType {
    PositionCreated,
    OrderFilled,
    MarginReserved,
    MarginReleased,
    PositionClosed,
    PnlRealized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    pub id: Uuid,
    pub position_id: Uuid,
    pub event_type: PositionEventType,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceEventType {
    MarginReserved,
    MarginReleased,
    RealizedPnl,
    Fee,
    Liquidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub id: Uuid,
    pub account_id: String,
    pub event_type: BalanceEventType,
    pub position_id: Option<Uuid>,
    pub amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    pub timestamp: i64,
}

/// Tolerance used for the balance-equation invariant. Currency amounts are
/// stored as `f64` cents-scale USD, so a fixed absolute tolerance is appropriate.
pub const BALANCE_TOLERANCE: f64 = 0.01;

impl BalanceEvent {
    pub fn satisfies_equation(&self) -> bool {
        (self.balance_after - (self.balance_before + self.amount)).abs() <= BALANCE_TOLERANCE
    }
}

/// The events every `Open` position must have accumulated, and the additional events every
/// `Closed` position must additionally have.
pub const OPEN_COVERAGE: [PositionEventType; 3] = [
    PositionEventType::PositionCreated,
    PositionEventType::OrderFilled,
    PositionEventType::MarginReserved,
];

pub const CLOSED_ADDITIONAL_COVERAGE: [PositionEventType; 3] = [
    PositionEventType::PositionClosed,
    PositionEventType::MarginReleased,
    PositionEventType::PnlRealized,
];
