//! Indicator value types persisted by the Indicator Engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingType {
    High,
    Low,
}

/// One persisted indicator sample. Every variant carries `(pair, timeframe, timestamp)` so the
/// alignment invariant (every indicator value has a candle with an identical key) can be
/// checked directly against the candle store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndicatorValue {
    Ema {
        pair: String,
        timeframe: crate::domain::candle::Timeframe,
        period: u32,
        timestamp: i64,
        value: f64,
    },
    Atr {
        pair: String,
        timeframe: crate::domain::candle::Timeframe,
        period: u32,
        timestamp: i64,
        value: f64,
    },
    Swing {
        pair: String,
        timeframe: crate::domain::candle::Timeframe,
        timestamp: i64,
        swing_type: SwingType,
        price: f64,
        left_lookback: u32,
        right_lookback: u32,
    },
}

impl IndicatorValue {
    pub fn timestamp(&self) -> i64 {
        match self {
            IndicatorValue::Ema { timestamp, .. }
            | IndicatorValue::Atr { timestamp, .. }
            | IndicatorValue::Swing { timestamp, .. } => *timestamp,
        }
    }
}

/// The set of EMA periods computed in one historical pass.
pub const EMA_PERIODS: [u32; 3] = [20, 50, 200];
pub const ATR_PERIOD: u32 = 14;
pub const SWING_LOOKBACK: usize = 5;

/// Snapshot of indicator state aligned to a single candle, as consumed by the Strategy Engine.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSnapshot {
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,
    pub atr_14: Option<f64>,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
}
