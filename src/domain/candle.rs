//! Canonical candle type and the timeframe grid it is aligned to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported timeframes. The system trades a single instrument on `FifteenMin`, but the
/// candle store and indicator engine are not hard-coded to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn to_ms(&self) -> i64 {
        self.to_minutes() * 60_000
    }

    /// OANDA-style granularity string, e.g. `M15`.
    pub fn to_oanda_string(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "M1",
            Timeframe::FiveMin => "M5",
            Timeframe::FifteenMin => "M15",
            Timeframe::OneHour => "H1",
            Timeframe::FourHour => "H4",
            Timeframe::OneDay => "D",
        }
    }

    /// Rounds a timestamp (ms since epoch) down to the start of the period containing it.
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        let step = self.to_ms();
        timestamp_ms - timestamp_ms.rem_euclid(step)
    }

    pub fn is_period_start(&self, timestamp_ms: i64) -> bool {
        timestamp_ms.rem_euclid(self.to_ms()) == 0
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "m1" | "onemin" => Ok(Timeframe::OneMin),
            "5m" | "m5" | "fivemin" => Ok(Timeframe::FiveMin),
            "15m" | "m15" | "fifteenmin" => Ok(Timeframe::FifteenMin),
            "1h" | "h1" | "onehour" => Ok(Timeframe::OneHour),
            "4h" | "h4" | "fourhour" => Ok(Timeframe::FourHour),
            "1d" | "d" | "oneday" => Ok(Timeframe::OneDay),
            _ => anyhow::bail!("invalid timeframe: '{s}'"),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_oanda_string())
    }
}

/// A single OHLCV sample. `timestamp` is the UTC period-start, in milliseconds since the
/// epoch, aligned to `timeframe`'s grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: String,
    pub timeframe: Timeframe,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// The OHLC invariants every persisted candle must satisfy.
    pub fn is_valid(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
            && self.open >= 0.0
            && self.high >= 0.0
            && self.low >= 0.0
            && self.close >= 0.0
            && self.volume >= 0.0
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.high >= self.low
    }
}

/// A broker-specific payload before normalization. Field names mirror what most broker wire
/// formats expose; brokers that quote bid/ask separately populate both and the normalizer
/// averages them.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandle {
    pub timestamp: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub bid_open: Option<f64>,
    pub bid_high: Option<f64>,
    pub bid_low: Option<f64>,
    pub bid_close: Option<f64>,
    pub ask_open: Option<f64>,
    pub ask_high: Option<f64>,
    pub ask_low: Option<f64>,
    pub ask_close: Option<f64>,
    pub volume: Option<f64>,
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_start_aligns_to_grid() {
        let tf = Timeframe::FifteenMin;
        let base = 1_704_067_200_000i64; // 2024-01-01T00:00:00Z
        assert_eq!(tf.period_start(base + 7 * 60_000), base);
        assert_eq!(tf.period_start(base + 15 * 60_000), base + 15 * 60_000);
    }

    #[test]
    fn candle_invariants_reject_inverted_high_low() {
        let c = Candle {
            pair: "XAU_USD".to_string(),
            timeframe: Timeframe::FifteenMin,
            timestamp: 0,
            open: 10.0,
            high: 9.0,
            low: 11.0,
            close: 10.0,
            volume: 1.0,
        };
        assert!(!c.is_valid());
    }

    #[test]
    fn candle_invariants_accept_well_formed_candle() {
        let c = Candle {
            pair: "XAU_USD".to_string(),
            timeframe: Timeframe::FifteenMin,
            timestamp: 0,
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            volume: 42.0,
        };
        assert!(c.is_valid());
    }
}
