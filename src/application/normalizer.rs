//! Normalizer: converts broker wire payloads into canonical `Candle`s, enforcing the OHLC
//! invariants before anything downstream ever sees the value. Averages bid/ask into a mid
//! price before handing candles to the pipeline.

use crate::domain::candle::{Candle, RawCandle, Timeframe};
use chrono::DateTime;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("candle at '{0}' is not marked complete")]
    Incomplete(String),

    #[error("candle at '{0}' has no usable price fields")]
    MissingPrices(String),

    #[error("candle timestamp '{0}' could not be parsed")]
    BadTimestamp(String),

    #[error("candle at timestamp {0} fails OHLC invariants after normalization")]
    InvariantViolation(i64),
}

/// Picks `direct` if present, else the bid/ask midpoint, else `None`.
fn pick(direct: Option<f64>, bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    direct.or_else(|| match (bid, ask) {
        (Some(b), Some(a)) => Some((b + a) / 2.0),
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    })
}

/// Normalizes one broker candle. Rejects incomplete candles outright and rejects anything that still fails `Candle::is_valid`
/// after averaging, rather than silently clamping it.
pub fn normalize(
    raw: &RawCandle,
    pair: &str,
    timeframe: Timeframe,
) -> Result<Candle, NormalizeError> {
    if !raw.complete {
        return Err(NormalizeError::Incomplete(raw.timestamp.clone()));
    }

    let timestamp_ms = parse_timestamp(&raw.timestamp)?;
    let period_start = timeframe.period_start(timestamp_ms);

    let open = pick(raw.open, raw.bid_open, raw.ask_open)
        .ok_or_else(|| NormalizeError::MissingPrices(raw.timestamp.clone()))?;
    let high = pick(raw.high, raw.bid_high, raw.ask_high)
        .ok_or_else(|| NormalizeError::MissingPrices(raw.timestamp.clone()))?;
    let low = pick(raw.low, raw.bid_low, raw.ask_low)
        .ok_or_else(|| NormalizeError::MissingPrices(raw.timestamp.clone()))?;
    let close = pick(raw.close, raw.bid_close, raw.ask_close)
        .ok_or_else(|| NormalizeError::MissingPrices(raw.timestamp.clone()))?;
    let volume = raw.volume.unwrap_or(0.0);

    let candle = Candle {
        pair: pair.to_string(),
        timeframe,
        timestamp: period_start,
        open,
        high,
        low,
        close,
        volume,
    };

    if !candle.is_valid() {
        return Err(NormalizeError::InvariantViolation(period_start));
    }

    Ok(candle)
}

/// Normalizes a batch, dropping (and counting) any candle that fails normalization rather than
/// aborting the whole batch: a single bad upstream sample must not block the rest.
pub fn normalize_batch(
    raw: &[RawCandle],
    pair: &str,
    timeframe: Timeframe,
) -> (Vec<Candle>, usize) {
    let mut ok = Vec::with_capacity(raw.len());
    let mut rejected = 0usize;
    for r in raw {
        match normalize(r, pair, timeframe) {
            Ok(c) => ok.push(c),
            Err(_) => rejected += 1,
        }
    }
    (ok, rejected)
}

fn parse_timestamp(s: &str) -> Result<i64, NormalizeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    Err(NormalizeError::BadTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(complete: bool) -> RawCandle {
        RawCandle {
            timestamp: "2024-01-01T00:00:07Z".to_string(),
            open: Some(10.0),
            high: Some(10.5),
            low: Some(9.8),
            close: Some(10.2),
            bid_open: None,
            bid_high: None,
            bid_low: None,
            bid_close: None,
            ask_open: None,
            ask_high: None,
            ask_low: None,
            ask_close: None,
            volume: Some(5.0),
            complete,
        }
    }

    #[test]
    fn incomplete_candles_are_rejected() {
        assert!(matches!(
            normalize(&raw(false), "XAU_USD", Timeframe::FifteenMin),
            Err(NormalizeError::Incomplete(_))
        ));
    }

    #[test]
    fn normalization_aligns_to_period_start() {
        let c = normalize(&raw(true), "XAU_USD", Timeframe::FifteenMin).unwrap();
        assert_eq!(c.timestamp, 1_704_067_200_000);
        assert_eq!(c.pair, "XAU_USD");
    }

    #[test]
    fn bid_ask_midpoint_used_when_direct_price_absent() {
        let mut r = raw(true);
        r.open = None;
        r.bid_open = Some(9.0);
        r.ask_open = Some(11.0);
        let c = normalize(&r, "XAU_USD", Timeframe::FifteenMin).unwrap();
        assert_eq!(c.open, 10.0);
    }

    #[test]
    fn batch_drops_bad_candles_without_aborting() {
        let good = raw(true);
        let bad = raw(false);
        let (ok, rejected) = normalize_batch(&[good, bad], "XAU_USD", Timeframe::FifteenMin);
        assert_eq!(ok.len(), 1);
        assert_eq!(rejected, 1);
    }
}
