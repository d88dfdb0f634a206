//! Indicator Engine. Splits warmup from steady-state update: `run_historical_build` recomputes
//! every indicator from the full candle history (used on backfill or rebuild),
//! `run_incremental_update` extends prior state from the last persisted value plus
//! newly-arrived candles.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::errors::IndicatorError;
use crate::domain::indicator::{
    IndicatorSnapshot, IndicatorValue, SwingType, ATR_PERIOD, EMA_PERIODS, SWING_LOOKBACK,
};
use crate::domain::ports::{CandleStore, IndicatorStore};
use std::sync::Arc;

pub struct IndicatorEngine {
    candles: Arc<dyn CandleStore>,
    indicators: Arc<dyn IndicatorStore>,
}

impl IndicatorEngine {
    pub fn new(candles: Arc<dyn CandleStore>, indicators: Arc<dyn IndicatorStore>) -> Self {
        Self { candles, indicators }
    }

    /// Recomputes every indicator series from scratch over `[from_ms, to_ms)`. Deterministic:
    /// running this twice over the same candle range produces byte-identical output.
    pub async fn run_historical_build(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<IndicatorValue>, IndicatorError> {
        let candles = self.candles.get_range(pair, timeframe, from_ms, to_ms).await?;
        if candles.len() < EMA_PERIODS[2] as usize {
            return Err(IndicatorError::InsufficientHistory {
                need: EMA_PERIODS[2] as usize,
                have: candles.len(),
            });
        }

        self.indicators.clear(pair, timeframe).await?;
        let values = compute_all(&candles)?;
        self.indicators.save_batch(&values).await?;
        Ok(values)
    }

    /// Extends existing indicator state with newly-arrived candles after `after_ms`, reading
    /// the last persisted EMA/ATR/swing values as seed state rather than rebuilding history.
    pub async fn run_incremental_update(
        &self,
        pair: &str,
        timeframe: Timeframe,
        after_ms: i64,
    ) -> Result<Vec<IndicatorValue>, IndicatorError> {
        let new_candles = self.candles.get_after(pair, timeframe, after_ms).await?;
        if new_candles.is_empty() {
            return Ok(Vec::new());
        }

        let mut seed_ema = [None; 3];
        for (i, period) in EMA_PERIODS.iter().enumerate() {
            seed_ema[i] = self.indicators.latest_ema(pair, timeframe, *period).await?;
        }
        let seed_atr = self.indicators.latest_atr(pair, timeframe, ATR_PERIOD).await?;

        // Swing detection needs `SWING_LOOKBACK` candles of context on both sides; pull that
        // much history before `after_ms` so boundary swings can still be confirmed.
        let context_span = timeframe.to_ms() * (SWING_LOOKBACK as i64) * 2;
        let context = self
            .candles
            .get_range(pair, timeframe, after_ms - context_span, after_ms)
            .await?;

        let mut all_candles = context;
        all_candles.extend(new_candles.iter().cloned());
        all_candles.sort_by_key(|c| c.timestamp);
        all_candles.dedup_by_key(|c| c.timestamp);

        let values = compute_incremental(&all_candles, after_ms, seed_ema, seed_atr)?;
        self.indicators.save_batch(&values).await?;
        Ok(values)
    }

    /// Builds the point-in-time snapshot the Strategy Engine evaluates against.
    pub async fn snapshot_at(
        &self,
        pair: &str,
        timeframe: Timeframe,
        timestamp_ms: i64,
    ) -> Result<IndicatorSnapshot, IndicatorError> {
        let mut snapshot = IndicatorSnapshot::default();

        for period in EMA_PERIODS {
            if let Some((ts, value)) = self.indicators.latest_ema(pair, timeframe, period).await? {
                if ts <= timestamp_ms {
                    match period {
                        20 => snapshot.ema_20 = Some(value),
                        50 => snapshot.ema_50 = Some(value),
                        200 => snapshot.ema_200 = Some(value),
                        _ => {}
                    }
                }
            }
        }

        if let Some((ts, value)) = self.indicators.latest_atr(pair, timeframe, ATR_PERIOD).await? {
            if ts <= timestamp_ms {
                snapshot.atr_14 = Some(value);
            }
        }

        if let Some((ts, price)) = self
            .indicators
            .latest_swing(pair, timeframe, SwingType::High)
            .await?
        {
            if ts <= timestamp_ms {
                snapshot.last_swing_high = Some(price);
            }
        }
        if let Some((ts, price)) = self
            .indicators
            .latest_swing(pair, timeframe, SwingType::Low)
            .await?
        {
            if ts <= timestamp_ms {
                snapshot.last_swing_low = Some(price);
            }
        }

        Ok(snapshot)
    }
}

fn ema_alpha(period: u32) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// Full-history EMA/ATR/swing computation. Seeds each EMA with a simple moving average over
/// its first `period` candles, matching the conventional warm-up used by most charting
/// platforms, then applies the standard recursive EMA/Wilder-ATR formulas candle by candle.
fn compute_all(candles: &[Candle]) -> Result<Vec<IndicatorValue>, IndicatorError> {
    let mut out = Vec::new();
    let pair = candles[0].pair.clone();
    let timeframe = candles[0].timeframe;

    for period in EMA_PERIODS {
        out.extend(compute_ema_series(candles, period, &pair, timeframe)?);
    }
    out.extend(compute_atr_series(candles, ATR_PERIOD, &pair, timeframe)?);
    out.extend(compute_swings(candles, &pair, timeframe));

    Ok(out)
}

fn compute_ema_series(
    candles: &[Candle],
    period: u32,
    pair: &str,
    timeframe: Timeframe,
) -> Result<Vec<IndicatorValue>, IndicatorError> {
    let p = period as usize;
    if candles.len() < p {
        return Ok(Vec::new());
    }

    let seed: f64 = candles[0..p].iter().map(|c| c.close).sum::<f64>() / p as f64;
    if !seed.is_finite() {
        return Err(IndicatorError::NonFinite {
            kind: "ema_seed",
            timestamp: candles[p - 1].timestamp,
        });
    }

    let alpha = ema_alpha(period);
    let mut ema = seed;
    let mut out = vec![IndicatorValue::Ema {
        pair: pair.to_string(),
        timeframe,
        period,
        timestamp: candles[p - 1].timestamp,
        value: ema,
    }];

    for c in &candles[p..] {
        ema = alpha * c.close + (1.0 - alpha) * ema;
        if !ema.is_finite() {
            return Err(IndicatorError::NonFinite {
                kind: "ema",
                timestamp: c.timestamp,
            });
        }
        out.push(IndicatorValue::Ema {
            pair: pair.to_string(),
            timeframe,
            period,
            timestamp: c.timestamp,
            value: ema,
        });
    }

    Ok(out)
}

fn true_range(prev_close: f64, high: f64, low: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

fn compute_atr_series(
    candles: &[Candle],
    period: u32,
    pair: &str,
    timeframe: Timeframe,
) -> Result<Vec<IndicatorValue>, IndicatorError> {
    let p = period as usize;
    if candles.len() <= p {
        return Ok(Vec::new());
    }

    let trs: Vec<f64> = (1..candles.len())
        .map(|i| true_range(candles[i - 1].close, candles[i].high, candles[i].low))
        .collect();

    let seed: f64 = trs[0..p].iter().sum::<f64>() / p as f64;
    let mut atr = seed;
    let mut out = vec![IndicatorValue::Atr {
        pair: pair.to_string(),
        timeframe,
        period,
        timestamp: candles[p].timestamp,
        value: atr,
    }];

    for (i, tr) in trs[p..].iter().enumerate() {
        atr = (atr * (p as f64 - 1.0) + tr) / p as f64;
        if !atr.is_finite() {
            return Err(IndicatorError::NonFinite {
                kind: "atr",
                timestamp: candles[p + 1 + i].timestamp,
            });
        }
        out.push(IndicatorValue::Atr {
            pair: pair.to_string(),
            timeframe,
            period,
            timestamp: candles[p + 1 + i].timestamp,
            value: atr,
        });
    }

    Ok(out)
}

/// Fractal swing detection: a candle is a swing high/low if its high/low is the extreme over
/// `SWING_LOOKBACK` candles on both sides.
fn compute_swings(candles: &[Candle], pair: &str, timeframe: Timeframe) -> Vec<IndicatorValue> {
    let n = SWING_LOOKBACK;
    let mut out = Vec::new();
    if candles.len() < 2 * n + 1 {
        return out;
    }

    for i in n..candles.len() - n {
        let left = &candles[i - n..i];
        let right = &candles[i + 1..=i + n];
        let candle = &candles[i];

        if left.iter().all(|c| c.high < candle.high) && right.iter().all(|c| c.high <= candle.high)
        {
            out.push(IndicatorValue::Swing {
                pair: pair.to_string(),
                timeframe,
                timestamp: candle.timestamp,
                swing_type: SwingType::High,
                price: candle.high,
                left_lookback: n as u32,
                right_lookback: n as u32,
            });
        }
        if left.iter().all(|c| c.low > candle.low) && right.iter().all(|c| c.low >= candle.low) {
            out.push(IndicatorValue::Swing {
                pair: pair.to_string(),
                timeframe,
                timestamp: candle.timestamp,
                swing_type: SwingType::Low,
                price: candle.low,
                left_lookback: n as u32,
                right_lookback: n as u32,
            });
        }
    }

    out
}

fn compute_incremental(
    candles: &[Candle],
    after_ms: i64,
    seed_ema: [Option<(i64, f64)>; 3],
    seed_atr: Option<(i64, f64)>,
) -> Result<Vec<IndicatorValue>, IndicatorError> {
    if candles.is_empty() {
        return Ok(Vec::new());
    }
    let pair = candles[0].pair.clone();
    let timeframe = candles[0].timeframe;
    let mut out = Vec::new();

    for (i, period) in EMA_PERIODS.iter().enumerate() {
        let alpha = ema_alpha(*period);
        if let Some((_, mut ema)) = seed_ema[i] {
            for c in candles.iter().filter(|c| c.timestamp > after_ms) {
                ema = alpha * c.close + (1.0 - alpha) * ema;
                if !ema.is_finite() {
                    return Err(IndicatorError::NonFinite {
                        kind: "ema",
                        timestamp: c.timestamp,
                    });
                }
                out.push(IndicatorValue::Ema {
                    pair: pair.clone(),
                    timeframe,
                    period: *period,
                    timestamp: c.timestamp,
                    value: ema,
                });
            }
        }
    }

    if let Some((_, mut atr)) = seed_atr {
        let p = ATR_PERIOD as f64;
        for i in 1..candles.len() {
            if candles[i].timestamp <= after_ms {
                continue;
            }
            let tr = true_range(candles[i - 1].close, candles[i].high, candles[i].low);
            atr = (atr * (p - 1.0) + tr) / p;
            if !atr.is_finite() {
                return Err(IndicatorError::NonFinite {
                    kind: "atr",
                    timestamp: candles[i].timestamp,
                });
            }
            out.push(IndicatorValue::Atr {
                pair: pair.clone(),
                timeframe,
                period: ATR_PERIOD,
                timestamp: candles[i].timestamp,
                value: atr,
            });
        }
    }

    out.extend(
        compute_swings(candles, &pair, timeframe)
            .into_iter()
            .filter(|v| v.timestamp() > after_ms),
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::GapInterval;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeCandleStore {
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl CandleStore for FakeCandleStore {
        async fn upsert_batch(
            &self,
            _candles: &[Candle],
        ) -> Result<crate::domain::ports::UpsertOutcome, crate::domain::errors::StoreError> {
            unimplemented!()
        }

        async fn get_range(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            from_ms: i64,
            to_ms: i64,
        ) -> Result<Vec<Candle>, crate::domain::errors::StoreError> {
            Ok(self
                .candles
                .iter()
                .filter(|c| c.timestamp >= from_ms && c.timestamp < to_ms)
                .cloned()
                .collect())
        }

        async fn get_after(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            after_ms: i64,
        ) -> Result<Vec<Candle>, crate::domain::errors::StoreError> {
            Ok(self
                .candles
                .iter()
                .filter(|c| c.timestamp > after_ms)
                .cloned()
                .collect())
        }

        async fn get_latest_timestamp(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
        ) -> Result<Option<i64>, crate::domain::errors::StoreError> {
            Ok(self.candles.last().map(|c| c.timestamp))
        }

        async fn detect_gaps(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            _from_ms: i64,
            _to_ms: i64,
            _expected_step_ms: i64,
        ) -> Result<Vec<GapInterval>, crate::domain::errors::StoreError> {
            Ok(vec![])
        }
    }

    struct FakeIndicatorStore {
        saved: Mutex<Vec<IndicatorValue>>,
    }

    impl FakeIndicatorStore {
        fn new() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IndicatorStore for FakeIndicatorStore {
        async fn save_batch(
            &self,
            values: &[IndicatorValue],
        ) -> Result<(), crate::domain::errors::StoreError> {
            self.saved.lock().unwrap().extend(values.iter().cloned());
            Ok(())
        }

        async fn clear(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
        ) -> Result<(), crate::domain::errors::StoreError> {
            self.saved.lock().unwrap().clear();
            Ok(())
        }

        async fn latest_ema(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            period: u32,
        ) -> Result<Option<(i64, f64)>, crate::domain::errors::StoreError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter_map(|v| match v {
                    IndicatorValue::Ema { period: p, timestamp, value, .. } if *p == period => {
                        Some((*timestamp, *value))
                    }
                    _ => None,
                })
                .max_by_key(|(ts, _)| *ts))
        }

        async fn latest_atr(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            period: u32,
        ) -> Result<Option<(i64, f64)>, crate::domain::errors::StoreError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter_map(|v| match v {
                    IndicatorValue::Atr { period: p, timestamp, value, .. } if *p == period => {
                        Some((*timestamp, *value))
                    }
                    _ => None,
                })
                .max_by_key(|(ts, _)| *ts))
        }

        async fn latest_swing(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            swing_type: SwingType,
        ) -> Result<Option<(i64, f64)>, crate::domain::errors::StoreError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter_map(|v| match v {
                    IndicatorValue::Swing { swing_type: st, timestamp, price, .. }
                        if *st == swing_type =>
                    {
                        Some((*timestamp, *price))
                    }
                    _ => None,
                })
                .max_by_key(|(ts, _)| *ts))
        }

        async fn all_for_range(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            from_ms: i64,
            to_ms: i64,
        ) -> Result<Vec<IndicatorValue>, crate::domain::errors::StoreError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v.timestamp() >= from_ms && v.timestamp() < to_ms)
                .cloned()
                .collect())
        }
    }

    fn make_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 2000.0 + (i as f64 * 0.1).sin() * 5.0;
                Candle {
                    pair: "XAU_USD".to_string(),
                    timeframe: Timeframe::FifteenMin,
                    timestamp: i as i64 * Timeframe::FifteenMin.to_ms(),
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + 0.2,
                    volume: 10.0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn historical_build_requires_minimum_history() {
        let candles = Arc::new(FakeCandleStore { candles: make_candles(50) });
        let indicators = Arc::new(FakeIndicatorStore::new());
        let engine = IndicatorEngine::new(candles, indicators);

        let result = engine
            .run_historical_build("XAU_USD", Timeframe::FifteenMin, 0, 50 * Timeframe::FifteenMin.to_ms())
            .await;
        assert!(matches!(result, Err(IndicatorError::InsufficientHistory { .. })));
    }

    #[tokio::test]
    async fn historical_build_is_deterministic() {
        let candle_data = make_candles(250);
        let to_ms = candle_data.last().unwrap().timestamp + 1;
        let candles = Arc::new(FakeCandleStore { candles: candle_data });
        let indicators1 = Arc::new(FakeIndicatorStore::new());
        let engine1 = IndicatorEngine::new(candles.clone(), indicators1);

        let values1 = engine1
            .run_historical_build("XAU_USD", Timeframe::FifteenMin, 0, to_ms)
            .await
            .unwrap();

        let indicators2 = Arc::new(FakeIndicatorStore::new());
        let engine2 = IndicatorEngine::new(candles, indicators2);
        let values2 = engine2
            .run_historical_build("XAU_USD", Timeframe::FifteenMin, 0, to_ms)
            .await
            .unwrap();

        assert_eq!(values1.len(), values2.len());
        for (a, b) in values1.iter().zip(values2.iter()) {
            assert_eq!(format!("{:?}", a), format!("{:?}", b));
        }
    }
}
