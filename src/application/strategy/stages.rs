//! The seven decision stages, each a pure function over a candle, its indicator snapshot, and
//! the running strategy context. Kept separate from `engine.rs` so each stage is independently
//! testable.

use crate::application::session_filter::TradingWindow;
use crate::domain::candle::Candle;
use crate::domain::indicator::IndicatorSnapshot;
use crate::domain::strategy::{Direction, Regime, SetupType};

#[derive(Debug, Clone, Copy)]
pub struct StrategyParams {
    pub min_rr: f64,
    pub risk_percent: f64,
    pub leverage: f64,
    pub min_confidence: f64,
    pub account_balance: f64,
    pub free_margin: f64,
    pub weight_ema_alignment: f64,
    pub weight_structure_quality: f64,
    pub weight_atr_context: f64,
    pub weight_time_of_day: f64,
    pub weight_rr_quality: f64,
}

pub struct StageOutcome<T> {
    pub value: Option<T>,
    pub details: String,
}

fn ok<T>(value: T, details: impl Into<String>) -> StageOutcome<T> {
    StageOutcome {
        value: Some(value),
        details: details.into(),
    }
}

fn fail<T>(details: impl Into<String>) -> StageOutcome<T> {
    StageOutcome {
        value: None,
        details: details.into(),
    }
}

/// Stage 1: REGIME. Bullish iff EMA20 > EMA50 > EMA200; bearish is the mirror; ranging when
/// the EMAs are interleaved but ATR stays within a normal multiple of itself (a degenerate but
/// deterministic "normal bounds" check absent a longer ATR history to compare against).
pub fn classify_regime(snapshot: &IndicatorSnapshot) -> StageOutcome<Regime> {
    let (e20, e50, e200, atr) = match (
        snapshot.ema_20,
        snapshot.ema_50,
        snapshot.ema_200,
        snapshot.atr_14,
    ) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => return fail("insufficient indicator history for regime classification"),
    };

    if !atr.is_finite() || atr < 0.0 {
        return fail("non-finite or negative ATR");
    }

    if e20 > e50 && e50 > e200 {
        ok(Regime::BullishTrend, format!("ema20={e20} > ema50={e50} > ema200={e200}"))
    } else if e20 < e50 && e50 < e200 {
        ok(Regime::BearishTrend, format!("ema20={e20} < ema50={e50} < ema200={e200}"))
    } else if atr > 0.0 {
        ok(Regime::Ranging, "EMAs interleaved, ATR within normal bounds".to_string())
    } else {
        fail("EMAs interleaved and ATR degenerate")
    }
}

pub struct SetupCandidate {
    pub setup_type: SetupType,
    pub direction: Direction,
    pub entry: f64,
    pub confidence: f64,
}

/// Stage 2: SETUP. Scans the four setup types in priority order and returns the first
/// candidate whose preconditions hold for the classified regime.
pub fn find_setup(
    candle: &Candle,
    snapshot: &IndicatorSnapshot,
    regime: Regime,
) -> StageOutcome<SetupCandidate> {
    let (e20, e50) = match (snapshot.ema_20, snapshot.ema_50) {
        (Some(a), Some(b)) => (a, b),
        _ => return fail("missing EMA20/EMA50 for setup scan"),
    };

    match regime {
        Regime::BullishTrend => {
            if (candle.low - e20).abs() / e20 < 0.003 && candle.close > e20 {
                return ok(
                    SetupCandidate {
                        setup_type: SetupType::PullbackToEma20,
                        direction: Direction::Buy,
                        entry: candle.close,
                        confidence: 0.8,
                    },
                    "pullback to EMA20 in bullish trend".to_string(),
                );
            }
            if (candle.low - e50).abs() / e50 < 0.005 && candle.close > e50 {
                return ok(
                    SetupCandidate {
                        setup_type: SetupType::PullbackToEma50,
                        direction: Direction::Buy,
                        entry: candle.close,
                        confidence: 0.65,
                    },
                    "pullback to EMA50 in bullish trend".to_string(),
                );
            }
            if let Some(swing_high) = snapshot.last_swing_high {
                if candle.close > swing_high {
                    return ok(
                        SetupCandidate {
                            setup_type: SetupType::StructureBreakout,
                            direction: Direction::Buy,
                            entry: candle.close,
                            confidence: 0.7,
                        },
                        format!("close {} breaks swing high {}", candle.close, swing_high),
                    );
                }
            }
        }
        Regime::BearishTrend => {
            if (candle.high - e20).abs() / e20 < 0.003 && candle.close < e20 {
                return ok(
                    SetupCandidate {
                        setup_type: SetupType::PullbackToEma20,
                        direction: Direction::Sell,
                        entry: candle.close,
                        confidence: 0.8,
                    },
                    "pullback to EMA20 in bearish trend".to_string(),
                );
            }
            if (candle.high - e50).abs() / e50 < 0.005 && candle.close < e50 {
                return ok(
                    SetupCandidate {
                        setup_type: SetupType::PullbackToEma50,
                        direction: Direction::Sell,
                        entry: candle.close,
                        confidence: 0.65,
                    },
                    "pullback to EMA50 in bearish trend".to_string(),
                );
            }
            if let Some(swing_low) = snapshot.last_swing_low {
                if candle.close < swing_low {
                    return ok(
                        SetupCandidate {
                            setup_type: SetupType::StructureBreakout,
                            direction: Direction::Sell,
                            entry: candle.close,
                            confidence: 0.7,
                        },
                        format!("close {} breaks swing low {}", candle.close, swing_low),
                    );
                }
            }
        }
        Regime::Ranging => {
            if let (Some(sh), Some(sl)) = (snapshot.last_swing_high, snapshot.last_swing_low) {
                if candle.low < sl && candle.close > sl {
                    return ok(
                        SetupCandidate {
                            setup_type: SetupType::ContinuationAfterSweep,
                            direction: Direction::Buy,
                            entry: candle.close,
                            confidence: 0.55,
                        },
                        "liquidity sweep below range low, reclaim".to_string(),
                    );
                }
                if candle.high > sh && candle.close < sh {
                    return ok(
                        SetupCandidate {
                            setup_type: SetupType::ContinuationAfterSweep,
                            direction: Direction::Sell,
                            entry: candle.close,
                            confidence: 0.55,
                        },
                        "liquidity sweep above range high, reclaim".to_string(),
                    );
                }
            }
        }
        Regime::NoTrade => {}
    }

    fail("no qualifying setup for current regime")
}

pub struct Qualified {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub rr_ratio: f64,
}

/// Stage 3: QUALIFICATION. Stop-loss at the relevant swing level with an ATR buffer;
/// take-profit at `2x` the stop distance as a structural default, adjusted by ATR.
pub fn qualify(
    candle: &Candle,
    snapshot: &IndicatorSnapshot,
    setup: &SetupCandidate,
) -> StageOutcome<Qualified> {
    let atr = match snapshot.atr_14 {
        Some(a) if a.is_finite() && a > 0.0 => a,
        _ => return fail("missing or non-finite ATR for qualification"),
    };

    let (stop_loss, take_profit) = match setup.direction {
        Direction::Buy => {
            let structural_sl = snapshot.last_swing_low.unwrap_or(candle.low - atr);
            let sl = (structural_sl - atr * 0.25).min(setup.entry - atr * 0.1);
            let tp = setup.entry + (setup.entry - sl) * 2.0;
            (sl, tp)
        }
        Direction::Sell => {
            let structural_sh = snapshot.last_swing_high.unwrap_or(candle.high + atr);
            let sl = (structural_sh + atr * 0.25).max(setup.entry + atr * 0.1);
            let tp = setup.entry - (sl - setup.entry) * 2.0;
            (sl, tp)
        }
    };

    let ordering_ok = match setup.direction {
        Direction::Buy => stop_loss < setup.entry && setup.entry < take_profit,
        Direction::Sell => take_profit < setup.entry && setup.entry < stop_loss,
    };
    if !ordering_ok {
        return fail("stop-loss/take-profit ordering inconsistent with direction");
    }

    let risk = (setup.entry - stop_loss).abs();
    if risk <= 0.0 || !risk.is_finite() {
        return fail("degenerate risk distance (entry == stop_loss)");
    }
    let rr_ratio = (take_profit - setup.entry).abs() / risk;
    if !rr_ratio.is_finite() {
        return fail("non-finite rr_ratio");
    }

    ok(
        Qualified { stop_loss, take_profit, rr_ratio },
        format!("sl={stop_loss} tp={take_profit} rr={rr_ratio}"),
    )
}

pub struct Sized {
    pub position_size: f64,
    pub margin_required: f64,
}

/// Stage 4: RISK.
pub fn size_position(
    setup: &SetupCandidate,
    qualified: &Qualified,
    params: &StrategyParams,
) -> StageOutcome<Sized> {
    let risk = (setup.entry - qualified.stop_loss).abs();
    if risk <= 0.0 {
        return fail("degenerate risk distance");
    }
    let position_size = (params.account_balance * params.risk_percent / 100.0) / risk;
    if !position_size.is_finite() || position_size <= 0.0 {
        return fail("non-finite or non-positive position size");
    }
    let margin_required = position_size * setup.entry / params.leverage;

    ok(
        Sized { position_size, margin_required },
        format!("position_size={position_size} margin_required={margin_required}"),
    )
}

/// Stage 5: RR. Enforces `rr_ratio >= min_rr` and the free-margin ceiling.
pub fn check_rr(qualified: &Qualified, sized: &Sized, params: &StrategyParams) -> StageOutcome<()> {
    if qualified.rr_ratio < params.min_rr {
        return fail(format!(
            "rr_ratio {} below minimum {}",
            qualified.rr_ratio, params.min_rr
        ));
    }
    if sized.margin_required > params.free_margin {
        return fail(format!(
            "margin_required {} exceeds free_margin {}",
            sized.margin_required, params.free_margin
        ));
    }
    ok((), "rr and margin checks passed".to_string())
}

/// Stage 6: CONFIDENCE. Weighted sum of five `[0,1]` components.
pub fn score_confidence(
    candle: &Candle,
    snapshot: &IndicatorSnapshot,
    setup: &SetupCandidate,
    qualified: &Qualified,
    window: &TradingWindow,
    params: &StrategyParams,
) -> StageOutcome<f64> {
    let ema_alignment = match (snapshot.ema_20, snapshot.ema_50, snapshot.ema_200) {
        (Some(e20), Some(e50), Some(e200)) => {
            let spread_20_50 = (e20 - e50).abs() / e50;
            let spread_50_200 = (e50 - e200).abs() / e200;
            (spread_20_50 + spread_50_200).min(1.0)
        }
        _ => 0.0,
    };

    let structure_quality = setup.confidence.clamp(0.0, 1.0);

    let atr_context = match snapshot.atr_14 {
        Some(atr) if atr > 0.0 => {
            let relative_stop = (setup.entry - qualified.stop_loss).abs() / atr;
            (1.0 - (relative_stop - 1.0).abs() / 3.0).clamp(0.0, 1.0)
        }
        _ => 0.0,
    };

    let time_of_day = if window.is_in_session(candle.timestamp) { 1.0 } else { 0.0 };

    let rr_quality = (qualified.rr_ratio / (params.min_rr * 2.0)).clamp(0.0, 1.0);

    let score = params.weight_ema_alignment * ema_alignment
        + params.weight_structure_quality * structure_quality
        + params.weight_atr_context * atr_context
        + params.weight_time_of_day * time_of_day
        + params.weight_rr_quality * rr_quality;

    if !score.is_finite() {
        return fail("non-finite confidence score");
    }

    if score >= params.min_confidence {
        ok(score, format!("confidence score {score} >= threshold {}", params.min_confidence))
    } else {
        StageOutcome {
            value: None,
            details: format!("confidence score {score} below threshold {}", params.min_confidence),
        }
    }
}

/// Stage 7: TIME. Approved iff the candle falls inside the configured trading window.
pub fn check_time(candle: &Candle, window: &TradingWindow) -> StageOutcome<()> {
    if window.is_in_session(candle.timestamp) {
        ok((), "within trading window".to_string())
    } else {
        fail("candle timestamp outside configured trading window")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_bullish() -> IndicatorSnapshot {
        IndicatorSnapshot {
            ema_20: Some(2010.0),
            ema_50: Some(2000.0),
            ema_200: Some(1980.0),
            atr_14: Some(5.0),
            last_swing_high: Some(2020.0),
            last_swing_low: Some(1990.0),
        }
    }

    #[test]
    fn regime_classifies_bullish_trend() {
        let outcome = classify_regime(&snapshot_bullish());
        assert!(matches!(outcome.value, Some(Regime::BullishTrend)));
    }

    #[test]
    fn regime_fails_without_full_ema_history() {
        let mut snap = snapshot_bullish();
        snap.ema_200 = None;
        let outcome = classify_regime(&snap);
        assert!(outcome.value.is_none());
    }

    #[test]
    fn qualification_rejects_inverted_buy_ordering() {
        let candle = Candle {
            pair: "XAU_USD".to_string(),
            timeframe: crate::domain::candle::Timeframe::FifteenMin,
            timestamp: 0,
            open: 2010.0,
            high: 2012.0,
            low: 2008.0,
            close: 2011.0,
            volume: 10.0,
        };
        let setup = SetupCandidate {
            setup_type: SetupType::PullbackToEma20,
            direction: Direction::Buy,
            entry: 2011.0,
            confidence: 0.8,
        };
        let snapshot = snapshot_bullish();
        let outcome = qualify(&candle, &snapshot, &setup);
        assert!(outcome.value.is_some());
        let q = outcome.value.unwrap();
        assert!(q.stop_loss < setup.entry);
        assert!(setup.entry < q.take_profit);
    }
}
