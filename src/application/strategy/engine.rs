//! Strategy Engine. Runs the seven-stage decision machine over one candle, producing one
//! `AuditRecord` per stage reached and assembling the final `StrategyDecision` plus an optional
//! `TradeSignal`.

use crate::application::session_filter::TradingWindow;
use crate::application::strategy::stages::{self, StrategyParams};
use crate::domain::candle::Candle;
use crate::domain::errors::StoreError;
use crate::domain::indicator::IndicatorSnapshot;
use crate::domain::ports::StrategyStore;
use crate::domain::strategy::{
    AuditRecord, Decision, Regime, Stage, StageStatus, StrategyDecision, TradeSignal,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct StrategyEngine {
    store: Arc<dyn StrategyStore>,
    window: TradingWindow,
    params: StrategyParams,
}

pub struct EvaluationResult {
    pub decision: StrategyDecision,
    pub audit: Vec<AuditRecord>,
    pub signal: Option<TradeSignal>,
}

impl StrategyEngine {
    pub fn new(store: Arc<dyn StrategyStore>, window: TradingWindow, params: StrategyParams) -> Self {
        Self { store, window, params }
    }

    /// Runs the seven stages in fixed order, short-circuiting on the first FAILED stage.
    /// Persists the decision, its audit trail, and any signal before returning.
    pub async fn evaluate(
        &self,
        candle: &Candle,
        snapshot: &IndicatorSnapshot,
    ) -> Result<EvaluationResult, StoreError> {
        let decision_id = Uuid::new_v4();
        let mut audit = Vec::with_capacity(Stage::ORDER.len());

        macro_rules! record {
            ($stage:expr, $status:expr, $details:expr) => {
                audit.push(AuditRecord {
                    decision_id,
                    stage: $stage,
                    status: $status,
                    details: $details,
                });
            };
        }

        macro_rules! no_trade {
            ($regime:expr) => {{
                let decision = StrategyDecision {
                    id: decision_id,
                    candle_timestamp: candle.timestamp,
                    pair: candle.pair.clone(),
                    timeframe: candle.timeframe,
                    decision: Decision::NoTrade,
                    regime: $regime,
                    setup_type: None,
                    confidence_score: 0.0,
                    reason: audit.last().map(|a| a.details.clone()).unwrap_or_default(),
                    trading_window: self.window.is_in_session(candle.timestamp),
                    created_at: candle.timestamp,
                };
                self.store.save_decision(&decision, &audit, None).await?;
                warn!(
                    "strategy: NO_TRADE pair={} ts={} stage={:?}",
                    candle.pair,
                    candle.timestamp,
                    audit.last().map(|a| a.stage)
                );
                return Ok(EvaluationResult { decision, audit, signal: None });
            }};
        }

        // Stage 1: REGIME.
        let regime_outcome = stages::classify_regime(snapshot);
        let regime = match regime_outcome.value {
            Some(r) => {
                record!(Stage::Regime, StageStatus::Passed, regime_outcome.details);
                r
            }
            None => {
                record!(Stage::Regime, StageStatus::Failed, regime_outcome.details);
                no_trade!(Regime::NoTrade);
            }
        };

        // Stage 2: SETUP.
        let setup_outcome = stages::find_setup(candle, snapshot, regime);
        let setup = match setup_outcome.value {
            Some(s) => {
                record!(Stage::Setup, StageStatus::Passed, setup_outcome.details);
                s
            }
            None => {
                record!(Stage::Setup, StageStatus::Failed, setup_outcome.details);
                no_trade!(regime);
            }
        };

        // Stage 3: QUALIFICATION.
        let qualify_outcome = stages::qualify(candle, snapshot, &setup);
        let qualified = match qualify_outcome.value {
            Some(q) => {
                record!(Stage::Qualification, StageStatus::Passed, qualify_outcome.details);
                q
            }
            None => {
                record!(Stage::Qualification, StageStatus::Failed, qualify_outcome.details);
                no_trade!(regime);
            }
        };

        // Stage 4: RISK.
        let size_outcome = stages::size_position(&setup, &qualified, &self.params);
        let sized = match size_outcome.value {
            Some(s) => {
                record!(Stage::Risk, StageStatus::Passed, size_outcome.details);
                s
            }
            None => {
                record!(Stage::Risk, StageStatus::Failed, size_outcome.details);
                no_trade!(regime);
            }
        };

        // Stage 5: RR.
        let rr_outcome = stages::check_rr(&qualified, &sized, &self.params);
        match rr_outcome.value {
            Some(()) => record!(Stage::Rr, StageStatus::Passed, rr_outcome.details),
            None => {
                record!(Stage::Rr, StageStatus::Failed, rr_outcome.details);
                no_trade!(regime);
            }
        }

        // Stage 6: CONFIDENCE.
        let confidence_outcome = stages::score_confidence(
            candle,
            snapshot,
            &setup,
            &qualified,
            &self.window,
            &self.params,
        );
        let confidence = match confidence_outcome.value {
            Some(c) => {
                record!(Stage::Confidence, StageStatus::Passed, confidence_outcome.details);
                c
            }
            None => {
                record!(Stage::Confidence, StageStatus::Failed, confidence_outcome.details);
                no_trade!(regime);
            }
        };

        // Stage 7: TIME.
        let time_outcome = stages::check_time(candle, &self.window);
        match time_outcome.value {
            Some(()) => record!(Stage::Time, StageStatus::Passed, time_outcome.details),
            None => {
                record!(Stage::Time, StageStatus::Failed, time_outcome.details);
                no_trade!(regime);
            }
        }

        let signal = TradeSignal {
            decision_id,
            direction: setup.direction,
            entry_price: setup.entry,
            stop_loss: qualified.stop_loss,
            take_profit: qualified.take_profit,
            rr_ratio: qualified.rr_ratio,
            risk_percent: self.params.risk_percent,
            leverage: self.params.leverage,
            position_size: sized.position_size,
            margin_required: sized.margin_required,
        };

        let decision = StrategyDecision {
            id: decision_id,
            candle_timestamp: candle.timestamp,
            pair: candle.pair.clone(),
            timeframe: candle.timeframe,
            decision: match setup.direction {
                crate::domain::strategy::Direction::Buy => Decision::Buy,
                crate::domain::strategy::Direction::Sell => Decision::Sell,
            },
            regime,
            setup_type: Some(setup.setup_type),
            confidence_score: confidence,
            reason: format!("{:?} setup confirmed, rr={:.2}", setup.setup_type, qualified.rr_ratio),
            trading_window: true,
            created_at: candle.timestamp,
        };

        self.store.save_decision(&decision, &audit, Some(&signal)).await?;
        info!(
            "strategy: decision={:?} pair={} ts={} confidence={:.3}",
            decision.decision, candle.pair, candle.timestamp, confidence
        );

        Ok(EvaluationResult { decision, audit, signal: Some(signal) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Timeframe;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingStore {
        saved: Mutex<Vec<(StrategyDecision, Vec<AuditRecord>, Option<TradeSignal>)>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self { saved: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl StrategyStore for RecordingStore {
        async fn save_decision(
            &self,
            decision: &StrategyDecision,
            audit: &[AuditRecord],
            signal: Option<&TradeSignal>,
        ) -> Result<(), StoreError> {
            self.saved.lock().unwrap().push((
                decision.clone(),
                audit.to_vec(),
                signal.cloned(),
            ));
            Ok(())
        }

        async fn decision_exists(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            _candle_timestamp: i64,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn get_signal(&self, _decision_id: Uuid) -> Result<Option<TradeSignal>, StoreError> {
            Ok(None)
        }
    }

    fn default_params() -> StrategyParams {
        StrategyParams {
            min_rr: 1.5,
            risk_percent: 1.0,
            leverage: 10.0,
            min_confidence: 0.0,
            account_balance: 10_000.0,
            free_margin: 10_000.0,
            weight_ema_alignment: 0.2,
            weight_structure_quality: 0.3,
            weight_atr_context: 0.2,
            weight_time_of_day: 0.1,
            weight_rr_quality: 0.2,
        }
    }

    fn always_open_window() -> TradingWindow {
        TradingWindow { start_hour_utc: 0, end_hour_utc: 0 }
    }

    #[tokio::test]
    async fn missing_indicator_history_short_circuits_at_regime_stage() {
        let store = Arc::new(RecordingStore::new());
        let engine = StrategyEngine::new(store.clone(), always_open_window(), default_params());
        let candle = Candle {
            pair: "XAU_USD".to_string(),
            timeframe: Timeframe::FifteenMin,
            timestamp: 0,
            open: 2000.0,
            high: 2001.0,
            low: 1999.0,
            close: 2000.5,
            volume: 1.0,
        };
        let snapshot = IndicatorSnapshot::default();

        let result = engine.evaluate(&candle, &snapshot).await.unwrap();
        assert_eq!(result.decision.decision, Decision::NoTrade);
        assert_eq!(result.audit.len(), 1);
        assert_eq!(result.audit[0].stage, Stage::Regime);
        assert_eq!(result.audit[0].status, StageStatus::Failed);
        assert!(result.signal.is_none());
    }

    #[tokio::test]
    async fn bullish_pullback_produces_buy_signal_through_all_stages() {
        let store = Arc::new(RecordingStore::new());
        let engine = StrategyEngine::new(store.clone(), always_open_window(), default_params());
        let candle = Candle {
            pair: "XAU_USD".to_string(),
            timeframe: Timeframe::FifteenMin,
            timestamp: 0,
            open: 2010.0,
            high: 2011.0,
            low: 2009.95,
            close: 2011.0,
            volume: 1.0,
        };
        let snapshot = IndicatorSnapshot {
            ema_20: Some(2010.0),
            ema_50: Some(2000.0),
            ema_200: Some(1980.0),
            atr_14: Some(5.0),
            last_swing_high: Some(2020.0),
            last_swing_low: Some(1995.0),
        };

        let result = engine.evaluate(&candle, &snapshot).await.unwrap();
        assert_eq!(result.decision.decision, Decision::Buy);
        assert_eq!(result.audit.len(), 7);
        assert!(result.audit.iter().all(|a| a.status == StageStatus::Passed));
        let signal = result.signal.unwrap();
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.entry_price < signal.take_profit);
        assert!(signal.rr_ratio >= default_params().min_rr);
    }
}
