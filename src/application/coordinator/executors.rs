//! Adapts the ingestion/indicator/strategy pipelines to the `JobExecutor` seam the coordinator
//! dispatches through, so each pipeline stays ignorant of queueing, retries, and circuit
//! breaking.

use crate::application::coordinator::job_coordinator::JobExecutor;
use crate::application::indicators::IndicatorEngine;
use crate::application::ingestion::IngestionPipeline;
use crate::application::ledger::LedgerLifecycle;
use crate::application::strategy::StrategyEngine;
use crate::domain::errors::{CoordinatorError, IndicatorError};
use crate::domain::job::JobConfig;
use crate::domain::ports::{CandleStore, StrategyStore};
use crate::domain::strategy::Decision;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::warn;

pub struct BackfillExecutor {
    pub pipeline: Arc<IngestionPipeline>,
}

#[async_trait]
impl JobExecutor for BackfillExecutor {
    async fn execute(&self, config: &JobConfig, _cancel: Arc<AtomicBool>) -> Result<serde_json::Value, CoordinatorError> {
        let from_ms = config.from_ms.unwrap_or(0);
        let to_ms = config.to_ms.unwrap_or(from_ms);
        let report = self
            .pipeline
            .run_backfill(&config.pair, config.timeframe, from_ms, to_ms)
            .await?;
        Ok(json!({
            "fetched": report.fetched,
            "normalized": report.normalized,
            "inserted": report.upsert.inserted,
        }))
    }
}

pub struct IncrementalExecutor {
    pub pipeline: Arc<IngestionPipeline>,
    pub now_ms: Arc<dyn Fn() -> i64 + Send + Sync>,
}

#[async_trait]
impl JobExecutor for IncrementalExecutor {
    async fn execute(&self, config: &JobConfig, _cancel: Arc<AtomicBool>) -> Result<serde_json::Value, CoordinatorError> {
        let now_ms = (self.now_ms)();
        let report = self
            .pipeline
            .run_incremental(&config.pair, config.timeframe, now_ms)
            .await?;
        Ok(json!({
            "fetched": report.fetched,
            "inserted": report.upsert.inserted,
        }))
    }
}

/// Runs one indicator update pass plus a strategy evaluation for every candle newly covered.
/// A Buy/Sell decision is handed straight to the ledger: `open` then `fill` bring a position
/// to `Open` in the same pass that produced the signal.
pub struct StrategyRunExecutor {
    pub candles: Arc<dyn CandleStore>,
    pub indicator_engine: Arc<IndicatorEngine>,
    pub strategy_engine: Arc<StrategyEngine>,
    pub strategy_store: Arc<dyn StrategyStore>,
    pub ledger_lifecycle: Arc<LedgerLifecycle>,
    pub account_id: String,
}

#[async_trait]
impl JobExecutor for StrategyRunExecutor {
    async fn execute(&self, config: &JobConfig, cancel: Arc<AtomicBool>) -> Result<serde_json::Value, CoordinatorError> {
        let after_ms = config.from_ms.unwrap_or(0);
        let updated = match self
            .indicator_engine
            .run_incremental_update(&config.pair, config.timeframe, after_ms)
            .await
        {
            Ok(values) => values,
            Err(IndicatorError::InsufficientHistory { need, have }) => {
                warn!(
                    pair = %config.pair, need, have,
                    "strategy run: insufficient indicator history, completing with a warning"
                );
                return Ok(json!({
                    "indicator_values_written": 0,
                    "decisions_made": 0,
                    "warning": "insufficient_history",
                }));
            }
            Err(e) => return Err(CoordinatorError::Indicator(e)),
        };

        let to_ms = config.to_ms.unwrap_or(after_ms + config.timeframe.to_ms());
        let candles = self
            .candles
            .get_range(&config.pair, config.timeframe, after_ms, to_ms)
            .await
            .map_err(IndicatorError::Store)
            .map_err(CoordinatorError::Indicator)?;

        let mut decisions_made = 0usize;
        for candle in &candles {
            if cancel.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CoordinatorError::Cancelled);
            }
            if self
                .strategy_store
                .decision_exists(&config.pair, config.timeframe, candle.timestamp)
                .await
                .map_err(IndicatorError::Store)
                .map_err(CoordinatorError::Indicator)?
            {
                continue;
            }

            let snapshot = self
                .indicator_engine
                .snapshot_at(&config.pair, config.timeframe, candle.timestamp)
                .await
                .map_err(CoordinatorError::Indicator)?;

            let evaluation = self
                .strategy_engine
                .evaluate(candle, &snapshot)
                .await
                .map_err(IndicatorError::Store)
                .map_err(CoordinatorError::Indicator)?;
            decisions_made += 1;

            if let Some(signal) = evaluation.signal {
                if matches!(evaluation.decision.decision, Decision::Buy | Decision::Sell) {
                    let position = self
                        .ledger_lifecycle
                        .open(
                            signal.direction,
                            signal.entry_price,
                            signal.margin_required,
                            candle.timestamp,
                        )
                        .await
                        .map_err(CoordinatorError::Ledger)?;
                    self.ledger_lifecycle
                        .fill(&self.account_id, position.id, candle.timestamp)
                        .await
                        .map_err(CoordinatorError::Ledger)?;
                }
            }
        }

        Ok(json!({
            "indicator_values_written": updated.len(),
            "decisions_made": decisions_made,
        }))
    }
}
