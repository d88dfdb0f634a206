//! End-to-end coverage over real SQLite-backed stores: the scenarios that exercise more than
//! one component wired together, as opposed to the unit tests colocated with each component.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aurumflow::application::coordinator::{CoordinatorConfig, JobCoordinator, JobExecutor};
use aurumflow::application::ingestion::IngestionPipeline;
use aurumflow::application::rate_limiter::{RateLimitConfig, RateLimitManager};
use aurumflow::application::session_filter::TradingWindow;
use aurumflow::application::strategy::{StrategyEngine, StrategyParams};
use aurumflow::domain::candle::{RawCandle, Timeframe};
use aurumflow::domain::errors::{CoordinatorError, LedgerError};
use aurumflow::domain::indicator::IndicatorSnapshot;
use aurumflow::domain::job::{JobConfig, JobKey, JobType};
use aurumflow::domain::ledger::{BalanceEvent, BalanceEventType, Position, PositionStatus};
use aurumflow::domain::ports::{CandleStore, JobStore, LedgerStore, StrategyStore};
use aurumflow::domain::strategy::{Decision, Direction, Stage, StageStatus};
use aurumflow::infrastructure::broker::MockBroker;
use aurumflow::infrastructure::persistence::{
    Database, SqliteCandleStore, SqliteJobStore, SqliteLedgerStore, SqliteStrategyStore,
};
use async_trait::async_trait;

async fn temp_db() -> Database {
    let path = std::env::temp_dir().join(format!("aurumflow-test-{}.db", uuid::Uuid::new_v4()));
    Database::new(&format!("sqlite://{}", path.display())).await.unwrap()
}

fn window() -> TradingWindow {
    TradingWindow { start_hour_utc: 0, end_hour_utc: 0 }
}

fn raw_candle(ts_ms: i64, open: f64, high: f64, low: f64, close: f64) -> RawCandle {
    RawCandle {
        timestamp: ts_ms.to_string(),
        open: Some(open),
        high: Some(high),
        low: Some(low),
        close: Some(close),
        bid_open: None,
        bid_high: None,
        bid_low: None,
        bid_close: None,
        ask_open: None,
        ask_high: None,
        ask_low: None,
        ask_close: None,
        volume: Some(1.0),
        complete: true,
    }
}

fn make_pipeline(raw: Vec<RawCandle>, candles: Arc<dyn CandleStore>) -> IngestionPipeline {
    let broker = Arc::new(MockBroker::new(raw));
    let rate_limiter = Arc::new(RateLimitManager::new(RateLimitConfig::default()));
    IngestionPipeline::new(broker, rate_limiter, window(), candles)
}

// Scenario 1: backfilling a range and then polling incrementally never re-fetches or
// duplicates candles already stored.
#[tokio::test]
async fn backfill_then_incremental_is_idempotent() {
    let db = temp_db().await;
    let candles: Arc<dyn CandleStore> = Arc::new(SqliteCandleStore::new(db));

    let step = Timeframe::FifteenMin.to_ms();
    let raw: Vec<RawCandle> = (0..40)
        .map(|i| raw_candle(i * step, 2000.0, 2001.0, 1999.0, 2000.5))
        .collect();
    let pipeline = make_pipeline(raw, candles.clone());

    let backfill_report = pipeline.run_backfill("XAU_USD", Timeframe::FifteenMin, 0, 40 * step).await.unwrap();
    assert_eq!(backfill_report.upsert.inserted, 40);

    let stored = candles.get_range("XAU_USD", Timeframe::FifteenMin, 0, 40 * step).await.unwrap();
    assert_eq!(stored.len(), 40);

    let incremental_report = pipeline
        .run_incremental("XAU_USD", Timeframe::FifteenMin, 40 * step)
        .await
        .unwrap();
    assert_eq!(incremental_report.upsert.inserted, 0);
    assert_eq!(incremental_report.fetched, 0);

    let stored_after = candles.get_range("XAU_USD", Timeframe::FifteenMin, 0, 40 * step).await.unwrap();
    assert_eq!(stored_after.len(), 40, "incremental run must not duplicate rows");
}

// Scenario 2: re-ingesting the exact same window twice upserts rather than duplicating.
#[tokio::test]
async fn duplicate_ingestion_of_same_window_is_idempotent() {
    let db = temp_db().await;
    let candles: Arc<dyn CandleStore> = Arc::new(SqliteCandleStore::new(db));

    let step = Timeframe::FifteenMin.to_ms();
    let raw: Vec<RawCandle> = (0..10).map(|i| raw_candle(i * step, 10.0, 11.0, 9.0, 10.5)).collect();
    let pipeline = make_pipeline(raw, candles.clone());

    pipeline.run_backfill("XAU_USD", Timeframe::FifteenMin, 0, 10 * step).await.unwrap();
    let second = pipeline.run_backfill("XAU_USD", Timeframe::FifteenMin, 0, 10 * step).await.unwrap();

    assert_eq!(second.upsert.inserted, 0);
    assert_eq!(second.upsert.skipped, 10);

    let stored = candles.get_range("XAU_USD", Timeframe::FifteenMin, 0, 10 * step).await.unwrap();
    assert_eq!(stored.len(), 10);
}

// Scenario 3: the strategy engine short-circuits at the first failing stage and persists
// exactly the audit records reached, with no trade signal, against a real store.
#[tokio::test]
async fn strategy_short_circuit_persists_partial_audit_trail() {
    let db = temp_db().await;
    let store: Arc<dyn StrategyStore> = Arc::new(SqliteStrategyStore::new(db));
    let engine = StrategyEngine::new(
        store.clone(),
        window(),
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
        },
    );

    let candle = aurumflow::domain::candle::Candle {
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

    assert!(store
        .decision_exists("XAU_USD", Timeframe::FifteenMin, 0)
        .await
        .unwrap());
    assert!(store.get_signal(result.decision.id).await.unwrap().is_none());
}

// Scenario 4: the ledger enforces both the balance equation and chain continuity between
// successive events for the same account.
#[tokio::test]
async fn ledger_rejects_broken_balance_chain() {
    let db = temp_db().await;
    let store = SqliteLedgerStore::new(db);

    let position = Position {
        id: uuid::Uuid::new_v4(),
        status: PositionStatus::Open,
        direction: Direction::Buy,
        entry_price: 2000.0,
        exit_price: None,
        margin_required: 100.0,
        realized_pnl: None,
        opened_at: 0,
        closed_at: None,
    };

    let first = BalanceEvent {
        id: uuid::Uuid::new_v4(),
        account_id: "acct1".to_string(),
        event_type: BalanceEventType::MarginReserved,
        position_id: Some(position.id),
        amount: -100.0,
        balance_before: 0.0,
        balance_after: -100.0,
        timestamp: 0,
    };
    store.apply_position_write(&position, &[], &[first]).await.unwrap();

    // Correct arithmetic (before + amount == after) but doesn't continue from the previous
    // event's balance_after, so this must be rejected as a broken chain rather than silently
    // accepted.
    let disconnected = BalanceEvent {
        id: uuid::Uuid::new_v4(),
        account_id: "acct1".to_string(),
        event_type: BalanceEventType::MarginReleased,
        position_id: Some(position.id),
        amount: 50.0,
        balance_before: 500.0,
        balance_after: 550.0,
        timestamp: 1,
    };
    let result = store.apply_position_write(&position, &[], &[disconnected]).await;
    assert!(matches!(result, Err(LedgerError::ChainBroken { .. })));

    // The correctly-chained follow-up succeeds.
    let continued = BalanceEvent {
        id: uuid::Uuid::new_v4(),
        account_id: "acct1".to_string(),
        event_type: BalanceEventType::MarginReleased,
        position_id: Some(position.id),
        amount: 100.0,
        balance_before: -100.0,
        balance_after: 0.0,
        timestamp: 2,
    };
    store.apply_position_write(&position, &[], &[continued]).await.unwrap();
    assert_eq!(store.latest_balance("acct1").await.unwrap(), 0.0);
}

// An executor that blocks until cancelled or released, so the coordinator's cancellation path
// can be exercised deterministically rather than racing a sleep.
struct BlockingExecutor {
    release: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl JobExecutor for BlockingExecutor {
    async fn execute(
        &self,
        _config: &JobConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<serde_json::Value, CoordinatorError> {
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(CoordinatorError::Cancelled);
            }
            tokio::select! {
                _ = self.release.notified() => return Ok(serde_json::json!({"released": true})),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    }
}

// Scenario 5: submitting the same (type, pair, timeframe) key twice while the first is still
// active returns the existing job instead of queueing a second one.
#[tokio::test]
async fn coordinator_dedups_active_jobs_by_key() {
    let db = temp_db().await;
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db));

    let mut executors: std::collections::HashMap<JobType, Arc<dyn JobExecutor>> = std::collections::HashMap::new();
    let release = Arc::new(tokio::sync::Notify::new());
    executors.insert(JobType::StrategyRun, Arc::new(BlockingExecutor { release: release.clone() }));

    let coordinator = Arc::new(JobCoordinator::new(
        CoordinatorConfig::default(),
        job_store.clone(),
        executors,
        Arc::new(aurumflow::infrastructure::observability::Metrics::new().unwrap()),
    ));

    let config = JobConfig {
        pair: "XAU_USD".to_string(),
        timeframe: Timeframe::FifteenMin,
        from_ms: None,
        to_ms: None,
        days_per_batch: None,
        lookback_hours: None,
    };

    let first_id = coordinator.submit(JobType::StrategyRun, 5, config.clone()).await.unwrap();
    let second_id = coordinator.submit(JobType::StrategyRun, 5, config.clone()).await.unwrap();
    assert_eq!(first_id, second_id, "duplicate submission must return the existing job");

    let key = JobKey { job_type: JobType::StrategyRun, pair: "XAU_USD".to_string(), timeframe: Timeframe::FifteenMin };
    assert!(job_store.find_active_by_key(&key).await.unwrap().is_some());

    release.notify_one();
}

// Scenario 6: a running job can be cancelled mid-flight; the executor observes the
// cancellation token and the coordinator records the job as Cancelled, not Failed.
#[tokio::test]
async fn coordinator_cancels_running_job() {
    let db = temp_db().await;
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db));

    let mut executors: std::collections::HashMap<JobType, Arc<dyn JobExecutor>> = std::collections::HashMap::new();
    let release = Arc::new(tokio::sync::Notify::new());
    executors.insert(JobType::StrategyRun, Arc::new(BlockingExecutor { release }));

    let coordinator = Arc::new(JobCoordinator::new(
        CoordinatorConfig::default(),
        job_store.clone(),
        executors,
        Arc::new(aurumflow::infrastructure::observability::Metrics::new().unwrap()),
    ));

    let config = JobConfig {
        pair: "XAU_USD".to_string(),
        timeframe: Timeframe::FifteenMin,
        from_ms: None,
        to_ms: None,
        days_per_batch: None,
        lookback_hours: None,
    };
    let mut events = coordinator.subscribe();
    let job_id = coordinator.submit(JobType::StrategyRun, 5, config).await.unwrap();

    let coordinator_for_runner = coordinator.clone();
    let runner = tokio::spawn(async move { coordinator_for_runner.run_once().await });

    // Give run_once a moment to pick the job up and start the executor before cancelling it.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(coordinator.cancel(job_id).await);

    let ran = runner.await.unwrap();
    assert!(ran);

    let mut last_status = None;
    while let Ok(event) = events.try_recv() {
        if event.job_id == job_id {
            last_status = Some(event.status);
        }
    }
    assert_eq!(last_status, Some(aurumflow::domain::job::JobStatus::Cancelled));
}
