//! aurumflow entrypoint: wires every adapter behind the domain ports, starts the job
//! coordinator's worker pool, and schedules the recurring ingestion/strategy jobs that keep a
//! single XAU/USD 15m stream up to date.

use anyhow::{Context, Result};
use aurumflow::application::coordinator::{
    BackfillExecutor, IncrementalExecutor, JobCoordinator, JobExecutor, StrategyRunExecutor,
};
use aurumflow::application::indicators::IndicatorEngine;
use aurumflow::application::ingestion::IngestionPipeline;
use aurumflow::application::ledger::LedgerLifecycle;
use aurumflow::application::rate_limiter::RateLimitManager;
use aurumflow::application::strategy::StrategyEngine;
use aurumflow::config::{BrokerKind, Config};
use aurumflow::domain::candle::Timeframe;
use aurumflow::domain::job::{JobConfig, JobType};
use aurumflow::domain::ports::BrokerAdapter;
use aurumflow::infrastructure::broker::{MockBroker, OandaBroker, SecondaryBroker};
use aurumflow::infrastructure::observability::{Metrics, MetricsReporter};
use aurumflow::infrastructure::persistence::{
    Database, SqliteCandleStore, SqliteIndicatorStore, SqliteJobStore, SqliteLedgerStore,
    SqliteStrategyStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

fn build_broker(config: &Config) -> Arc<dyn BrokerAdapter> {
    match config.broker.kind {
        BrokerKind::Mock => Arc::new(MockBroker::empty()),
        BrokerKind::Oanda => Arc::new(OandaBroker::new(
            config.broker.oanda_base_url.clone(),
            config.broker.oanda_api_key.clone(),
        )),
        BrokerKind::Secondary => Arc::new(SecondaryBroker::new(
            config.broker.secondary_base_url.clone(),
            config.broker.secondary_api_key.clone(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("aurumflow {} starting...", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };
    info!(pair = %config.pair, broker = ?config.broker.kind, "configuration loaded");

    let db = Database::new(&config.database.url)
        .await
        .context("Failed to open database")?;

    let candles = Arc::new(SqliteCandleStore::new(db.clone()));
    let indicators = Arc::new(SqliteIndicatorStore::new(db.clone()));
    let strategy_store = Arc::new(SqliteStrategyStore::new(db.clone()));
    let ledger_store = Arc::new(SqliteLedgerStore::new(db.clone()));
    let job_store = Arc::new(SqliteJobStore::new(db.clone()));

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let broker = build_broker(&config);
    let rate_limiter = Arc::new(RateLimitManager::new(config.rate_limit));
    let ingestion = Arc::new(IngestionPipeline::new(
        broker.clone(),
        rate_limiter.clone(),
        config.trading_window,
        candles.clone(),
    ));
    let indicator_engine = Arc::new(IndicatorEngine::new(candles.clone(), indicators.clone()));
    let strategy_engine = Arc::new(StrategyEngine::new(
        strategy_store.clone(),
        config.trading_window,
        config.strategy,
    ));
    let ledger_lifecycle = Arc::new(LedgerLifecycle::new(ledger_store.clone()));

    let mut executors: HashMap<JobType, Arc<dyn JobExecutor>> = HashMap::new();
    executors.insert(JobType::Backfill, Arc::new(BackfillExecutor { pipeline: ingestion.clone() }));
    executors.insert(
        JobType::Incremental,
        Arc::new(IncrementalExecutor {
            pipeline: ingestion.clone(),
            now_ms: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }),
    );
    executors.insert(
        JobType::StrategyRun,
        Arc::new(StrategyRunExecutor {
            candles: candles.clone(),
            indicator_engine: indicator_engine.clone(),
            strategy_engine: strategy_engine.clone(),
            strategy_store: strategy_store.clone(),
            ledger_lifecycle: ledger_lifecycle.clone(),
            account_id: config.account_id.clone(),
        }),
    );

    let coordinator = Arc::new(JobCoordinator::new(
        config.coordinator,
        job_store.clone(),
        executors,
        metrics.clone(),
    ));

    let mut workers = Vec::new();
    for _ in 0..config.coordinator.max_concurrent_jobs {
        let coordinator = coordinator.clone();
        workers.push(tokio::spawn(async move {
            loop {
                if !coordinator.run_once().await {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }));
    }

    let reporter = MetricsReporter::new(
        ledger_store.clone(),
        config.account_id.clone(),
        (*metrics).clone(),
        config.metrics_report_interval_seconds,
    );
    tokio::spawn(reporter.run());

    let scheduler = {
        let coordinator = coordinator.clone();
        let pair = config.pair.clone();
        let backfill_lookback_days = config.backfill_lookback_days;
        tokio::spawn(async move {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let from_ms = now_ms - backfill_lookback_days * 24 * 3_600_000;
            if let Err(e) = coordinator
                .submit(
                    JobType::Backfill,
                    10,
                    JobConfig {
                        pair: pair.clone(),
                        timeframe: Timeframe::FifteenMin,
                        from_ms: Some(from_ms),
                        to_ms: Some(now_ms),
                        days_per_batch: None,
                        lookback_hours: None,
                    },
                )
                .await
            {
                warn!("failed to submit initial backfill job: {e}");
            }

            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                let _ = coordinator
                    .submit(
                        JobType::Incremental,
                        5,
                        JobConfig {
                            pair: pair.clone(),
                            timeframe: Timeframe::FifteenMin,
                            from_ms: None,
                            to_ms: None,
                            days_per_batch: None,
                            lookback_hours: None,
                        },
                    )
                    .await;
                let _ = coordinator
                    .submit(
                        JobType::StrategyRun,
                        5,
                        JobConfig {
                            pair: pair.clone(),
                            timeframe: Timeframe::FifteenMin,
                            from_ms: Some(now_ms - Timeframe::FifteenMin.to_ms() * 20),
                            to_ms: Some(now_ms),
                            days_per_batch: None,
                            lookback_hours: None,
                        },
                    )
                    .await;
            }
        })
    };

    info!("aurumflow running. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining job coordinator...");

    scheduler.abort();
    coordinator.shutdown().await;
    for worker in workers {
        worker.abort();
    }

    info!("shutdown complete.");
    Ok(())
}
