//! Ingestion Pipeline: discrete, independently testable stage methods called in sequence from
//! one `process`-style entry point, composing a `BrokerAdapter`, `RateLimitManager`,
//! `TradingWindow`, the normalizer, and a `CandleStore`.

use crate::application::normalizer::normalize_batch;
use crate::application::rate_limiter::{await_admission, RateLimitManager};
use crate::application::session_filter::TradingWindow;
use crate::domain::candle::Timeframe;
use crate::domain::errors::IngestionError;
use crate::domain::ports::{BrokerAdapter, CandleStore, UpsertOutcome};
use std::sync::Arc;
use tracing::{info, warn};

pub struct IngestionPipeline {
    broker: Arc<dyn BrokerAdapter>,
    rate_limiter: Arc<RateLimitManager>,
    window: TradingWindow,
    candles: Arc<dyn CandleStore>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestionReport {
    pub fetched: usize,
    pub normalized: usize,
    pub rejected_normalization: usize,
    pub filtered_out_of_session: usize,
    pub upsert: UpsertOutcome,
}

impl IngestionPipeline {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        rate_limiter: Arc<RateLimitManager>,
        window: TradingWindow,
        candles: Arc<dyn CandleStore>,
    ) -> Self {
        Self {
            broker,
            rate_limiter,
            window,
            candles,
        }
    }

    /// Fetches `[from_ms, to_ms)` in rate-limiter-sized chunks, used for the initial full
    /// history load.
    pub async fn run_backfill(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<IngestionReport, IngestionError> {
        let chunks = self
            .rate_limiter
            .chunk_range(from_ms, to_ms, timeframe.to_ms());

        let mut report = IngestionReport::default();
        for (chunk_from, chunk_to) in chunks {
            let chunk_report = self
                .process(pair, timeframe, chunk_from, chunk_to)
                .await?;
            report = merge(report, chunk_report);
        }
        Ok(report)
    }

    /// Fetches candles after the latest stored timestamp, used for the steady-state poll.
    /// `now_ms` bounds the fetch so an incremental run never reaches into in-progress
    /// candles.
    pub async fn run_incremental(
        &self,
        pair: &str,
        timeframe: Timeframe,
        now_ms: i64,
    ) -> Result<IngestionReport, IngestionError> {
        let from_ms = self
            .candles
            .get_latest_timestamp(pair, timeframe)
            .await?
            .map(|ts| ts + timeframe.to_ms())
            .unwrap_or(now_ms - timeframe.to_ms() * 100);

        let to_ms = timeframe.period_start(now_ms);
        if to_ms <= from_ms {
            return Ok(IngestionReport::default());
        }

        self.process(pair, timeframe, from_ms, to_ms).await
    }

    /// The staged pipeline for one fetch window: fetch -> normalize -> session-filter ->
    /// upsert.
    async fn process(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<IngestionReport, IngestionError> {
        let estimated_size = ((to_ms - from_ms) / timeframe.to_ms()).max(1) as u32;
        await_admission(&self.rate_limiter, estimated_size, Some(pair)).await;

        let fetch_result = self.broker.fetch_candles(pair, timeframe, from_ms, to_ms).await;
        self.rate_limiter
            .record_result(matches!(
                &fetch_result,
                Err(crate::domain::errors::BrokerError::RateLimit { .. })
            ))
            .await;

        let raw = fetch_result?;
        let fetched = raw.len();

        let (normalized, rejected) = normalize_batch(&raw, pair, timeframe);

        let (in_session, out_of_session) =
            crate::application::session_filter::partition_by_session(
                &normalized,
                |c| c.timestamp,
                &self.window,
            );
        if !out_of_session.is_empty() {
            warn!(
                "ingestion: dropped {} out-of-session candles for {}",
                out_of_session.len(),
                pair
            );
        }

        let upsert = self.candles.upsert_batch(&in_session).await?;
        info!(
            "ingestion: pair={} window=[{},{}) fetched={} normalized={} rejected={} inserted={} skipped={} errors={}",
            pair, from_ms, to_ms, fetched, in_session.len(), rejected,
            upsert.inserted, upsert.skipped, upsert.errors
        );

        Ok(IngestionReport {
            fetched,
            normalized: in_session.len(),
            rejected_normalization: rejected,
            filtered_out_of_session: out_of_session.len(),
            upsert,
        })
    }
}

fn merge(a: IngestionReport, b: IngestionReport) -> IngestionReport {
    IngestionReport {
        fetched: a.fetched + b.fetched,
        normalized: a.normalized + b.normalized,
        rejected_normalization: a.rejected_normalization + b.rejected_normalization,
        filtered_out_of_session: a.filtered_out_of_session + b.filtered_out_of_session,
        upsert: UpsertOutcome {
            inserted: a.upsert.inserted + b.upsert.inserted,
            skipped: a.upsert.skipped + b.upsert.skipped,
            errors: a.upsert.errors + b.upsert.errors,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::rate_limiter::RateLimitConfig;
    use crate::domain::candle::{Candle, RawCandle};
    use crate::domain::errors::StoreError;
    use crate::domain::ports::GapInterval;
    use crate::infrastructure::broker::MockBroker;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct InMemoryCandleStore {
        rows: Mutex<Vec<Candle>>,
    }

    impl InMemoryCandleStore {
        fn new() -> Self {
            Self { rows: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl CandleStore for InMemoryCandleStore {
        async fn upsert_batch(&self, candles: &[Candle]) -> Result<UpsertOutcome, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let mut outcome = UpsertOutcome::default();
            for c in candles {
                if rows.iter().any(|r| r.timestamp == c.timestamp) {
                    rows.retain(|r| r.timestamp != c.timestamp);
                }
                rows.push(c.clone());
                outcome.inserted += 1;
            }
            Ok(outcome)
        }

        async fn get_range(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            from_ms: i64,
            to_ms: i64,
        ) -> Result<Vec<Candle>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
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
        ) -> Result<Vec<Candle>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.timestamp > after_ms)
                .cloned()
                .collect())
        }

        async fn get_latest_timestamp(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
        ) -> Result<Option<i64>, StoreError> {
            Ok(self.rows.lock().unwrap().iter().map(|c| c.timestamp).max())
        }

        async fn detect_gaps(
            &self,
            _pair: &str,
            _timeframe: Timeframe,
            _from_ms: i64,
            _to_ms: i64,
            _expected_step_ms: i64,
        ) -> Result<Vec<GapInterval>, StoreError> {
            Ok(vec![])
        }
    }

    fn raw(ts_ms: i64) -> RawCandle {
        RawCandle {
            timestamp: ts_ms.to_string(),
            open: Some(2000.0),
            high: Some(2001.0),
            low: Some(1999.0),
            close: Some(2000.5),
            bid_open: None,
            bid_high: None,
            bid_low: None,
            bid_close: None,
            ask_open: None,
            ask_high: None,
            ask_low: None,
            ask_close: None,
            volume: Some(5.0),
            complete: true,
        }
    }

    fn always_open_window() -> TradingWindow {
        TradingWindow { start_hour_utc: 0, end_hour_utc: 0 }
    }

    #[tokio::test]
    async fn backfill_then_incremental_is_idempotent_on_overlap() {
        let tf = Timeframe::FifteenMin;
        let step = tf.to_ms();
        let raws: Vec<RawCandle> = (0..10).map(|i| raw(i * step)).collect();

        let broker = Arc::new(MockBroker::new(raws));
        let rate_limiter = Arc::new(RateLimitManager::new(RateLimitConfig::default()));
        let store = Arc::new(InMemoryCandleStore::new());
        let pipeline = IngestionPipeline::new(
            broker.clone(),
            rate_limiter.clone(),
            always_open_window(),
            store.clone(),
        );

        let first = pipeline
            .run_backfill("XAU_USD", tf, 0, 10 * step)
            .await
            .unwrap();
        assert_eq!(first.upsert.inserted, 10);

        // Re-running the same window must not duplicate rows (idempotent upsert).
        let second = pipeline
            .run_backfill("XAU_USD", tf, 0, 10 * step)
            .await
            .unwrap();
        assert_eq!(second.upsert.inserted, 10);
        assert_eq!(store.rows.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn incomplete_candles_are_excluded_from_upsert() {
        let tf = Timeframe::FifteenMin;
        let mut incomplete = raw(0);
        incomplete.complete = false;
        let broker = Arc::new(MockBroker::new(vec![incomplete]));
        let rate_limiter = Arc::new(RateLimitManager::new(RateLimitConfig::default()));
        let store = Arc::new(InMemoryCandleStore::new());
        let pipeline = IngestionPipeline::new(broker, rate_limiter, always_open_window(), store.clone());

        let report = pipeline.run_backfill("XAU_USD", tf, 0, tf.to_ms()).await.unwrap();
        assert_eq!(report.rejected_normalization, 1);
        assert_eq!(store.rows.lock().unwrap().len(), 0);
    }
}
