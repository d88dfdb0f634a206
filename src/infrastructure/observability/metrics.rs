//! Prometheus metrics definitions.
//!
//! All metrics use the `aurumflow_` prefix and are read-only; nothing in this module accepts
//! inbound connections.

use prometheus::{
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the ingestion/indicator/strategy/coordinator/ledger pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Candles ingested, by pair and outcome (inserted/skipped/error).
    pub candles_ingested_total: CounterVec,
    /// Gaps detected in the candle store at the most recent scan.
    pub candle_gaps_detected: GenericGauge<AtomicF64>,
    /// Indicator rebuild/update duration in seconds.
    pub indicator_compute_seconds: HistogramVec,
    /// Strategy decisions produced, by decision kind (buy/sell/no_trade).
    pub strategy_decisions_total: CounterVec,
    /// Account balance, USD.
    pub account_balance_usd: GenericGauge<AtomicF64>,
    /// Open position count.
    pub open_positions_count: GenericGauge<AtomicF64>,
    /// Circuit breaker status per operation (0=closed, 1=open).
    pub circuit_breaker_status: GenericGaugeVec<AtomicF64>,
    /// Job queue depth.
    pub job_queue_depth: GenericGauge<AtomicF64>,
    /// Jobs completed, by type and outcome.
    pub jobs_total: CounterVec,
    /// Broker request latency in seconds.
    pub broker_latency_seconds: HistogramVec,
    /// Rate limiter consecutive failure count.
    pub rate_limiter_failures: GenericGauge<AtomicF64>,
    /// Uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let candles_ingested_total = CounterVec::new(
            Opts::new(
                "aurumflow_candles_ingested_total",
                "Candles ingested by pair and outcome",
            ),
            &["pair", "outcome"],
        )?;
        registry.register(Box::new(candles_ingested_total.clone()))?;

        let candle_gaps_detected = Gauge::with_opts(Opts::new(
            "aurumflow_candle_gaps_detected",
            "Gaps detected in the candle store at the most recent scan",
        ))?;
        registry.register(Box::new(candle_gaps_detected.clone()))?;

        let indicator_compute_seconds = HistogramVec::new(
            HistogramOpts::new(
                "aurumflow_indicator_compute_seconds",
                "Indicator rebuild/update duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["mode"],
        )?;
        registry.register(Box::new(indicator_compute_seconds.clone()))?;

        let strategy_decisions_total = CounterVec::new(
            Opts::new(
                "aurumflow_strategy_decisions_total",
                "Strategy decisions produced by kind",
            ),
            &["decision"],
        )?;
        registry.register(Box::new(strategy_decisions_total.clone()))?;

        let account_balance_usd = Gauge::with_opts(Opts::new(
            "aurumflow_account_balance_usd",
            "Account balance in USD",
        ))?;
        registry.register(Box::new(account_balance_usd.clone()))?;

        let open_positions_count = Gauge::with_opts(Opts::new(
            "aurumflow_open_positions_count",
            "Number of open positions",
        ))?;
        registry.register(Box::new(open_positions_count.clone()))?;

        let circuit_breaker_status = GaugeVec::new(
            Opts::new(
                "aurumflow_circuit_breaker_status",
                "Circuit breaker status per operation (0=closed, 1=open)",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(circuit_breaker_status.clone()))?;

        let job_queue_depth = Gauge::with_opts(Opts::new(
            "aurumflow_job_queue_depth",
            "Number of jobs waiting in the coordinator queue",
        ))?;
        registry.register(Box::new(job_queue_depth.clone()))?;

        let jobs_total = CounterVec::new(
            Opts::new("aurumflow_jobs_total", "Jobs completed by type and outcome"),
            &["job_type", "outcome"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        let broker_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "aurumflow_broker_latency_seconds",
                "Broker request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["broker"],
        )?;
        registry.register(Box::new(broker_latency_seconds.clone()))?;

        let rate_limiter_failures = Gauge::with_opts(Opts::new(
            "aurumflow_rate_limiter_consecutive_failures",
            "Consecutive rate-limited requests observed by the rate limit manager",
        ))?;
        registry.register(Box::new(rate_limiter_failures.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "aurumflow_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            candles_ingested_total,
            candle_gaps_detected,
            indicator_compute_seconds,
            strategy_decisions_total,
            account_balance_usd,
            open_positions_count,
            circuit_breaker_status,
            job_queue_depth,
            jobs_total,
            broker_latency_seconds,
            rate_limiter_failures,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_candles(&self, pair: &str, outcome: &str, count: usize) {
        self.candles_ingested_total
            .with_label_values(&[pair, outcome])
            .inc_by(count as f64);
    }

    pub fn observe_indicator_compute(&self, mode: &str, seconds: f64) {
        self.indicator_compute_seconds
            .with_label_values(&[mode])
            .observe(seconds);
    }

    pub fn inc_decisions(&self, decision: &str) {
        self.strategy_decisions_total
            .with_label_values(&[decision])
            .inc();
    }

    pub fn set_circuit_status(&self, operation: &str, open: bool) {
        self.circuit_breaker_status
            .with_label_values(&[operation])
            .set(if open { 1.0 } else { 0.0 });
    }

    pub fn inc_jobs(&self, job_type: &str, outcome: &str) {
        self.jobs_total.with_label_values(&[job_type, outcome]).inc();
    }

    pub fn observe_broker_latency(&self, broker: &str, latency: f64) {
        self.broker_latency_seconds
            .with_label_values(&[broker])
            .observe(latency);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}
