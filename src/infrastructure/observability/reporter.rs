//! Push-based metrics reporter.
//!
//! Periodically outputs metrics as structured JSON to stdout. No HTTP server, no inbound
//! connections - this system only sends data.

use crate::domain::ports::LedgerStore;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub account: AccountSnapshot,
}

#[derive(Serialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub balance_usd: f64,
}

/// Outputs metrics as structured JSON logs on a configurable interval. No HTTP server, no
/// incoming connections - only outbound data.
pub struct MetricsReporter {
    ledger: Arc<dyn LedgerStore>,
    account_id: String,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        account_id: impl Into<String>,
        metrics: Metrics,
        interval_seconds: u64,
    ) -> Self {
        Self {
            ledger,
            account_id: account_id.into(),
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Runs the reporter in a loop, outputting metrics periodically. Never returns; the
    /// coordinator's shutdown path aborts this task rather than signalling it.
    pub async fn run(self) {
        info!(
            "MetricsReporter: starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{}", json);
                        info!(
                            "account={} balance=${:.2} uptime={}s",
                            snapshot.account.account_id,
                            snapshot.account.balance_usd,
                            snapshot.uptime_seconds
                        );
                    }
                    Err(e) => warn!("Failed to serialize metrics: {}", e),
                },
                Err(e) => warn!("Failed to collect metrics: {}", e),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let uptime = self.start_time.elapsed().as_secs();
        let balance = self.ledger.latest_balance(&self.account_id).await?;

        self.metrics.account_balance_usd.set(balance);
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            account: AccountSnapshot {
                account_id: self.account_id.clone(),
                balance_usd: balance,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StoreError;
    use crate::domain::ledger::{BalanceEvent, Position, PositionEvent};
    use crate::domain::errors::LedgerError;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FixedLedger(f64);

    #[async_trait]
    impl LedgerStore for FixedLedger {
        async fn latest_balance(&self, _account_id: &str) -> Result<f64, StoreError> {
            Ok(self.0)
        }
        async fn get_position(&self, _id: Uuid) -> Result<Option<Position>, StoreError> {
            Ok(None)
        }
        async fn position_events(&self, _id: Uuid) -> Result<Vec<PositionEvent>, StoreError> {
            Ok(vec![])
        }
        async fn account_events(&self, _account_id: &str) -> Result<Vec<BalanceEvent>, StoreError> {
            Ok(vec![])
        }
        async fn apply_position_write(
            &self,
            _position: &Position,
            _position_events: &[PositionEvent],
            _balance_events: &[BalanceEvent],
        ) -> Result<(), LedgerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn snapshot_collection_reads_ledger_balance() {
        let ledger = Arc::new(FixedLedger(10_000.0));
        let metrics = Metrics::new().expect("Failed to create metrics");
        let reporter = MetricsReporter::new(ledger, "primary", metrics, 60);

        let snapshot = reporter
            .collect_snapshot()
            .await
            .expect("Failed to collect snapshot");

        assert_eq!(snapshot.account.balance_usd, 10_000.0);
        assert!(!snapshot.timestamp.is_empty());
    }
}
