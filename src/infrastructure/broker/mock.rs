//! In-memory broker adapter for tests: a fixed or programmable fixture instead of a live HTTP
//! call.

use crate::domain::candle::{RawCandle, Timeframe};
use crate::domain::errors::BrokerError;
use crate::domain::ports::BrokerAdapter;
use async_trait::async_trait;
use std::sync::Mutex;

pub struct MockBroker {
    candles: Mutex<Vec<RawCandle>>,
    fail_next: Mutex<Option<BrokerError>>,
}

impl MockBroker {
    pub fn new(candles: Vec<RawCandle>) -> Self {
        Self {
            candles: Mutex::new(candles),
            fail_next: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Makes the next `fetch_candles` call return `err` instead of data.
    pub fn fail_next_with(&self, err: BrokerError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_candles(
        &self,
        _pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<RawCandle>, BrokerError> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }

        let candles = self.candles.lock().unwrap();
        Ok(candles
            .iter()
            .filter(|c| {
                c.timestamp
                    .parse::<i64>()
                    .map(|ts| {
                        let start = timeframe.period_start(ts);
                        start >= from_ms && start < to_ms
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn validate_connection(&self) -> Result<bool, BrokerError> {
        Ok(true)
    }
}
