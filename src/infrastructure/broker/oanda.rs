//! OANDA-shaped primary broker adapter. Built on the shared `HttpClientFactory` client with
//! retry middleware, and a `build_url_with_query` helper for query-string assembly.

use crate::domain::candle::{RawCandle, Timeframe};
use crate::domain::errors::BrokerError;
use crate::domain::ports::BrokerAdapter;
use crate::infrastructure::core::{build_url_with_query, HttpClientFactory};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::warn;

pub struct OandaBroker {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl OandaBroker {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> BrokerError {
        match status.as_u16() {
            401 | 403 => BrokerError::Authentication(body.to_string()),
            404 => BrokerError::NotFound(body.to_string()),
            429 => BrokerError::RateLimit { retry_after_ms: None },
            400..=499 => BrokerError::BadRequest(body.to_string()),
            _ => BrokerError::Server(body.to_string()),
        }
    }
}

#[async_trait]
impl BrokerAdapter for OandaBroker {
    fn name(&self) -> &str {
        "oanda"
    }

    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<RawCandle>, BrokerError> {
        let from = chrono::DateTime::from_timestamp_millis(from_ms)
            .ok_or_else(|| BrokerError::BadRequest("invalid from_ms".into()))?
            .to_rfc3339();
        let to = chrono::DateTime::from_timestamp_millis(to_ms)
            .ok_or_else(|| BrokerError::BadRequest("invalid to_ms".into()))?
            .to_rfc3339();

        let url = format!("{}/v3/instruments/{}/candles", self.base_url, pair);
        let url = build_url_with_query(
            &url,
            &[
                ("granularity", timeframe.to_oanda_string()),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("price", "MBA"),
            ],
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: OandaCandleResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Server(format!("malformed response body: {e}")))?;

        Ok(parsed.candles.into_iter().map(RawCandle::from).collect())
    }

    async fn validate_connection(&self) -> Result<bool, BrokerError> {
        let url = format!("{}/v3/accounts", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        if response.status().is_success() {
            Ok(true)
        } else if response.status().as_u16() == 401 {
            Err(BrokerError::Authentication("invalid API key".into()))
        } else {
            warn!("oanda validate_connection returned status {}", response.status());
            Ok(false)
        }
    }
}

#[derive(Debug, Deserialize)]
struct OandaCandleResponse {
    candles: Vec<OandaCandle>,
}

#[derive(Debug, Deserialize)]
struct OandaCandle {
    time: String,
    complete: bool,
    volume: Option<f64>,
    mid: Option<OandaPrice>,
    bid: Option<OandaPrice>,
    ask: Option<OandaPrice>,
}

#[derive(Debug, Deserialize)]
struct OandaPrice {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
}

impl From<OandaCandle> for RawCandle {
    fn from(c: OandaCandle) -> Self {
        RawCandle {
            timestamp: c.time,
            open: c.mid.as_ref().map(|p| p.o),
            high: c.mid.as_ref().map(|p| p.h),
            low: c.mid.as_ref().map(|p| p.l),
            close: c.mid.as_ref().map(|p| p.c),
            bid_open: c.bid.as_ref().map(|p| p.o),
            bid_high: c.bid.as_ref().map(|p| p.h),
            bid_low: c.bid.as_ref().map(|p| p.l),
            bid_close: c.bid.as_ref().map(|p| p.c),
            ask_open: c.ask.as_ref().map(|p| p.o),
            ask_high: c.ask.as_ref().map(|p| p.h),
            ask_low: c.ask.as_ref().map(|p| p.l),
            ask_close: c.ask.as_ref().map(|p| p.c),
            volume: c.volume,
            complete: c.complete,
        }
    }
}
