//! Generic secondary REST broker adapter, usable as a backup vendor behind the same
//! `BrokerAdapter` seam. Expects a flat JSON array of candle objects rather than OANDA's
//! nested `mid`/`bid`/`ask` shape.

use crate::domain::candle::{RawCandle, Timeframe};
use crate::domain::errors::BrokerError;
use crate::domain::ports::BrokerAdapter;
use crate::infrastructure::core::{build_url_with_query, HttpClientFactory};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;

pub struct SecondaryBroker {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl SecondaryBroker {
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
impl BrokerAdapter for SecondaryBroker {
    fn name(&self) -> &str {
        "secondary"
    }

    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<RawCandle>, BrokerError> {
        let url = format!("{}/candles/{}", self.base_url, pair);
        let url = build_url_with_query(
            &url,
            &[
                ("interval", timeframe.to_oanda_string()),
                ("from", from_ms.to_string().as_str()),
                ("to", to_ms.to_string().as_str()),
            ],
        );

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        response
            .json::<Vec<RawCandle>>()
            .await
            .map_err(|e| BrokerError::Server(format!("malformed response body: {e}")))
    }

    async fn validate_connection(&self) -> Result<bool, BrokerError> {
        let url = format!("{}/ping", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(response.status().is_success())
    }
}
