//! Configuration. A single `Config::from_env()` entry point: each variable parses with a
//! default, and numeric parses are wrapped in `.context(...)` rather than letting a raw
//! `ParseIntError` surface.

use crate::application::coordinator::CoordinatorConfig;
use crate::application::rate_limiter::RateLimitConfig;
use crate::application::session_filter::TradingWindow;
use crate::application::strategy::StrategyParams;
use crate::domain::errors::ConfigError;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which `BrokerAdapter` to wire up as the primary candle source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Mock,
    Oanda,
    Secondary,
}

impl FromStr for BrokerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(BrokerKind::Mock),
            "oanda" => Ok(BrokerKind::Oanda),
            "secondary" => Ok(BrokerKind::Secondary),
            _ => anyhow::bail!("Invalid BROKER_KIND: {}. Must be 'mock', 'oanda', or 'secondary'", s),
        }
    }
}

fn env_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", name, e))
            .context(format!("Failed to parse {name}")),
        Err(_) => Ok(default),
    }
}

/// Broker connection settings, grouped separately from the rest of `Config` because exactly
/// one of the three sub-blocks is live depending on `broker_kind`.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub kind: BrokerKind,
    pub oanda_base_url: String,
    pub oanda_api_key: String,
    pub oanda_account_id: String,
    pub secondary_base_url: String,
    pub secondary_api_key: String,
}

impl BrokerSettings {
    fn from_env() -> Result<Self> {
        let kind_str = env_or("BROKER_KIND", "mock");
        Ok(Self {
            kind: BrokerKind::from_str(&kind_str)?,
            oanda_base_url: env_or("OANDA_BASE_URL", "https://api-fxpractice.oanda.com"),
            oanda_api_key: env_or("OANDA_API_KEY", ""),
            oanda_account_id: env_or("OANDA_ACCOUNT_ID", ""),
            secondary_base_url: env_or("SECONDARY_BROKER_BASE_URL", ""),
            secondary_api_key: env_or("SECONDARY_BROKER_API_KEY", ""),
        })
    }
}

/// Database and its timeout hierarchy: each tier must bound the one before it, so a
/// stuck integrity check can't outlive the recovery budget that's supposed to contain it.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub database_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub integrity_check_timeout_ms: u64,
    pub recovery_timeout_ms: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        let settings = Self {
            url: env_or("DATABASE_URL", "sqlite://data/aurumflow.db"),
            database_timeout_ms: env_parse("DB_TIMEOUT_MS", 5_000)?,
            operation_timeout_ms: env_parse("OPERATION_TIMEOUT_MS", 15_000)?,
            integrity_check_timeout_ms: env_parse("INTEGRITY_CHECK_TIMEOUT_MS", 30_000)?,
            recovery_timeout_ms: env_parse("RECOVERY_TIMEOUT_MS", 60_000)?,
        };
        settings.validate_hierarchy()?;
        Ok(settings)
    }

    fn validate_hierarchy(&self) -> Result<(), ConfigError> {
        if self.database_timeout_ms <= self.operation_timeout_ms
            && self.operation_timeout_ms <= self.integrity_check_timeout_ms
            && self.integrity_check_timeout_ms <= self.recovery_timeout_ms
        {
            Ok(())
        } else {
            Err(ConfigError::TimeoutHierarchyViolated {
                database: self.database_timeout_ms,
                operation: self.operation_timeout_ms,
                integrity_check: self.integrity_check_timeout_ms,
                recovery: self.recovery_timeout_ms,
            })
        }
    }
}

/// Aggregate application configuration, composed from env-backed sub-blocks and the
/// already-existing config structs each subsystem defines for itself
/// (`RateLimitConfig`, `TradingWindow`, `StrategyParams`, `CoordinatorConfig`).
#[derive(Debug, Clone)]
pub struct Config {
    pub pair: String,
    pub broker: BrokerSettings,
    pub database: DatabaseSettings,
    pub rate_limit: RateLimitConfig,
    pub trading_window: TradingWindow,
    pub strategy: StrategyParams,
    pub coordinator: CoordinatorConfig,
    pub account_id: String,
    pub metrics_report_interval_seconds: u64,
    pub backfill_lookback_days: i64,
    pub incremental_lookback_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let pair = env_or("TRADING_PAIR", "XAU_USD");
        let broker = BrokerSettings::from_env().context("Failed to load broker config")?;
        let database = DatabaseSettings::from_env().context("Failed to load database config")?;

        let rate_limit = RateLimitConfig {
            per_second_limit: env_parse("RATE_LIMIT_PER_SECOND", 10)?,
            per_minute_limit: env_parse("RATE_LIMIT_PER_MINUTE", 120)?,
            base_backoff: Duration::from_millis(env_parse("RATE_LIMIT_BASE_BACKOFF_MS", 500)?),
            max_backoff: Duration::from_secs(env_parse("RATE_LIMIT_MAX_BACKOFF_SECS", 30)?),
            jitter_factor: env_parse("RATE_LIMIT_JITTER_FACTOR", 0.25)?,
            max_candles_per_request: env_parse("MAX_CANDLES_PER_REQUEST", 5000)?,
            adaptive_threshold: env_parse("RATE_LIMIT_ADAPTIVE_THRESHOLD", 0.2)?,
        };

        let trading_window = TradingWindow {
            start_hour_utc: env_parse("TRADING_WINDOW_START_HOUR_UTC", 0)?,
            end_hour_utc: env_parse("TRADING_WINDOW_END_HOUR_UTC", 0)?,
        };

        let strategy = StrategyParams {
            min_rr: env_parse("STRATEGY_MIN_RR", 1.5)?,
            risk_percent: env_parse("STRATEGY_RISK_PERCENT", 1.0)?,
            leverage: env_parse("STRATEGY_LEVERAGE", 10.0)?,
            min_confidence: env_parse("STRATEGY_MIN_CONFIDENCE", 0.6)?,
            account_balance: env_parse("STRATEGY_ACCOUNT_BALANCE", 10_000.0)?,
            free_margin: env_parse("STRATEGY_FREE_MARGIN", 10_000.0)?,
            weight_ema_alignment: env_parse("STRATEGY_WEIGHT_EMA_ALIGNMENT", 0.25)?,
            weight_structure_quality: env_parse("STRATEGY_WEIGHT_STRUCTURE_QUALITY", 0.25)?,
            weight_atr_context: env_parse("STRATEGY_WEIGHT_ATR_CONTEXT", 0.15)?,
            weight_time_of_day: env_parse("STRATEGY_WEIGHT_TIME_OF_DAY", 0.1)?,
            weight_rr_quality: env_parse("STRATEGY_WEIGHT_RR_QUALITY", 0.25)?,
        };

        let coordinator = CoordinatorConfig {
            max_concurrent_jobs: env_parse("COORDINATOR_MAX_CONCURRENT_JOBS", 4)?,
            job_timeout: Duration::from_secs(env_parse("COORDINATOR_JOB_TIMEOUT_SECS", 30)?),
            max_retries: env_parse("COORDINATOR_MAX_RETRIES", 5)?,
            base_retry: Duration::from_millis(env_parse("COORDINATOR_BASE_RETRY_MS", 500)?),
            max_retry: Duration::from_secs(env_parse("COORDINATOR_MAX_RETRY_SECS", 30)?),
            shutdown_timeout: Duration::from_secs(env_parse("COORDINATOR_SHUTDOWN_TIMEOUT_SECS", 10)?),
            circuit_failure_threshold: env_parse("COORDINATOR_CIRCUIT_FAILURE_THRESHOLD", 5)?,
            circuit_success_threshold: env_parse("COORDINATOR_CIRCUIT_SUCCESS_THRESHOLD", 2)?,
            circuit_open_timeout: Duration::from_secs(env_parse("COORDINATOR_CIRCUIT_OPEN_TIMEOUT_SECS", 60)?),
        };

        Ok(Self {
            pair,
            broker,
            database,
            rate_limit,
            trading_window,
            strategy,
            coordinator,
            account_id: env_or("ACCOUNT_ID", "default"),
            metrics_report_interval_seconds: env_parse("METRICS_REPORT_INTERVAL_SECS", 60)?,
            backfill_lookback_days: env_parse("BACKFILL_LOOKBACK_DAYS", 30)?,
            incremental_lookback_hours: env_parse("INCREMENTAL_LOOKBACK_HOURS", 6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_hierarchy_rejects_out_of_order_tiers() {
        let settings = DatabaseSettings {
            url: "sqlite::memory:".into(),
            database_timeout_ms: 10_000,
            operation_timeout_ms: 5_000,
            integrity_check_timeout_ms: 30_000,
            recovery_timeout_ms: 60_000,
        };
        assert!(matches!(
            settings.validate_hierarchy(),
            Err(ConfigError::TimeoutHierarchyViolated { .. })
        ));
    }

    #[test]
    fn timeout_hierarchy_accepts_non_decreasing_tiers() {
        let settings = DatabaseSettings {
            url: "sqlite::memory:".into(),
            database_timeout_ms: 5_000,
            operation_timeout_ms: 15_000,
            integrity_check_timeout_ms: 30_000,
            recovery_timeout_ms: 60_000,
        };
        assert!(settings.validate_hierarchy().is_ok());
    }

    #[test]
    fn broker_kind_parses_case_insensitively() {
        assert_eq!(BrokerKind::from_str("OANDA").unwrap(), BrokerKind::Oanda);
        assert!(BrokerKind::from_str("bogus").is_err());
    }
}
