//! Closed error enumerations, one per concern, each classified by retry behavior. Each carries
//! enough context to be logged and retried on without re-deriving it.

use thiserror::Error;

/// Errors surfaced by a `BrokerAdapter`. Classified so the ingestion
/// pipeline and job coordinator can decide retry vs. fatal without string-matching.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker authentication failed: {0}")]
    Authentication(String),

    #[error("broker rate limit exceeded (retry_after={retry_after_ms:?}ms)")]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("broker rejected request: {0}")]
    BadRequest(String),

    #[error("broker resource not found: {0}")]
    NotFound(String),

    #[error("broker server error: {0}")]
    Server(String),
}

impl BrokerError {
    /// Transient remote errors: retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Connection(_) | BrokerError::RateLimit { .. } | BrokerError::Server(_)
        )
    }

    /// Remote refusals: never retried, surfaced immediately as fatal for the job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::Authentication(_) | BrokerError::BadRequest(_)
        )
    }
}

/// Errors raised inside the Ingestion Pipeline.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("candle store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid candle rejected during normalization: {0}")]
    InvalidCandle(String),
}

/// Errors raised by the candle/indicator/ledger persistence layer.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Errors raised inside the Indicator Engine. Local-validation class:
/// the producing job completes with a warning, it does not fail outright.
#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("insufficient history: need {need} candles, have {have}")]
    InsufficientHistory { need: usize, have: usize },

    #[error("candle store error: {0}")]
    Store(#[from] StoreError),

    #[error("non-finite value computed for {kind} at timestamp {timestamp}")]
    NonFinite { kind: &'static str, timestamp: i64 },
}

/// Errors raised inside the Strategy Engine. These never propagate out of `evaluate`;
/// they are caught at the stage boundary and converted into a FAILED audit record plus a
/// NO_TRADE decision.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("stage {stage:?} computation failed: {reason}")]
    StageFailed {
        stage: crate::domain::strategy::Stage,
        reason: String,
    },
}

/// Errors raised by the Position Lifecycle & Ledger. These are strict: any invariant
/// violation aborts the command and is returned to the caller.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "balance equation violated: before={balance_before} amount={amount} after={balance_after}"
    )]
    BalanceEquationViolated {
        balance_before: f64,
        amount: f64,
        balance_after: f64,
    },

    #[error("balance chain broken: expected balance_before={expected}, got {actual}")]
    ChainBroken { expected: f64, actual: f64 },

    #[error("position {0} not found")]
    PositionNotFound(uuid::Uuid),

    #[error("position {0} is in status {1:?}, expected {2:?}")]
    InvalidTransition(
        uuid::Uuid,
        crate::domain::ledger::PositionStatus,
        crate::domain::ledger::PositionStatus,
    ),

    #[error("orphaned position {0}: missing required event {1:?}")]
    OrphanedPosition(uuid::Uuid, crate::domain::ledger::PositionEventType),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the Job Coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("job queue is full")]
    QueueFull,

    #[error("job timed out after {0}ms")]
    Timeout(u64),

    #[error("circuit breaker open for operation '{0}'")]
    CircuitOpen(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("indicator error: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl CoordinatorError {
    /// Error classes that are never retried: authentication, configuration,
    /// validation.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::Ingestion(IngestionError::Broker(b)) => !b.is_fatal(),
            CoordinatorError::Indicator(IndicatorError::InsufficientHistory { .. }) => false,
            CoordinatorError::QueueFull | CoordinatorError::Timeout(_) => true,
            CoordinatorError::CircuitOpen(_) => false,
            CoordinatorError::Cancelled => false,
            CoordinatorError::Ledger(_) => false,
            _ => true,
        }
    }
}

/// Fatal at the process boundary: missing or invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for environment variable {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(
        "timeout hierarchy violated: database({database}) <= operation({operation}) <= integrity_check({integrity_check}) <= recovery({recovery}) must hold"
    )]
    TimeoutHierarchyViolated {
        database: u64,
        operation: u64,
        integrity_check: u64,
        recovery: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_error_classification() {
        assert!(BrokerError::Connection("x".into()).is_transient());
        assert!(BrokerError::Server("x".into()).is_transient());
        assert!(
            BrokerError::RateLimit {
                retry_after_ms: Some(500)
            }
            .is_transient()
        );
        assert!(BrokerError::Authentication("x".into()).is_fatal());
        assert!(BrokerError::BadRequest("x".into()).is_fatal());
        assert!(!BrokerError::NotFound("x".into()).is_fatal());
        assert!(!BrokerError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn coordinator_error_retry_policy() {
        let auth_err =
            CoordinatorError::Ingestion(IngestionError::Broker(BrokerError::Authentication(
                "bad key".into(),
            )));
        assert!(!auth_err.is_retryable());

        let conn_err = CoordinatorError::Ingestion(IngestionError::Broker(BrokerError::Connection(
            "reset".into(),
        )));
        assert!(conn_err.is_retryable());

        assert!(!CoordinatorError::CircuitOpen("ingest".into()).is_retryable());
    }
}
