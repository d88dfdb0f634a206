//! Job Coordinator types.

use crate::domain::candle::Timeframe;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    Backfill,
    Incremental,
    StrategyRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Identifies a job for deduplication purposes: `(type, pair, timeframe)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub job_type: JobType,
    pub pair: String,
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub pair: String,
    pub timeframe: Timeframe,
    /// Only meaningful for `Backfill`.
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub days_per_batch: Option<i64>,
    /// Only meaningful for `Incremental`.
    pub lookback_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub config: JobConfig,
    pub status: JobStatus,
    pub priority: i32,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub retry_count: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey {
            job_type: self.job_type,
            pair: self.config.pair.clone(),
            timeframe: self.config.timeframe,
        }
    }
}
