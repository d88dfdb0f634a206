//! `JobStore` implementation over SQLite. Backs the coordinator's dedup check:
//! `find_active_by_key` only looks at jobs still `Pending` or `Running`.

use crate::domain::candle::Timeframe;
use crate::domain::errors::StoreError;
use crate::domain::job::{Job, JobConfig, JobKey, JobStatus, JobType};
use crate::domain::ports::JobStore;
use crate::infrastructure::persistence::database::Database;
use async_trait::async_trait;
use std::str::FromStr;
use uuid::Uuid;

fn tf_to_str(tf: Timeframe) -> &'static str {
    tf.to_oanda_string()
}

fn tf_from_str(s: &str) -> Result<Timeframe, StoreError> {
    Timeframe::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn job_type_to_str(t: JobType) -> &'static str {
    match t {
        JobType::Backfill => "backfill",
        JobType::Incremental => "incremental",
        JobType::StrategyRun => "strategy_run",
    }
}

fn job_type_from_str(s: &str) -> Result<JobType, StoreError> {
    match s {
        "backfill" => Ok(JobType::Backfill),
        "incremental" => Ok(JobType::Incremental),
        "strategy_run" => Ok(JobType::StrategyRun),
        other => Err(StoreError::Serialization(format!("unknown job type '{other}'"))),
    }
}

fn status_to_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> Result<JobStatus, StoreError> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        other => Err(StoreError::Serialization(format!("unknown job status '{other}'"))),
    }
}

pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, job_type, pair, timeframe, config_json, status, priority,
                 started_at, ended_at, retry_count, result_json, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                retry_count = excluded.retry_count,
                result_json = excluded.result_json,
                error = excluded.error
            "#,
        )
        .bind(job.id.to_string())
        .bind(job_type_to_str(job.job_type))
        .bind(&job.config.pair)
        .bind(tf_to_str(job.config.timeframe))
        .bind(serde_json::to_string(&job.config).map_err(|e| StoreError::Serialization(e.to_string()))?)
        .bind(status_to_str(job.status))
        .bind(job.priority)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(job.retry_count)
        .bind(
            job.result
                .as_ref()
                .map(|v| v.to_string()),
        )
        .bind(&job.error)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn find_active_by_key(&self, key: &JobKey) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, job_type, pair, timeframe, config_json, status, priority,
                   started_at, ended_at, retry_count, result_json, error
            FROM jobs
            WHERE job_type = ?1 AND pair = ?2 AND timeframe = ?3
              AND status IN ('pending', 'running')
            ORDER BY started_at DESC LIMIT 1
            "#,
        )
        .bind(job_type_to_str(key.job_type))
        .bind(&key.pair)
        .bind(tf_to_str(key.timeframe))
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(JobRow::into_domain).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    #[allow(dead_code)]
    pair: String,
    #[allow(dead_code)]
    timeframe: String,
    config_json: String,
    status: String,
    priority: i32,
    started_at: Option<i64>,
    ended_at: Option<i64>,
    retry_count: u32,
    result_json: Option<String>,
    error: Option<String>,
}

impl JobRow {
    fn into_domain(self) -> Result<Job, StoreError> {
        let config: JobConfig = serde_json::from_str(&self.config_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let _ = tf_from_str(&self.timeframe)?; // validates the denormalized column agrees with config_json
        Ok(Job {
            id: Uuid::parse_str(&self.id).map_err(|e| StoreError::Serialization(e.to_string()))?,
            job_type: job_type_from_str(&self.job_type)?,
            config,
            status: status_from_str(&self.status)?,
            priority: self.priority,
            started_at: self.started_at,
            ended_at: self.ended_at,
            retry_count: self.retry_count,
            result: self
                .result_json
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            error: self.error,
        })
    }
}
