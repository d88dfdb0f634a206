//! Job Coordinator. Priority queue plus a bounded worker pool: one `tokio::sync::Mutex`-guarded
//! state struct for bookkeeping, one `tokio::sync::Semaphore` to bound concurrency, and a
//! `CircuitBreaker` per operation reused unchanged from `infrastructure::core`.

use crate::domain::errors::CoordinatorError;
use crate::domain::job::{Job, JobConfig, JobKey, JobStatus, JobType};
use crate::domain::ports::JobStore;
use crate::infrastructure::core::CircuitBreaker;
use crate::infrastructure::observability::metrics::Metrics;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Error classes the coordinator never retries: authentication, configuration,
/// validation all surface immediately.
fn is_never_retried(error: &CoordinatorError) -> bool {
    !error.is_retryable()
}

/// Job lifecycle transition, published on `JobCoordinator::subscribe`'s broadcast channel.
#[derive(Debug, Clone)]
pub struct JobLifecycleEvent {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        config: &JobConfig,
        cancel: Arc<AtomicBool>,
    ) -> Result<serde_json::Value, CoordinatorError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub max_concurrent_jobs: usize,
    pub job_timeout: Duration,
    pub max_retries: u32,
    pub base_retry: Duration,
    pub max_retry: Duration,
    pub shutdown_timeout: Duration,
    pub circuit_failure_threshold: usize,
    pub circuit_success_threshold: usize,
    pub circuit_open_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            job_timeout: Duration::from_secs(30),
            max_retries: 5,
            base_retry: Duration::from_millis(500),
            max_retry: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            circuit_failure_threshold: 5,
            circuit_success_threshold: 2,
            circuit_open_timeout: Duration::from_secs(60),
        }
    }
}

struct QueuedJob {
    job: Job,
    priority: i32,
    sequence: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedJob {}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; among equal priorities, earlier-submitted (lower sequence)
        // first, which means reversing sequence comparison since BinaryHeap is a max-heap.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorMetricsSnapshot {
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed: u64,
    pub failed: u64,
    pub avg_processing_time_ms: f64,
    pub success_rate: f64,
}

struct SharedState {
    queue: BinaryHeap<QueuedJob>,
    running: HashMap<Uuid, Arc<AtomicBool>>,
    sequence_counter: u64,
    completed: u64,
    failed: u64,
    total_processing_ms: u64,
}

pub struct JobCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn JobStore>,
    executors: HashMap<JobType, Arc<dyn JobExecutor>>,
    circuit_breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    semaphore: Arc<Semaphore>,
    state: Mutex<SharedState>,
    shutting_down: AtomicBool,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<JobLifecycleEvent>,
}

impl JobCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn JobStore>,
        executors: HashMap<JobType, Arc<dyn JobExecutor>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            store,
            executors,
            circuit_breakers: Mutex::new(HashMap::new()),
            state: Mutex::new(SharedState {
                queue: BinaryHeap::new(),
                running: HashMap::new(),
                sequence_counter: 0,
                completed: 0,
                failed: 0,
                total_processing_ms: 0,
            }),
            shutting_down: AtomicBool::new(false),
            metrics,
            events,
        }
    }

    /// Subscribes to job lifecycle transitions (submitted, running, completed, failed,
    /// cancelled), broadcast to every listener.
    pub fn subscribe(&self) -> broadcast::Receiver<JobLifecycleEvent> {
        self.events.subscribe()
    }

    fn publish(&self, job: &Job) {
        let _ = self.events.send(JobLifecycleEvent {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
        });
    }

    /// Submits a job, deduplicating against any already-active job with the same
    /// `(type, pair, timeframe)` key. Refuses submissions once shutdown has begun.
    pub async fn submit(&self, job_type: JobType, priority: i32, config: JobConfig) -> Result<Uuid, CoordinatorError> {
        if self.shutting_down.load(AtomicOrdering::SeqCst) {
            return Err(CoordinatorError::QueueFull);
        }

        let key = JobKey {
            job_type,
            pair: config.pair.clone(),
            timeframe: config.timeframe,
        };
        if let Ok(Some(existing)) = self.store.find_active_by_key(&key).await {
            info!("coordinator: dedup hit for {:?}, returning existing job {}", key, existing.id);
            return Ok(existing.id);
        }

        let job = Job {
            id: Uuid::new_v4(),
            job_type,
            config,
            status: JobStatus::Pending,
            priority,
            started_at: None,
            ended_at: None,
            retry_count: 0,
            result: None,
            error: None,
        };
        let _ = self.store.save(&job).await;
        self.publish(&job);

        let mut state = self.state.lock().await;
        state.sequence_counter += 1;
        let sequence = state.sequence_counter;
        state.queue.push(QueuedJob { job: job.clone(), priority, sequence });
        self.metrics.job_queue_depth.set(state.queue.len() as f64);
        Ok(job.id)
    }

    /// Pops and executes jobs until the queue is empty or shutdown begins. Intended to run as a
    /// background loop; callers typically spawn this alongside `report_metrics_periodically`.
    pub async fn run_once(&self) -> bool {
        if self.shutting_down.load(AtomicOrdering::SeqCst) {
            return false;
        }

        let queued = {
            let mut state = self.state.lock().await;
            state.queue.pop()
        };
        let Some(queued) = queued else { return false };

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return false,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.state.lock().await;
            state.running.insert(queued.job.id, cancel.clone());
        }

        let started = Instant::now();
        let mut job = queued.job;
        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now().timestamp_millis());
        let _ = self.store.save(&job).await;
        self.publish(&job);

        let result = self.execute_with_retry(&job, cancel.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        job.ended_at = Some(chrono::Utc::now().timestamp_millis());
        match &result {
            Ok(value) => {
                job.status = JobStatus::Completed;
                job.result = Some(value.clone());
                self.metrics.inc_jobs(job_type_label(job.job_type), "success");
            }
            Err(CoordinatorError::Cancelled) => {
                job.status = JobStatus::Cancelled;
                self.metrics.inc_jobs(job_type_label(job.job_type), "cancelled");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                self.metrics.inc_jobs(job_type_label(job.job_type), "failure");
            }
        }
        let _ = self.store.save(&job).await;
        self.publish(&job);

        {
            let mut state = self.state.lock().await;
            state.running.remove(&job.id);
            match &result {
                Ok(_) => state.completed += 1,
                Err(_) => state.failed += 1,
            }
            state.total_processing_ms += elapsed_ms;
            self.metrics.job_queue_depth.set(state.queue.len() as f64);
        }

        drop(permit);
        true
    }

    async fn execute_with_retry(&self, job: &Job, cancel: Arc<AtomicBool>) -> Result<serde_json::Value, CoordinatorError> {
        let Some(executor) = self.executors.get(&job.job_type).cloned() else {
            return Err(CoordinatorError::Timeout(0));
        };

        let op_name = format!("{:?}:{}:{}", job.job_type, job.config.pair, job.config.timeframe);
        let breaker = self.breaker_for(&op_name).await;

        let mut attempt = 0u32;
        loop {
            if cancel.load(AtomicOrdering::SeqCst) {
                return Err(CoordinatorError::Cancelled);
            }

            attempt += 1;
            let config = job.config.clone();
            let exec = executor.clone();
            let cancel_for_call = cancel.clone();

            let call = tokio::time::timeout(
                self.config.job_timeout,
                breaker.call(async move { exec.execute(&config, cancel_for_call).await }),
            )
            .await;

            let outcome = match call {
                Err(_) => Err(CoordinatorError::Timeout(self.config.job_timeout.as_millis() as u64)),
                Ok(Err(crate::infrastructure::core::CircuitBreakerError::Open(_))) => {
                    Err(CoordinatorError::CircuitOpen(op_name.clone()))
                }
                Ok(Err(crate::infrastructure::core::CircuitBreakerError::Inner(e))) => Err(e),
                Ok(Ok(v)) => Ok(v),
            };

            match outcome {
                Ok(v) => return Ok(v),
                Err(e) if is_never_retried(&e) || attempt >= self.config.max_retries => {
                    warn!("coordinator: job {} giving up after {} attempt(s): {}", job.id, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let backoff = (self.config.base_retry.as_millis() as u64)
                        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
                        .min(self.config.max_retry.as_millis() as u64);
                    warn!(
                        "coordinator: job {} attempt {} failed ({}), retrying in {}ms",
                        job.id, attempt, e, backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    async fn breaker_for(&self, op_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.circuit_breakers.lock().await;
        breakers
            .entry(op_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    op_name.to_string(),
                    self.config.circuit_failure_threshold,
                    self.config.circuit_success_threshold,
                    self.config.circuit_open_timeout,
                ))
            })
            .clone()
    }

    /// Requests cancellation of a running job by flipping its cancellation token; the executor
    /// is expected to check it at its own suspension points.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let state = self.state.lock().await;
        if let Some(flag) = state.running.get(&job_id) {
            flag.store(true, AtomicOrdering::SeqCst);
            true
        } else {
            false
        }
    }

    pub async fn metrics_snapshot(&self) -> CoordinatorMetricsSnapshot {
        let state = self.state.lock().await;
        let total = state.completed + state.failed;
        CoordinatorMetricsSnapshot {
            active_jobs: state.running.len() + state.queue.len(),
            queued_jobs: state.queue.len(),
            running_jobs: state.running.len(),
            completed: state.completed,
            failed: state.failed,
            avg_processing_time_ms: if total > 0 {
                state.total_processing_ms as f64 / total as f64
            } else {
                0.0
            },
            success_rate: if total > 0 {
                state.completed as f64 / total as f64
            } else {
                1.0
            },
        }
    }

    /// Refuses new submissions, drains the queue (marking queued jobs cancelled), then waits up
    /// to `shutdown_timeout` for running jobs to finish before returning, leaving any still
    /// running detached.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, AtomicOrdering::SeqCst);

        let drained: Vec<Job> = {
            let mut state = self.state.lock().await;
            let mut jobs = Vec::new();
            while let Some(q) = state.queue.pop() {
                jobs.push(q.job);
            }
            jobs
        };
        for mut job in drained {
            job.status = JobStatus::Cancelled;
            let _ = self.store.save(&job).await;
            self.publish(&job);
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        loop {
            let still_running = self.state.lock().await.running.len();
            if still_running == 0 || Instant::now() >= deadline {
                if still_running > 0 {
                    warn!("coordinator: shutdown timeout elapsed with {} job(s) still running, detaching", still_running);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn job_type_label(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Backfill => "backfill",
        JobType::Incremental => "incremental",
        JobType::StrategyRun => "strategy_run",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Timeframe;
    use crate::domain::errors::StoreError;
    use std::sync::atomic::AtomicU32;

    struct FakeJobStore;

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn save(&self, _job: &Job) -> Result<(), StoreError> {
            Ok(())
        }
        async fn find_active_by_key(&self, _key: &JobKey) -> Result<Option<Job>, StoreError> {
            Ok(None)
        }
    }

    struct CountingExecutor {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _config: &JobConfig, _cancel: Arc<AtomicBool>) -> Result<serde_json::Value, CoordinatorError> {
            let n = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if n < self.fail_first_n {
                return Err(CoordinatorError::Ingestion(crate::domain::errors::IngestionError::Broker(
                    crate::domain::errors::BrokerError::Connection("flaky".into()),
                )));
            }
            Ok(serde_json::json!({"ok": true}))
        }
    }

    fn test_config(pair: &str) -> JobConfig {
        JobConfig {
            pair: pair.to_string(),
            timeframe: Timeframe::FifteenMin,
            from_ms: None,
            to_ms: None,
            days_per_batch: None,
            lookback_hours: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let mut executors: HashMap<JobType, Arc<dyn JobExecutor>> = HashMap::new();
        executors.insert(
            JobType::Incremental,
            Arc::new(CountingExecutor { calls: AtomicU32::new(0), fail_first_n: 2 }),
        );
        let coordinator = JobCoordinator::new(
            CoordinatorConfig {
                base_retry: Duration::from_millis(1),
                max_retry: Duration::from_millis(5),
                ..CoordinatorConfig::default()
            },
            Arc::new(FakeJobStore),
            executors,
            Arc::new(Metrics::new().unwrap()),
        );

        coordinator
            .submit(JobType::Incremental, 0, test_config("XAU_USD"))
            .await
            .unwrap();
        assert!(coordinator.run_once().await);

        let snapshot = coordinator.metrics_snapshot().await;
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 0);
    }

    #[tokio::test]
    async fn authentication_failures_are_never_retried() {
        struct AuthFailExecutor;
        #[async_trait]
        impl JobExecutor for AuthFailExecutor {
            async fn execute(&self, _config: &JobConfig, _cancel: Arc<AtomicBool>) -> Result<serde_json::Value, CoordinatorError> {
                Err(CoordinatorError::Ingestion(crate::domain::errors::IngestionError::Broker(
                    crate::domain::errors::BrokerError::Authentication("bad key".into()),
                )))
            }
        }
        let mut executors: HashMap<JobType, Arc<dyn JobExecutor>> = HashMap::new();
        executors.insert(JobType::Incremental, Arc::new(AuthFailExecutor));
        let coordinator = JobCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(FakeJobStore),
            executors,
            Arc::new(Metrics::new().unwrap()),
        );

        coordinator
            .submit(JobType::Incremental, 0, test_config("XAU_USD"))
            .await
            .unwrap();
        assert!(coordinator.run_once().await);

        let snapshot = coordinator.metrics_snapshot().await;
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.failed, 1);
    }

    #[tokio::test]
    async fn priority_queue_runs_higher_priority_first() {
        let mut executors: HashMap<JobType, Arc<dyn JobExecutor>> = HashMap::new();
        executors.insert(
            JobType::Incremental,
            Arc::new(CountingExecutor { calls: AtomicU32::new(0), fail_first_n: 0 }),
        );
        let coordinator = JobCoordinator::new(
            CoordinatorConfig::default(),
            Arc::new(FakeJobStore),
            executors,
            Arc::new(Metrics::new().unwrap()),
        );

        coordinator.submit(JobType::Incremental, 1, test_config("LOW")).await.unwrap();
        coordinator.submit(JobType::Incremental, 10, test_config("HIGH")).await.unwrap();

        let next = {
            let mut state = coordinator.state.lock().await;
            state.queue.pop().unwrap().job
        };
        assert_eq!(next.config.pair, "HIGH");
    }
}
