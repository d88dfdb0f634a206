//! Rate Limit Manager. A single `tokio::sync::Mutex`-guarded state struct: one lock, one state
//! struct, async methods that briefly take the lock to decide, then release it before any
//! `.await` that isn't itself a sleep.

use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_second_limit: u32,
    pub per_minute_limit: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_factor: f64,
    pub max_candles_per_request: u32,
    pub adaptive_threshold: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second_limit: 10,
            per_minute_limit: 120,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.25,
            max_candles_per_request: 5000,
            adaptive_threshold: 0.2,
        }
    }
}

struct State {
    /// Timestamps (monotonic) of admitted requests within the last 60s, oldest first.
    request_log: VecDeque<Instant>,
    /// Whether each logged request was rate-limited by the broker, parallel to `request_log`.
    rate_limited_log: VecDeque<bool>,
    consecutive_failures: u32,
    multiplier: f64,
    reserved: std::collections::HashMap<String, u32>,
}

impl State {
    fn new() -> Self {
        Self {
            request_log: VecDeque::new(),
            rate_limited_log: VecDeque::new(),
            consecutive_failures: 0,
            multiplier: 1.0,
            reserved: std::collections::HashMap::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.request_log.front() {
            if now.duration_since(front) > Duration::from_secs(60) {
                self.request_log.pop_front();
                self.rate_limited_log.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_since(&self, now: Instant, window: Duration) -> u32 {
        self.request_log
            .iter()
            .filter(|&&t| now.duration_since(t) <= window)
            .count() as u32
    }

    fn reserved_sum(&self) -> u32 {
        self.reserved.values().sum()
    }

    /// Reserved capacity held by every tag other than `tag` itself, so a caller's own
    /// reservation never counts against its own admission.
    fn reserved_sum_excluding(&self, tag: &str) -> u32 {
        self.reserved
            .iter()
            .filter(|(t, _)| t.as_str() != tag)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Time until the oldest logged request inside `window` ages out of it, i.e. how long
    /// until the next admission slot opens under that window's limit. Zero if nothing in
    /// `request_log` currently falls inside `window`.
    fn time_until_window_clears(&self, now: Instant, window: Duration) -> Duration {
        self.request_log
            .iter()
            .find(|&&t| now.duration_since(t) <= window)
            .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    /// Caller must wait at least this long before retrying admission.
    Wait(Duration),
    /// Circuit tripped by consecutive failures; caller-visible suggested delay included.
    Stress(Duration),
}

pub struct RateLimitManager {
    config: RateLimitConfig,
    state: Mutex<State>,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::new()),
        }
    }

    /// Admission policy. `size` is the number of candles the caller intends to request in one
    /// call.
    pub async fn admit(&self, size: u32, reserve_tag: Option<&str>) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now);

        if state.consecutive_failures >= 5 {
            return Admission::Stress(self.backoff_duration(&state, state.consecutive_failures));
        }

        let per_second = state.count_since(now, Duration::from_secs(1));
        let per_minute = state.count_since(now, Duration::from_secs(60));
        let reserved = match reserve_tag {
            Some(tag) => state.reserved_sum_excluding(tag),
            None => state.reserved_sum(),
        };
        let minute_budget = (self.config.per_minute_limit as f64 * state.multiplier).floor() as u32;

        let second_ok = per_second + size <= self.config.per_second_limit;
        let minute_ok = per_minute + reserved + size <= minute_budget;

        if second_ok && minute_ok {
            for _ in 0..size {
                state.request_log.push_back(now);
                state.rate_limited_log.push_back(false);
            }
            Admission::Admitted
        } else {
            let mut wait = Duration::from_millis(100);
            if !second_ok {
                wait = wait.max(state.time_until_window_clears(now, Duration::from_secs(1)));
            }
            if !minute_ok {
                wait = wait.max(state.time_until_window_clears(now, Duration::from_secs(60)));
            }
            Admission::Wait(wait)
        }
    }

    /// Reserve capacity for a caller tag so other callers cannot starve it.
    pub async fn reserve(&self, tag: &str, amount: u32) {
        let mut state = self.state.lock().await;
        *state.reserved.entry(tag.to_string()).or_insert(0) += amount;
    }

    pub async fn release(&self, tag: &str, amount: u32) {
        let mut state = self.state.lock().await;
        if let Some(v) = state.reserved.get_mut(tag) {
            *v = v.saturating_sub(amount);
        }
    }

    /// Records the outcome of a request for backoff/adaptive-multiplier accounting.
    pub async fn record_result(&self, was_rate_limited: bool) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now);

        if let Some(last) = state.rate_limited_log.back_mut() {
            *last = was_rate_limited;
        }

        if was_rate_limited {
            state.consecutive_failures += 1;
        } else {
            state.consecutive_failures = 0;
        }

        self.rebalance_multiplier(&mut state, now);
    }

    fn rebalance_multiplier(&self, state: &mut State, now: Instant) {
        state.prune(now);
        let total = state.request_log.len();
        if total < 10 {
            return;
        }
        let limited = state.rate_limited_log.iter().filter(|&&b| b).count();
        let r = limited as f64 / total as f64;

        if r > self.config.adaptive_threshold {
            state.multiplier = (state.multiplier * 0.9).max(0.5);
            debug!("rate limiter: adaptive multiplier decreased to {}", state.multiplier);
        } else if r < self.config.adaptive_threshold * 0.5 {
            state.multiplier = (state.multiplier * 1.05).min(1.0);
        }
    }

    /// Backoff policy. `retry_after` overrides the exponential term with no jitter when the
    /// broker supplied one.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(d) = retry_after {
            return d;
        }
        let blocking_state_placeholder = 0u32;
        let _ = blocking_state_placeholder;
        self.compute_backoff(attempt)
    }

    fn compute_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let base = (base_ms * 2f64.powi(attempt as i32 - 1)).min(max_ms);
        let jitter = rand::rng().random_range(0.0..=(base * self.config.jitter_factor));
        Duration::from_millis((base + jitter) as u64)
    }

    fn backoff_duration(&self, _state: &State, attempt: u32) -> Duration {
        self.compute_backoff(attempt.max(1))
    }

    /// Chunking policy: splits `[from_ms, to_ms)` into contiguous,
    /// non-overlapping chunks sized so each chunk's estimated candle count stays under the
    /// safety-scaled request cap, with a 1ms gap between chunk boundaries.
    pub fn chunk_range(&self, from_ms: i64, to_ms: i64, timeframe_ms: i64) -> Vec<(i64, i64)> {
        if to_ms <= from_ms || timeframe_ms <= 0 {
            return Vec::new();
        }

        let total_estimated = ((to_ms - from_ms) / timeframe_ms).max(1);
        let base_cap = self.config.max_candles_per_request as f64;
        let safety = if total_estimated as f64 > base_cap * 2.0 {
            0.5
        } else {
            0.8
        };
        let cap = (base_cap * safety).floor().max(1.0) as i64;
        let mut chunk_span_ms = cap * timeframe_ms;
        if chunk_span_ms <= 0 {
            chunk_span_ms = timeframe_ms;
        }

        let mut chunks = Vec::new();
        let mut cursor = from_ms;
        while cursor < to_ms {
            let mut end = (cursor + chunk_span_ms).min(to_ms);
            if end <= cursor {
                end = (cursor + timeframe_ms).min(to_ms).max(cursor + timeframe_ms);
            }
            chunks.push((cursor, end));
            cursor = end + 1;
        }
        chunks
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    pub async fn multiplier(&self) -> f64 {
        self.state.lock().await.multiplier
    }
}

/// Awaits admission, sleeping through `Wait`/`Stress` responses until admitted. Called by the
/// ingestion pipeline before every outbound broker request.
pub async fn await_admission(manager: &RateLimitManager, size: u32, tag: Option<&str>) {
    loop {
        match manager.admit(size, tag).await {
            Admission::Admitted => return,
            Admission::Wait(d) => tokio::time::sleep(d).await,
            Admission::Stress(d) => {
                warn!("rate limiter: circuit under stress, sleeping {:?}", d);
                tokio::time::sleep(d).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            per_second_limit: 2,
            per_minute_limit: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
            jitter_factor: 0.1,
            max_candles_per_request: 100,
            adaptive_threshold: 0.2,
        }
    }

    #[tokio::test]
    async fn admits_within_budget_and_waits_when_exhausted() {
        let mgr = RateLimitManager::new(fast_config());
        assert_eq!(mgr.admit(1, None).await, Admission::Admitted);
        assert_eq!(mgr.admit(1, None).await, Admission::Admitted);
        // third request within the same second should exceed per-second limit of 2.
        assert!(matches!(mgr.admit(1, None).await, Admission::Wait(_)));
    }

    #[tokio::test]
    async fn chunking_is_contiguous_and_non_overlapping() {
        let mgr = RateLimitManager::new(fast_config());
        let chunks = mgr.chunk_range(0, 100 * 15 * 60_000, 15 * 60_000);
        assert!(!chunks.is_empty());
        for w in chunks.windows(2) {
            assert_eq!(w[1].0, w[0].1 + 1, "chunks must have a 1ms gap at the boundary");
        }
        assert_eq!(chunks.first().unwrap().0, 0);
        assert_eq!(chunks.last().unwrap().1, 100 * 15 * 60_000);
    }

    #[tokio::test]
    async fn empty_range_chunks_to_nothing() {
        let mgr = RateLimitManager::new(fast_config());
        assert!(mgr.chunk_range(100, 100, 15 * 60_000).is_empty());
        assert!(mgr.chunk_range(100, 50, 15 * 60_000).is_empty());
    }

    #[tokio::test]
    async fn backoff_never_below_base_and_retry_after_overrides() {
        let mgr = RateLimitManager::new(fast_config());
        let d = mgr.backoff(1, None);
        assert!(d >= Duration::from_millis(10));
        let overridden = mgr.backoff(5, Some(Duration::from_millis(777)));
        assert_eq!(overridden, Duration::from_millis(777));
    }

    #[tokio::test]
    async fn consecutive_failures_trip_stress_circuit() {
        let mgr = RateLimitManager::new(fast_config());
        for _ in 0..5 {
            mgr.record_result(true).await;
        }
        assert_eq!(mgr.consecutive_failures().await, 5);
        match mgr.admit(1, None).await {
            Admission::Stress(_) => {}
            other => panic!("expected Stress admission, got {:?}", other),
        }
    }
}
