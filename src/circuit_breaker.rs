//! # Circuit Breaker
//!
//! Per-dependency circuit breakers with the classic three-state machine:
//! CLOSED counts consecutive failures, OPEN fast-fails until the recovery
//! timeout elapses, HALF_OPEN admits a bounded number of trial calls and a
//! single success closes the circuit again.
//!
//! ## Features
//!
//! - **Fail-fast**: calls against an open breaker return immediately with the
//!   remaining cooldown, without running the operation
//! - **Lazy transitions**: OPEN → HALF_OPEN happens at call time once the
//!   recovery timeout has passed, no background timer involved
//! - **Registry**: breakers are created explicitly by name; executing against
//!   an unregistered name is an error, never an implicit registration
//! - **Stats**: total/failed/rejected counters plus last-failure and
//!   next-attempt times per breaker

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: 0 closed, 1 open, 2 half-open.
    fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }

    fn as_cell(&self) -> u8 {
        self.as_gauge() as u8
    }

    fn from_cell(cell: u8) -> CircuitState {
        match cell {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,
    /// How long OPEN fast-fails before trial calls are admitted.
    pub recovery_timeout: Duration,
    /// Trial calls admitted per HALF_OPEN episode.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_calls: u32,
    // set while OPEN, cleared on any transition out of it
    next_attempt: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    // mirror of inner.state, written under the lock, for sync readers
    state_cell: AtomicU8,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_calls: 0,
                next_attempt: None,
                last_failure_time: None,
            }),
            state_cell: AtomicU8::new(CircuitState::Closed.as_cell()),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn commit_state(&self, state: CircuitState) {
        self.state_cell.store(state.as_cell(), Ordering::Release);
        metrics::set_circuit_breaker_state(&self.name, state.as_gauge());
    }

    /// Run `operation` under the breaker. The admission lock is dropped while
    /// the operation itself runs, so slow calls never serialize each other.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                CircuitState::Closed => {}
                CircuitState::Open => {
                    let now = Instant::now();
                    match inner.next_attempt {
                        Some(at) if now >= at => {
                            inner.state = CircuitState::HalfOpen;
                            inner.half_open_calls = 1; // this call is the first trial
                            inner.next_attempt = None;
                            info!(
                                "🔄 [CircuitBreaker] '{}' entering HALF_OPEN for trial calls",
                                self.name
                            );
                            self.commit_state(CircuitState::HalfOpen);
                        }
                        _ => {
                            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                            metrics::increment_circuit_breaker_rejected(&self.name);
                            let retry_in_ms = inner
                                .next_attempt
                                .map(|at| at.saturating_duration_since(now).as_millis() as u64)
                                .unwrap_or(0);
                            return Err(CircuitBreakerError::Open {
                                name: self.name.clone(),
                                retry_in_ms,
                            });
                        }
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_calls >= self.config.half_open_max_calls {
                        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                        metrics::increment_circuit_breaker_rejected(&self.name);
                        return Err(CircuitBreakerError::HalfOpenExhausted {
                            name: self.name.clone(),
                        });
                    }
                    inner.half_open_calls += 1;
                }
            }
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(source) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Operation { source })
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_calls = 0;
                inner.next_attempt = None;
                info!(
                    "✅ [CircuitBreaker] '{}' closed after successful trial",
                    self.name
                );
                self.commit_state(CircuitState::Closed);
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // stale completion from before the trip, state stands
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().await;
        inner.last_failure_time = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_calls = 0;
                inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                warn!(
                    "⚠️ [CircuitBreaker] '{}' trial failed, reopening for {:?}",
                    self.name, self.config.recovery_timeout
                );
                self.commit_state(CircuitState::Open);
                metrics::increment_circuit_breaker_opened(&self.name);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                    error!(
                        "🚨 [CircuitBreaker] '{}' opened after {} consecutive failures",
                        self.name, inner.failure_count
                    );
                    self.commit_state(CircuitState::Open);
                    metrics::increment_circuit_breaker_opened(&self.name);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Last committed state without taking the async lock. Suited to sync
    /// contexts like health probes; only execute-time transitions advance it.
    pub fn current_state(&self) -> CircuitState {
        CircuitState::from_cell(self.state_cell.load(Ordering::Acquire))
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock().await;
        // project the monotonic deadline onto the wall clock
        let next_attempt_time = inner.next_attempt.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            Utc::now() + chrono::Duration::milliseconds(remaining.as_millis() as i64)
        });
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_calls: inner.half_open_calls,
            last_failure_time: inner.last_failure_time,
            next_attempt_time,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker closed. Lifetime totals survive, episode counters
    /// do not.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_calls = 0;
        inner.next_attempt = None;
        inner.last_failure_time = None;
        info!("[CircuitBreaker] '{}' reset to CLOSED", self.name);
        self.commit_state(CircuitState::Closed);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Trial calls admitted in the current HALF_OPEN episode.
    pub half_open_calls: u32,
    /// When the last failure was recorded, across states.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time trial calls become admissible; set while OPEN.
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

/// Named breakers, created explicitly at wiring time.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Create (or return the existing) breaker under `name` with the registry
    /// default config.
    pub fn register(&self, name: &str) -> Arc<CircuitBreaker> {
        self.register_with(name, self.default_config.clone())
    }

    pub fn register_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("[CircuitBreaker] Registered breaker '{}'", name);
                metrics::set_circuit_breaker_state(name, CircuitState::Closed.as_gauge());
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone();
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Execute under the named breaker. Unknown names fail instead of
    /// auto-registering, so protected call sites stay explicit.
    pub async fn execute<F, Fut, T>(
        &self,
        name: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.get(name) {
            Some(breaker) => breaker.execute(operation).await,
            None => Err(CircuitBreakerError::NotRegistered {
                name: name.to_string(),
            }),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|b| b.key().clone()).collect()
    }

    /// Operator action: force one breaker closed. Returns false for unknown
    /// names.
    pub async fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }

    /// Operator action: force every registered breaker closed.
    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .iter()
            .map(|b| Arc::clone(b.value()))
            .collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }

    pub async fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .iter()
            .map(|b| Arc::clone(b.value()))
            .collect();
        let mut stats = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            stats.push(breaker.stats().await);
        }
        stats
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker '{name}' is open, retry in {retry_in_ms}ms")]
    Open { name: String, retry_in_ms: u64 },
    #[error("circuit breaker '{name}' half-open trial quota exhausted")]
    HalfOpenExhausted { name: String },
    #[error("circuit breaker '{name}' is not registered")]
    NotRegistered { name: String },
    #[error("operation failed: {source}")]
    Operation {
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(50),
            half_open_max_calls: 3,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError> {
        breaker
            .execute(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, CircuitBreakerError> {
        breaker.execute(|| async { Ok::<_, anyhow::Error>(7) }).await
    }

    #[tokio::test]
    async fn test_threshold_trips_then_fast_fails_then_single_success_closes() {
        let breaker = CircuitBreaker::new("api", fast_config());

        for _ in 0..4 {
            assert!(matches!(
                fail(&breaker).await,
                Err(CircuitBreakerError::Operation { .. })
            ));
            assert_eq!(breaker.state().await, CircuitState::Closed);
        }
        assert!(matches!(
            fail(&breaker).await,
            Err(CircuitBreakerError::Operation { .. })
        ));
        assert_eq!(breaker.state().await, CircuitState::Open);

        // fast-fail without running the operation
        match succeed(&breaker).await {
            Err(CircuitBreakerError::Open { name, .. }) => assert_eq!(name, "api"),
            other => panic!("expected Open rejection, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(60)).await;

        // first call after the timeout is a half-open trial; one success closes
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state().await, CircuitState::Closed);

        let stats = breaker.stats().await;
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_failures, 5);
        assert_eq!(stats.rejected_calls, 1);
        assert_eq!(stats.total_calls, 7); // 5 failures + 1 rejection + 1 trial
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failure_count() {
        let breaker = CircuitBreaker::new("api", fast_config());
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        succeed(&breaker).await.unwrap();
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        // 4 + 4 failures with a success between never reaches the threshold
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens_with_fresh_timeout() {
        let breaker = CircuitBreaker::new("api", fast_config());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(
            fail(&breaker).await,
            Err(CircuitBreakerError::Operation { .. })
        ));
        assert_eq!(breaker.state().await, CircuitState::Open);

        // freshly reopened: still fast-failing
        assert!(matches!(
            succeed(&breaker).await,
            Err(CircuitBreakerError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn test_half_open_quota_rejects_surplus_trials() {
        let breaker = Arc::new(CircuitBreaker::new(
            "api",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(20),
                half_open_max_calls: 1,
            },
        ));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(25)).await;

        let slow = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            slow.execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // the single trial slot is taken by the in-flight call
        assert!(matches!(
            succeed(&breaker).await,
            Err(CircuitBreakerError::HalfOpenExhausted { .. })
        ));

        trial.await.unwrap().unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stats_surface_failure_and_attempt_clocks() {
        let breaker = Arc::new(CircuitBreaker::new(
            "api",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(20),
                half_open_max_calls: 2,
            },
        ));
        let fresh = breaker.stats().await;
        assert!(fresh.last_failure_time.is_none());
        assert!(fresh.next_attempt_time.is_none());
        assert_eq!(fresh.half_open_calls, 0);

        let before = Utc::now();
        let _ = fail(&breaker).await;
        let open = breaker.stats().await;
        assert_eq!(open.state, CircuitState::Open);
        let failed_at = open.last_failure_time.unwrap();
        assert!(failed_at >= before);
        assert!(open.next_attempt_time.unwrap() >= failed_at);

        tokio::time::sleep(Duration::from_millis(25)).await;
        let slow = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            slow.execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        // the in-flight trial shows up as half-open occupancy
        let half_open = breaker.stats().await;
        assert_eq!(half_open.state, CircuitState::HalfOpen);
        assert_eq!(half_open.half_open_calls, 1);
        assert!(half_open.next_attempt_time.is_none());

        trial.await.unwrap().unwrap();
        let closed = breaker.stats().await;
        assert_eq!(closed.state, CircuitState::Closed);
        assert_eq!(closed.half_open_calls, 0);
        assert!(closed.last_failure_time.is_some());

        breaker.reset().await;
        assert!(breaker.stats().await.last_failure_time.is_none());
    }

    #[tokio::test]
    async fn test_reset_closes_and_keeps_lifetime_totals() {
        let breaker = CircuitBreaker::new("api", fast_config());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        let stats = breaker.stats().await;
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_failures, 5);

        succeed(&breaker).await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_requires_explicit_registration() {
        let registry = CircuitBreakerRegistry::default();
        let result = registry
            .execute("unknown", || async { Ok::<_, anyhow::Error>(()) })
            .await;
        match result {
            Err(CircuitBreakerError::NotRegistered { name }) => assert_eq!(name, "unknown"),
            other => panic!("expected NotRegistered, got {:?}", other),
        }

        registry.register("galachain-api");
        registry
            .execute("galachain-api", || async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        assert_eq!(registry.names(), vec!["galachain-api".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_register_is_idempotent() {
        let registry = CircuitBreakerRegistry::default();
        let first = registry.register("api");
        let _ = fail(&first).await;
        let second = registry.register("api");
        assert_eq!(second.stats().await.total_failures, 1);
    }

    #[tokio::test]
    async fn test_current_state_mirrors_transitions_and_reset_all_closes() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        });
        let api = registry.register("api");
        let db = registry.register("db");
        assert_eq!(api.current_state(), CircuitState::Closed);

        let _ = fail(&api).await;
        let _ = fail(&api).await;
        let _ = fail(&db).await;
        let _ = fail(&db).await;
        assert_eq!(api.current_state(), CircuitState::Open);
        assert_eq!(db.current_state(), CircuitState::Open);

        registry.reset_all().await;
        assert_eq!(api.current_state(), CircuitState::Closed);
        assert_eq!(db.current_state(), CircuitState::Closed);
        assert!(registry.reset("api").await);
        assert!(!registry.reset("missing").await);
    }
}
