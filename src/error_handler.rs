//! # Error Handler
//!
//! Central error capture and automated recovery. Every operational failure is
//! recorded as a [`BotError`] with a category and severity; retryable errors
//! get a background recovery loop driven by the registered per-category
//! [`RecoveryStrategy`](crate::recovery::RecoveryStrategy) with exponential
//! backoff and jitter.
//!
//! ## Features
//!
//! - **Taxonomy**: eight categories × four severities, with a retry budget
//!   derived from both (`max_retries = base × multiplier`, floored)
//! - **Retryability**: by category (NETWORK, WEBSOCKET, EXTERNAL_API) or by
//!   transient substrings in the message (timeouts, resets, DNS)
//! - **Recovery loops**: spawned per retryable error, abandoned after the
//!   retry budget with a terminal log line
//! - **Statistics**: totals, per-category/severity breakdowns, recent errors,
//!   and retention-based cleanup

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::metrics;
use crate::recovery::RecoveryStrategy;

/// What subsystem an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Configuration,
    Network,
    Websocket,
    Trading,
    Validation,
    System,
    ExternalApi,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Websocket => "WEBSOCKET",
            ErrorCategory::Trading => "TRADING",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::System => "SYSTEM",
            ErrorCategory::ExternalApi => "EXTERNAL_API",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    /// Retry budget multiplier. Zero means the category never retries.
    pub fn retry_multiplier(&self) -> f64 {
        match self {
            ErrorCategory::Network => 1.5,
            ErrorCategory::Websocket => 1.2,
            ErrorCategory::ExternalApi => 1.0,
            ErrorCategory::Trading => 0.5,
            ErrorCategory::Configuration => 0.0,
            ErrorCategory::Validation => 0.0,
            ErrorCategory::System => 0.8,
            ErrorCategory::Unknown => 1.0,
        }
    }

    /// Categories whose errors are transient by nature.
    pub fn inherently_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Websocket | ErrorCategory::ExternalApi
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad an error is. Ordering follows escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    /// Base retry budget before the category multiplier.
    pub fn base_retries(&self) -> u32 {
        match self {
            ErrorSeverity::Low => 3,
            ErrorSeverity::Medium => 5,
            ErrorSeverity::High => 7,
            ErrorSeverity::Critical => 10,
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budget for a category/severity pair.
pub fn max_retries(category: ErrorCategory, severity: ErrorSeverity) -> u32 {
    (severity.base_retries() as f64 * category.retry_multiplier()).floor() as u32
}

/// Message substrings that mark an error transient regardless of category.
const RETRYABLE_PATTERNS: &[&str] = &[
    "connection reset",
    "econnreset",
    "timeout",
    "timed out",
    "dns",
    "getaddrinfo",
    "connection refused",
    "econnrefused",
    "socket hang up",
    "network unreachable",
];

/// Transient by category, or by a transient substring in the message.
pub fn is_retryable(category: ErrorCategory, message: &str) -> bool {
    if category.inherently_retryable() {
        return true;
    }
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// One captured operational error with its recovery state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotError {
    pub id: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub resolved: bool,
    pub resolution_time: Option<DateTime<Utc>>,
}

impl BotError {
    /// Terminal means the retry budget ran out without a resolution.
    pub fn is_exhausted(&self) -> bool {
        !self.resolved && self.retry_count >= self.max_retries
    }
}

/// Exponential backoff with additive jitter. `retry_count` is 1-based.
pub fn backoff_delay(retry_count: u32, base_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    let shift = retry_count.saturating_sub(1).min(20);
    let exponential = base_ms.saturating_mul(1u64 << shift);
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..jitter_ms)
    } else {
        0
    };
    Duration::from_millis(exponential.min(max_ms) + jitter)
}

/// Backoff tuning for recovery loops.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
        }
    }
}

/// Aggregate counters over the error store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total_handled: u64,
    pub total_resolved: u64,
    pub total_abandoned: u64,
    pub active: usize,
    pub by_category: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

pub struct ErrorHandler {
    errors: DashMap<String, BotError>,
    strategies: RwLock<HashMap<ErrorCategory, Arc<dyn RecoveryStrategy>>>,
    policy: RecoveryPolicy,
    shutdown: AtomicBool,
    total_handled: AtomicU64,
    total_resolved: AtomicU64,
    total_abandoned: AtomicU64,
}

impl ErrorHandler {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            errors: DashMap::new(),
            strategies: RwLock::new(HashMap::new()),
            policy,
            shutdown: AtomicBool::new(false),
            total_handled: AtomicU64::new(0),
            total_resolved: AtomicU64::new(0),
            total_abandoned: AtomicU64::new(0),
        }
    }

    /// Register the recovery strategy for a category. Categories without a
    /// strategy log a warning on each attempt and never recover.
    pub fn register_strategy(&self, category: ErrorCategory, strategy: Arc<dyn RecoveryStrategy>) {
        info!(
            "[ErrorHandler] Registered recovery strategy '{}' for {}",
            strategy.name(),
            category
        );
        let mut strategies = self.strategies.write().unwrap_or_else(|e| e.into_inner());
        strategies.insert(category, strategy);
    }

    fn strategy_for(&self, category: ErrorCategory) -> Option<Arc<dyn RecoveryStrategy>> {
        let strategies = self.strategies.read().unwrap_or_else(|e| e.into_inner());
        strategies.get(&category).cloned()
    }

    /// Capture an error, log it by severity, and spawn a recovery loop when
    /// it is retryable. Returns the error id. Must be called on the runtime.
    pub fn handle_error(
        self: &Arc<Self>,
        error: impl std::fmt::Display,
        category: ErrorCategory,
        severity: ErrorSeverity,
        context: Value,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let message = error.to_string();
        let retryable = is_retryable(category, &message);
        let bot_error = BotError {
            id: id.clone(),
            message,
            category,
            severity,
            context,
            timestamp: Utc::now(),
            retryable,
            retry_count: 0,
            max_retries: max_retries(category, severity),
            resolved: false,
            resolution_time: None,
        };

        match severity {
            ErrorSeverity::Critical => error!(
                "🚨 [ErrorHandler] CRITICAL {} error: {} (id: {})",
                category, bot_error.message, id
            ),
            ErrorSeverity::High => error!(
                "❌ [ErrorHandler] HIGH {} error: {} (id: {})",
                category, bot_error.message, id
            ),
            ErrorSeverity::Medium => warn!(
                "⚠️ [ErrorHandler] MEDIUM {} error: {} (id: {})",
                category, bot_error.message, id
            ),
            ErrorSeverity::Low => info!(
                "[ErrorHandler] LOW {} error: {} (id: {})",
                category, bot_error.message, id
            ),
        }

        self.errors.insert(id.clone(), bot_error);
        self.total_handled.fetch_add(1, Ordering::Relaxed);
        metrics::increment_errors_captured(category.as_str(), severity.as_str());
        metrics::set_active_errors(self.active_count() as f64);

        if retryable && !self.is_shutdown() {
            let handler = Arc::clone(self);
            let error_id = id.clone();
            tokio::spawn(async move {
                handler.recovery_loop(error_id).await;
            });
        }

        id
    }

    /// Drives recovery for one error until resolved, abandoned, or shutdown.
    async fn recovery_loop(self: Arc<Self>, error_id: String) {
        loop {
            if self.is_shutdown() {
                debug!("[ErrorHandler] Recovery for {} stopped by shutdown", error_id);
                return;
            }

            let (category, retry_count, max) = match self.errors.get(&error_id) {
                Some(e) => (e.category, e.retry_count, e.max_retries),
                None => return, // cleaned up underneath us
            };

            // A zero budget abandons before the first attempt.
            if retry_count >= max {
                self.mark_abandoned(&error_id, retry_count);
                return;
            }

            let recovered = match self.strategy_for(category) {
                Some(strategy) => {
                    info!(
                        "🔄 [ErrorHandler] Recovery attempt {}/{} for {} via '{}'",
                        retry_count + 1,
                        max,
                        error_id,
                        strategy.name()
                    );
                    let snapshot = match self.errors.get(&error_id) {
                        Some(e) => e.value().clone(),
                        None => return,
                    };
                    strategy.attempt_recovery(&snapshot).await
                }
                None => {
                    warn!(
                        "⚠️ [ErrorHandler] No recovery strategy registered for {}",
                        category
                    );
                    false
                }
            };

            if recovered {
                self.mark_resolved(&error_id);
                return;
            }

            let new_count = match self.errors.get_mut(&error_id) {
                Some(mut e) => {
                    e.retry_count += 1;
                    e.retry_count
                }
                None => return,
            };

            if new_count >= max {
                self.mark_abandoned(&error_id, new_count);
                return;
            }

            let delay = backoff_delay(
                new_count,
                self.policy.base_delay_ms,
                self.policy.max_delay_ms,
                self.policy.jitter_ms,
            );
            debug!(
                "[ErrorHandler] Backing off {:?} before next attempt for {}",
                delay, error_id
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn mark_resolved(&self, error_id: &str) {
        if let Some(mut e) = self.errors.get_mut(error_id) {
            e.resolved = true;
            e.resolution_time = Some(Utc::now());
        }
        self.total_resolved.fetch_add(1, Ordering::Relaxed);
        metrics::increment_recovery_outcome("resolved");
        metrics::set_active_errors(self.active_count() as f64);
        info!("✅ [ErrorHandler] Recovered from error {}", error_id);
    }

    fn mark_abandoned(&self, error_id: &str, attempts: u32) {
        self.total_abandoned.fetch_add(1, Ordering::Relaxed);
        metrics::increment_recovery_outcome("abandoned");
        metrics::set_active_errors(self.active_count() as f64);
        error!(
            "🚨 [ErrorHandler] Recovery abandoned for {} after {} attempts",
            error_id, attempts
        );
    }

    /// Unresolved errors that still have retry budget.
    fn active_count(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| !e.resolved && !e.is_exhausted())
            .count()
    }

    pub fn get_error(&self, error_id: &str) -> Option<BotError> {
        self.errors.get(error_id).map(|e| e.value().clone())
    }

    pub fn stats(&self) -> ErrorStats {
        let mut by_category: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut active = 0usize;
        for entry in self.errors.iter() {
            *by_category
                .entry(entry.category.as_str().to_string())
                .or_insert(0) += 1;
            *by_severity
                .entry(entry.severity.as_str().to_string())
                .or_insert(0) += 1;
            if !entry.resolved && !entry.is_exhausted() {
                active += 1;
            }
        }
        ErrorStats {
            total_handled: self.total_handled.load(Ordering::Relaxed),
            total_resolved: self.total_resolved.load(Ordering::Relaxed),
            total_abandoned: self.total_abandoned.load(Ordering::Relaxed),
            active,
            by_category,
            by_severity,
        }
    }

    /// Most recent errors first.
    pub fn recent_errors(&self, limit: usize) -> Vec<BotError> {
        let mut errors: Vec<BotError> = self.errors.iter().map(|e| e.value().clone()).collect();
        errors.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        errors.truncate(limit);
        errors
    }

    /// Drop resolved or exhausted errors once they have been settled for
    /// longer than the retention window. Resolved errors age from their
    /// resolution time, exhausted ones from creation. Active errors are never
    /// removed. Returns how many were dropped.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let before = self.errors.len();
        self.errors.retain(|_, e| {
            let settled_at = e.resolution_time.unwrap_or(e.timestamp);
            !(settled_at < cutoff && (e.resolved || e.is_exhausted()))
        });
        let removed = before - self.errors.len();
        if removed > 0 {
            debug!("[ErrorHandler] Cleaned up {} settled errors", removed);
        }
        removed
    }

    /// Stops new recovery loops and ends running ones at their next check.
    pub fn set_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(RecoveryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct ScriptedStrategy {
        succeed_after: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecoveryStrategy for ScriptedStrategy {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn attempt_recovery(&self, _error: &BotError) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            call >= self.succeed_after
        }
    }

    fn fast_handler() -> Arc<ErrorHandler> {
        Arc::new(ErrorHandler::new(RecoveryPolicy {
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_ms: 0,
        }))
    }

    async fn wait_for(pred: impl Fn() -> bool) {
        for _ in 0..400 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    // === Retry budget table ===

    #[test]
    fn test_max_retries_table() {
        assert_eq!(
            max_retries(ErrorCategory::Network, ErrorSeverity::High),
            10
        );
        assert_eq!(
            max_retries(ErrorCategory::Configuration, ErrorSeverity::Low),
            0
        );
        assert_eq!(
            max_retries(ErrorCategory::Websocket, ErrorSeverity::Medium),
            6
        );
        assert_eq!(
            max_retries(ErrorCategory::Trading, ErrorSeverity::Critical),
            5
        );
        assert_eq!(
            max_retries(ErrorCategory::Validation, ErrorSeverity::Critical),
            0
        );
        assert_eq!(max_retries(ErrorCategory::System, ErrorSeverity::Low), 2);
    }

    #[test]
    fn test_retryable_by_category_and_message() {
        assert!(!is_retryable(ErrorCategory::Trading, "plain failure"));
        assert!(is_retryable(ErrorCategory::Network, "plain failure"));
        assert!(is_retryable(
            ErrorCategory::Trading,
            "upstream ETIMEDOUT: request Timed Out"
        ));
        assert!(is_retryable(
            ErrorCategory::Trading,
            "connect ECONNREFUSED 10.0.0.1:443"
        ));
    }

    #[test]
    fn test_bot_error_snapshot_serializes_recovery_fields() {
        let error = BotError {
            id: "e-1".into(),
            message: "gateway timeout".into(),
            category: ErrorCategory::Network,
            severity: ErrorSeverity::Medium,
            context: json!({}),
            timestamp: Utc::now(),
            retryable: true,
            retry_count: 2,
            max_retries: 7,
            resolved: true,
            resolution_time: Some(Utc::now()),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["retryable"], true);
        assert_eq!(value["retryCount"], 2);
        assert_eq!(value["maxRetries"], 7);
        assert!(value["resolutionTime"].is_string());
    }

    #[test]
    fn test_backoff_sequence_and_cap() {
        let delays: Vec<u64> = (1..=6)
            .map(|n| backoff_delay(n, 1_000, 30_000, 0).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        for _ in 0..50 {
            let d = backoff_delay(1, 1_000, 30_000, 1_000).as_millis() as u64;
            assert!((1_000..2_000).contains(&d));
        }
    }

    #[test]
    fn test_category_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCategory::ExternalApi).unwrap(),
            "\"EXTERNAL_API\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorSeverity::Critical).unwrap(),
            "\"CRITICAL\""
        );
    }

    // === Recovery loop ===

    #[tokio::test]
    async fn test_recovery_resolves_on_strategy_success() {
        let handler = fast_handler();
        handler.register_strategy(
            ErrorCategory::Network,
            Arc::new(ScriptedStrategy {
                succeed_after: 2,
                calls: AtomicU32::new(0),
            }),
        );

        let id = handler.handle_error(
            "socket timed out",
            ErrorCategory::Network,
            ErrorSeverity::Low,
            json!({ "op": "connect" }),
        );

        wait_for(|| handler.stats().total_resolved == 1).await;
        let resolved = handler.get_error(&id).unwrap();
        assert!(resolved.resolved);
        assert!(resolved.retryable);
        assert!(resolved.resolution_time.is_some());
        assert_eq!(resolved.retry_count, 1);
    }

    #[tokio::test]
    async fn test_recovery_abandons_after_budget() {
        let handler = fast_handler();
        handler.register_strategy(
            ErrorCategory::Network,
            Arc::new(ScriptedStrategy {
                succeed_after: u32::MAX,
                calls: AtomicU32::new(0),
            }),
        );

        // LOW × NETWORK = floor(3 × 1.5) = 4 attempts
        let id = handler.handle_error(
            "dns lookup failed",
            ErrorCategory::Network,
            ErrorSeverity::Low,
            json!({}),
        );

        wait_for(|| handler.stats().total_abandoned == 1).await;
        let exhausted = handler.get_error(&id).unwrap();
        assert_eq!(exhausted.retry_count, 4);
        assert!(!exhausted.resolved);
        assert!(exhausted.resolution_time.is_none());
        assert!(exhausted.is_exhausted());
    }

    #[tokio::test]
    async fn test_zero_budget_never_attempts() {
        let handler = fast_handler();
        // retryable by message, but CONFIGURATION has a zero multiplier
        let id = handler.handle_error(
            "config fetch timed out",
            ErrorCategory::Configuration,
            ErrorSeverity::Critical,
            json!({}),
        );

        wait_for(|| handler.stats().total_abandoned == 1).await;
        assert_eq!(handler.get_error(&id).unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_has_no_loop() {
        let handler = fast_handler();
        let id = handler.handle_error(
            "invalid pool fee tier",
            ErrorCategory::Validation,
            ErrorSeverity::High,
            json!({}),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        let e = handler.get_error(&id).unwrap();
        assert_eq!(e.retry_count, 0);
        assert!(!e.resolved);
        assert_eq!(handler.stats().total_abandoned, 0);
    }

    #[tokio::test]
    async fn test_stats_and_cleanup() {
        let handler = fast_handler();
        handler.handle_error(
            "bad settings",
            ErrorCategory::Configuration,
            ErrorSeverity::Low,
            json!({}),
        );
        let keep_id = handler.handle_error(
            "still failing",
            ErrorCategory::Trading,
            ErrorSeverity::Medium,
            json!({}),
        );

        let stats = handler.stats();
        assert_eq!(stats.total_handled, 2);
        assert_eq!(stats.by_category.get("CONFIGURATION"), Some(&1));
        assert_eq!(stats.by_category.get("TRADING"), Some(&1));
        assert_eq!(stats.by_severity.get("MEDIUM"), Some(&1));

        // zero retention settles the CONFIGURATION error (exhausted), while
        // the TRADING one still has budget and must survive
        let removed = handler.cleanup(Duration::from_secs(0));
        assert_eq!(removed, 1);
        assert!(handler.get_error(&keep_id).is_some());
    }

    #[tokio::test]
    async fn test_cleanup_ages_resolved_errors_from_resolution_time() {
        let handler = fast_handler();
        handler.register_strategy(
            ErrorCategory::Network,
            Arc::new(ScriptedStrategy {
                succeed_after: 1,
                calls: AtomicU32::new(0),
            }),
        );
        let id = handler.handle_error(
            "gateway connection reset",
            ErrorCategory::Network,
            ErrorSeverity::Low,
            json!({}),
        );
        wait_for(|| handler.stats().total_resolved == 1).await;

        // long-lived error resolved just now: the retention clock starts at
        // the resolution, so a window shorter than its age keeps it
        if let Some(mut e) = handler.errors.get_mut(&id) {
            e.timestamp = Utc::now() - chrono::Duration::hours(2);
        }
        assert_eq!(handler.cleanup(Duration::from_secs(3_600)), 0);
        assert!(handler.get_error(&id).is_some());

        // once the resolution itself falls out of the window, it goes
        if let Some(mut e) = handler.errors.get_mut(&id) {
            e.resolution_time = Some(Utc::now() - chrono::Duration::hours(2));
        }
        assert_eq!(handler.cleanup(Duration::from_secs(3_600)), 1);
        assert!(handler.get_error(&id).is_none());
    }

    #[tokio::test]
    async fn test_recent_errors_newest_first() {
        let handler = fast_handler();
        handler.handle_error("first", ErrorCategory::Trading, ErrorSeverity::Low, json!({}));
        tokio::time::sleep(Duration::from_millis(5)).await;
        handler.handle_error("second", ErrorCategory::Trading, ErrorSeverity::Low, json!({}));

        let recent = handler.recent_errors(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "second");
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_loops() {
        let handler = fast_handler();
        handler.register_strategy(
            ErrorCategory::Network,
            Arc::new(ScriptedStrategy {
                succeed_after: 1,
                calls: AtomicU32::new(0),
            }),
        );
        handler.set_shutdown();

        let id = handler.handle_error(
            "timeout",
            ErrorCategory::Network,
            ErrorSeverity::Low,
            json!({}),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        let e = handler.get_error(&id).unwrap();
        assert!(!e.resolved);
        assert_eq!(e.retry_count, 0);
    }
}
