//! Layered configuration: defaults, optional `Config.toml`, then environment
//! overrides (`STREAM_WS_URL`, `STREAM_CHANNEL`, `STREAM_LIVENESS_PROBE_URL`,
//! `STREAM_LOG_LEVEL`). Every field has a default so the SDK runs with no
//! config file at all.

use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error_handler::RecoveryPolicy;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    #[serde(default = "default_ws_url")]
    pub url: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Consecutive failed connects before the transport gives up; 0 = retry forever.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_confirmation_window_secs")]
    pub confirmation_window_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_ws_url() -> String {
    "wss://gateway.stream.gala.com/ws".to_string()
}
fn default_channel() -> String {
    "blocks".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_confirmation_window_secs() -> u64 {
    15
}
fn default_event_buffer() -> usize {
    1_024
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            channel: default_channel(),
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            confirmation_window_secs: default_confirmation_window_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecoverySettings {
    #[serde(default = "default_recovery_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_recovery_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_recovery_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_error_retention_secs")]
    pub error_retention_secs: u64,
    /// Pause before each connectivity probe attempt.
    #[serde(default = "default_recovery_pause_ms")]
    pub pause_ms: u64,
    /// HTTP endpoint probed to confirm connectivity recovery. None means the
    /// pause alone counts as recovery.
    #[serde(default)]
    pub liveness_probe_url: Option<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_recovery_base_delay_ms() -> u64 {
    1_000
}
fn default_recovery_max_delay_ms() -> u64 {
    30_000
}
fn default_recovery_jitter_ms() -> u64 {
    1_000
}
fn default_error_retention_secs() -> u64 {
    3_600
}
fn default_recovery_pause_ms() -> u64 {
    2_000
}
fn default_probe_timeout_secs() -> u64 {
    5
}

impl RecoverySettings {
    pub fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ms: self.jitter_ms,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.error_retention_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_recovery_base_delay_ms(),
            max_delay_ms: default_recovery_max_delay_ms(),
            jitter_ms: default_recovery_jitter_ms(),
            error_retention_secs: default_error_retention_secs(),
            pause_ms: default_recovery_pause_ms(),
            liveness_probe_url: None,
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_breaker_recovery_timeout_secs() -> u64 {
    30
}
fn default_half_open_max_calls() -> u32 {
    3
}

impl CircuitBreakerSettings {
    pub fn config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_breaker_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsSettings {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_false() -> bool {
    false
}
fn default_metrics_port() -> u16 {
    9094
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: default_false(),
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    /// Load from an explicit path. The file is optional; defaults cover a
    /// missing or partial one.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("STREAM_WS_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.stream.url = trimmed.to_string();
            }
        }
        if let Ok(channel) = env::var("STREAM_CHANNEL") {
            let trimmed = channel.trim();
            if !trimmed.is_empty() {
                self.stream.channel = trimmed.to_string();
            }
        }
        if let Ok(probe) = env::var("STREAM_LIVENESS_PROBE_URL") {
            let trimmed = probe.trim();
            if !trimmed.is_empty() {
                self.recovery.liveness_probe_url = Some(trimmed.to_string());
            }
        }
        if let Ok(level) = env::var("STREAM_LOG_LEVEL") {
            let trimmed = level.trim();
            if !trimmed.is_empty() {
                self.log.level = trimmed.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // loading reads process-global env vars, so these tests serialize
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_without_config_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let settings = Settings::from_file("/definitely/not/here/Config.toml").unwrap();
        assert_eq!(settings.stream.url, "wss://gateway.stream.gala.com/ws");
        assert_eq!(settings.stream.channel, "blocks");
        assert_eq!(settings.stream.event_buffer, 1_024);
        assert_eq!(settings.circuit_breaker.failure_threshold, 5);
        assert_eq!(settings.recovery.jitter_ms, 1_000);
        assert_eq!(settings.log.level, "info");
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(
            &path,
            r#"
[stream]
url = "ws://localhost:9001/ws"
channel = "testnet-blocks"

[circuit_breaker]
failure_threshold = 7
"#,
        )
        .unwrap();

        let settings = Settings::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.stream.url, "ws://localhost:9001/ws");
        assert_eq!(settings.stream.channel, "testnet-blocks");
        // untouched sections fall back to defaults
        assert_eq!(settings.stream.heartbeat_interval_secs, 30);
        assert_eq!(settings.circuit_breaker.failure_threshold, 7);
        assert_eq!(settings.circuit_breaker.half_open_max_calls, 3);
        assert_eq!(settings.recovery.base_delay_ms, 1_000);
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(
            &path,
            r#"
[stream]
url = "ws://from-file:9001/ws"

[log]
level = "warn"
"#,
        )
        .unwrap();

        env::set_var("STREAM_WS_URL", "wss://from-env.example.com/ws");
        env::set_var("STREAM_CHANNEL", "env-blocks");
        env::set_var(
            "STREAM_LIVENESS_PROBE_URL",
            "https://status.example.com/health",
        );
        env::set_var("STREAM_LOG_LEVEL", "debug");

        let settings = Settings::from_file(path.to_str().unwrap()).unwrap();

        env::remove_var("STREAM_WS_URL");
        env::remove_var("STREAM_CHANNEL");
        env::remove_var("STREAM_LIVENESS_PROBE_URL");
        env::remove_var("STREAM_LOG_LEVEL");

        assert_eq!(settings.stream.url, "wss://from-env.example.com/ws");
        assert_eq!(settings.stream.channel, "env-blocks");
        assert_eq!(
            settings.recovery.liveness_probe_url.as_deref(),
            Some("https://status.example.com/health")
        );
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn test_section_conversions() {
        let settings = Settings::default();
        let policy = settings.recovery.policy();
        assert_eq!(policy.base_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 30_000);

        let breaker = settings.circuit_breaker.config();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(30));
        assert_eq!(settings.recovery.retention(), Duration::from_secs(3_600));
    }
}
