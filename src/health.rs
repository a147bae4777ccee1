//! Health probe registry. Probes are plain closures over shared state,
//! evaluated synchronously in registration order; a probe error counts as
//! unhealthy for that name and never aborts the sweep.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Mutex;

pub type HealthProbe = Box<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

/// Snapshot of one full probe sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// True when every registered probe reported healthy.
    pub healthy: bool,
    /// Per-probe results, in registration order.
    pub checks: IndexMap<String, bool>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct HealthCheckRegistry {
    probes: Mutex<IndexMap<String, HealthProbe>>,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe under `name`. Re-registering a name replaces the
    /// probe but keeps its original position.
    pub fn register(
        &self,
        name: impl Into<String>,
        probe: impl Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    ) {
        let name = name.into();
        debug!("[HealthCheck] Registered probe '{}'", name);
        let mut probes = self.probes.lock().unwrap_or_else(|e| e.into_inner());
        probes.insert(name, Box::new(probe));
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run every probe. Never fails; an empty registry reports healthy.
    pub fn run_health_checks(&self) -> HealthReport {
        let probes = self.probes.lock().unwrap_or_else(|e| e.into_inner());
        let mut checks = IndexMap::with_capacity(probes.len());
        let mut healthy = true;

        for (name, probe) in probes.iter() {
            let ok = match probe() {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("⚠️ [HealthCheck] Probe '{}' errored: {:#}", name, e);
                    false
                }
            };
            if !ok {
                healthy = false;
            }
            checks.insert(name.clone(), ok);
        }

        HealthReport {
            healthy,
            checks,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_empty_registry_is_healthy() {
        let registry = HealthCheckRegistry::new();
        let report = registry.run_health_checks();
        assert!(report.healthy);
        assert!(report.checks.is_empty());
    }

    #[test]
    fn test_results_keep_registration_order() {
        let registry = HealthCheckRegistry::new();
        registry.register("websocket_connected", || Ok(true));
        registry.register("event_pipeline", || Ok(true));
        registry.register("breaker_api", || Ok(true));

        let report = registry.run_health_checks();
        let names: Vec<&String> = report.checks.keys().collect();
        assert_eq!(
            names,
            vec!["websocket_connected", "event_pipeline", "breaker_api"]
        );
    }

    #[test]
    fn test_probe_error_counts_as_unhealthy_without_aborting() {
        let registry = HealthCheckRegistry::new();
        registry.register("good", || Ok(true));
        registry.register("broken", || anyhow::bail!("probe backend unreachable"));
        registry.register("also_good", || Ok(true));

        let report = registry.run_health_checks();
        assert!(!report.healthy);
        assert_eq!(report.checks["good"], true);
        assert_eq!(report.checks["broken"], false);
        assert_eq!(report.checks["also_good"], true);
    }

    #[test]
    fn test_probe_reads_live_state() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry = HealthCheckRegistry::new();
        let probe_flag = Arc::clone(&flag);
        registry.register("flag", move || Ok(probe_flag.load(Ordering::Acquire)));

        assert!(!registry.run_health_checks().healthy);
        flag.store(true, Ordering::Release);
        assert!(registry.run_health_checks().healthy);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let registry = HealthCheckRegistry::new();
        registry.register("ws", || Ok(true));
        let value = serde_json::to_value(registry.run_health_checks()).unwrap();
        assert_eq!(value["healthy"], true);
        assert_eq!(value["checks"]["ws"], true);
        assert!(value.get("checkedAt").is_some());
    }
}
