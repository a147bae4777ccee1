//! Recovery strategies, one per error category. The handler calls
//! [`RecoveryStrategy::attempt_recovery`] until it reports success or the
//! retry budget runs out.

use crate::circuit_breaker::CircuitBreaker;
use crate::error_handler::BotError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// One recovery attempt. `true` means the underlying condition cleared.
    async fn attempt_recovery(&self, error: &BotError) -> bool;
}

/// Connectivity recovery for NETWORK and EXTERNAL_API errors: pause, then
/// verify with a real liveness probe instead of assuming the pause healed
/// anything. Without a probe url the pause alone counts as recovery (probe
/// servers are not a given in test environments).
pub struct ProbeBackedRecovery {
    pause: Duration,
    probe_url: Option<String>,
    probe_timeout: Duration,
    breaker: Option<Arc<CircuitBreaker>>,
    client: reqwest::Client,
}

impl ProbeBackedRecovery {
    pub fn new(pause: Duration, probe_url: Option<String>, probe_timeout: Duration) -> Self {
        Self {
            pause,
            probe_url,
            probe_timeout,
            breaker: None,
            client: reqwest::Client::new(),
        }
    }

    /// Route probe requests through `breaker`: once the status endpoint has
    /// tripped it, attempts fast-fail instead of re-dialing a dead page.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    async fn probe(&self, url: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("status {}", response.status())
        }
    }
}

#[async_trait]
impl RecoveryStrategy for ProbeBackedRecovery {
    fn name(&self) -> &str {
        "connectivity-probe"
    }

    async fn attempt_recovery(&self, error: &BotError) -> bool {
        tokio::time::sleep(self.pause).await;
        let url = match &self.probe_url {
            Some(url) => url,
            None => {
                debug!(
                    "[Recovery] No probe url configured, pause counts as recovery for {}",
                    error.id
                );
                return true;
            }
        };

        let outcome = match &self.breaker {
            Some(breaker) => breaker
                .execute(|| self.probe(url))
                .await
                .map_err(anyhow::Error::new),
            None => self.probe(url).await,
        };
        match outcome {
            Ok(()) => {
                info!(
                    "✅ [Recovery] Liveness probe passed for {} error {}",
                    error.category, error.id
                );
                true
            }
            Err(e) => {
                warn!(
                    "⚠️ [Recovery] Liveness probe failed for error {}: {}",
                    error.id, e
                );
                false
            }
        }
    }
}

/// For categories that cannot self-heal (CONFIGURATION, VALIDATION). Always
/// fails the attempt so the error surfaces as abandoned.
pub struct NonRecoverable;

#[async_trait]
impl RecoveryStrategy for NonRecoverable {
    fn name(&self) -> &str {
        "non-recoverable"
    }

    async fn attempt_recovery(&self, error: &BotError) -> bool {
        warn!(
            "⚠️ [Recovery] {} errors require manual intervention (id: {})",
            error.category, error.id
        );
        false
    }
}

/// For categories whose recovery is owned by another component. WEBSOCKET
/// errors, for instance, are healed by the transport's own reconnect loop;
/// this strategy only documents that and lets the error settle.
pub struct DeferredRecovery {
    name: String,
    owner: &'static str,
}

impl DeferredRecovery {
    pub fn new(owner: &'static str) -> Self {
        Self {
            name: format!("deferred-to-{}", owner.replace(' ', "-")),
            owner,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for DeferredRecovery {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt_recovery(&self, error: &BotError) -> bool {
        debug!(
            "[Recovery] {} error {} is recovered by the {}, not here",
            error.category, error.id, self.owner
        );
        false
    }
}
