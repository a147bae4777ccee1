//! # Top-level Supervisor
//!
//! Process-wide safety net constructed once at startup. Owns the global
//! panic hook and the background tasks the daemon spawns, forwarding both
//! panics and abnormal task exits into the shared [`ErrorHandler`], and runs
//! the graceful shutdown sequence.
//!
//! ## Features
//!
//! - **Panic hook**: panics anywhere in the process become CRITICAL SYSTEM
//!   errors, chained to the previous hook so backtraces still print
//! - **Task monitoring**: `spawn_monitored` wraps fallible background tasks;
//!   an `Err` exit becomes a HIGH SYSTEM error instead of vanishing
//! - **Graceful shutdown**: engine shutdown mode, stream disconnect, task
//!   teardown with a grace window, final stats log

use log::{debug, info, warn};
use serde_json::json;
use std::future::Future;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::StreamConnection;
use crate::error_handler::{ErrorCategory, ErrorHandler, ErrorSeverity};

/// How long a background task gets to finish on its own before abort.
const TASK_STOP_GRACE: Duration = Duration::from_secs(1);

struct NamedTask {
    name: String,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    error_handler: Arc<ErrorHandler>,
    tasks: Mutex<Vec<NamedTask>>,
    panic_monitor: Mutex<Option<JoinHandle<()>>>,
    hook_installed: AtomicBool,
}

impl Supervisor {
    pub fn new(error_handler: Arc<ErrorHandler>) -> Self {
        Self {
            error_handler,
            tasks: Mutex::new(Vec::new()),
            panic_monitor: Mutex::new(None),
            hook_installed: AtomicBool::new(false),
        }
    }

    /// Install the process-global panic hook. Panic reports are forwarded to
    /// the error handler from a monitor task; the previously installed hook
    /// still runs so default backtrace printing is preserved. Idempotent per
    /// supervisor instance.
    pub fn install_panic_hook(&self) {
        if self.hook_installed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let handler = Arc::clone(&self.error_handler);
        let monitor = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler.handle_error(
                    message,
                    ErrorCategory::System,
                    ErrorSeverity::Critical,
                    json!({ "source": "panic_hook" }),
                );
            }
        });
        let mut slot = self
            .panic_monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(monitor);
        drop(slot);

        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "opaque panic payload".to_string()
            };
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown location".to_string());
            // The receiver is gone after shutdown; nothing left to notify.
            let _ = tx.send(format!("panic at {}: {}", location, message));
            previous(info);
        }));

        info!("✅ [Supervisor] Panic hook installed");
    }

    /// Spawn a background task whose failure must not go unnoticed. A clean
    /// `Ok(())` exit is logged at debug; an `Err` exit is captured as a HIGH
    /// SYSTEM error on the shared handler.
    pub fn spawn_monitored<F>(&self, name: &str, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::clone(&self.error_handler);
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => debug!("[Supervisor] Task '{}' finished cleanly", task_name),
                Err(e) => {
                    handler.handle_error(
                        format!("background task '{}' failed: {:#}", task_name, e),
                        ErrorCategory::System,
                        ErrorSeverity::High,
                        json!({ "task": task_name }),
                    );
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(NamedTask {
            name: name.to_string(),
            handle,
        });
        debug!("[Supervisor] Monitoring task '{}'", name);
    }

    pub fn task_count(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.len()
    }

    /// Graceful shutdown: stop spawning recoveries, close the stream, then
    /// tear down background tasks with a grace window each.
    pub async fn shutdown(&self, connection: &StreamConnection) {
        info!("🛑 [Supervisor] Shutdown sequence started");

        self.error_handler.set_shutdown();
        connection.disconnect().await;

        let drained: Vec<NamedTask> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in drained {
            let NamedTask { name, mut handle } = task;
            if tokio::time::timeout(TASK_STOP_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("⚠️ [Supervisor] Task '{}' did not stop in time, aborting", name);
                handle.abort();
                let _ = handle.await;
            } else {
                debug!("[Supervisor] Task '{}' stopped", name);
            }
        }

        if let Some(monitor) = self
            .panic_monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            monitor.abort();
        }

        let errors = self.error_handler.stats();
        let conn = connection.stats();
        info!(
            "✅ [Supervisor] Shutdown complete: {} errors handled ({} resolved, {} abandoned), {} messages / {} blocks received",
            errors.total_handled,
            errors.total_resolved,
            errors.total_abandoned,
            conn.messages_received,
            conn.blocks_received
        );
    }
}
