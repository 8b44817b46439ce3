//! Background health monitoring.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::checker::HealthChecker;
use super::model::SystemHealth;

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs the full battery of checks on an interval in a background task,
/// keeping only the latest report.
pub struct HealthMonitor {
    checker: HealthChecker,
    interval: Duration,
    last: Arc<RwLock<Option<SystemHealth>>>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(checker: HealthChecker, interval: Duration) -> Self {
        Self {
            checker,
            interval,
            last: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
        }
    }

    /// Start the background loop. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.checker.clone(),
            self.interval,
            Arc::clone(&self.last),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        info!(interval_secs = self.interval.as_secs_f64(), "Health monitor started");
    }

    /// Stop the background loop and wait for it to exit. Safe to call more
    /// than once.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(Running { cancel, handle }) = running else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Health monitor task ended abnormally");
        }
        info!("Health monitor stopped");
    }

    /// Whether the background loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Most recent report, if a run has completed.
    #[must_use]
    pub fn last_health(&self) -> Option<SystemHealth> {
        self.last.read().clone()
    }
}

async fn run_loop(
    checker: HealthChecker,
    interval: Duration,
    last: Arc<RwLock<Option<SystemHealth>>>,
    cancel: CancellationToken,
) {
    loop {
        let mut run = {
            let checker = checker.clone();
            tokio::spawn(async move { checker.check_all().await })
        };
        let outcome = tokio::select! {
            () = cancel.cancelled() => None,
            outcome = &mut run => Some(outcome),
        };
        match outcome {
            None => {
                run.abort();
                return;
            }
            Some(Ok(health)) => {
                report(&health);
                *last.write() = Some(health);
            }
            Some(Err(e)) => error!(error = %e, "Health monitor run failed"),
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
    }
}

fn report(health: &SystemHealth) {
    if health.is_healthy() {
        return;
    }
    let failed = health.failed_checks();
    warn!(
        status = %health.status,
        failed = failed.len(),
        "Health check failed"
    );
    for check in failed {
        warn!(check = %check.name, status = %check.status, "{}", check.message);
    }
}
