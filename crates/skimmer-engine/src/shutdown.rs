//! Shutdown coordination: the abort signal, the grace deadline, and the
//! process-signal listener.
//!
//! Two cancellation tokens back the coordinator. `abort` is the
//! single-assignment AbortSignal shared by the read loop and every worker;
//! it fires on the first termination signal *or* the first callback
//! failure. `signalled` fires only on a termination signal, always after
//! the grace deadline has been recorded, so anything waiting on it can
//! immediately read a deadline. Neither token ever resets.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Default time allowed for in-flight workers after a shutdown signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Drives the graceful-then-forced shutdown sequence for one run.
///
/// Clones share state; hand one clone to the engine and keep another to
/// trigger shutdown from tests or an outer supervisor.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    abort: CancellationToken,
    signalled: CancellationToken,
    grace: Duration,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            abort: CancellationToken::new(),
            signalled: CancellationToken::new(),
            grace,
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    /// Trigger the abort signal without a deadline.
    ///
    /// Used by workers on callback failure: the run stops reading but
    /// drains fully. Idempotent.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Record a termination signal: fixes the grace deadline (first signal
    /// only) and triggers the abort signal. Idempotent.
    pub fn signal(&self) {
        let first = {
            match self.deadline.lock() {
                Ok(mut deadline) => {
                    if deadline.is_none() {
                        *deadline = Some(Instant::now() + self.grace);
                        true
                    } else {
                        false
                    }
                }
                Err(_) => false,
            }
        };
        if first {
            tracing::info!(
                grace_secs = self.grace.as_secs_f64(),
                "Shutdown signal received, draining in-flight work"
            );
        }
        self.signalled.cancel();
        self.abort.cancel();
    }

    /// Whether the abort signal has fired. Non-blocking; the read loop
    /// checks this once per iteration.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// The drain deadline fixed by the first termination signal, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.lock().map(|deadline| *deadline).unwrap_or(None)
    }

    /// Grace period this coordinator was configured with.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Completes once a termination signal has been recorded (not on a
    /// plain worker abort).
    pub(crate) async fn signalled(&self) {
        self.signalled.cancelled().await;
    }

    /// Spawn a task that waits for SIGINT or SIGTERM and calls
    /// [`signal`](Self::signal).
    ///
    /// Opt-in: library callers that manage signals themselves simply never
    /// spawn this.
    pub fn spawn_signal_listener(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if wait_for_termination().await {
                coordinator.signal();
            }
        })
    }
}

/// Wait for SIGINT or SIGTERM; returns false if the handlers could not be
/// installed.
#[cfg(unix)]
async fn wait_for_termination() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!("Failed to install SIGTERM handler: {err}");
            return false;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to listen for SIGINT: {err}");
                false
            }
        },
        _ = sigterm.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("Failed to listen for SIGINT: {err}");
            false
        }
    }
}
