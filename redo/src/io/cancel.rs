//! Operator interrupts: a shared cancel flag, the OS signal watcher that sets it,
//! and a sleep that wakes up early when it is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

/// Granularity at which blocking waits re-check the cancel flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Set once when the run should stop; never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Abstraction over inter-attempt sleeping so tests can record delays instead of waiting.
pub trait Sleeper {
    /// Sleep for `duration`. Returns `false` if interrupted by `cancel`.
    fn sleep(&self, duration: Duration, cancel: &CancelFlag) -> bool;
}

/// Sleeps on the current thread in [`POLL_INTERVAL`] slices.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelFlag) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return true;
            };
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

/// Spawn a background thread that sets `flag` on SIGINT, SIGTERM, or SIGQUIT
/// (Ctrl-C on non-unix platforms).
pub fn spawn_signal_watcher(flag: CancelFlag) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;

    thread::Builder::new()
        .name("redo-signals".to_string())
        .spawn(move || match runtime.block_on(wait_for_shutdown_signal()) {
            Ok(()) => {
                warn!("interrupt received, cancelling run");
                flag.cancel();
            }
            Err(err) => error!(err = %err, "signal watcher failed"),
        })
        .context("spawn signal watcher thread")?;

    debug!("signal watcher installed");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
