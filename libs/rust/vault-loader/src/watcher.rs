//! Background refresh of a loader.
//!
//! The watcher sleeps for the loader's last computed interval, runs a
//! refresh cycle, and retries failed cycles with a fixed delay. Once retries
//! are exhausted it either stops (and reports the failure through
//! [`PollWatcher::wait`]) or goes back to sleep on the previous interval.
//!
//! A cycle committed while the watcher sleeps (a foreground load) re-arms the
//! timer to fire one new interval after that commit.

use rust_common::{RetryError, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    error::{VaultError, VaultResult},
    loader::LoaderInner,
    provider::SharedSink,
};

/// Observable state of a [`PollWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Waiting for the next cycle
    Idle,
    /// A refresh cycle (or its retries) is running
    Refreshing,
    /// The watcher has exited
    Stopped,
}

pub(crate) struct WatchSettings {
    policy: RetryPolicy,
    stop_on_failure: bool,
    initial_delay: Duration,
}

impl WatchSettings {
    pub(crate) const fn new(
        max_retry: u32,
        retry_delay: Duration,
        stop_on_failure: bool,
        initial_delay: Duration,
    ) -> Self {
        Self {
            policy: RetryPolicy::fixed(max_retry, retry_delay),
            stop_on_failure,
            initial_delay,
        }
    }
}

/// Handle to the background refresh task of a loader.
///
/// Dropping the handle stops the task at its next wait.
pub struct PollWatcher {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<WatcherState>,
    handle: Mutex<Option<JoinHandle<VaultResult<()>>>>,
}

impl PollWatcher {
    pub(crate) fn spawn(
        runtime: &Handle,
        loader: Arc<LoaderInner>,
        sink: SharedSink,
        settings: WatchSettings,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WatcherState::Idle);
        let interval_rx = loader.subscribe_interval();

        let task = async move {
            info!("Poll watcher started");
            let result =
                watch_loop(&loader, &sink, &settings, stop_rx, interval_rx, &state_tx).await;
            state_tx.send_replace(WatcherState::Stopped);
            info!(failed = result.is_err(), "Poll watcher stopped");
            result
        };

        Self {
            stop_tx,
            state_rx,
            handle: Mutex::new(Some(runtime.spawn(task.instrument(info_span!("poll_watcher"))))),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WatcherState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WatcherState> {
        self.state_rx.clone()
    }

    /// Ask the watcher to exit.
    ///
    /// Takes effect at the next suspension point. An interrupted cycle writes
    /// nothing.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Wait for the watcher to exit and return its outcome.
    ///
    /// Returns `Ok(())` after a requested stop and
    /// `Err(VaultError::RetryExhausted)` when it gave up on failures. Only the
    /// first caller observes the outcome; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// The terminal refresh failure, or `WatcherAborted` if the task panicked.
    pub async fn wait(&self) -> VaultResult<()> {
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| Err(VaultError::WatcherAborted(e.to_string()))),
            None => Ok(()),
        }
    }
}

impl Drop for PollWatcher {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

async fn watch_loop(
    loader: &LoaderInner,
    sink: &SharedSink,
    settings: &WatchSettings,
    mut stop_rx: watch::Receiver<bool>,
    mut interval_rx: watch::Receiver<Option<Duration>>,
    state_tx: &watch::Sender<WatcherState>,
) -> VaultResult<()> {
    loop {
        if !wait_until_due(settings, &mut stop_rx, &mut interval_rx).await {
            return Ok(());
        }

        state_tx.send_replace(WatcherState::Refreshing);

        let outcome = tokio::select! {
            biased;
            () = stopped(&mut stop_rx) => return Ok(()),
            outcome = settings.policy.execute(move || loader.refresh_shared(sink)) => outcome,
        };

        match outcome {
            Ok(()) => debug!("Background refresh succeeded"),
            Err(RetryError { attempts, error }) if settings.stop_on_failure => {
                error!(attempts, error = %error, "Background refresh failed, stopping");
                return Err(VaultError::RetryExhausted {
                    attempts,
                    source: Box::new(error),
                });
            }
            Err(RetryError { attempts, error }) => {
                warn!(attempts, error = %error, "Background refresh failed, keeping previous interval");
            }
        }

        state_tx.send_replace(WatcherState::Idle);
    }
}

/// Sleep until the next cycle is due. Returns `false` if stopped first.
///
/// The deadline starts from the current interval (or `initial_delay` before
/// the first successful cycle) and moves to `now + interval` whenever another
/// cycle commits a new interval in the meantime.
async fn wait_until_due(
    settings: &WatchSettings,
    stop_rx: &mut watch::Receiver<bool>,
    interval_rx: &mut watch::Receiver<Option<Duration>>,
) -> bool {
    let current = *interval_rx.borrow_and_update();
    let wait = current.unwrap_or(settings.initial_delay);
    log_schedule(wait);

    let timer = tokio::time::sleep(wait);
    tokio::pin!(timer);
    let mut interval_open = true;

    loop {
        tokio::select! {
            biased;
            () = stopped(stop_rx) => return false,
            changed = interval_rx.changed(), if interval_open => {
                if changed.is_err() {
                    interval_open = false;
                    continue;
                }
                if let Some(interval) = *interval_rx.borrow_and_update() {
                    log_schedule(interval);
                    timer.as_mut().reset(Instant::now() + interval);
                }
            }
            () = &mut timer => return true,
        }
    }
}

fn log_schedule(wait: Duration) {
    debug!(wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX), "Next refresh scheduled");
}

/// Resolves once a stop was requested or the handle is gone.
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}
