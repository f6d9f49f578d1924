//! Uniform background task: a named thread that runs a tick function, then
//! sleeps on a cancellation channel until the next tick or a stop signal.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, warn};

use crate::core::errors::{NdError, Result};

/// How often a stopping task is checked for completion while joining.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `tick` on a dedicated thread, invoking it once immediately and
    /// then once per `interval` until stopped.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_with(name.into(), interval, true, tick)
    }

    /// Like [`BackgroundTask::spawn`], but the first tick comes one
    /// `interval` after start.
    pub fn spawn_deferred<F>(name: impl Into<String>, interval: Duration, tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_with(name.into(), interval, false, tick)
    }

    fn spawn_with<F>(name: String, interval: Duration, immediate: bool, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if !immediate && stop_requested(&stop_rx, interval) {
                    return;
                }
                loop {
                    tick();
                    if stop_requested(&stop_rx, interval) {
                        break;
                    }
                }
            })
            .map_err(|err| NdError::Runtime {
                details: format!("failed to spawn task {name}: {err}"),
            })?;
        debug!(task = %name, "background task started");
        Ok(Self {
            name,
            stop_tx,
            handle,
        })
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the task to exit at its next suspension point. Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Wait for the task to exit until `deadline`.
    ///
    /// Returns `false` if the task was still busy (mid-probe or mid-action)
    /// at the deadline; its thread is then detached.
    pub fn join_until(self, deadline: Instant) -> bool {
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(task = %self.name, "task did not stop before deadline; detaching");
                return false;
            }
            thread::sleep(JOIN_POLL);
        }
        if self.handle.join().is_err() {
            warn!(task = %self.name, "task panicked");
        }
        debug!(task = %self.name, "background task stopped");
        true
    }

    /// Signal and join with a deadline of `grace` from now.
    pub fn stop(self, grace: Duration) -> bool {
        self.signal_stop();
        self.join_until(Instant::now() + grace)
    }
}

/// Sleep for `interval` unless a stop arrives first. A dropped sender also
/// counts as a stop.
fn stop_requested(stop_rx: &Receiver<()>, interval: Duration) -> bool {
    match stop_rx.recv_timeout(interval) {
        Err(RecvTimeoutError::Timeout) => false,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
    }
}
