//! SIGINT/SIGTERM delivery as a channel message.

use std::thread;

use crossbeam_channel::{Receiver, bounded};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::core::errors::{NdError, Result};

/// Spawn a watcher thread and return a receiver that yields the first
/// termination signal number.
pub fn shutdown_channel() -> Result<Receiver<i32>> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|err| NdError::Runtime {
        details: format!("failed to install signal handlers: {err}"),
    })?;
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                let _ = tx.send(signal);
            }
        })
        .map_err(|err| NdError::Runtime {
            details: format!("failed to spawn signal watcher: {err}"),
        })?;
    Ok(rx)
}
