//! Daemon assembly: wires config, registry, reconciliation, and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::actions::ActionExecutor;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::task::BackgroundTask;
use crate::monitor::host::MonitorSettings;
use crate::monitor::probe::Probe;
use crate::monitor::registry::MonitorRegistry;
use crate::rules::store::RuleFileStore;

/// Grace given to an in-flight reconciliation pass at shutdown.
const RECONCILE_STOP_GRACE: Duration = Duration::from_secs(2);

/// A running monitor: one probing task per host plus the reconciler.
pub struct Daemon {
    registry: Arc<MonitorRegistry>,
    store: Arc<Mutex<RuleFileStore>>,
    reconciler: BackgroundTask,
}

impl Daemon {
    /// Load the rules directory once, then reconcile again every interval.
    pub fn start(config: &Config, probe: Arc<dyn Probe>) -> Result<Self> {
        let settings = config.monitor_settings();
        let executor = Arc::new(ActionExecutor::new(config.shell()));
        let registry = Arc::new(MonitorRegistry::new(probe, executor, settings));

        let mut store = RuleFileStore::new(config.rules_dir(), Arc::clone(&registry));
        let initial = store.reconcile();
        if !store.dir().is_dir() {
            warn!(dir = %store.dir().display(), "rules directory does not exist yet");
        }
        info!(
            dir = %store.dir().display(),
            files = initial.added.len(),
            rules = store.rule_count(),
            hosts = registry.hostnames().len(),
            "loaded rules"
        );

        let store = Arc::new(Mutex::new(store));
        let ticking = Arc::clone(&store);
        let reconciler =
            BackgroundTask::spawn_deferred("reconcile", config.reconcile_interval(), move || {
                ticking.lock().reconcile();
            })?;

        Ok(Self {
            registry,
            store,
            reconciler,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MonitorRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Mutex<RuleFileStore>> {
        &self.store
    }

    /// Longest time shutdown waits for `monitors` probing tasks.
    #[must_use]
    pub fn shutdown_budget(settings: &MonitorSettings, monitors: usize) -> Duration {
        let per_monitor = settings.poll_interval;
        let count = u32::try_from(monitors.max(1)).unwrap_or(u32::MAX);
        settings.probe_timeout + per_monitor.saturating_mul(count)
    }

    /// Stop reconciliation first so no new monitors appear, drop every
    /// rule so a late transition runs nothing, then stop every monitor.
    /// Returns the number of tasks that had to be detached.
    pub fn stop(self) -> usize {
        let mut detached = usize::from(!self.reconciler.stop(RECONCILE_STOP_GRACE));
        if let Some(mut store) = self.store.try_lock_for(RECONCILE_STOP_GRACE) {
            store.clear();
        }
        let monitors = self.registry.hostnames().len();
        let budget = Self::shutdown_budget(self.registry.settings(), monitors);
        detached += self.registry.stop_all(Instant::now() + budget);
        info!(monitors, detached, "stopped all monitors");
        detached
    }
}

/// Run the daemon in the foreground until SIGINT or SIGTERM.
#[cfg(all(feature = "daemon", unix))]
pub fn run(config: &Config) -> Result<()> {
    use crate::core::errors::NdError;
    use crate::daemon::{privilege, signals};
    use crate::monitor::probe::IcmpProbe;

    privilege::ensure_privileged()?;
    let shutdown = signals::shutdown_channel()?;
    let daemon = Daemon::start(config, Arc::new(IcmpProbe::new()))?;
    let signal = shutdown
        .recv()
        .map_err(|_| NdError::ChannelClosed {
            component: "signals",
        })?;
    info!(signal, "shutting down");
    daemon.stop();
    Ok(())
}
