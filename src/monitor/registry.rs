//! Hostname → monitor map. Monitors are created lazily on first reference
//! and live until shutdown, even when no rule refers to them any more.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::actions::ActionExecutor;
use crate::core::errors::Result;
use crate::daemon::task::BackgroundTask;
use crate::monitor::host::{HostMonitor, MonitorSettings};
use crate::monitor::probe::Probe;
use crate::rules::rule::Rule;

struct Entry {
    monitor: Arc<HostMonitor>,
    task: Option<BackgroundTask>,
}

/// Owns every [`HostMonitor`] and its probing task.
pub struct MonitorRegistry {
    probe: Arc<dyn Probe>,
    executor: Arc<ActionExecutor>,
    settings: MonitorSettings,
    entries: Mutex<HashMap<String, Entry>>,
    /// Set by `stop_all`; no probing task is spawned afterwards.
    closed: AtomicBool,
}

impl MonitorRegistry {
    #[must_use]
    pub fn new(
        probe: Arc<dyn Probe>,
        executor: Arc<ActionExecutor>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            probe,
            executor,
            settings,
            entries: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Attach `rule` to its host's monitor, starting the monitor if new.
    pub fn register(&self, rule: Arc<Rule>) {
        self.replace_for_file(rule.source_file(), &[], std::slice::from_ref(&rule));
    }

    /// Detach `rule` from its host's monitor. The monitor keeps running.
    pub fn unregister(&self, rule: &Arc<Rule>) {
        self.replace_for_file(rule.source_file(), std::slice::from_ref(rule), &[]);
    }

    /// Swap the rules contributed by one file. Each affected monitor sees
    /// its old list or its new list, never a mix.
    ///
    /// A monitor created here gets its rules before its probing task
    /// starts, so the first transition it reports already sees them.
    pub fn replace_for_file(&self, path: &Path, old: &[Arc<Rule>], new: &[Arc<Rule>]) {
        let mut hostnames: Vec<&str> = old
            .iter()
            .chain(new)
            .map(|rule| rule.hostname.as_str())
            .collect();
        hostnames.sort_unstable();
        hostnames.dedup();

        let mut entries = self.entries.lock();
        for hostname in hostnames {
            if let Some(entry) = entries.get(hostname) {
                entry.monitor.swap_rules(old, new);
                continue;
            }
            if !new.iter().any(|rule| rule.hostname == hostname) {
                continue;
            }
            if self.closed.load(Ordering::Acquire) {
                debug!(host = %hostname, "registry closed; not starting monitor");
                continue;
            }
            let monitor = Arc::new(HostMonitor::new(hostname));
            monitor.swap_rules(old, new);
            entries.insert(hostname.to_string(), self.start(monitor));
        }
        drop(entries);
        debug!(
            path = %path.display(),
            removed = old.len(),
            added = new.len(),
            "updated rule registrations"
        );
    }

    /// The monitor for `hostname`, if one was ever created.
    #[must_use]
    pub fn monitor(&self, hostname: &str) -> Option<Arc<HostMonitor>> {
        self.entries
            .lock()
            .get(hostname)
            .map(|entry| Arc::clone(&entry.monitor))
    }

    /// Monitored hostnames, sorted.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `hostname` has a live probing task.
    #[must_use]
    pub fn is_running(&self, hostname: &str) -> bool {
        self.entries
            .lock()
            .get(hostname)
            .and_then(|entry| entry.task.as_ref())
            .is_some_and(|task| !task.is_finished())
    }

    fn start(&self, monitor: Arc<HostMonitor>) -> Entry {
        let task = match self.spawn_loop(Arc::clone(&monitor)) {
            Ok(task) => Some(task),
            Err(err) => {
                error!(code = err.code(), host = %monitor.hostname(), "{err}");
                None
            }
        };
        debug!(host = %monitor.hostname(), "created monitor");
        Entry { monitor, task }
    }

    fn spawn_loop(&self, monitor: Arc<HostMonitor>) -> Result<BackgroundTask> {
        let probe = Arc::clone(&self.probe);
        let executor = Arc::clone(&self.executor);
        let settings = self.settings;
        let name = format!("probe-{}", monitor.hostname());
        BackgroundTask::spawn(name, settings.poll_interval, move || {
            monitor.poll_once(probe.as_ref(), &executor, &settings);
        })
    }

    /// Stop every probing task, waiting until `deadline` at most.
    ///
    /// Monitors stay in the map; only their tasks end. Hosts first seen
    /// after this call get no task. Returns how many tasks had to be
    /// detached.
    pub fn stop_all(&self, deadline: Instant) -> usize {
        let tasks: Vec<BackgroundTask> = {
            let mut entries = self.entries.lock();
            self.closed.store(true, Ordering::Release);
            entries
                .values_mut()
                .filter_map(|entry| entry.task.take())
                .collect()
        };
        for task in &tasks {
            task.signal_stop();
        }
        let detached = tasks
            .into_iter()
            .map(|task| task.join_until(deadline))
            .filter(|stopped| !stopped)
            .count();
        if detached > 0 {
            warn!(detached, "some monitors were still busy at shutdown");
        }
        detached
    }
}
