//! Rule-directory reconciliation.
//!
//! Each pass compares the directory against the tracked files in three
//! steps: deletions, then modifications, then additions. Every change is
//! pushed into the [`MonitorRegistry`] as a per-file swap so rules from
//! other files are never disturbed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::monitor::registry::MonitorRegistry;
use crate::rules::file::{RuleFile, has_rules_extension, modified_time};

/// Paths touched by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub removed: Vec<PathBuf>,
    pub reloaded: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.reloaded.is_empty() && self.added.is_empty()
    }
}

/// Tracks every rule file in one directory.
pub struct RuleFileStore {
    dir: PathBuf,
    registry: Arc<MonitorRegistry>,
    files: HashMap<PathBuf, RuleFile>,
}

impl RuleFileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<MonitorRegistry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
            files: HashMap::new(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tracked paths, sorted.
    #[must_use]
    pub fn tracked(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Total rules across all tracked files.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.files.values().map(|file| file.rules.len()).sum()
    }

    /// Run one reconciliation pass.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.remove_deleted(&mut report);
        self.reload_modified(&mut report);
        self.add_new(&mut report);
        if !report.is_empty() {
            debug!(
                added = report.added.len(),
                reloaded = report.reloaded.len(),
                removed = report.removed.len(),
                rules = self.rule_count(),
                "reconciled rules directory"
            );
        }
        report
    }

    fn remove_deleted(&mut self, report: &mut ReconcileReport) {
        let mut gone: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|path| !path.is_file())
            .cloned()
            .collect();
        gone.sort();
        for path in gone {
            if let Some(file) = self.files.remove(&path) {
                debug!(path = %path.display(), "lost rules from file");
                self.registry.replace_for_file(&path, &file.rules, &[]);
            }
            report.removed.push(path);
        }
    }

    fn reload_modified(&mut self, report: &mut ReconcileReport) {
        let mut changed: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(path, file)| modified_time(path) != file.modified_at)
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();
        for path in changed {
            let fresh = RuleFile::load_or_empty(&path);
            let old = self.files.insert(path.clone(), fresh);
            let old_rules = old.map(|file| file.rules).unwrap_or_default();
            let new_rules = self.files.get(&path).map_or(&[][..], |file| &file.rules[..]);
            self.registry.replace_for_file(&path, &old_rules, new_rules);
            debug!(path = %path.display(), "loaded rules from file");
            report.reloaded.push(path);
        }
    }

    fn add_new(&mut self, report: &mut ReconcileReport) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %self.dir.display(), error = %err, "rules directory unavailable");
                return;
            }
        };
        let mut fresh: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    warn!(dir = %self.dir.display(), error = %err, "failed to read directory entry");
                    None
                }
            })
            .filter(|path| {
                has_rules_extension(path) && path.is_file() && !self.files.contains_key(path)
            })
            .collect();
        fresh.sort();
        for path in fresh {
            debug!(path = %path.display(), "found new rules file");
            let file = RuleFile::load_or_empty(&path);
            self.registry.replace_for_file(&path, &[], &file.rules);
            self.files.insert(path.clone(), file);
            report.added.push(path);
        }
    }

    /// Unregister every tracked rule and forget the files.
    pub fn clear(&mut self) {
        for (path, file) in self.files.drain() {
            self.registry.replace_for_file(&path, &file.rules, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionExecutor;
    use crate::monitor::host::MonitorSettings;
    use crate::monitor::probe::{Probe, ProbeReply};
    use crate::rules::rule::Transition;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Unreachable;

    impl Probe for Unreachable {
        fn probe(&self, _: &str, _: Duration, _: usize) -> Option<ProbeReply> {
            None
        }
    }

    fn store(dir: &Path) -> RuleFileStore {
        let registry = Arc::new(MonitorRegistry::new(
            Arc::new(Unreachable),
            Arc::new(ActionExecutor::empty()),
            MonitorSettings {
                poll_interval: Duration::from_millis(20),
                probe_timeout: Duration::from_millis(1),
                packet_size: 8,
            },
        ));
        RuleFileStore::new(dir, registry)
    }

    fn stop(store: &RuleFileStore) {
        store
            .registry
            .stop_all(Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn missing_directory_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let mut store = store(&tmp.path().join("rules.d"));
        assert!(store.reconcile().is_empty());
        assert!(store.tracked().is_empty());
    }

    #[test]
    fn only_rules_files_are_picked_up() {
        let tmp = TempDir::new().unwrap();
        let line = "HOSTNAME==\"nas\", ACTION==\"discover\", RUN+=\"true\"\n";
        std::fs::write(tmp.path().join("a.rules"), line).unwrap();
        std::fs::write(tmp.path().join("B.RULES"), line).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), line).unwrap();
        std::fs::create_dir(tmp.path().join("nested.rules")).unwrap();

        let mut store = store(tmp.path());
        let report = store.reconcile();
        assert_eq!(report.added.len(), 2);
        assert_eq!(store.rule_count(), 2);
        let nas = store.registry.monitor("nas").unwrap();
        assert_eq!(nas.rules_for(Transition::Discover).len(), 2);
        stop(&store);
    }

    #[test]
    fn empty_file_stays_tracked_without_reparse() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.rules");
        std::fs::write(&path, "this is not a rule\n").unwrap();

        let mut store = store(tmp.path());
        assert_eq!(store.reconcile().added, [path.clone()]);
        assert_eq!(store.tracked(), [path.clone()]);
        assert_eq!(store.rule_count(), 0);
        assert!(store.reconcile().is_empty());
        assert!(store.registry.hostnames().is_empty());
    }

    #[test]
    fn fixed_file_is_reparsed_once_its_mtime_changes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nas.rules");
        std::fs::write(&path, "HOSTNAME==\"nas\", RUN+=\"true\"\n").unwrap();
        let mut store = store(tmp.path());
        store.reconcile();
        assert_eq!(store.rule_count(), 0);

        std::fs::write(
            &path,
            "HOSTNAME==\"nas\", ACTION==\"discover\", RUN+=\"true\"\n",
        )
        .unwrap();
        let later = std::time::SystemTime::now() + Duration::from_secs(10);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(later)).unwrap();

        let report = store.reconcile();
        assert_eq!(report.reloaded, [path]);
        assert_eq!(store.rule_count(), 1);
        let nas = store.registry.monitor("nas").unwrap();
        assert_eq!(nas.rules_for(Transition::Discover).len(), 1);
        stop(&store);
    }

    #[test]
    fn clear_unregisters_everything() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("a.rules"),
            "HOSTNAME==\"nas\", ACTION==\"lost\", RUN+=\"true\"\n",
        )
        .unwrap();
        let mut store = store(tmp.path());
        store.reconcile();
        store.clear();
        assert!(store.tracked().is_empty());
        assert_eq!(store.registry.monitor("nas").unwrap().rule_count(), 0);
        stop(&store);
    }
}
