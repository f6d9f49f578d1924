//! Per-hostname presence state and the rules registered against it.
//!
//! A `HostMonitor` is driven by [`HostMonitor::poll_once`], which the
//! registry calls from the host's own background task. Rule lists are
//! replaced wholesale under a write lock; notification clones the current
//! list out of a read lock first, so a reload never leaks a half-built list
//! into a transition.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::actions::ActionExecutor;
use crate::monitor::probe::Probe;
use crate::rules::rule::{DeviceContext, Rule, Transition};

/// Probe timing shared by every monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Pause between two probes of the same host.
    pub poll_interval: Duration,
    /// How long one probe waits for a reply.
    pub probe_timeout: Duration,
    /// ICMP payload bytes per probe.
    pub packet_size: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(500),
            packet_size: 55,
        }
    }
}

/// Immutable snapshot of one transition's rules, in registration order.
pub type RuleList = Arc<Vec<Arc<Rule>>>;

#[derive(Debug, Default)]
struct RuleLists {
    discover: RuleList,
    lost: RuleList,
}

impl RuleLists {
    fn list_mut(&mut self, transition: Transition) -> &mut RuleList {
        match transition {
            Transition::Discover => &mut self.discover,
            Transition::Lost => &mut self.lost,
        }
    }
}

/// Reachability state of one hostname.
#[derive(Debug)]
pub struct HostMonitor {
    hostname: String,
    present: AtomicBool,
    last_address: Mutex<Option<IpAddr>>,
    rules: RwLock<RuleLists>,
    probes: AtomicU64,
    transitions: AtomicU64,
}

impl HostMonitor {
    /// A monitor that starts out assuming the host is absent.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            present: AtomicBool::new(false),
            last_address: Mutex::new(None),
            rules: RwLock::new(RuleLists::default()),
            probes: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// Number of probes issued so far.
    #[must_use]
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    /// Number of presence flips observed so far.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Current rules for `transition`.
    #[must_use]
    pub fn rules_for(&self, transition: Transition) -> RuleList {
        let lists = self.rules.read();
        match transition {
            Transition::Discover => Arc::clone(&lists.discover),
            Transition::Lost => Arc::clone(&lists.lost),
        }
    }

    /// Total rules registered across both transitions.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        let lists = self.rules.read();
        lists.discover.len() + lists.lost.len()
    }

    /// Remove every rule in `old` and append every rule in `new` that
    /// belongs to this host, publishing each changed list in one step.
    pub fn swap_rules(&self, old: &[Arc<Rule>], new: &[Arc<Rule>]) {
        let mut lists = self.rules.write();
        for transition in [Transition::Discover, Transition::Lost] {
            let removing = old
                .iter()
                .any(|rule| rule.transition == transition && rule.hostname == self.hostname);
            let adding: Vec<&Arc<Rule>> = new
                .iter()
                .filter(|rule| rule.transition == transition && rule.hostname == self.hostname)
                .collect();
            if !removing && adding.is_empty() {
                continue;
            }
            let list = lists.list_mut(transition);
            let next: Vec<Arc<Rule>> = list
                .iter()
                .filter(|existing| !old.iter().any(|gone| Arc::ptr_eq(existing, gone)))
                .cloned()
                .chain(adding.into_iter().cloned())
                .collect();
            *list = Arc::new(next);
        }
    }

    /// Probe once and, on a presence flip, notify the matching rule list.
    ///
    /// Returns the transition that fired, if any.
    pub fn poll_once(
        &self,
        probe: &dyn Probe,
        executor: &ActionExecutor,
        settings: &MonitorSettings,
    ) -> Option<Transition> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let reply = probe.probe(&self.hostname, settings.probe_timeout, settings.packet_size);
        let found = reply.is_some();
        if found == self.is_present() {
            return None;
        }

        self.present.store(found, Ordering::Release);
        self.transitions.fetch_add(1, Ordering::Relaxed);
        let transition = Transition::from_presence(found);

        let address = {
            let mut last = self.last_address.lock();
            if let Some(reply) = reply {
                *last = Some(reply.address);
            }
            *last
        };
        match transition {
            Transition::Discover => info!(host = %self.hostname, "discovered host"),
            Transition::Lost => info!(host = %self.hostname, "lost host"),
        }

        let device = DeviceContext::new(
            &self.hostname,
            transition,
            address,
            reply.map(|r| r.rtt),
            Utc::now(),
        );
        let rules = self.rules_for(transition);
        for rule in rules.iter() {
            self.notify(rule, &device, executor);
        }
        Some(transition)
    }

    fn notify(&self, rule: &Rule, device: &DeviceContext, executor: &ActionExecutor) {
        if let Some(key) = rule.first_mismatch(device) {
            debug!(
                host = %self.hostname,
                file = %rule.source_file.display(),
                line = rule.line,
                condition = key,
                "rule conditions not met"
            );
            return;
        }
        executor.execute(rule, device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionHandler;
    use crate::core::errors::Result;
    use crate::monitor::probe::ProbeReply;
    use crate::rules::parser::parse_rule;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::path::Path;

    struct ScriptedProbe(Mutex<VecDeque<bool>>);

    impl ScriptedProbe {
        fn new(script: &[bool]) -> Self {
            Self(Mutex::new(script.iter().copied().collect()))
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(&self, _: &str, _: Duration, _: usize) -> Option<ProbeReply> {
            self.0.lock().pop_front().unwrap_or(false).then_some(ProbeReply {
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
                rtt: Duration::from_millis(3),
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ActionHandler for Arc<Recorder> {
        fn execute(&self, rule: &Rule, args: &[String], device: &DeviceContext) -> Result<()> {
            let action = device.attribute("ACTION").unwrap_or("?");
            for arg in args {
                self.0.lock().push(format!("{}:{action}:{arg}", rule.line));
            }
            Ok(())
        }
    }

    fn rule(line: usize, text: &str) -> Arc<Rule> {
        Arc::new(parse_rule(Path::new("/r/t.rules"), line, text).unwrap())
    }

    fn add(monitor: &HostMonitor, rule: Arc<Rule>) {
        monitor.swap_rules(&[], &[rule]);
    }

    fn recording_executor() -> (ActionExecutor, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut executor = ActionExecutor::empty();
        executor.register("RUN", Arc::clone(&recorder));
        (executor, recorder)
    }

    #[test]
    fn flapping_host_fires_one_notification_per_flip() {
        let monitor = HostMonitor::new("nas");
        add(&monitor, rule(1, r#"HOSTNAME=="nas", ACTION=="discover", RUN+="up""#));
        add(&monitor, rule(2, r#"HOSTNAME=="nas", ACTION=="lost", RUN+="down""#));
        let (executor, recorder) = recording_executor();
        let probe = ScriptedProbe::new(&[true, false, true]);
        let settings = MonitorSettings::default();

        let fired: Vec<_> = (0..3)
            .filter_map(|_| monitor.poll_once(&probe, &executor, &settings))
            .collect();
        assert_eq!(
            fired,
            [Transition::Discover, Transition::Lost, Transition::Discover]
        );
        assert_eq!(
            *recorder.0.lock(),
            ["1:discover:up", "2:lost:down", "1:discover:up"]
        );
        assert!(monitor.is_present());
        assert_eq!(monitor.transition_count(), 3);
    }

    #[test]
    fn steady_state_fires_nothing() {
        let monitor = HostMonitor::new("nas");
        add(&monitor, rule(1, r#"HOSTNAME=="nas", ACTION=="lost", RUN+="down""#));
        let (executor, recorder) = recording_executor();
        let probe = ScriptedProbe::new(&[false, false, false]);
        for _ in 0..3 {
            assert_eq!(
                monitor.poll_once(&probe, &executor, &MonitorSettings::default()),
                None
            );
        }
        assert!(recorder.0.lock().is_empty());
        assert_eq!(monitor.probe_count(), 3);
    }

    #[test]
    fn rules_fire_in_registration_order() {
        let monitor = HostMonitor::new("nas");
        for line in [5, 1, 3] {
            add(&monitor, rule(
                line,
                r#"HOSTNAME=="nas", ACTION=="discover", RUN+="x""#,
            ));
        }
        let (executor, recorder) = recording_executor();
        monitor.poll_once(&ScriptedProbe::new(&[true]), &executor, &MonitorSettings::default());
        assert_eq!(*recorder.0.lock(), ["5:discover:x", "1:discover:x", "3:discover:x"]);
    }

    #[test]
    fn conditions_gate_actions() {
        let monitor = HostMonitor::new("nas");
        add(&monitor, rule(
            1,
            r#"HOSTNAME=="nas", ACTION=="discover", ADDRESS=="10.0.0.7", RUN+="hit""#,
        ));
        add(&monitor, rule(
            2,
            r#"HOSTNAME=="nas", ACTION=="discover", ADDRESS=="10.0.0.8", RUN+="miss""#,
        ));
        let (executor, recorder) = recording_executor();
        monitor.poll_once(&ScriptedProbe::new(&[true]), &executor, &MonitorSettings::default());
        assert_eq!(*recorder.0.lock(), ["1:discover:hit"]);
    }

    #[test]
    fn lost_context_keeps_last_address() {
        let monitor = HostMonitor::new("nas");
        add(&monitor, rule(
            1,
            r#"HOSTNAME=="nas", ACTION=="lost", ADDRESS=="10.0.0.7", RUN+="gone""#,
        ));
        let (executor, recorder) = recording_executor();
        let probe = ScriptedProbe::new(&[true, false]);
        monitor.poll_once(&probe, &executor, &MonitorSettings::default());
        monitor.poll_once(&probe, &executor, &MonitorSettings::default());
        assert_eq!(*recorder.0.lock(), ["1:lost:gone"]);
    }

    #[test]
    fn swap_replaces_only_the_named_rules() {
        let monitor = HostMonitor::new("nas");
        let keep = rule(1, r#"HOSTNAME=="nas", ACTION=="discover", RUN+="keep""#);
        let old = rule(2, r#"HOSTNAME=="nas", ACTION=="discover", RUN+="old""#);
        let new = rule(2, r#"HOSTNAME=="nas", ACTION=="lost", RUN+="new""#);
        let other_host = rule(3, r#"HOSTNAME=="printer", ACTION=="lost", RUN+="x""#);
        add(&monitor, Arc::clone(&keep));
        add(&monitor, Arc::clone(&old));

        monitor.swap_rules(&[old], &[Arc::clone(&new), other_host]);

        let discover = monitor.rules_for(Transition::Discover);
        assert_eq!(discover.len(), 1);
        assert!(Arc::ptr_eq(&discover[0], &keep));
        let lost = monitor.rules_for(Transition::Lost);
        assert_eq!(lost.len(), 1);
        assert!(Arc::ptr_eq(&lost[0], &new));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_swaps() {
        let monitor = HostMonitor::new("nas");
        let first = rule(1, r#"HOSTNAME=="nas", ACTION=="discover", RUN+="a""#);
        add(&monitor, Arc::clone(&first));
        let snapshot = monitor.rules_for(Transition::Discover);
        monitor.swap_rules(std::slice::from_ref(&first), &[]);
        monitor.swap_rules(std::slice::from_ref(&first), &[]);
        assert_eq!(monitor.rule_count(), 0);
        assert_eq!(snapshot.len(), 1);
        assert!(monitor.rules_for(Transition::Discover).is_empty());
    }
}
