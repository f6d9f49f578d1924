//! Typed rule model and the device attributes rules are matched against.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Presence change a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// The host started answering probes.
    Discover,
    /// The host stopped answering probes.
    Lost,
}

impl Transition {
    /// Rule-file spelling (`ACTION=="discover"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Lost => "lost",
        }
    }

    /// Transition implied by a new presence state.
    #[must_use]
    pub const fn from_presence(present: bool) -> Self {
        if present { Self::Discover } else { Self::Lost }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "discover" => Ok(Self::Discover),
            "lost" => Ok(Self::Lost),
            other => Err(format!(
                "unknown ACTION {other:?}; valid actions are \"discover\" and \"lost\""
            )),
        }
    }
}

/// One validated rule line. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// File the rule was read from.
    pub source_file: PathBuf,
    /// 1-based line number within `source_file`.
    pub line: usize,
    /// Host whose presence the rule watches.
    pub hostname: String,
    /// Presence change that triggers the rule.
    pub transition: Transition,
    /// `KEY=="VALUE"` clauses other than `ACTION` and `HOSTNAME`.
    pub match_conditions: BTreeMap<String, String>,
    /// `KEY+="VALUE"` clauses, values in clause order.
    pub actions: BTreeMap<String, Vec<String>>,
}

#[allow(missing_docs)]
impl Rule {
    #[must_use]
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// The first condition key the device does not satisfy, if any. Every
    /// condition must equal the device attribute of the same name;
    /// attributes the device does not carry never match.
    #[must_use]
    pub fn first_mismatch(&self, device: &DeviceContext) -> Option<&str> {
        self.match_conditions
            .iter()
            .find(|(key, expected)| device.attribute(key) != Some(expected.as_str()))
            .map(|(key, _)| key.as_str())
    }
}

/// Attribute names exposed by [`DeviceContext`].
#[allow(missing_docs)]
pub mod attr {
    pub const HOSTNAME: &str = "HOSTNAME";
    pub const ACTION: &str = "ACTION";
    pub const ADDRESS: &str = "ADDRESS";
    pub const RTT_MS: &str = "RTT_MS";
    pub const TIMESTAMP: &str = "TIMESTAMP";
}

/// Live attributes of a host at the moment of a presence transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    attributes: BTreeMap<&'static str, String>,
}

impl DeviceContext {
    /// Build the context for `transition` on `hostname`.
    #[must_use]
    pub fn new(
        hostname: &str,
        transition: Transition,
        address: Option<IpAddr>,
        rtt: Option<Duration>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(attr::HOSTNAME, hostname.to_string());
        attributes.insert(attr::ACTION, transition.as_str().to_string());
        attributes.insert(
            attr::TIMESTAMP,
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        if let Some(address) = address {
            attributes.insert(attr::ADDRESS, address.to_string());
        }
        if let Some(rtt) = rtt {
            attributes.insert(attr::RTT_MS, rtt.as_millis().to_string());
        }
        Self { attributes }
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attributes as `NETDEV_<KEY>` environment pairs for child commands.
    pub fn env_vars(&self) -> impl Iterator<Item = (String, &str)> + '_ {
        self.attributes
            .iter()
            .map(|(key, value)| (format!("NETDEV_{key}"), value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn rule_with(conditions: &[(&str, &str)]) -> Rule {
        Rule {
            source_file: PathBuf::from("/etc/netdev/rules.d/test.rules"),
            line: 1,
            hostname: "nas".to_string(),
            transition: Transition::Discover,
            match_conditions: conditions
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            actions: BTreeMap::from([("RUN".to_string(), vec!["true".to_string()])]),
        }
    }

    fn device() -> DeviceContext {
        DeviceContext::new(
            "nas",
            Transition::Discover,
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))),
            Some(Duration::from_micros(2_400)),
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn transition_round_trips_through_rule_spelling() {
        assert_eq!("discover".parse::<Transition>(), Ok(Transition::Discover));
        assert_eq!("lost".parse::<Transition>(), Ok(Transition::Lost));
        assert!("Discover".parse::<Transition>().is_err());
        assert_eq!(Transition::from_presence(true), Transition::Discover);
        assert_eq!(Transition::from_presence(false), Transition::Lost);
    }

    #[test]
    fn rule_without_conditions_always_matches() {
        assert_eq!(rule_with(&[]).first_mismatch(&device()), None);
    }

    #[test]
    fn conditions_compare_against_device_attributes() {
        assert_eq!(rule_with(&[("ADDRESS", "192.168.1.10")]).first_mismatch(&device()), None);
        let both = rule_with(&[("ADDRESS", "192.168.1.10"), ("RTT_MS", "2")]);
        assert_eq!(both.first_mismatch(&device()), None);
        let miss = rule_with(&[("ADDRESS", "10.0.0.1")]);
        assert_eq!(miss.first_mismatch(&device()), Some("ADDRESS"));
    }

    #[test]
    fn unknown_attribute_never_matches() {
        let rule = rule_with(&[("VENDOR", "acme")]);
        assert_eq!(rule.first_mismatch(&device()), Some("VENDOR"));
    }

    #[test]
    fn lost_context_without_reply_omits_rtt() {
        let ctx = DeviceContext::new(
            "nas",
            Transition::Lost,
            None,
            None,
            DateTime::from_timestamp(0, 0).unwrap(),
        );
        assert_eq!(ctx.attribute(attr::ACTION), Some("lost"));
        assert_eq!(ctx.attribute(attr::RTT_MS), None);
        assert_eq!(ctx.attribute(attr::TIMESTAMP), Some("1970-01-01T00:00:00Z"));
        let env: Vec<_> = ctx.env_vars().map(|(k, _)| k).collect();
        assert!(env.contains(&"NETDEV_HOSTNAME".to_string()));
    }
}
