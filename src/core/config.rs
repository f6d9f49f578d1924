//! Daemon configuration: flat TOML key/value settings with typed accessors.
//!
//! The file is optional and never fatal. Unknown keys, ill-typed values,
//! and an unreadable or malformed file are recorded and the affected
//! settings keep their defaults; the caller warns about them once logging
//! is up.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{NdError, Result};
use crate::logger::LogPriority;
use crate::monitor::host::MonitorSettings;

/// Default location of the daemon configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/netdev/netdev.conf";
/// Default directory scanned for `.rules` files.
pub const DEFAULT_RULES_DIR: &str = "/etc/netdev/rules.d";

pub const KEY_LOG_LEVEL: &str = "log_level";
pub const KEY_RULES_DIR: &str = "rules_dir";
pub const KEY_SHELL: &str = "shell";
pub const KEY_PROBE_TIMEOUT_MS: &str = "probe_timeout_ms";
pub const KEY_PROBE_PACKET_SIZE: &str = "probe_packet_size";
pub const KEY_PROBE_INTERVAL_MS: &str = "probe_interval_ms";
pub const KEY_RECONCILE_INTERVAL_MS: &str = "reconcile_interval_ms";

const STRING_KEYS: [&str; 3] = [KEY_LOG_LEVEL, KEY_RULES_DIR, KEY_SHELL];
const INTEGER_KEYS: [&str; 4] = [
    KEY_PROBE_TIMEOUT_MS,
    KEY_PROBE_PACKET_SIZE,
    KEY_PROBE_INTERVAL_MS,
    KEY_RECONCILE_INTERVAL_MS,
];

/// Largest ICMP payload that still fits a single IPv4 datagram.
const MAX_PACKET_SIZE: i64 = 65_507;

/// Loaded daemon settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    settings: BTreeMap<String, toml::Value>,
    ignored_keys: Vec<String>,
    problems: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let settings = [
            (KEY_LOG_LEVEL, toml::Value::from("error")),
            (KEY_RULES_DIR, toml::Value::from(DEFAULT_RULES_DIR)),
            (KEY_SHELL, toml::Value::from("/bin/sh")),
            (KEY_PROBE_TIMEOUT_MS, toml::Value::from(500_i64)),
            (KEY_PROBE_PACKET_SIZE, toml::Value::from(55_i64)),
            (KEY_PROBE_INTERVAL_MS, toml::Value::from(100_i64)),
            (KEY_RECONCILE_INTERVAL_MS, toml::Value::from(1000_i64)),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
        Self {
            settings,
            ignored_keys: Vec::new(),
            problems: Vec::new(),
        }
    }
}

impl Config {
    /// Load the config file at `path`; a missing file yields the defaults.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse_str(&contents),
            Err(err) => Self::default().with_problem(&NdError::io(path, err)),
        }
    }

    /// Parse config text layered over the defaults.
    #[must_use]
    pub fn parse_str(contents: &str) -> Self {
        let table: toml::Table = match toml::from_str(contents) {
            Ok(table) => table,
            Err(err) => return Self::default().with_problem(&NdError::from(err)),
        };
        let mut config = Self::default();
        for (key, value) in table {
            if !STRING_KEYS.contains(&key.as_str()) && !INTEGER_KEYS.contains(&key.as_str()) {
                config.ignored_keys.push(key);
            } else if let Err(err) = config.set(&key, value) {
                config.problems.push(err.to_string());
            }
        }
        config
    }

    fn with_problem(mut self, err: &NdError) -> Self {
        self.problems.push(err.to_string());
        self
    }

    /// Override one known setting, validating its type.
    pub fn set(&mut self, key: &str, value: toml::Value) -> Result<()> {
        if STRING_KEYS.contains(&key) {
            let Some(text) = value.as_str() else {
                return Err(invalid(key, "expected a string"));
            };
            if key == KEY_LOG_LEVEL {
                text.parse::<LogPriority>()
                    .map_err(|details| invalid(key, &details))?;
            }
            if text.is_empty() {
                return Err(invalid(key, "must not be empty"));
            }
        } else if INTEGER_KEYS.contains(&key) {
            let Some(number) = value.as_integer() else {
                return Err(invalid(key, "expected an integer"));
            };
            if number <= 0 {
                return Err(invalid(key, "must be positive"));
            }
            if key == KEY_PROBE_PACKET_SIZE && number > MAX_PACKET_SIZE {
                return Err(invalid(key, "exceeds the maximum ICMP payload"));
            }
        } else {
            return Err(NdError::InvalidConfig {
                details: format!("unknown setting: {key}"),
            });
        }
        self.settings.insert(key.to_string(), value);
        Ok(())
    }

    /// Raw pass-through lookup; non-string values are rendered as TOML text.
    #[must_use]
    pub fn get(&self, key: &str, default: &str) -> String {
        match self.settings.get(key) {
            Some(toml::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => default.to_string(),
        }
    }

    /// Keys present in the file that netdev does not understand.
    #[must_use]
    pub fn ignored_keys(&self) -> &[String] {
        &self.ignored_keys
    }

    /// Rendered errors for settings (or the whole file) that fell back to
    /// defaults.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    #[must_use]
    pub fn log_priority(&self) -> LogPriority {
        self.get(KEY_LOG_LEVEL, "error")
            .parse()
            .unwrap_or(LogPriority::Error)
    }

    #[must_use]
    pub fn rules_dir(&self) -> PathBuf {
        PathBuf::from(self.get(KEY_RULES_DIR, DEFAULT_RULES_DIR))
    }

    #[must_use]
    pub fn shell(&self) -> String {
        self.get(KEY_SHELL, "/bin/sh")
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.integer(KEY_RECONCILE_INTERVAL_MS, 1000))
    }

    /// Probe timing and sizing for every host monitor.
    #[must_use]
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.integer(KEY_PROBE_INTERVAL_MS, 100)),
            probe_timeout: Duration::from_millis(self.integer(KEY_PROBE_TIMEOUT_MS, 500)),
            packet_size: usize::try_from(self.integer(KEY_PROBE_PACKET_SIZE, 55)).unwrap_or(55),
        }
    }

    fn integer(&self, key: &str, default: u64) -> u64 {
        self.settings
            .get(key)
            .and_then(toml::Value::as_integer)
            .and_then(|value| u64::try_from(value).ok())
            .unwrap_or(default)
    }
}

fn invalid(key: &str, details: &str) -> NdError {
    NdError::InvalidConfig {
        details: format!("{key}: {details}"),
    }
}
