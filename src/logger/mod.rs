//! Log priorities and the stderr `tracing` subscriber.
//!
//! Every subsystem logs through `tracing` macros. The subscriber installed
//! here filters by a single threshold taken from the config file, unless
//! `RUST_LOG` is set, in which case that directive wins.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Ordered message priorities; messages below the threshold are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogPriority {
    /// Rule loading, reconciliation passes, monitor creation.
    Debug,
    /// Presence transitions.
    Info,
    /// Rejected rules and ignored settings.
    Warn,
    /// Failed actions.
    Error,
}

impl LogPriority {
    /// All priorities, lowest first.
    pub const ALL: [Self; 4] = [Self::Debug, Self::Info, Self::Warn, Self::Error];

    /// Config-file spelling of this priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Equivalent `tracing` level filter.
    #[must_use]
    pub const fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogPriority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| {
                format!("unknown log priority {value:?}; expected one of debug, info, warn, error")
            })
    }
}

/// Install the global stderr subscriber with `threshold` as the default level.
///
/// Returns `false` when a subscriber was already installed (tests, embedding).
pub fn init(threshold: LogPriority) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(threshold.level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::LogPriority;

    #[test]
    fn priorities_are_ordered() {
        assert!(LogPriority::Debug < LogPriority::Info);
        assert!(LogPriority::Warn < LogPriority::Error);
        assert!(LogPriority::Warn.level_filter() < LogPriority::Info.level_filter());
    }

    #[test]
    fn parses_config_spelling() {
        assert_eq!("debug".parse::<LogPriority>(), Ok(LogPriority::Debug));
        assert_eq!(" WARN ".parse::<LogPriority>(), Ok(LogPriority::Warn));
        assert!("verbose".parse::<LogPriority>().is_err());
        for priority in LogPriority::ALL {
            assert_eq!(priority.to_string().parse::<LogPriority>(), Ok(priority));
        }
    }
}
