//! ND-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, NdError>;

/// Top-level error type for netdev.
#[derive(Debug, Error)]
pub enum NdError {
    #[error("[ND-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ND-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ND-2001] invalid rule in {}:{line}: {details}", file.display())]
    RuleSyntax {
        file: PathBuf,
        line: usize,
        details: String,
    },

    #[error("[ND-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ND-3001] insufficient privilege: {details}")]
    InsufficientPrivilege { details: String },

    #[error("[ND-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ND-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[ND-3900] runtime failure: {details}")]
    Runtime { details: String },

    #[error("[ND-4001] command failed for rule {}: [{command}] ({status})", file.display())]
    ActionFailed {
        file: PathBuf,
        command: String,
        status: String,
    },

    #[error("[ND-4101] probe failure for {hostname}: {details}")]
    Probe { hostname: String, details: String },
}

impl NdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ND-1001",
            Self::ConfigParse { .. } => "ND-1003",
            Self::RuleSyntax { .. } => "ND-2001",
            Self::Serialization { .. } => "ND-2101",
            Self::InsufficientPrivilege { .. } => "ND-3001",
            Self::Io { .. } => "ND-3002",
            Self::ChannelClosed { .. } => "ND-3003",
            Self::Runtime { .. } => "ND-3900",
            Self::ActionFailed { .. } => "ND-4001",
            Self::Probe { .. } => "ND-4101",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a rejected rule line.
    #[must_use]
    pub fn rule(file: impl AsRef<Path>, line: usize, details: impl Into<String>) -> Self {
        Self::RuleSyntax {
            file: file.as_ref().to_path_buf(),
            line,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for NdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for NdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
