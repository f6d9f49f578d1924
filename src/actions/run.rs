//! `RUN` action: shell commands executed strictly in order.

use std::process::Command;

use tracing::debug;

use super::ActionHandler;
use crate::core::errors::{NdError, Result};
use crate::rules::rule::{DeviceContext, Rule};

/// Runs each argument as `<shell> -c <command>`; stops at the first failure.
#[derive(Debug, Clone)]
pub struct RunHandler {
    shell: String,
}

impl RunHandler {
    /// Handler running commands through `shell -c`.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl ActionHandler for RunHandler {
    fn execute(&self, rule: &Rule, args: &[String], device: &DeviceContext) -> Result<()> {
        for command in args {
            debug!(file = %rule.source_file.display(), command = %command, "running command");
            let status = Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .envs(device.env_vars())
                .env("NETDEV_RULES_FILE", &rule.source_file)
                .status();
            let failure = match status {
                Ok(status) if status.success() => continue,
                Ok(status) => status.to_string(),
                Err(err) => format!("failed to start {}: {err}", self.shell),
            };
            return Err(NdError::ActionFailed {
                file: rule.source_file.clone(),
                command: command.clone(),
                status: failure,
            });
        }
        Ok(())
    }
}
