//! Action dispatch: maps assign keys (`RUN`, ...) to handlers.
//!
//! New action kinds are added by registering another handler; rules and
//! monitors never need to know which kinds exist.

pub mod run;

use std::collections::HashMap;

use tracing::{error, warn};

use crate::core::errors::Result;
use crate::rules::parser::KEY_RUN;
use crate::rules::rule::{DeviceContext, Rule};

pub use run::RunHandler;

/// Executes the argument list of one action key.
pub trait ActionHandler: Send + Sync {
    /// Run `args` (already in clause order) for `rule` on `device`.
    fn execute(&self, rule: &Rule, args: &[String], device: &DeviceContext) -> Result<()>;
}

/// Outcome of executing one rule's actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Action keys whose handler returned `Ok`.
    pub succeeded: usize,
    /// Action keys whose handler failed.
    pub failed: usize,
    /// Action keys with no registered handler.
    pub unhandled: usize,
}

/// Registry of action handlers keyed by assign key.
pub struct ActionExecutor {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("ActionExecutor")
            .field("handlers", &keys)
            .finish()
    }
}

impl ActionExecutor {
    /// Executor with the built-in `RUN` handler using `shell`.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        let mut executor = Self::empty();
        executor.register(KEY_RUN, RunHandler::new(shell));
        executor
    }

    /// Executor with no handlers registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Install (or replace) the handler for `key`.
    pub fn register(&mut self, key: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.handlers.insert(key.into(), Box::new(handler));
    }

    /// Run every action key of `rule`. A failing key is logged and does not
    /// prevent the remaining keys from running.
    pub fn execute(&self, rule: &Rule, device: &DeviceContext) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();
        for (key, args) in &rule.actions {
            let Some(handler) = self.handlers.get(key) else {
                warn!(
                    file = %rule.source_file.display(),
                    line = rule.line,
                    action = %key,
                    "no handler for action; skipping"
                );
                summary.unhandled += 1;
                continue;
            };
            match handler.execute(rule, args, device) {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    error!(code = err.code(), action = %key, "{err}");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}
