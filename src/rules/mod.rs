//! Rule files: the clause grammar, the typed rule model, per-file parsing,
//! and the directory reconciliation store.

pub mod file;
pub mod parser;
pub mod rule;
pub mod store;

pub use file::RuleFile;
pub use rule::{DeviceContext, Rule, Transition};
pub use store::{ReconcileReport, RuleFileStore};
