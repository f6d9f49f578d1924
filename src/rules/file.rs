//! One parsed `.rules` file and its last-observed modification time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::core::errors::{NdError, Result};
use crate::rules::parser::{is_rule_line, parse_rule};
use crate::rules::rule::Rule;

/// File extension (compared case-insensitively) of rule files.
pub const RULES_EXTENSION: &str = "rules";

/// Whether `path` names a rule file by extension.
#[must_use]
pub fn has_rules_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(RULES_EXTENSION))
}

/// Accepted rules and rejected lines from one pass over a file's text.
#[derive(Debug, Default)]
pub struct ParseReport {
    /// Valid rules in file order.
    pub rules: Vec<Rule>,
    /// One `RuleSyntax` error per rejected line.
    pub rejected: Vec<NdError>,
}

/// Parse every rule line of `contents`; bad lines are collected, not fatal.
#[must_use]
pub fn parse_contents(path: &Path, contents: &str) -> ParseReport {
    let mut report = ParseReport::default();
    for (idx, line) in contents.lines().enumerate() {
        if !is_rule_line(line) {
            continue;
        }
        match parse_rule(path, idx + 1, line.trim()) {
            Ok(rule) => report.rules.push(rule),
            Err(err) => report.rejected.push(err),
        }
    }
    report
}

/// Parsed contents of one rule file.
#[derive(Debug, Clone)]
pub struct RuleFile {
    pub path: PathBuf,
    pub rules: Vec<Arc<Rule>>,
    pub modified_at: Option<SystemTime>,
}

impl RuleFile {
    /// A tracked file that currently contributes no rules.
    #[must_use]
    pub fn empty(path: &Path, modified_at: Option<SystemTime>) -> Self {
        Self {
            path: path.to_path_buf(),
            rules: Vec::new(),
            modified_at,
        }
    }

    /// Read and parse `path`. Rejected lines are logged and skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let modified_at = modified_time(path);
        let contents = std::fs::read_to_string(path).map_err(|err| NdError::io(path, err))?;
        let report = parse_contents(path, &contents);
        for err in &report.rejected {
            warn!(code = err.code(), "ignoring invalid rule: {err}");
        }
        debug!(
            path = %path.display(),
            accepted = report.rules.len(),
            rejected = report.rejected.len(),
            "parsed rules file"
        );
        Ok(Self {
            path: path.to_path_buf(),
            rules: report.rules.into_iter().map(Arc::new).collect(),
            modified_at,
        })
    }

    /// Like [`RuleFile::load`], but an unreadable file becomes an empty rule set.
    #[must_use]
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(file) => {
                if file.rules.is_empty() {
                    warn!(path = %path.display(), "rules file contains no valid rules");
                }
                file
            }
            Err(err) => {
                warn!(code = err.code(), "failed to read rules file: {err}");
                Self::empty(path, modified_time(path))
            }
        }
    }
}

/// Modification time of `path`, if the platform reports one.
#[must_use]
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_rules_extension(Path::new("/x/10-nas.rules")));
        assert!(has_rules_extension(Path::new("/x/10-NAS.RULES")));
        assert!(has_rules_extension(Path::new("/x/a.Rules")));
        assert!(!has_rules_extension(Path::new("/x/nas.rules.bak")));
        assert!(!has_rules_extension(Path::new("/x/rules")));
    }

    #[test]
    fn bad_lines_do_not_abort_the_file() {
        let contents = "\
# printers
HOSTNAME==\"printer\", ACTION==\"discover\", RUN+=\"lpadmin -E\"

HOSTNAME==\"printer\", RUN+=\"missing action\"
HOSTNAME==\"printer\", ACTION==\"lost\", RUN+=\"logger gone\"
";
        let report = parse_contents(Path::new("/r/p.rules"), contents);
        assert_eq!(report.rules.len(), 2);
        assert_eq!(report.rules[0].line, 2);
        assert_eq!(report.rules[1].line, 5);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].to_string().contains("p.rules:4"));
    }

    #[test]
    fn load_records_modification_time() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.rules");
        std::fs::write(&path, "HOSTNAME==\"a\", ACTION==\"lost\", RUN+=\"true\"\n").unwrap();
        let file = RuleFile::load(&path).unwrap();
        assert_eq!(file.rules.len(), 1);
        assert!(file.modified_at.is_some());
        assert_eq!(file.modified_at, modified_time(&path));
    }

    #[test]
    fn unreadable_file_loads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dir.rules");
        std::fs::create_dir(&path).unwrap();
        let file = RuleFile::load_or_empty(&path);
        assert!(file.rules.is_empty());
        assert_eq!(file.path, path);
    }
}
