//! Rule-line grammar: comma-separated `KEY=="VALUE"` match clauses and
//! `KEY+="VALUE"` assign clauses.
//!
//! Parsing is all-or-nothing per line. A single bad clause, or a line that
//! fails validation, yields an error naming the file and line and nothing
//! of the line is kept.

use std::collections::BTreeMap;
use std::path::Path;

use crate::core::errors::{NdError, Result};
use crate::rules::rule::{Rule, Transition};

/// Reserved match key selecting the transition.
pub const KEY_ACTION: &str = "ACTION";
/// Reserved match key selecting the monitored host.
pub const KEY_HOSTNAME: &str = "HOSTNAME";
/// Assign key whose values are shell commands.
pub const KEY_RUN: &str = "RUN";

const MATCH_OPERATOR: &str = "==";
const ASSIGN_OPERATOR: &str = "+=";

/// One parsed clause with quotes already stripped from the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause<'a> {
    /// `KEY=="VALUE"`
    Match { key: &'a str, value: &'a str },
    /// `KEY+="VALUE"`
    Assign { key: &'a str, value: &'a str },
}

/// Whether a raw file line carries a rule (not blank, not a comment).
#[must_use]
pub fn is_rule_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// Parse and validate one rule line from `file`.
pub fn parse_rule(file: &Path, line_no: usize, line: &str) -> Result<Rule> {
    let reject = |details: String| NdError::rule(file, line_no, details);

    let mut hostname = None;
    let mut transition = None;
    let mut match_conditions = BTreeMap::new();
    let mut actions: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for text in split_clauses(line) {
        match parse_clause(text).map_err(reject)? {
            Clause::Match { key: KEY_HOSTNAME, value } => hostname = Some(value),
            Clause::Match { key: KEY_ACTION, value } => transition = Some(value),
            Clause::Match { key: KEY_RUN, .. } => {
                return Err(reject(format!("{KEY_RUN} only accepts {ASSIGN_OPERATOR}")));
            }
            Clause::Match { key, value } => {
                match_conditions.insert(key.to_string(), value.to_string());
            }
            Clause::Assign { key, .. } if key == KEY_ACTION || key == KEY_HOSTNAME => {
                return Err(reject(format!("{key} only accepts {MATCH_OPERATOR}")));
            }
            Clause::Assign { key, value } => {
                actions
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
    }

    let hostname = match hostname {
        Some("") => return Err(reject(format!("{KEY_HOSTNAME} must not be empty"))),
        Some(hostname) => hostname.to_string(),
        None => return Err(reject(format!("rule must define a {KEY_HOSTNAME}"))),
    };
    let transition: Transition = transition
        .ok_or_else(|| reject(format!("rule must define an {KEY_ACTION}")))?
        .parse()
        .map_err(reject)?;
    if actions.is_empty() {
        return Err(reject(
            "rule must define at least one assignment clause".to_string(),
        ));
    }

    Ok(Rule {
        source_file: file.to_path_buf(),
        line: line_no,
        hostname,
        transition,
        match_conditions,
        actions,
    })
}

/// Classify one clause. The operator that appears first in the text wins,
/// so `A=="x+=y"` is a match clause.
pub fn parse_clause(text: &str) -> std::result::Result<Clause<'_>, String> {
    let text = text.trim();
    let operator = [MATCH_OPERATOR, ASSIGN_OPERATOR]
        .into_iter()
        .filter_map(|op| text.find(op).map(|at| (at, op)))
        .min_by_key(|(at, _)| *at);
    let Some((at, operator)) = operator else {
        return Err(format!("invalid clause: {text}"));
    };

    let key = text[..at].trim();
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(format!("invalid key in clause: {text}"));
    }
    let raw = text[at + operator.len()..].trim();
    let value = unquote(raw)
        .ok_or_else(|| format!("value for {key} must be surrounded by quotes: {raw}"))?;

    Ok(if operator == MATCH_OPERATOR {
        Clause::Match { key, value }
    } else {
        Clause::Assign { key, value }
    })
}

fn unquote(raw: &str) -> Option<&str> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

/// Split on commas that sit outside double quotes.
fn split_clauses(line: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                clauses.push(&line[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    clauses.push(&line[start..]);
    clauses
}
