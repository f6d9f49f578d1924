//! Top-level CLI definition and dispatch.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use crate::core::config::{self, Config};
use crate::core::errors::{NdError, Result};
use crate::daemon::privilege;
use crate::logger;
use crate::rules::file::{has_rules_extension, parse_contents};
use crate::rules::rule::Rule;

/// Run commands when network hosts appear on or drop off the network.
#[derive(Parser)]
#[command(name = "netdev", version, about)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Override the rules directory.
    #[arg(long, global = true)]
    pub rules_dir: Option<PathBuf>,
    /// Override the log threshold (debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the monitor in the foreground until SIGINT/SIGTERM.
    Daemon,
    /// Validate rule files and list the rules they define.
    Check {
        /// Rule files to check; defaults to every `.rules` file in the rules directory.
        paths: Vec<PathBuf>,
        /// Emit a JSON report.
        #[arg(long)]
        json: bool,
    },
    /// Probe one host and report whether it answered.
    Probe {
        /// Hostname or IPv4 address.
        hostname: String,
    },
    /// Print shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Dispatch CLI commands. `Ok(false)` means the command ran but found a
/// problem (rejected rules, unreachable host).
pub fn run(cli: &Cli) -> Result<bool> {
    if let Command::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "netdev", &mut io::stdout());
        return Ok(true);
    }

    let config = load_config(cli)?;
    logger::init(config.log_priority());
    for key in config.ignored_keys() {
        warn!(setting = %key, "config specified unknown setting; ignoring");
    }
    for problem in config.problems() {
        warn!(config = %cli.config.display(), "{problem}; using the default");
    }

    match &cli.command {
        Command::Daemon => run_daemon(&config),
        Command::Check { paths, json } => run_check(&config, paths, *json),
        Command::Probe { hostname } => run_probe(&config, hostname),
        Command::Completions { .. } => Ok(true),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config);
    if let Some(dir) = &cli.rules_dir {
        config.set(
            config::KEY_RULES_DIR,
            toml::Value::from(dir.display().to_string()),
        )?;
    }
    if let Some(level) = &cli.log_level {
        config.set(config::KEY_LOG_LEVEL, toml::Value::from(level.as_str()))?;
    }
    Ok(config)
}

#[cfg(unix)]
fn run_daemon(config: &Config) -> Result<bool> {
    crate::daemon::loop_main::run(config)?;
    Ok(true)
}

#[cfg(not(unix))]
fn run_daemon(_config: &Config) -> Result<bool> {
    Err(NdError::Runtime {
        details: "the daemon requires a unix platform".to_string(),
    })
}

#[cfg(unix)]
fn run_probe(config: &Config, hostname: &str) -> Result<bool> {
    use crate::monitor::probe::{IcmpProbe, Probe};

    privilege::ensure_privileged()?;
    let settings = config.monitor_settings();
    let reply = IcmpProbe::new().probe(hostname, settings.probe_timeout, settings.packet_size);
    match reply {
        Some(reply) => {
            println!(
                "{hostname} is reachable ({}, {:.1} ms)",
                reply.address,
                reply.rtt.as_secs_f64() * 1000.0
            );
            Ok(true)
        }
        None => {
            println!(
                "{hostname} is unreachable (no reply within {} ms)",
                settings.probe_timeout.as_millis()
            );
            Ok(false)
        }
    }
}

#[cfg(not(unix))]
fn run_probe(_config: &Config, _hostname: &str) -> Result<bool> {
    privilege::ensure_privileged()?;
    Ok(false)
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

/// Result of checking one rule file.
#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub path: PathBuf,
    pub rules: Vec<Rule>,
    /// Rendered errors for lines that failed to parse.
    pub rejected: Vec<String>,
    /// Set when the file could not be read at all.
    pub read_error: Option<String>,
}

impl FileCheck {
    fn ok(&self) -> bool {
        self.rejected.is_empty() && self.read_error.is_none()
    }
}

/// Structured report for `netdev check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub files: Vec<FileCheck>,
    pub success: bool,
}

/// Parse each file and collect accepted rules and rejected lines.
#[must_use]
pub fn check_files(paths: &[PathBuf]) -> CheckReport {
    let files: Vec<FileCheck> = paths
        .iter()
        .map(|path| match std::fs::read_to_string(path) {
            Ok(contents) => {
                let parsed = parse_contents(path, &contents);
                FileCheck {
                    path: path.clone(),
                    rules: parsed.rules,
                    rejected: parsed.rejected.iter().map(ToString::to_string).collect(),
                    read_error: None,
                }
            }
            Err(err) => FileCheck {
                path: path.clone(),
                rules: Vec::new(),
                rejected: Vec::new(),
                read_error: Some(NdError::io(path, err).to_string()),
            },
        })
        .collect();
    let success = files.iter().all(FileCheck::ok);
    CheckReport { files, success }
}

/// Every `.rules` file directly inside `dir`, sorted.
pub fn rule_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|err| NdError::io(dir, err))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| has_rules_extension(path) && path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Human-readable rendering of a check report.
#[must_use]
pub fn format_check_report(report: &CheckReport, color: bool) -> String {
    let tag = |ok: bool| {
        let text = if ok { "[OK]  " } else { "[FAIL]" };
        match (color, ok) {
            (false, _) => text.to_string(),
            (true, true) => text.green().to_string(),
            (true, false) => text.red().to_string(),
        }
    };
    let mut out = String::new();
    if report.files.is_empty() {
        out.push_str("no rule files found\n");
    }
    for file in &report.files {
        let _ = writeln!(
            out,
            "{} {}: {} rule(s)",
            tag(file.ok()),
            file.path.display(),
            file.rules.len()
        );
        for rule in &file.rules {
            let actions: Vec<String> = rule
                .actions
                .iter()
                .map(|(key, args)| format!("{key} x{}", args.len()))
                .collect();
            let _ = writeln!(
                out,
                "       line {}: {} on {} -> {}",
                rule.line,
                rule.hostname,
                rule.transition,
                actions.join(", ")
            );
        }
        for rejected in file.rejected.iter().chain(&file.read_error) {
            let _ = writeln!(out, "       {rejected}");
        }
    }
    out
}

fn run_check(config: &Config, paths: &[PathBuf], json: bool) -> Result<bool> {
    let paths = if paths.is_empty() {
        rule_files_in(&config.rules_dir())?
    } else {
        paths.to_vec()
    };
    let report = check_files(&paths);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_check_report(&report, true));
    }
    Ok(report.success)
}
