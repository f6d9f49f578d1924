//! `netdev` binary entry point.

use std::process::ExitCode;

use clap::Parser;
use netdev::cli_app::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli_app::run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("netdev: {err}");
            ExitCode::FAILURE
        }
    }
}
