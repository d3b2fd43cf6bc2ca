//! Medir CLI: coverage measurement over benchmark suites.
//!
//! ## Usage
//!
//! ```bash
//! medir -c suite.json -b out/                 # one run per benchmark
//! medir -c suite.json -b out/ -r 5 -t 10      # 5 runs, 10s per test
//! medir -c suite.json -b out/ --detailed      # method-level reports
//! ```

use clap::Parser;
use console::style;
use medir_cli::{run_suite, Cli};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_suite(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
