//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Measure coverage of generated test suites over a benchmark collection.
#[derive(Debug, Parser)]
#[command(name = "medir", version, about)]
pub struct Cli {
    /// Path to the benchmark suite definition (JSON).
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Base directory session trees are created under.
    #[arg(short = 'b', long = "base-dir")]
    pub base_dir: PathBuf,

    /// Extra unit-image roots shared by every benchmark (runtime and
    /// test-framework dependencies).
    #[arg(short = 'd', long = "deps", num_args = 1..)]
    pub deps: Vec<PathBuf>,

    /// Number of measurement runs per benchmark.
    #[arg(short = 'r', long = "runs", default_value_t = 1)]
    pub runs: u32,

    /// Per-test deadline in seconds; the engine default applies when
    /// omitted.
    #[arg(short = 't', long = "timeout")]
    pub timeout: Option<u64>,

    /// External compiler command for generated test sources; compilation
    /// is skipped when omitted.
    #[arg(long = "compiler", env = "MEDIR_COMPILER")]
    pub compiler: Option<String>,

    /// Render method-level detail in reports.
    #[arg(long = "detailed")]
    pub detailed: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_invocation_parses_with_defaults() {
        let cli = Cli::parse_from(["medir", "-c", "suite.json", "-b", "/tmp/out"]);
        assert_eq!(cli.runs, 1);
        assert_eq!(cli.timeout, None);
        assert!(cli.deps.is_empty());
        assert!(!cli.detailed);
    }

    #[test]
    fn full_invocation_parses_every_option() {
        let cli = Cli::parse_from([
            "medir",
            "--config",
            "suite.json",
            "--base-dir",
            "/tmp/out",
            "--deps",
            "/deps/testkit",
            "/deps/rt",
            "--runs",
            "3",
            "--timeout",
            "10",
            "--compiler",
            "suitec",
            "--detailed",
            "-vv",
        ]);
        assert_eq!(cli.deps.len(), 2);
        assert_eq!(cli.runs, 3);
        assert_eq!(cli.timeout, Some(10));
        assert_eq!(cli.compiler.as_deref(), Some("suitec"));
        assert!(cli.detailed);
        assert_eq!(cli.verbose, 2);
    }
}
