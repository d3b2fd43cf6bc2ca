//! Medir CLI library.
//!
//! The harness around the measurement engine: argument parsing, benchmark
//! suite loading, the external-compiler hook, and the per-benchmark ×
//! per-run session loop.

#![warn(missing_docs)]

mod commands;
mod compile;
mod config;
mod error;
mod harness;

pub use commands::Cli;
pub use compile::CompilerHelper;
pub use config::{BenchmarkSuite, BenchmarkTask};
pub use error::{CliError, CliResult};
pub use harness::run_suite;
