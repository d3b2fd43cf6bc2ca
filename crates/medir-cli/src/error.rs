//! Error types for the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Benchmark suite definition could not be used.
    #[error("benchmark suite {path}: {message}")]
    Suite {
        /// Suite file.
        path: PathBuf,
        /// What was wrong.
        message: String,
    },

    /// External compiler invocation failed.
    #[error("compiler `{command}` failed on {source_file}")]
    Compile {
        /// Configured compiler command.
        command: String,
        /// Source file being compiled.
        source_file: PathBuf,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Suite definitions are JSON documents.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Engine error.
    #[error(transparent)]
    Medir(#[from] medir::MedirError),
}
