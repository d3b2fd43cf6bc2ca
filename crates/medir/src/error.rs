//! Crate-level result and error types.

use crate::analyze::AnalysisError;
use crate::exec::ExecutionError;
use crate::image::ImageError;
use crate::instrument::InstrumentError;
use crate::loader::ResolveError;
use thiserror::Error;

/// Result type for engine operations.
pub type MedirResult<T> = Result<T, MedirError>;

/// Errors that can terminate a measurement session.
///
/// Per-test and per-unit problems are downgraded inside the aggregator and
/// never surface here; what does surface is fatal to the session.
#[derive(Debug, Error)]
pub enum MedirError {
    /// Instrumentation failed; the session aborted before running tests.
    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    /// A symbolic name failed to resolve.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A test invocation failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Trace analysis of a requested unit failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// A unit image could not be decoded or encoded.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Storage I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
