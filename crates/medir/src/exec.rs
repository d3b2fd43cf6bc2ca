//! Test invocation.
//!
//! [`TestRunner`] is the engine's single point of dynamic dispatch: given a
//! test unit resolved through the session loader, invoke its standard
//! entry point and report how many test cases ran and how many failed.
//!
//! The bundled [`ScriptRunner`] replays the invocation scripts recorded in
//! test unit images: each test method resolves its targets by symbolic
//! name through the loader (so probes bound to the armed session fire) and
//! honors cooperative cancellation between operations and inside sleeps.

use crate::image::ScriptOp;
use crate::loader::{LoadedUnit, ResolveError, SessionLoader};
use crate::runner::CancelToken;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised while invoking a test unit.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A symbolic name failed to resolve during execution.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The test unit's recorded run crashed.
    #[error("test unit aborted: {message}")]
    Aborted {
        /// Crash message.
        message: String,
    },

    /// Cancellation was requested before the unit finished.
    #[error("execution cancelled")]
    Cancelled,

    /// The worker thread panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The deadline was zero or negative; the operation was never invoked.
    #[error("invalid deadline {millis}ms")]
    InvalidDeadline {
        /// The rejected deadline.
        millis: i64,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(String),
}

impl ExecutionError {
    /// Whether the cause is a resolution failure, which skips the test
    /// unit instead of counting a failure.
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolve(_))
    }
}

/// Counts reported by one test unit's entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestRunOutcome {
    /// Individual test cases that ran.
    pub tests: u32,
    /// Test cases that failed.
    pub failures: u32,
}

/// Invokes one test unit's entry point.
pub trait TestRunner: Send + Sync {
    /// Run every test case in `test`, resolving collaborators through
    /// `loader` and honoring `token`.
    fn run(
        &self,
        test: &LoadedUnit,
        loader: &SessionLoader,
        token: &CancelToken,
    ) -> Result<TestRunOutcome, ExecutionError>;
}

/// Replays the invocation scripts recorded in test unit images.
#[derive(Debug, Default)]
pub struct ScriptRunner;

impl ScriptRunner {
    /// Create a runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn run_method(
        test_name: &str,
        method_name: &str,
        script: &[ScriptOp],
        loader: &SessionLoader,
        token: &CancelToken,
    ) -> Result<bool, ExecutionError> {
        for op in script {
            if token.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            match op {
                ScriptOp::Invoke {
                    unit,
                    method,
                    blocks,
                } => {
                    let target = loader.resolve(unit)?;
                    if !target.mark_blocks(method, blocks) {
                        return Err(ResolveError::MemberNotFound {
                            unit: unit.clone(),
                            method: method.clone(),
                        }
                        .into());
                    }
                }
                ScriptOp::Sleep { millis } => {
                    if !token.sleep(Duration::from_millis(u64::from(*millis))) {
                        return Err(ExecutionError::Cancelled);
                    }
                }
                ScriptOp::Fail { message } => {
                    debug!(
                        test = test_name,
                        case = method_name,
                        message = message.as_str(),
                        "recorded assertion failure"
                    );
                    return Ok(false);
                }
                ScriptOp::Abort { message } => {
                    return Err(ExecutionError::Aborted {
                        message: message.clone(),
                    });
                }
            }
        }
        Ok(true)
    }
}

impl TestRunner for ScriptRunner {
    fn run(
        &self,
        test: &LoadedUnit,
        loader: &SessionLoader,
        token: &CancelToken,
    ) -> Result<TestRunOutcome, ExecutionError> {
        let mut outcome = TestRunOutcome::default();
        for method in &test.image().methods {
            if token.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            let passed =
                Self::run_method(test.name(), &method.name, &method.script, loader, token)?;
            outcome.tests += 1;
            if !passed {
                outcome.failures += 1;
            }
        }
        Ok(outcome)
    }
}
