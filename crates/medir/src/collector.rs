//! Coverage aggregation.
//!
//! A [`CoverageCollector`] owns one measurement session per `measure`
//! call: instrument the requested units (fail-fast), arm a fresh trace
//! recorder, run every discovered test unit through the deadline-bounded
//! runner, extract the trace, analyze it against the original bytes, and
//! restore the stored units unconditionally.
//!
//! Per-test and per-unit problems are downgraded to skip-and-continue with
//! a log line; only instrumentation failures and storage I/O propagate.

use crate::analyze::{AnalysisError, TraceAnalyzer};
use crate::config::SessionConfig;
use crate::container::UnitContainer;
use crate::error::MedirResult;
use crate::exec::{ScriptRunner, TestRunner};
use crate::index::{MemberIndex, NullIndex};
use crate::instrument::InstrumentedSet;
use crate::loader::{discover_test_units, HostResolver, SessionLoader, SharedHost};
use crate::report::{ClassCoverage, TestOutcome};
use crate::runner::{run_with_deadline, RunOutcome};
use crate::trace::TraceRecorder;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs measurement sessions against one configured session layout.
pub struct CoverageCollector {
    config: SessionConfig,
    runner: Arc<dyn TestRunner>,
    host: Arc<dyn HostResolver>,
    index: Arc<dyn MemberIndex>,
}

impl std::fmt::Debug for CoverageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageCollector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CoverageCollector {
    /// Create a collector, extracting `containers` into the
    /// instrumentation root.
    ///
    /// A container that fails to extract is logged and skipped, matching
    /// the collaborating harness's expectations; a missing unit surfaces
    /// later as an instrumentation failure.
    pub fn new(
        config: SessionConfig,
        containers: &[Box<dyn UnitContainer>],
    ) -> MedirResult<Self> {
        config.ensure_dirs()?;
        let instrumented_dir = config.instrumented_dir();
        for container in containers {
            match container.extract_to(&instrumented_dir) {
                Ok(count) => {
                    debug!(container = container.label(), units = count, "extracted");
                }
                Err(error) => {
                    warn!(container = container.label(), %error, "container extraction failed");
                }
            }
        }
        Ok(Self {
            config,
            runner: Arc::new(ScriptRunner::new()),
            host: Arc::new(SharedHost::new()),
            index: Arc::new(NullIndex),
        })
    }

    /// Replace the test-runner adapter.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replace the host resolver shared across sessions.
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostResolver>) -> Self {
        self.host = host;
        self
    }

    /// Replace the structural member index used for labeling.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn MemberIndex>) -> Self {
        self.index = index;
        self
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Measure coverage of one target unit across the discovered tests.
    pub fn measure(&self, target: &str) -> MedirResult<ClassCoverage> {
        let mut reports = self.run_session(&[target])?;
        let (_, result) = reports.pop().expect("one result per target");
        result.map_err(Into::into)
    }

    /// Measure coverage of several target units in one session.
    ///
    /// Units whose analysis fails are logged and omitted from the result.
    pub fn measure_units(&self, targets: &[&str]) -> MedirResult<Vec<ClassCoverage>> {
        let reports = self.run_session(targets)?;
        Ok(reports
            .into_iter()
            .filter_map(|(unit, result)| match result {
                Ok(report) => Some(report),
                Err(error) => {
                    warn!(unit = unit.as_str(), %error, "skipping unit counters");
                    None
                }
            })
            .collect())
    }

    #[allow(clippy::type_complexity)]
    fn run_session(
        &self,
        targets: &[&str],
    ) -> MedirResult<Vec<(String, Result<ClassCoverage, AnalysisError>)>> {
        let entries: Vec<_> = targets
            .iter()
            .map(|name| ((*name).to_string(), self.config.instrumented_unit_path(name)))
            .collect();
        let instrumented = InstrumentedSet::instrument_all(entries)?;

        let test_units = discover_test_units(&self.config.compiled_tests_dir())?;
        debug!(count = test_units.len(), "discovered test units");

        let recorder = TraceRecorder::arm();
        let loader = Arc::new(SessionLoader::new(
            self.config.execution_roots(),
            recorder.handle(),
            Arc::clone(&self.host),
        ));

        let mut outcome = TestOutcome::default();
        for test in &test_units {
            debug!(test = test.name.as_str(), "running test unit");
            let loaded = match loader.resolve(&test.name) {
                Ok(unit) => unit,
                Err(error) => {
                    warn!(test = test.name.as_str(), %error, "cannot resolve test unit; skipping");
                    continue;
                }
            };

            let runner = Arc::clone(&self.runner);
            let run_loader = Arc::clone(&loader);
            let run = run_with_deadline(self.config.deadline_ms(), move |token| {
                runner.run(&loaded, &run_loader, token)
            });
            match run {
                RunOutcome::Completed(counts) => {
                    outcome.executed += counts.tests;
                    outcome.failed += counts.failures;
                }
                RunOutcome::TimedOut => {
                    warn!(test = test.name.as_str(), "test unit exceeded its deadline; skipping");
                }
                RunOutcome::Failed(cause) if cause.is_resolution() => {
                    warn!(test = test.name.as_str(), %cause, "resolution failed mid-run; skipping");
                }
                RunOutcome::Failed(cause) => {
                    warn!(test = test.name.as_str(), %cause, "test unit failed");
                    outcome.failed += 1;
                }
            }
        }

        let trace = recorder.extract();
        debug!(probes = trace.probes_fired(), "extracted execution trace");

        let analyzer = TraceAnalyzer::new(&trace, self.index.as_ref());
        let reports: Vec<_> = instrumented
            .originals()
            .map(|(name, bytes)| {
                (
                    name.to_string(),
                    analyzer.analyze_unit(name, bytes, outcome),
                )
            })
            .collect();

        instrumented.restore()?;
        Ok(reports)
    }
}
