//! Report rendering.
//!
//! Formats class reports into the deterministic text block consumed by the
//! research pipeline's logs: one line per counter, a percentage only when
//! the counter has any items, and a closing tests/failures summary.
//! Emission goes to the dedicated `coverage_info` tracing target so the
//! harness can route report text separately from diagnostics.

use crate::report::ClassCoverage;
use tracing::info;

/// Logging target report text is emitted under.
pub const COVERAGE_TARGET: &str = "coverage_info";

/// Renders class reports as deterministic text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReporter {
    detailed: bool,
}

impl TextReporter {
    /// A reporter without method detail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Include one block per observed method.
    #[must_use]
    pub fn detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    /// Render `report` to a string.
    #[must_use]
    pub fn render(&self, report: &ClassCoverage) -> String {
        report.render(self.detailed)
    }

    /// Emit `report` to the `coverage_info` logging target.
    pub fn emit(&self, report: &ClassCoverage) {
        info!(target: COVERAGE_TARGET, "{}", self.render(report));
    }
}
