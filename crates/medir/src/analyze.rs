//! Trace analysis.
//!
//! Reduces a session's [`ExecutionTrace`] plus one ORIGINAL unit image
//! into class- and method-level counters. The analyzer recomputes the same
//! sequential probe assignment the instrumenter used, joins it with the
//! recorded hit vector, and attributes instruction/branch/line/complexity
//! weights to covered blocks.
//!
//! Method reports exist only for members actually observed in the trace;
//! untouched methods still contribute to the class totals but get no
//! zero-filled child report.

use crate::image::{ImageError, MethodImage, UnitImage};
use crate::index::MemberIndex;
use crate::report::{
    ClassCoverage, Counter, CounterKind, CounterSet, MethodCoverage, TestOutcome,
};
use crate::trace::ExecutionTrace;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised while analyzing one unit. Skips that unit's counters only.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The original bytes are not a valid unit image.
    #[error("malformed unit `{unit}`: {source}")]
    Image {
        /// Unit name.
        unit: String,
        /// Underlying error.
        #[source]
        source: ImageError,
    },

    /// Analysis must run against pre-instrumentation bytes.
    #[error("unit `{unit}` is instrumented; analysis needs the original bytes")]
    Instrumented {
        /// Unit name.
        unit: String,
    },

    /// The trace's hit vector disagrees with the unit's probe sites.
    #[error("trace for `{unit}` has {recorded} probes, image has {expected}")]
    ProbeMismatch {
        /// Unit name.
        unit: String,
        /// Probe sites computed from the image.
        expected: u32,
        /// Probe slots recorded in the trace.
        recorded: u32,
    },
}

/// Analyzes one session's trace against original unit images.
pub struct TraceAnalyzer<'a> {
    trace: &'a ExecutionTrace,
    index: &'a dyn MemberIndex,
}

impl std::fmt::Debug for TraceAnalyzer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceAnalyzer")
            .field("session_id", &self.trace.session_id())
            .finish_non_exhaustive()
    }
}

struct MethodCounters {
    counters: CounterSet,
    observed: bool,
}

impl<'a> TraceAnalyzer<'a> {
    /// Create an analyzer over `trace`, labeling members through `index`.
    #[must_use]
    pub fn new(trace: &'a ExecutionTrace, index: &'a dyn MemberIndex) -> Self {
        Self { trace, index }
    }

    /// Analyze one original unit, attaching `outcome` to every report.
    pub fn analyze_unit(
        &self,
        name: &str,
        original: &[u8],
        outcome: TestOutcome,
    ) -> Result<ClassCoverage, AnalysisError> {
        let image = UnitImage::decode(original).map_err(|source| AnalysisError::Image {
            unit: name.to_string(),
            source,
        })?;
        if image.instrumented {
            return Err(AnalysisError::Instrumented {
                unit: image.name.clone(),
            });
        }

        let hits = match self.trace.hits(&image.name) {
            Some(unit_hits) => {
                let recorded = unit_hits.hits.len() as u32;
                let expected = image.probe_sites();
                if recorded != expected {
                    return Err(AnalysisError::ProbeMismatch {
                        unit: image.name.clone(),
                        expected,
                        recorded,
                    });
                }
                Some(unit_hits.hits.as_slice())
            }
            None => None,
        };

        let mut class = ClassCoverage::new(image.name.clone(), CounterSet::empty(), outcome);
        let bases = image.probe_bases();
        let mut totals = RawSet::default();

        for (method, base) in image.methods.iter().zip(bases) {
            if method.blocks.is_empty() {
                continue;
            }
            let method_hits = hits.map(|h| &h[base as usize..base as usize + method.blocks.len()]);
            let analyzed = analyze_method(method, method_hits);
            totals.add(&analyzed.counters);
            if analyzed.observed {
                let label = self
                    .index
                    .method_label(&image.name, &method.name, &method.descriptor)
                    .unwrap_or_else(|| format!("{}::{}", image.name, method.name));
                class
                    .methods
                    .insert(MethodCoverage::new(label, analyzed.counters, outcome));
            }
        }

        class.counters = totals.into_counters();
        Ok(class)
    }
}

#[derive(Default)]
struct RawSet {
    covered: [u32; 4],
    total: [u32; 4],
}

impl RawSet {
    fn add(&mut self, set: &CounterSet) {
        for (i, counter) in set.iter().enumerate() {
            self.covered[i] += counter.covered;
            self.total[i] += counter.total;
        }
    }

    fn into_counters(self) -> CounterSet {
        CounterSet {
            instructions: Counter::new(CounterKind::Instruction, self.covered[0], self.total[0]),
            branches: Counter::new(CounterKind::Branch, self.covered[1], self.total[1]),
            lines: Counter::new(CounterKind::Line, self.covered[2], self.total[2]),
            complexity: Counter::new(CounterKind::Complexity, self.covered[3], self.total[3]),
        }
    }
}

fn analyze_method(method: &MethodImage, hits: Option<&[bool]>) -> MethodCounters {
    let mut instr_total = 0u32;
    let mut instr_covered = 0u32;
    let mut branch_total = 0u32;
    let mut branch_covered = 0u32;
    let mut lines_total = BTreeSet::new();
    let mut lines_covered = BTreeSet::new();
    // Cyclomatic complexity in decision-point form: one path plus one per
    // extra branch edge.
    let mut decisions_total = 0u32;
    let mut decisions_covered = 0u32;
    let mut observed = false;

    for (i, block) in method.blocks.iter().enumerate() {
        let hit = hits.is_some_and(|h| h[i]);
        let extra_edges = u32::from(block.branches.max(1)) - 1;

        instr_total += u32::from(block.instructions);
        branch_total += u32::from(block.branches);
        lines_total.insert(block.line);
        decisions_total += extra_edges;

        if hit {
            observed = true;
            instr_covered += u32::from(block.instructions);
            branch_covered += u32::from(block.branches);
            lines_covered.insert(block.line);
            decisions_covered += extra_edges;
        }
    }

    let complexity_total = 1 + decisions_total;
    let complexity_covered = if observed { 1 + decisions_covered } else { 0 };

    MethodCounters {
        counters: CounterSet {
            instructions: Counter::new(CounterKind::Instruction, instr_covered, instr_total),
            branches: Counter::new(CounterKind::Branch, branch_covered, branch_total),
            lines: Counter::new(
                CounterKind::Line,
                lines_covered.len() as u32,
                lines_total.len() as u32,
            ),
            complexity: Counter::new(CounterKind::Complexity, complexity_covered, complexity_total),
        },
        observed,
    }
}
