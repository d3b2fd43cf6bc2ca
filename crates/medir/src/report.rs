//! Coverage report data model.
//!
//! A measurement session produces one [`ClassCoverage`] per requested unit,
//! holding four [`Counter`]s and the session's [`TestOutcome`], plus one
//! [`MethodCoverage`] child per method observed in the execution trace.
//! Report identity is the unit name alone: two reports with the same name
//! compare equal regardless of their counter values.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Metric kind of a single coverage counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterKind {
    /// Executable instructions.
    Instruction,
    /// Branch edges at decision points.
    Branch,
    /// Source lines.
    Line,
    /// Cyclomatic complexity.
    Complexity,
}

impl CounterKind {
    /// Plural unit name used in rendered report lines.
    #[must_use]
    pub fn unit_name(&self) -> &'static str {
        match self {
            Self::Instruction => "instructions",
            Self::Branch => "branches",
            Self::Line => "lines",
            Self::Complexity => "complexity",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit_name())
    }
}

/// A covered/total pair for one metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Number of covered items.
    pub covered: u32,
    /// Total number of items.
    pub total: u32,
    /// Metric kind.
    pub kind: CounterKind,
}

impl Counter {
    /// Create a counter. `covered` must not exceed `total`.
    #[must_use]
    pub fn new(kind: CounterKind, covered: u32, total: u32) -> Self {
        debug_assert!(covered <= total, "covered {covered} > total {total}");
        Self {
            covered,
            total,
            kind,
        }
    }

    /// An all-zero counter of the given kind.
    #[must_use]
    pub fn empty(kind: CounterKind) -> Self {
        Self::new(kind, 0, 0)
    }

    /// Covered fraction in `[0, 1]`; `0` when `total` is zero.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.covered) / f64::from(self.total)
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} {} covered", self.covered, self.total, self.kind)?;
        if self.total > 0 {
            write!(f, " = {:.2}%", self.ratio() * 100.0)?;
        }
        Ok(())
    }
}

/// The four counters of one report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CounterSet {
    /// Instruction counter.
    pub instructions: Counter,
    /// Branch counter.
    pub branches: Counter,
    /// Line counter.
    pub lines: Counter,
    /// Complexity counter.
    pub complexity: Counter,
}

impl CounterSet {
    /// An all-zero counter set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            instructions: Counter::empty(CounterKind::Instruction),
            branches: Counter::empty(CounterKind::Branch),
            lines: Counter::empty(CounterKind::Line),
            complexity: Counter::empty(CounterKind::Complexity),
        }
    }

    /// Counters in rendering order.
    pub fn iter(&self) -> impl Iterator<Item = &Counter> {
        [
            &self.instructions,
            &self.branches,
            &self.lines,
            &self.complexity,
        ]
        .into_iter()
    }
}

/// Pass/fail tally accumulated across all test units of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Number of individual test cases that ran.
    pub executed: u32,
    /// Number of failures, including one per test unit whose invocation
    /// itself failed.
    pub failed: u32,
}

impl TestOutcome {
    /// Create an outcome.
    #[must_use]
    pub fn new(executed: u32, failed: u32) -> Self {
        Self { executed, failed }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tests; {} failure", self.executed, self.failed)
    }
}

/// Granularity of a coverage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportLevel {
    /// One method.
    Method,
    /// One class, owning method children.
    Class,
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Method => "method",
            Self::Class => "class",
        })
    }
}

/// Method-level coverage report.
///
/// Equality, hashing, and ordering are by name only, so a class's method
/// set is deterministic and deduplicated by label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCoverage {
    /// Resolved member label.
    pub name: String,
    /// The four counters.
    pub counters: CounterSet,
    /// Session outcome; shared with the owning class report.
    pub outcome: TestOutcome,
}

impl MethodCoverage {
    /// Create a method report.
    #[must_use]
    pub fn new(name: impl Into<String>, counters: CounterSet, outcome: TestOutcome) -> Self {
        Self {
            name: name.into(),
            counters,
            outcome,
        }
    }
}

impl PartialEq for MethodCoverage {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MethodCoverage {}

impl Hash for MethodCoverage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for MethodCoverage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MethodCoverage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for MethodCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_report(f, &self.name, ReportLevel::Method, &self.counters, self.outcome)
    }
}

/// Class-level coverage report owning its method children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCoverage {
    /// Fully-qualified unit name.
    pub name: String,
    /// The four counters, aggregated over all methods of the class.
    pub counters: CounterSet,
    /// Session outcome.
    pub outcome: TestOutcome,
    /// Method reports for members observed in the trace, ordered by name.
    pub methods: BTreeSet<MethodCoverage>,
}

impl ClassCoverage {
    /// Create a class report with no method children.
    #[must_use]
    pub fn new(name: impl Into<String>, counters: CounterSet, outcome: TestOutcome) -> Self {
        Self {
            name: name.into(),
            counters,
            outcome,
            methods: BTreeSet::new(),
        }
    }

    /// Render the report, optionally with one block per method child.
    #[must_use]
    pub fn render(&self, detailed: bool) -> String {
        let mut out = self.to_string();
        if detailed {
            for method in &self.methods {
                out.push_str("\n\n");
                out.push_str(&method.to_string());
            }
        }
        out
    }
}

impl PartialEq for ClassCoverage {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ClassCoverage {}

impl Hash for ClassCoverage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ClassCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_report(f, &self.name, ReportLevel::Class, &self.counters, self.outcome)
    }
}

fn write_report(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    level: ReportLevel,
    counters: &CounterSet,
    outcome: TestOutcome,
) -> fmt::Result {
    writeln!(f, "Coverage of `{name}` {level}:")?;
    for counter in counters.iter() {
        writeln!(f, "    {counter}")?;
    }
    write!(f, "    {outcome}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set_with(covered: u32, total: u32) -> CounterSet {
        CounterSet {
            instructions: Counter::new(CounterKind::Instruction, covered, total),
            branches: Counter::new(CounterKind::Branch, 0, 0),
            lines: Counter::new(CounterKind::Line, covered, total),
            complexity: Counter::new(CounterKind::Complexity, 1, 1),
        }
    }

    #[test]
    fn ratio_is_zero_for_empty_counter() {
        let counter = Counter::empty(CounterKind::Branch);
        assert_eq!(counter.ratio(), 0.0);
    }

    #[test]
    fn ratio_is_covered_over_total() {
        let counter = Counter::new(CounterKind::Line, 3, 4);
        assert!((counter.ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn counter_line_omits_percentage_when_total_is_zero() {
        let counter = Counter::empty(CounterKind::Branch);
        assert_eq!(counter.to_string(), "0 of 0 branches covered");
    }

    #[test]
    fn counter_line_appends_percentage_when_total_is_positive() {
        let counter = Counter::new(CounterKind::Instruction, 7, 12);
        assert_eq!(
            counter.to_string(),
            "7 of 12 instructions covered = 58.33%"
        );
    }

    #[test]
    fn outcome_line_format() {
        assert_eq!(TestOutcome::new(5, 2).to_string(), "5 tests; 2 failure");
    }

    #[test]
    fn reports_compare_equal_by_name_only() {
        let a = ClassCoverage::new("org.example.Stack", set_with(1, 2), TestOutcome::new(1, 0));
        let b = ClassCoverage::new("org.example.Stack", set_with(9, 9), TestOutcome::new(4, 4));
        assert_eq!(a, b);

        let m1 = MethodCoverage::new("push", set_with(0, 5), TestOutcome::default());
        let m2 = MethodCoverage::new("push", set_with(5, 5), TestOutcome::default());
        assert_eq!(m1, m2);
    }

    #[test]
    fn method_set_orders_and_dedupes_by_name() {
        let mut class =
            ClassCoverage::new("org.example.Stack", set_with(1, 2), TestOutcome::default());
        class
            .methods
            .insert(MethodCoverage::new("pop", set_with(1, 1), TestOutcome::default()));
        class
            .methods
            .insert(MethodCoverage::new("push", set_with(1, 1), TestOutcome::default()));
        class
            .methods
            .insert(MethodCoverage::new("pop", set_with(0, 9), TestOutcome::default()));

        let names: Vec<_> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["pop", "push"]);
    }

    #[test]
    fn class_render_matches_expected_block() {
        let class = ClassCoverage::new(
            "org.example.Stack",
            CounterSet {
                instructions: Counter::new(CounterKind::Instruction, 7, 12),
                branches: Counter::new(CounterKind::Branch, 0, 0),
                lines: Counter::new(CounterKind::Line, 3, 4),
                complexity: Counter::new(CounterKind::Complexity, 2, 3),
            },
            TestOutcome::new(2, 1),
        );
        let expected = "Coverage of `org.example.Stack` class:\n\
                        \x20   7 of 12 instructions covered = 58.33%\n\
                        \x20   0 of 0 branches covered\n\
                        \x20   3 of 4 lines covered = 75.00%\n\
                        \x20   2 of 3 complexity covered = 66.67%\n\
                        \x20   2 tests; 1 failure";
        assert_eq!(class.to_string(), expected);
    }

    #[test]
    fn detailed_render_appends_method_blocks_in_name_order() {
        let mut class =
            ClassCoverage::new("org.example.Stack", set_with(1, 2), TestOutcome::new(1, 0));
        class
            .methods
            .insert(MethodCoverage::new("b", set_with(1, 1), TestOutcome::new(1, 0)));
        class
            .methods
            .insert(MethodCoverage::new("a", set_with(1, 1), TestOutcome::new(1, 0)));

        let rendered = class.render(true);
        let a_pos = rendered.find("Coverage of `a` method:").unwrap();
        let b_pos = rendered.find("Coverage of `b` method:").unwrap();
        assert!(a_pos < b_pos);
        assert_eq!(class.render(false), class.to_string());
    }

    proptest! {
        #[test]
        fn ratio_stays_in_unit_interval(total in 0u32..10_000, covered_frac in 0.0f64..=1.0) {
            let covered = (f64::from(total) * covered_frac) as u32;
            let counter = Counter::new(CounterKind::Instruction, covered.min(total), total);
            let ratio = counter.ratio();
            prop_assert!(counter.covered <= counter.total);
            prop_assert!((0.0..=1.0).contains(&ratio));
            if counter.total == 0 {
                prop_assert_eq!(ratio, 0.0);
            }
        }
    }
}
