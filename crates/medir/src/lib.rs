//! Medir: coverage measurement engine for generated test suites.
//!
//! Medir (Spanish: "to measure") instruments compiled unit images with
//! execution probes, replays discovered test units against them inside an
//! isolated per-session namespace under per-test deadlines, and reduces
//! the recorded execution trace into per-class and per-method coverage
//! counters alongside pass/fail tallies.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      MEDIR Architecture                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐             │
//! │   │ Instrument │───►│ Run tests  │───►│ Analyze    │             │
//! │   │ (probes in,│    │ (loader +  │    │ trace,     │             │
//! │   │  originals │    │  deadline  │    │ restore    │             │
//! │   │  captured) │    │  runner)   │    │ originals  │             │
//! │   └────────────┘    └────────────┘    └────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One [`CoverageCollector::measure`] call is one measurement session:
//! probe state, the loader cache, and the execution trace are created when
//! the session arms and discarded when it ends, so consecutive sessions
//! never share unit identity.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod analyze;
pub mod collector;
pub mod config;
pub mod container;
pub mod error;
pub mod exec;
pub mod image;
pub mod index;
pub mod instrument;
pub mod loader;
pub mod report;
pub mod reporter;
pub mod runner;
pub mod trace;

pub use analyze::{AnalysisError, TraceAnalyzer};
pub use collector::CoverageCollector;
pub use config::SessionConfig;
pub use container::{DirContainer, UnitContainer};
pub use error::{MedirError, MedirResult};
pub use exec::{ExecutionError, ScriptRunner, TestRunOutcome, TestRunner};
pub use image::{BlockImage, ImageError, MethodImage, ScriptOp, UnitImage, UNIT_EXT};
pub use index::{ImageIndex, MemberIndex, NullIndex};
pub use instrument::{InstrumentError, InstrumentedSet, Instrumenter};
pub use loader::{
    discover_test_units, unit_rel_path, HostResolver, LoadedUnit, ResolveError, SessionLoader,
    SharedHost, TestUnit,
};
pub use report::{
    ClassCoverage, Counter, CounterKind, CounterSet, MethodCoverage, ReportLevel, TestOutcome,
};
pub use reporter::{TextReporter, COVERAGE_TARGET};
pub use runner::{run_with_deadline, CancelToken, RunOutcome};
pub use trace::{ExecutionTrace, ProbeArray, RecorderHandle, TraceRecorder, UnitHits};
