//! Session configuration.
//!
//! One structure covers every session knob; the historical variants that
//! accumulated around it differed only by accident and are collapsed here.
//! All fields except the base directory have documented defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of one measurement session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory the session works under; derived paths live below it.
    pub base_dir: PathBuf,
    /// Extra execution roots for runtime/test-framework dependencies,
    /// searched after the instrumented and compiled-tests roots.
    /// Default: empty.
    #[serde(default)]
    pub dependency_dirs: Vec<PathBuf>,
    /// Wall-clock deadline for one test unit invocation. Must be
    /// positive; the runner rejects non-positive deadlines. Default: 30 s.
    #[serde(default = "default_deadline")]
    pub test_deadline: Duration,
}

fn default_deadline() -> Duration {
    SessionConfig::DEFAULT_DEADLINE
}

impl SessionConfig {
    /// Default per-test deadline.
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

    /// Configuration rooted at `base_dir` with all defaults.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            dependency_dirs: Vec::new(),
            test_deadline: Self::DEFAULT_DEADLINE,
        }
    }

    /// Set the dependency execution roots.
    #[must_use]
    pub fn with_dependency_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.dependency_dirs = dirs;
        self
    }

    /// Set the per-test deadline.
    #[must_use]
    pub fn with_test_deadline(mut self, deadline: Duration) -> Self {
        self.test_deadline = deadline;
        self
    }

    /// The per-test deadline in milliseconds, as the runner takes it.
    #[must_use]
    pub fn deadline_ms(&self) -> i64 {
        i64::try_from(self.test_deadline.as_millis()).unwrap_or(i64::MAX)
    }

    /// Generated test sources, awaiting the external compiler.
    #[must_use]
    pub fn tests_dir(&self) -> PathBuf {
        self.base_dir.join("temp").join("testcases")
    }

    /// Instrumentation root; containers extract here and units are
    /// instrumented in place here.
    #[must_use]
    pub fn instrumented_dir(&self) -> PathBuf {
        self.base_dir.join("temp").join("coverage").join("instrumented")
    }

    /// Compiled test units, produced by the external compiler.
    #[must_use]
    pub fn compiled_tests_dir(&self) -> PathBuf {
        self.base_dir.join("temp").join("coverage").join("compiled")
    }

    /// Create the session directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.tests_dir(),
            self.instrumented_dir(),
            self.compiled_tests_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Execution roots in resolution order, instrumented units first.
    #[must_use]
    pub fn execution_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.instrumented_dir(), self.compiled_tests_dir()];
        roots.extend(self.dependency_dirs.iter().cloned());
        roots
    }

    /// Storage location of a unit inside the instrumentation root.
    #[must_use]
    pub fn instrumented_unit_path(&self, name: &str) -> PathBuf {
        self.instrumented_dir().join(crate::loader::unit_rel_path(name))
    }
}
