//! Benchmark suite definitions.
//!
//! A suite is a JSON document mapping benchmark names to tasks: where the
//! target program's compiled units live, extra classpath roots, and which
//! classes to measure.

use crate::error::{CliError, CliResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One benchmark target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkTask {
    /// Directory holding the target program's compiled units.
    pub bin_dir: PathBuf,
    /// Extra unit roots the target depends on.
    #[serde(default)]
    pub class_path: Vec<PathBuf>,
    /// Fully-qualified names of the classes to measure.
    pub classes: Vec<String>,
}

/// A named collection of benchmark tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    /// Tasks by benchmark name; ordered for reproducible runs.
    pub benchmarks: BTreeMap<String, BenchmarkTask>,
}

impl BenchmarkSuite {
    /// Load a suite definition from `path`.
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = fs::read_to_string(path)?;
        let suite: Self = serde_json::from_str(&text)?;
        if suite.benchmarks.is_empty() {
            return Err(CliError::Suite {
                path: path.to_path_buf(),
                message: "no benchmarks defined".to_string(),
            });
        }
        for (name, task) in &suite.benchmarks {
            if task.classes.is_empty() {
                return Err(CliError::Suite {
                    path: path.to_path_buf(),
                    message: format!("benchmark `{name}` lists no classes"),
                });
            }
        }
        Ok(suite)
    }

    /// Total number of sessions for `runs` runs per benchmark.
    #[must_use]
    pub fn session_count(&self, runs: u32) -> u64 {
        self.benchmarks.len() as u64 * u64::from(runs)
    }
}
