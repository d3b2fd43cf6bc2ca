//! External compiler hook.
//!
//! The engine never compiles; generated test sources are turned into unit
//! images by whatever compiler command the pipeline configures. Sources
//! that fail to compile are logged and skipped so one broken generated
//! file does not sink the whole benchmark run.

use crate::error::{CliError, CliResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error};

/// Invokes the configured compiler on generated test sources.
#[derive(Debug, Clone)]
pub struct CompilerHelper {
    command: String,
    class_paths: Vec<PathBuf>,
    output_dir: PathBuf,
}

impl CompilerHelper {
    /// A helper running `command` with `class_paths` on its search path,
    /// placing compiled test units under `output_dir`.
    #[must_use]
    pub fn new(command: impl Into<String>, class_paths: Vec<PathBuf>, output_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            class_paths,
            output_dir,
        }
    }

    /// Compile one source file.
    pub fn compile_file(&self, source: &Path) -> CliResult<()> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-d").arg(&self.output_dir);
        if !self.class_paths.is_empty() {
            let joined = std::env::join_paths(&self.class_paths)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            cmd.arg("-cp").arg(joined);
        }
        cmd.arg(source);

        debug!(source = %source.display(), "compiling generated test");
        let status = cmd.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(CliError::Compile {
                command: self.command.clone(),
                source_file: source.to_path_buf(),
            })
        }
    }

    /// Compile every regular file under `tests_dir`, skipping failures.
    ///
    /// Returns the number of sources that compiled.
    pub fn compile_dir(&self, tests_dir: &Path) -> usize {
        let mut compiled = 0;
        self.walk(tests_dir, &mut compiled);
        compiled
    }

    fn walk(&self, dir: &Path, compiled: &mut usize) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, compiled);
            } else if path.is_file() {
                match self.compile_file(&path) {
                    Ok(()) => *compiled += 1,
                    Err(err) => {
                        error!(source = %path.display(), %err, "failed to compile; skipping");
                    }
                }
            }
        }
    }
}
