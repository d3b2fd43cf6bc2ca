//! Compiled-unit containers.
//!
//! A container holds compiled units and can place them into the session's
//! instrumentation root. Archive formats are handled by external
//! collaborators; the bundled [`DirContainer`] copies a directory tree of
//! unit images.

use crate::image::UNIT_EXT;
use std::fs;
use std::path::{Path, PathBuf};

/// A source of compiled units extractable into an instrumentation root.
pub trait UnitContainer: Send + Sync {
    /// Human-readable label for logging.
    fn label(&self) -> String;

    /// Copy the container's unit images under `dest`, preserving their
    /// relative layout. Returns the number of units placed.
    fn extract_to(&self, dest: &Path) -> std::io::Result<usize>;
}

/// Container over a directory tree of unit images.
#[derive(Debug, Clone)]
pub struct DirContainer {
    root: PathBuf,
}

impl DirContainer {
    /// Container rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn copy_tree(&self, dir: &Path, dest: &Path) -> std::io::Result<usize> {
        let mut copied = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                copied += self.copy_tree(&path, dest)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some(UNIT_EXT) {
                let rel = path
                    .strip_prefix(&self.root)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                let target = dest.join(rel);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&path, &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}

impl UnitContainer for DirContainer {
    fn label(&self) -> String {
        self.root.display().to_string()
    }

    fn extract_to(&self, dest: &Path) -> std::io::Result<usize> {
        self.copy_tree(&self.root, dest)
    }
}
