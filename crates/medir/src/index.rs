//! Member-name resolution for report labeling.
//!
//! The engine performs no static analysis of its own; it only asks an
//! external structural index to turn `(unit, method, descriptor)` into a
//! resolved member label for method-level reports. [`ImageIndex`] is the
//! bundled implementation, built by scanning unit-image roots.

use crate::image::UnitImage;
use crate::loader::unit_name_from;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Structural unit/member index keyed by fully-qualified name.
pub trait MemberIndex: Send + Sync {
    /// Resolved label for a member, or `None` when the index does not
    /// know it.
    fn method_label(&self, unit: &str, method: &str, descriptor: &str) -> Option<String>;
}

/// Index that resolves nothing; reports fall back to `unit::method`.
#[derive(Debug, Default)]
pub struct NullIndex;

impl MemberIndex for NullIndex {
    fn method_label(&self, _unit: &str, _method: &str, _descriptor: &str) -> Option<String> {
        None
    }
}

/// Member index built from unit images found under one or more roots.
#[derive(Debug, Default)]
pub struct ImageIndex {
    labels: HashMap<(String, String, String), String>,
}

impl ImageIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `roots` for unit images, recording one label per member.
    ///
    /// Unreadable or malformed files are skipped; the index is advisory.
    #[must_use]
    pub fn scan(roots: &[&Path]) -> Self {
        let mut index = Self::new();
        for root in roots {
            index.scan_dir(root, root);
        }
        index
    }

    fn scan_dir(&mut self, base: &Path, dir: &Path) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_dir(base, &path);
            } else if unit_name_from(&path, base).is_some() {
                if let Ok(bytes) = fs::read(&path) {
                    match UnitImage::decode(&bytes) {
                        Ok(image) => self.record(&image),
                        Err(error) => {
                            debug!(path = %path.display(), %error, "skipping unreadable image");
                        }
                    }
                }
            }
        }
    }

    /// Record every member of `image`.
    pub fn record(&mut self, image: &UnitImage) {
        for method in &image.methods {
            self.labels.insert(
                (
                    image.name.clone(),
                    method.name.clone(),
                    method.descriptor.clone(),
                ),
                format!("{}::{}{}", image.name, method.name, method.descriptor),
            );
        }
    }

    /// Number of indexed members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl MemberIndex for ImageIndex {
    fn method_label(&self, unit: &str, method: &str, descriptor: &str) -> Option<String> {
        self.labels
            .get(&(unit.to_string(), method.to_string(), descriptor.to_string()))
            .cloned()
    }
}
