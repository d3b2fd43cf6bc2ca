//! Probe instrumentation.
//!
//! Instrumenting a stored unit reads its bytes, captures the original in
//! memory, and overwrites the file with the instrumented variant (probe
//! table attached, flag set). The captured originals live in an
//! [`InstrumentedSet`] for the session's lifetime; [`InstrumentedSet::restore`]
//! writes them back unconditionally, and dropping an unrestored set restores
//! best-effort so an unwinding session still leaves the storage intact.
//!
//! Failure to instrument any single unit aborts the whole set: a session
//! with partially-instrumented units cannot be meaningfully analyzed.

use crate::image::{ImageError, UnitImage};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while instrumenting a unit. Fatal to the session.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// Storage I/O failed.
    #[error("I/O on unit `{unit}` at {path}: {source}")]
    Io {
        /// Unit name.
        unit: String,
        /// Storage location.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Stored bytes are not a valid unit image.
    #[error("malformed unit `{unit}`: {source}")]
    Image {
        /// Unit name.
        unit: String,
        /// Underlying error.
        #[source]
        source: ImageError,
    },

    /// The stored bytes already carry a probe table.
    #[error("unit `{unit}` is already instrumented")]
    AlreadyInstrumented {
        /// Unit name.
        unit: String,
    },
}

/// Hex SHA-256 digest of a byte slice.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Rewrites unit images to their probe-carrying variant.
#[derive(Debug, Default)]
pub struct Instrumenter;

impl Instrumenter {
    /// Produce the instrumented variant of `original`.
    pub fn instrument_bytes(original: &[u8], unit: &str) -> Result<Vec<u8>, InstrumentError> {
        let mut image = UnitImage::decode(original).map_err(|source| InstrumentError::Image {
            unit: unit.to_string(),
            source,
        })?;
        if image.instrumented {
            return Err(InstrumentError::AlreadyInstrumented {
                unit: unit.to_string(),
            });
        }
        image.instrumented = true;
        image.encode().map_err(|source| InstrumentError::Image {
            unit: unit.to_string(),
            source,
        })
    }
}

#[derive(Debug)]
struct CapturedUnit {
    name: String,
    path: PathBuf,
    original: Vec<u8>,
    instrumented_digest: String,
}

/// The set of units instrumented for one session, holding their originals.
#[derive(Debug, Default)]
pub struct InstrumentedSet {
    units: Vec<CapturedUnit>,
    restored: bool,
}

impl InstrumentedSet {
    /// Instrument every `(name, path)` entry in place, fail-fast.
    ///
    /// On failure, units already overwritten are restored before the error
    /// propagates.
    pub fn instrument_all<I>(entries: I) -> Result<Self, InstrumentError>
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        let mut set = Self::default();
        for (name, path) in entries {
            set.instrument_one(name, path)?;
            // On Err the partially-built set drops here and restores.
        }
        Ok(set)
    }

    fn instrument_one(&mut self, name: String, path: PathBuf) -> Result<(), InstrumentError> {
        let io_err = |source| InstrumentError::Io {
            unit: name.clone(),
            path: path.clone(),
            source,
        };
        let original = fs::read(&path).map_err(io_err)?;
        let instrumented = Instrumenter::instrument_bytes(&original, &name)?;
        fs::write(&path, &instrumented).map_err(io_err)?;
        debug!(unit = name.as_str(), "instrumented");
        self.units.push(CapturedUnit {
            name,
            path,
            instrumented_digest: sha256_hex(&instrumented),
            original,
        });
        Ok(())
    }

    /// Number of captured units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The captured pre-instrumentation bytes, for analysis.
    pub fn originals(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.units
            .iter()
            .map(|u| (u.name.as_str(), u.original.as_slice()))
    }

    /// Write every original back to its storage location.
    ///
    /// Restoration is attempted for every unit even if an earlier write
    /// fails; the first I/O error propagates afterwards. Stored bytes that
    /// no longer match the instrumented variant are logged before being
    /// overwritten.
    pub fn restore(mut self) -> Result<(), InstrumentError> {
        self.restored = true;
        let mut first_err = None;
        for unit in &self.units {
            if let Ok(current) = fs::read(&unit.path) {
                if sha256_hex(&current) != unit.instrumented_digest {
                    warn!(
                        unit = unit.name.as_str(),
                        "stored bytes changed during the session; overwriting with original"
                    );
                }
            }
            if let Err(source) = fs::write(&unit.path, &unit.original) {
                warn!(
                    unit = unit.name.as_str(),
                    error = %source,
                    "failed to restore original bytes"
                );
                if first_err.is_none() {
                    first_err = Some(InstrumentError::Io {
                        unit: unit.name.clone(),
                        path: unit.path.clone(),
                        source,
                    });
                }
            } else {
                debug!(unit = unit.name.as_str(), "restored original bytes");
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for InstrumentedSet {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        for unit in &self.units {
            if let Err(error) = fs::write(&unit.path, &unit.original) {
                warn!(
                    unit = unit.name.as_str(),
                    %error,
                    "best-effort restore on teardown failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BlockImage, MethodImage};
    use std::path::Path;
    use tempfile::TempDir;

    fn write_unit(dir: &Path, name: &str) -> (PathBuf, Vec<u8>) {
        let image = UnitImage::new(name).with_method(MethodImage::new("run", "()->()").with_blocks(
            vec![BlockImage {
                line: 1,
                instructions: 3,
                branches: 0,
            }],
        ));
        let bytes = image.encode().unwrap();
        let path = dir.join(format!("{name}.unit"));
        fs::write(&path, &bytes).unwrap();
        (path, bytes)
    }

    #[test]
    fn instrumented_bytes_differ_and_carry_the_flag() {
        let dir = TempDir::new().unwrap();
        let (path, original) = write_unit(dir.path(), "a.B");

        let set =
            InstrumentedSet::instrument_all(vec![("a.B".to_string(), path.clone())]).unwrap();
        let stored = fs::read(&path).unwrap();
        assert_ne!(stored, original);
        assert!(UnitImage::is_instrumented(&stored).unwrap());
        assert_eq!(set.originals().next().unwrap().1, original.as_slice());
        set.restore().unwrap();
    }

    #[test]
    fn restore_returns_stored_bytes_to_pre_session_state() {
        let dir = TempDir::new().unwrap();
        let (path, original) = write_unit(dir.path(), "a.B");

        let set = InstrumentedSet::instrument_all(vec![("a.B".to_string(), path.clone())]).unwrap();
        set.restore().unwrap();
        assert_eq!(fs::read(&path).unwrap(), original);
    }

    #[test]
    fn dropping_an_unrestored_set_restores_best_effort() {
        let dir = TempDir::new().unwrap();
        let (path, original) = write_unit(dir.path(), "a.B");

        let set = InstrumentedSet::instrument_all(vec![("a.B".to_string(), path.clone())]).unwrap();
        drop(set);
        assert_eq!(fs::read(&path).unwrap(), original);
    }

    #[test]
    fn double_instrumentation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_unit(dir.path(), "a.B");

        let set = InstrumentedSet::instrument_all(vec![("a.B".to_string(), path.clone())]).unwrap();
        let again = InstrumentedSet::instrument_all(vec![("a.B".to_string(), path.clone())]);
        assert!(matches!(
            again,
            Err(InstrumentError::AlreadyInstrumented { .. })
        ));
        set.restore().unwrap();
    }

    #[test]
    fn failure_mid_set_restores_earlier_units() {
        let dir = TempDir::new().unwrap();
        let (good_path, good_original) = write_unit(dir.path(), "a.Good");
        let bad_path = dir.path().join("a.Bad.unit");
        fs::write(&bad_path, b"garbage").unwrap();

        let result = InstrumentedSet::instrument_all(vec![
            ("a.Good".to_string(), good_path.clone()),
            ("a.Bad".to_string(), bad_path),
        ]);
        assert!(matches!(result, Err(InstrumentError::Image { .. })));
        assert_eq!(fs::read(&good_path).unwrap(), good_original);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let result = InstrumentedSet::instrument_all(vec![(
            "a.Missing".to_string(),
            dir.path().join("a.Missing.unit"),
        )]);
        assert!(matches!(result, Err(InstrumentError::Io { .. })));
    }
}
