//! Isolated execution loader.
//!
//! A [`SessionLoader`] resolves symbolic unit names for exactly one
//! measurement session. Resolution order: the session cache, then the
//! session's execution roots in declared order (instrumented units,
//! compiled test units, runtime dependencies), then the shared
//! [`HostResolver`]. The cache is scoped to the session and discarded with
//! it, so two sessions that instrument different bytes under the same name
//! never see each other's loaded units; foundational runtime units load
//! once in the host and are shared.
//!
//! Loading an instrumented image while the recorder is armed registers its
//! probe array, which is how executed units record into the session trace.

use crate::image::{ImageError, UnitImage, UNIT_EXT};
use crate::instrument::sha256_hex;
use crate::trace::{ProbeArray, RecorderHandle};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while resolving a symbolic name.
///
/// Fatal to the affected test unit only, never to the session.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The name exists in no root and the host rejected it.
    #[error("unit `{name}` not found in any execution root")]
    NotFound {
        /// The unresolved name.
        name: String,
    },

    /// A member name did not resolve within a loaded unit.
    #[error("method `{method}` not found in unit `{unit}`")]
    MemberNotFound {
        /// Unit name.
        unit: String,
        /// Method name.
        method: String,
    },

    /// Storage I/O failed while loading.
    #[error("I/O loading `{name}` from {path}: {source}")]
    Io {
        /// Unit name.
        name: String,
        /// Storage location.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Stored bytes are not a valid unit image.
    #[error("malformed unit `{name}`: {source}")]
    Image {
        /// Unit name.
        name: String,
        /// Underlying error.
        #[source]
        source: ImageError,
    },
}

/// Relative storage path of a fully-qualified dotted name.
#[must_use]
pub fn unit_rel_path(name: &str) -> PathBuf {
    let mut path: PathBuf = name.split('.').collect();
    path.set_extension(UNIT_EXT);
    path
}

/// Dotted unit name of a stored image path relative to `base`.
#[must_use]
pub fn unit_name_from(path: &Path, base: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    if rel.extension().and_then(|e| e.to_str()) != Some(UNIT_EXT) {
        return None;
    }
    let mut parts = Vec::new();
    for component in rel.with_extension("").components() {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    Some(parts.join("."))
}

/// A compiled unit known to contain test entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUnit {
    /// Fully-qualified dotted name.
    pub name: String,
    /// Storage location of the unit image.
    pub path: PathBuf,
}

/// Discover test units under the compiled-tests root, ordered by name.
pub fn discover_test_units(root: &Path) -> std::io::Result<Vec<TestUnit>> {
    let mut units = Vec::new();
    if root.exists() {
        walk_units(root, root, &mut units)?;
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}

fn walk_units(base: &Path, dir: &Path, out: &mut Vec<TestUnit>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_units(base, &path, out)?;
        } else if let Some(name) = unit_name_from(&path, base) {
            out.push(TestUnit { name, path });
        }
    }
    Ok(())
}

#[derive(Debug)]
struct ProbeBinding {
    array: Arc<ProbeArray>,
    // First probe id of each method, parallel to the method table.
    bases: Vec<u32>,
}

/// A unit resolved into the session's execution namespace.
#[derive(Debug)]
pub struct LoadedUnit {
    name: String,
    image: UnitImage,
    digest: String,
    probes: Option<ProbeBinding>,
}

impl LoadedUnit {
    /// Wrap an image with no probe binding (host/runtime units).
    #[must_use]
    pub fn detached(image: UnitImage, digest: String) -> Self {
        Self {
            name: image.name.clone(),
            image,
            digest,
            probes: None,
        }
    }

    /// Fully-qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The decoded image.
    #[must_use]
    pub fn image(&self) -> &UnitImage {
        &self.image
    }

    /// Digest of the loaded bytes.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether probes are bound to the armed session.
    #[must_use]
    pub fn records_probes(&self) -> bool {
        self.probes.is_some()
    }

    /// Mark the given blocks of `method` as executed.
    ///
    /// Returns `false` when the method does not exist in this unit. Marks
    /// are dropped silently when the unit carries no probe binding
    /// (uninstrumented, or loaded outside an armed session).
    pub fn mark_blocks(&self, method: &str, blocks: &[u16]) -> bool {
        let Some(index) = self.image.methods.iter().position(|m| m.name == method) else {
            return false;
        };
        if let Some(binding) = &self.probes {
            let base = binding.bases[index];
            let block_count = self.image.methods[index].blocks.len() as u16;
            for block in blocks {
                if *block < block_count {
                    binding.array.hit(base + u32::from(*block));
                }
            }
        }
        true
    }
}

/// Resolver for foundational units shared across sessions.
pub trait HostResolver: Send + Sync {
    /// Resolve `name`, or reject it with `None`.
    fn resolve(&self, name: &str) -> Option<Arc<LoadedUnit>>;
}

/// Host resolver over a fixed set of preloaded units.
#[derive(Debug, Default)]
pub struct SharedHost {
    units: Mutex<HashMap<String, Arc<LoadedUnit>>>,
}

impl SharedHost {
    /// An empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload an image into the host namespace.
    pub fn preload(&self, image: UnitImage) -> Result<(), ImageError> {
        let digest = sha256_hex(&image.encode()?);
        let unit = Arc::new(LoadedUnit::detached(image, digest));
        let mut units = self
            .units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        units.insert(unit.name.clone(), unit);
        Ok(())
    }
}

impl HostResolver for SharedHost {
    fn resolve(&self, name: &str) -> Option<Arc<LoadedUnit>> {
        let units = self
            .units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        units.get(name).cloned()
    }
}

/// Per-session resolver over the session's execution roots.
pub struct SessionLoader {
    roots: Vec<PathBuf>,
    recorder: RecorderHandle,
    host: Arc<dyn HostResolver>,
    cache: Mutex<HashMap<String, Arc<LoadedUnit>>>,
}

impl std::fmt::Debug for SessionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLoader")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl SessionLoader {
    /// Create a loader over `roots`, in resolution order.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, recorder: RecorderHandle, host: Arc<dyn HostResolver>) -> Self {
        Self {
            roots,
            recorder,
            host,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a symbolic name: cache, then roots in order, then host.
    pub fn resolve(&self, name: &str) -> Result<Arc<LoadedUnit>, ResolveError> {
        {
            let cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(unit) = cache.get(name) {
                return Ok(Arc::clone(unit));
            }
        }

        let unit = self.resolve_uncached(name)?;
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let unit = cache
            .entry(name.to_string())
            .or_insert(unit);
        Ok(Arc::clone(unit))
    }

    fn resolve_uncached(&self, name: &str) -> Result<Arc<LoadedUnit>, ResolveError> {
        let rel = unit_rel_path(name);
        for root in &self.roots {
            let path = root.join(&rel);
            if path.is_file() {
                return self.load(name, &path).map(Arc::new);
            }
        }
        if let Some(unit) = self.host.resolve(name) {
            debug!(unit = name, "resolved through host");
            return Ok(unit);
        }
        Err(ResolveError::NotFound {
            name: name.to_string(),
        })
    }

    fn load(&self, name: &str, path: &Path) -> Result<LoadedUnit, ResolveError> {
        let bytes = fs::read(path).map_err(|source| ResolveError::Io {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        let digest = sha256_hex(&bytes);
        let image = UnitImage::decode(&bytes).map_err(|source| ResolveError::Image {
            name: name.to_string(),
            source,
        })?;

        let probes = if image.instrumented {
            match self
                .recorder
                .register(&image.name, &digest, image.probe_sites())
            {
                Some(array) => Some(ProbeBinding {
                    array,
                    bases: image.probe_bases(),
                }),
                None => {
                    warn!(unit = name, "session disarmed; probes will not record");
                    None
                }
            }
        } else {
            None
        };

        debug!(unit = name, instrumented = image.instrumented, "loaded");
        Ok(LoadedUnit {
            name: image.name.clone(),
            image,
            digest,
            probes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BlockImage, MethodImage};
    use crate::trace::TraceRecorder;
    use tempfile::TempDir;

    fn target_image(name: &str) -> UnitImage {
        UnitImage::new(name).with_method(MethodImage::new("run", "()->()").with_blocks(vec![
            BlockImage {
                line: 1,
                instructions: 2,
                branches: 0,
            },
            BlockImage {
                line: 2,
                instructions: 2,
                branches: 2,
            },
        ]))
    }

    fn store(dir: &Path, image: &UnitImage) -> PathBuf {
        let path = dir.join(unit_rel_path(&image.name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, image.encode().unwrap()).unwrap();
        path
    }

    fn loader_over(roots: Vec<PathBuf>) -> (TraceRecorder, SessionLoader) {
        let recorder = TraceRecorder::arm();
        let loader = SessionLoader::new(roots, recorder.handle(), Arc::new(SharedHost::new()));
        (recorder, loader)
    }

    #[test]
    fn name_path_mapping() {
        assert_eq!(
            unit_rel_path("org.example.Stack"),
            PathBuf::from("org/example/Stack.unit")
        );
        let base = Path::new("/tmp/base");
        assert_eq!(
            unit_name_from(&base.join("org/example/Stack.unit"), base).as_deref(),
            Some("org.example.Stack")
        );
        assert_eq!(unit_name_from(&base.join("org/example/notes.txt"), base), None);
    }

    #[test]
    fn second_resolution_hits_the_session_cache() {
        let dir = TempDir::new().unwrap();
        store(dir.path(), &target_image("a.B"));
        let (_recorder, loader) = loader_over(vec![dir.path().to_path_buf()]);

        let first = loader.resolve("a.B").unwrap();
        let second = loader.resolve("a.B").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn roots_are_searched_in_declared_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let mut shadowed = target_image("a.B");
        shadowed.source_file = "First.java".into();
        store(first.path(), &shadowed);
        let mut other = target_image("a.B");
        other.source_file = "Second.java".into();
        store(second.path(), &other);

        let (_recorder, loader) = loader_over(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(loader.resolve("a.B").unwrap().image().source_file, "First.java");
    }

    #[test]
    fn host_is_consulted_only_after_roots() {
        let dir = TempDir::new().unwrap();
        store(dir.path(), &target_image("a.B"));

        let host = Arc::new(SharedHost::new());
        host.preload(target_image("runtime.Kit")).unwrap();
        let recorder = TraceRecorder::arm();
        let loader = SessionLoader::new(
            vec![dir.path().to_path_buf()],
            recorder.handle(),
            Arc::clone(&host) as Arc<dyn HostResolver>,
        );

        assert!(loader.resolve("a.B").is_ok());
        assert!(loader.resolve("runtime.Kit").is_ok());
        assert!(matches!(
            loader.resolve("no.Such"),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn instrumented_unit_binds_probes_to_the_armed_session() {
        let dir = TempDir::new().unwrap();
        let mut image = target_image("a.B");
        image.instrumented = true;
        store(dir.path(), &image);

        let (recorder, loader) = loader_over(vec![dir.path().to_path_buf()]);
        let unit = loader.resolve("a.B").unwrap();
        assert!(unit.records_probes());
        assert!(unit.mark_blocks("run", &[1]));

        let trace = recorder.extract();
        assert_eq!(trace.hits("a.B").unwrap().hits, vec![false, true]);
    }

    #[test]
    fn uninstrumented_unit_drops_marks_silently() {
        let dir = TempDir::new().unwrap();
        store(dir.path(), &target_image("a.B"));

        let (recorder, loader) = loader_over(vec![dir.path().to_path_buf()]);
        let unit = loader.resolve("a.B").unwrap();
        assert!(!unit.records_probes());
        assert!(unit.mark_blocks("run", &[0]));
        assert!(recorder.extract().hits("a.B").is_none());
    }

    #[test]
    fn unknown_method_mark_reports_false() {
        let dir = TempDir::new().unwrap();
        store(dir.path(), &target_image("a.B"));
        let (_recorder, loader) = loader_over(vec![dir.path().to_path_buf()]);
        let unit = loader.resolve("a.B").unwrap();
        assert!(!unit.mark_blocks("nope", &[0]));
    }

    #[test]
    fn discovery_walks_nested_dirs_and_orders_by_name() {
        let dir = TempDir::new().unwrap();
        store(dir.path(), &target_image("b.Second"));
        store(dir.path(), &target_image("a.nested.First"));
        fs::write(dir.path().join("readme.txt"), b"not a unit").unwrap();

        let units = discover_test_units(dir.path()).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["a.nested.First", "b.Second"]);
    }

    #[test]
    fn discovery_of_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let units = discover_test_units(&dir.path().join("absent")).unwrap();
        assert!(units.is_empty());
    }
}
