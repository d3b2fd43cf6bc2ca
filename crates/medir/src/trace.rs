//! Session trace recorder.
//!
//! What the original engine kept as process-wide runtime state is an
//! explicit session object here: [`TraceRecorder::arm`] starts a recording
//! session, loaded instrumented units register their probe arrays through a
//! cloneable [`RecorderHandle`], and [`TraceRecorder::extract`] snapshots
//! everything into an [`ExecutionTrace`] and disarms the session. Probe
//! writes from workers that outlive the session land in the discarded
//! per-session arrays and never reach a later trace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

/// Per-unit boolean hit vector bound to one recording session.
#[derive(Debug)]
pub struct ProbeArray {
    hits: Vec<AtomicBool>,
}

impl ProbeArray {
    fn new(len: u32) -> Self {
        let mut hits = Vec::with_capacity(len as usize);
        hits.resize_with(len as usize, AtomicBool::default);
        Self { hits }
    }

    /// Number of probe slots.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.hits.len() as u32
    }

    /// Whether the array has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Mark probe `index` as hit. Out-of-range indexes are ignored.
    pub fn hit(&self, index: u32) {
        if let Some(slot) = self.hits.get(index as usize) {
            slot.store(true, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> Vec<bool> {
        self.hits.iter().map(|s| s.load(Ordering::Relaxed)).collect()
    }
}

#[derive(Debug)]
struct Registration {
    digest: String,
    probes: Arc<ProbeArray>,
}

#[derive(Debug)]
struct RecorderShared {
    session_id: Uuid,
    armed: AtomicBool,
    units: Mutex<HashMap<String, Registration>>,
}

/// An armed recording session.
#[derive(Debug)]
pub struct TraceRecorder {
    shared: Arc<RecorderShared>,
}

impl TraceRecorder {
    /// Arm a fresh recording session.
    #[must_use]
    pub fn arm() -> Self {
        Self {
            shared: Arc::new(RecorderShared {
                session_id: Uuid::new_v4(),
                armed: AtomicBool::new(true),
                units: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// This session's identifier.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    /// A cloneable handle for registering probe arrays.
    #[must_use]
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Disarm the session and collect the recorded trace.
    ///
    /// Further registrations are refused, and probe writes into arrays
    /// handed out earlier are no longer observable.
    #[must_use]
    pub fn extract(self) -> ExecutionTrace {
        self.shared.armed.store(false, Ordering::SeqCst);
        let mut units = HashMap::new();
        let registrations = self
            .shared
            .units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (name, reg) in registrations.iter() {
            units.insert(
                name.clone(),
                UnitHits {
                    digest: reg.digest.clone(),
                    hits: reg.probes.snapshot(),
                },
            );
        }
        ExecutionTrace {
            session_id: self.shared.session_id,
            units,
        }
    }
}

/// Registration handle shared with the session loader.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    shared: Arc<RecorderShared>,
}

impl RecorderHandle {
    /// Whether the session is still recording.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    /// Register `probe_count` probes for `name`, returning the array to
    /// write hits into.
    ///
    /// Returns `None` once the session is disarmed. Registering the same
    /// name twice returns the existing array; if the digest differs the
    /// first registration wins and the conflict is logged.
    #[must_use]
    pub fn register(&self, name: &str, digest: &str, probe_count: u32) -> Option<Arc<ProbeArray>> {
        if !self.is_armed() {
            return None;
        }
        let mut units = self
            .shared
            .units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = units.get(name) {
            if existing.digest != digest {
                warn!(
                    unit = name,
                    have = existing.digest.as_str(),
                    got = digest,
                    "unit re-registered with different bytes; keeping first registration"
                );
            }
            return Some(Arc::clone(&existing.probes));
        }
        let probes = Arc::new(ProbeArray::new(probe_count));
        units.insert(
            name.to_string(),
            Registration {
                digest: digest.to_string(),
                probes: Arc::clone(&probes),
            },
        );
        Some(probes)
    }
}

/// Hits recorded for one unit.
#[derive(Debug, Clone)]
pub struct UnitHits {
    /// Digest of the loaded unit bytes.
    pub digest: String,
    /// One flag per probe site.
    pub hits: Vec<bool>,
}

/// Raw record of which probes fired during one session.
///
/// Owned by the aggregator for the session's lifetime and discarded with it.
#[derive(Debug)]
pub struct ExecutionTrace {
    session_id: Uuid,
    units: HashMap<String, UnitHits>,
}

impl ExecutionTrace {
    /// The recording session's identifier.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Hit vector for `name`, if the unit registered during the session.
    #[must_use]
    pub fn hits(&self, name: &str) -> Option<&UnitHits> {
        self.units.get(name)
    }

    /// Names of all units that registered during the session.
    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Total number of probes that fired.
    #[must_use]
    pub fn probes_fired(&self) -> usize {
        self.units
            .values()
            .map(|u| u.hits.iter().filter(|h| **h).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn registered_hits_appear_in_extracted_trace() {
        let recorder = TraceRecorder::arm();
        let handle = recorder.handle();
        let probes = handle.register("org.example.Stack", "aa11", 4).unwrap();
        probes.hit(0);
        probes.hit(2);

        let trace = recorder.extract();
        let unit = trace.hits("org.example.Stack").unwrap();
        assert_eq!(unit.hits, vec![true, false, true, false]);
        assert_eq!(unit.digest, "aa11");
        assert_eq!(trace.probes_fired(), 2);
    }

    #[test]
    fn registration_is_refused_after_extract() {
        let recorder = TraceRecorder::arm();
        let handle = recorder.handle();
        let _ = recorder.extract();
        assert!(!handle.is_armed());
        assert!(handle.register("org.example.Stack", "aa11", 4).is_none());
    }

    #[test]
    fn late_probe_writes_are_not_observable() {
        let recorder = TraceRecorder::arm();
        let handle = recorder.handle();
        let probes = handle.register("org.example.Stack", "aa11", 2).unwrap();
        let trace = recorder.extract();

        // A detached worker may keep writing after the session ends.
        probes.hit(1);
        assert_eq!(
            trace.hits("org.example.Stack").unwrap().hits,
            vec![false, false]
        );
    }

    #[test]
    fn duplicate_registration_shares_one_array() {
        let recorder = TraceRecorder::arm();
        let handle = recorder.handle();
        let first = handle.register("org.example.Stack", "aa11", 3).unwrap();
        let second = handle.register("org.example.Stack", "aa11", 3).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn conflicting_digest_keeps_first_registration() {
        let recorder = TraceRecorder::arm();
        let handle = recorder.handle();
        let first = handle.register("org.example.Stack", "aa11", 3).unwrap();
        let second = handle.register("org.example.Stack", "bb22", 9).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn out_of_range_hits_are_ignored() {
        let recorder = TraceRecorder::arm();
        let probes = recorder.handle().register("u", "d", 2).unwrap();
        probes.hit(17);
        let trace = recorder.extract();
        assert_eq!(trace.probes_fired(), 0);
    }

    #[test]
    fn hits_from_worker_threads_are_recorded() {
        let recorder = TraceRecorder::arm();
        let probes = recorder.handle().register("u", "d", 8).unwrap();

        let workers: Vec<_> = (0..4u32)
            .map(|i| {
                let probes = Arc::clone(&probes);
                thread::spawn(move || probes.hit(i * 2))
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(recorder.extract().probes_fired(), 4);
    }

    #[test]
    fn fresh_sessions_have_distinct_ids() {
        let a = TraceRecorder::arm();
        let b = TraceRecorder::arm();
        assert_ne!(a.session_id(), b.session_id());
    }
}
