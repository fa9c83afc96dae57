//! Per-processor queue policy: admission and priority-ordered selection
//!
//! Each processor owns exactly one `ChoreoPolicy`. The policy keeps two
//! structures under independent locks: an id registry (concurrent-read,
//! exclusive-write) that is the authoritative owner of every admitted
//! routine, and a priority-ordered ready structure scanned for dispatch.
//! A lookup by id never waits on a full ready-structure scan, and vice versa.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::routine::{Routine, RoutineId, RoutineState};
use crate::trace::{self, SchedEvent};

use super::processor::Parker;

/// Ordering key for the ready structure: priority first (lower value wins),
/// then arrival order among equal priorities.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: u32,
    seq: u64,
}

/// Priority-based admission and selection for one processor
pub struct ChoreoPolicy {
    /// Index of the owning processor
    processor_id: usize,

    /// Authoritative id registry; everything else holds non-owning ids
    registry: RwLock<HashMap<RoutineId, Arc<Routine>>>,

    /// Priority-ordered ready structure, scanned under one lock
    ready: Mutex<BTreeMap<ReadyKey, RoutineId>>,

    /// Recently-notified de-duplication set
    notified: Mutex<HashSet<RoutineId>>,

    /// Arrival counter for the equal-priority tie-break
    next_seq: AtomicU64,

    /// Process-wide stop flag, owned by the scheduler
    stop: Arc<AtomicBool>,

    /// Wake handle for the owning processor
    parker: Arc<Parker>,
}

impl ChoreoPolicy {
    /// Create the policy for the processor at `processor_id`
    pub fn new(processor_id: usize, stop: Arc<AtomicBool>, parker: Arc<Parker>) -> Self {
        Self {
            processor_id,
            registry: RwLock::new(HashMap::new()),
            ready: Mutex::new(BTreeMap::new()),
            notified: Mutex::new(HashSet::new()),
            next_seq: AtomicU64::new(0),
            stop,
            parker,
        }
    }

    /// Index of the owning processor
    pub fn id(&self) -> usize {
        self.processor_id
    }

    /// Admit a routine into this policy.
    ///
    /// Precondition: the routine's affinity equals this policy's processor id;
    /// affinity resolution happens upstream in [`super::Scheduler::dispatch`].
    /// Returns false without side effects when the affinity does not match or
    /// a routine with the same id is already registered.
    pub fn enqueue(&self, routine: Arc<Routine>) -> bool {
        if routine.processor_id() != Some(self.processor_id) {
            return false;
        }

        let id = routine.id();
        let priority = routine.priority();

        {
            let mut registry = self.registry.write();
            if registry.contains_key(&id) {
                return false;
            }
            registry.insert(id, routine);
        }

        trace::emit(SchedEvent::RoutineCreated {
            routine: id,
            processor: self.processor_id,
        });

        let key = ReadyKey {
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.ready.lock().insert(key, id);
        true
    }

    /// Select the next runnable routine in priority order.
    ///
    /// Candidates whose advisory claim is held by another consumer are left
    /// untouched and stay eligible for a later scan. Finished candidates are
    /// garbage-collected from both the ready structure and the registry. The
    /// returned routine carries the advisory claim; the caller releases it
    /// after the resume step. An empty result means "no work now", not an
    /// error.
    pub fn next_routine(&self) -> Option<Arc<Routine>> {
        if self.stop.load(Ordering::Acquire) {
            return None;
        }

        let mut ready = self.ready.lock();
        let mut finished: Vec<(ReadyKey, RoutineId)> = Vec::new();
        let mut picked: Option<Arc<Routine>> = None;

        for (&key, &id) in ready.iter() {
            let routine = match self.registry.read().get(&id) {
                Some(routine) => Arc::clone(routine),
                // Registry entry already gone; drop the stale ready entry
                None => {
                    finished.push((key, id));
                    continue;
                }
            };

            if !routine.acquire() {
                continue;
            }

            if routine.state() == RoutineState::Finished {
                finished.push((key, id));
                routine.release();
                continue;
            }

            if routine.update_state() == RoutineState::Ready {
                trace::emit(SchedEvent::RoutineDispatched {
                    routine: id,
                    processor: self.processor_id,
                });
                picked = Some(routine);
                break;
            }

            routine.release();
        }

        // Collect-then-remove keeps the scan free of iterator invalidation
        if !finished.is_empty() {
            for (key, _) in &finished {
                ready.remove(key);
            }
            let mut registry = self.registry.write();
            for (_, id) in &finished {
                registry.remove(id);
            }
        }
        drop(ready);

        if picked.is_none() {
            // Nothing runnable: reset the de-dup set so the next wake signal
            // for any routine is not suppressed
            self.notified.lock().clear();
        }

        picked
    }

    /// Record a wake notification for a routine and unpark the owning
    /// processor. Returns false when a notification for this routine is
    /// already pending (suppressed until a full scan comes up empty).
    pub fn notify(&self, id: RoutineId) -> bool {
        if self.stop.load(Ordering::Acquire) {
            return false;
        }

        let inserted = self.notified.lock().insert(id);
        if inserted {
            self.parker.unpark();
        }
        inserted
    }

    /// Current ready-queue size, consulted for least-loaded placement
    pub fn rq_size(&self) -> usize {
        self.ready.lock().len()
    }

    /// Number of routines currently registered
    pub fn routine_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Look up a registered routine by id
    pub fn routine(&self, id: RoutineId) -> Option<Arc<Routine>> {
        self.registry.read().get(&id).cloned()
    }
}
