//! Routine (cooperatively-suspendable task) implementation
//!
//! A routine is the schedulable unit of the choreography scheduler: it has a
//! stable identity, a priority, an optional processor affinity, and a state
//! machine that worker threads inspect concurrently. The actual suspend/resume
//! mechanism is supplied by the caller as a resumable body closure; one call
//! runs the routine to its next suspension point.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Unique identifier for a routine
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoutineId(u64);

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

impl RoutineId {
    /// Generate a new process-unique id
    pub fn new() -> Self {
        RoutineId(NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric id value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for RoutineId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a routine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RoutineState {
    /// Eligible to run
    Ready = 0,
    /// Executing on a processor
    Running = 1,
    /// Suspended until a wake deadline passes
    Sleep = 2,
    /// Suspended until an external wake signal arrives
    IoWait = 3,
    /// Terminal state, no outgoing transitions
    Finished = 4,
}

impl RoutineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RoutineState::Ready,
            1 => RoutineState::Running,
            2 => RoutineState::Sleep,
            3 => RoutineState::IoWait,
            _ => RoutineState::Finished,
        }
    }
}

/// What a routine body reports at its suspension point
#[derive(Debug)]
pub enum RoutineYield {
    /// Voluntarily yielded; immediately eligible to run again
    Yield,
    /// Sleep for at least the given duration
    Sleep(Duration),
    /// Wait for an external wake signal
    IoWait,
    /// The routine has run to completion
    Finished,
}

/// Sentinel for "no processor assigned yet"
const NO_PROCESSOR: usize = usize::MAX;

/// The resumable body of a routine. Each invocation runs the routine to its
/// next suspension point or to completion.
pub type RoutineBody = Box<dyn FnMut() -> RoutineYield + Send>;

/// A schedulable, cooperatively-suspendable unit of work
pub struct Routine {
    /// Unique identifier, stable for the routine's lifetime
    id: RoutineId,

    /// Priority; lower values are dispatched first
    priority: u32,

    /// Assigned processor index, NO_PROCESSOR when unpinned
    processor: AtomicUsize,

    /// Cached execution state
    state: AtomicU8,

    /// Advisory inspection claim; serializes concurrent scans of this record
    claimed: AtomicBool,

    /// Pending external wake signal for IoWait
    wake_pending: AtomicBool,

    /// Deadline for a sleeping routine
    wake_at: Mutex<Option<Instant>>,

    /// Resumable body
    body: Mutex<RoutineBody>,
}

impl Routine {
    /// Create a new routine with the given priority and body
    pub fn new(priority: u32, body: RoutineBody) -> Self {
        Self {
            id: RoutineId::new(),
            priority,
            processor: AtomicUsize::new(NO_PROCESSOR),
            state: AtomicU8::new(RoutineState::Ready as u8),
            claimed: AtomicBool::new(false),
            wake_pending: AtomicBool::new(false),
            wake_at: Mutex::new(None),
            body: Mutex::new(body),
        }
    }

    /// Create a new routine pinned to a processor
    pub fn with_affinity(priority: u32, processor: usize, body: RoutineBody) -> Self {
        let routine = Self::new(priority, body);
        routine.processor.store(processor, Ordering::Relaxed);
        routine
    }

    /// Get the routine's unique id
    pub fn id(&self) -> RoutineId {
        self.id
    }

    /// Get the routine's priority (lower = dispatched first)
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Get the assigned processor index, if any
    pub fn processor_id(&self) -> Option<usize> {
        match self.processor.load(Ordering::Acquire) {
            NO_PROCESSOR => None,
            p => Some(p),
        }
    }

    /// Pin the routine to a processor
    pub fn set_processor_id(&self, processor: usize) {
        self.processor.store(processor, Ordering::Release);
    }

    /// Get the cached execution state
    pub fn state(&self) -> RoutineState {
        RoutineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Overwrite the cached execution state
    pub fn set_state(&self, state: RoutineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Take the advisory inspection claim. Returns false when another
    /// consumer currently holds it; the caller must skip this routine and
    /// retry on a later scan rather than block.
    pub fn acquire(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Drop the advisory inspection claim
    pub fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// Record an external wake signal for a routine in IoWait
    pub fn wake(&self) {
        self.wake_pending.store(true, Ordering::Release);
    }

    /// Reconcile the cached state against any pending wake signal or
    /// expired sleep deadline and return the resolved state. No other
    /// side effects.
    pub fn update_state(&self) -> RoutineState {
        match self.state() {
            RoutineState::Sleep => {
                let expired = match *self.wake_at.lock() {
                    Some(deadline) => Instant::now() >= deadline,
                    None => true,
                };
                if expired {
                    self.set_state(RoutineState::Ready);
                    RoutineState::Ready
                } else {
                    RoutineState::Sleep
                }
            }
            RoutineState::IoWait => {
                if self.wake_pending.swap(false, Ordering::AcqRel) {
                    self.set_state(RoutineState::Ready);
                    RoutineState::Ready
                } else {
                    RoutineState::IoWait
                }
            }
            other => other,
        }
    }

    /// Run the routine to its next suspension point and return the resulting
    /// state. Called by the owning processor while it holds the advisory
    /// claim handed over by `next_routine`.
    pub fn resume(&self) -> RoutineState {
        self.set_state(RoutineState::Running);

        let step = {
            let mut body = self.body.lock();
            (&mut **body)()
        };

        let next = match step {
            RoutineYield::Yield => RoutineState::Ready,
            RoutineYield::Sleep(duration) => {
                *self.wake_at.lock() = Some(Instant::now() + duration);
                RoutineState::Sleep
            }
            RoutineYield::IoWait => RoutineState::IoWait,
            RoutineYield::Finished => RoutineState::Finished,
        };

        self.set_state(next);
        next
    }
}

impl std::fmt::Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("processor", &self.processor_id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_body() -> RoutineBody {
        Box::new(|| RoutineYield::Finished)
    }

    #[test]
    fn test_routine_id_uniqueness() {
        let id1 = RoutineId::new();
        let id2 = RoutineId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_routine_creation() {
        let routine = Routine::new(3, finished_body());
        assert_eq!(routine.priority(), 3);
        assert_eq!(routine.state(), RoutineState::Ready);
        assert_eq!(routine.processor_id(), None);
    }

    #[test]
    fn test_affinity_assignment() {
        let routine = Routine::with_affinity(0, 2, finished_body());
        assert_eq!(routine.processor_id(), Some(2));

        routine.set_processor_id(1);
        assert_eq!(routine.processor_id(), Some(1));
    }

    #[test]
    fn test_advisory_claim() {
        let routine = Routine::new(0, finished_body());

        assert!(routine.acquire());
        // Second consumer must be refused while the claim is held
        assert!(!routine.acquire());

        routine.release();
        assert!(routine.acquire());
    }

    #[test]
    fn test_update_state_io_wait() {
        let routine = Routine::new(0, finished_body());
        routine.set_state(RoutineState::IoWait);

        // No wake signal yet
        assert_eq!(routine.update_state(), RoutineState::IoWait);

        routine.wake();
        assert_eq!(routine.update_state(), RoutineState::Ready);
        assert_eq!(routine.state(), RoutineState::Ready);
    }

    #[test]
    fn test_update_state_consumes_wake_signal() {
        let routine = Routine::new(0, finished_body());
        routine.set_state(RoutineState::IoWait);
        routine.wake();

        assert_eq!(routine.update_state(), RoutineState::Ready);

        // The signal was consumed; a fresh IoWait needs a fresh wake
        routine.set_state(RoutineState::IoWait);
        assert_eq!(routine.update_state(), RoutineState::IoWait);
    }

    #[test]
    fn test_update_state_sleep_deadline() {
        let routine = Routine::new(0, finished_body());
        routine.set_state(RoutineState::Sleep);
        *routine.wake_at.lock() = Some(Instant::now() + Duration::from_secs(60));

        assert_eq!(routine.update_state(), RoutineState::Sleep);

        *routine.wake_at.lock() = Some(Instant::now() - Duration::from_millis(1));
        assert_eq!(routine.update_state(), RoutineState::Ready);
    }

    #[test]
    fn test_resume_steps_through_yields() {
        let mut step = 0;
        let routine = Routine::new(0, Box::new(move || {
            step += 1;
            match step {
                1 => RoutineYield::Yield,
                2 => RoutineYield::Sleep(Duration::from_millis(1)),
                3 => RoutineYield::IoWait,
                _ => RoutineYield::Finished,
            }
        }));

        assert_eq!(routine.resume(), RoutineState::Ready);
        assert_eq!(routine.resume(), RoutineState::Sleep);
        assert!(routine.wake_at.lock().is_some());
        assert_eq!(routine.resume(), RoutineState::IoWait);
        assert_eq!(routine.resume(), RoutineState::Finished);
        assert_eq!(routine.state(), RoutineState::Finished);
    }

    #[test]
    fn test_finished_is_terminal_for_update_state() {
        let routine = Routine::new(0, finished_body());
        routine.resume();
        routine.wake();
        assert_eq!(routine.update_state(), RoutineState::Finished);
    }
}
