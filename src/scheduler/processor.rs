//! Processor worker threads for the choreography scheduler
//!
//! Each processor owns one OS thread that repeatedly asks its queue policy
//! for the next routine and runs it to its next suspension point. Routines
//! never preempt one another on the same processor; an idle processor parks
//! with a timeout instead of spinning.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::routine::RoutineState;

use super::policy::ChoreoPolicy;

/// Park/unpark handle shared between a processor and its policy
pub struct Parker {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    /// Create a new parker with no pending wake
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Wake the parked processor, or make its next park return immediately
    pub fn unpark(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.condvar.notify_one();
    }

    /// Block until woken or until the timeout elapses
    pub fn park_timeout(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.condvar.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

/// Processor thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Processing routines
    Running,
    /// Idle, waiting for work
    Parked,
    /// Thread has exited
    Stopped,
}

/// Statistics for one processor thread
#[derive(Debug, Default)]
pub struct ProcessorStats {
    /// Number of resume steps executed
    pub routines_executed: AtomicUsize,
    /// Number of routines observed reaching the terminal state
    pub routines_finished: AtomicUsize,
    /// Number of times the processor parked
    pub park_count: AtomicUsize,
}

/// Processor thread configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Processor index
    pub id: usize,
    /// Thread name
    pub name: String,
    /// Park timeout when idle; doubles as the sleep-deadline poll interval
    pub park_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            id: 0,
            name: "choreo-processor-0".to_string(),
            park_timeout: Duration::from_millis(1),
        }
    }
}

/// Worker thread that cooperatively executes routines from one policy
pub struct Processor {
    /// Processor configuration
    config: ProcessorConfig,
    /// The queue policy this processor drains
    policy: Arc<ChoreoPolicy>,
    /// Park/unpark handle, shared with the policy's notify path
    parker: Arc<Parker>,
    /// Current state
    state: Arc<AtomicUsize>,
    /// Statistics
    stats: Arc<ProcessorStats>,
    /// Process-wide stop flag
    stop: Arc<AtomicBool>,
    /// Thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl Processor {
    /// Create a new processor bound to the given policy
    pub fn new(
        config: ProcessorConfig,
        policy: Arc<ChoreoPolicy>,
        parker: Arc<Parker>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            policy,
            parker,
            state: Arc::new(AtomicUsize::new(ProcessorState::Parked as usize)),
            stats: Arc::new(ProcessorStats::default()),
            stop,
            thread_handle: None,
        }
    }

    /// Start the processor thread
    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Err(Error::RuntimeError {
                reason: format!("Processor {} already started", self.config.id),
            });
        }

        let policy = Arc::clone(&self.policy);
        let parker = Arc::clone(&self.parker);
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let stop = Arc::clone(&self.stop);
        let park_timeout = self.config.park_timeout;

        let handle = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || {
                processor_loop(policy, parker, state, stats, stop, park_timeout);
            })
            .map_err(|e| Error::SpawnError {
                reason: e.to_string(),
            })?;

        self.thread_handle = Some(handle);
        self.state.store(ProcessorState::Running as usize, Ordering::Release);
        Ok(())
    }

    /// Join the processor thread. The caller must have set the process-wide
    /// stop flag first; this only wakes and waits.
    pub fn stop(&mut self) -> Result<()> {
        self.parker.unpark();

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| Error::RuntimeError {
                reason: format!("Processor {} thread panicked", self.config.id),
            })?;
        }

        self.state.store(ProcessorState::Stopped as usize, Ordering::Release);
        Ok(())
    }

    /// Get the current state of the processor
    pub fn state(&self) -> ProcessorState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcessorState::Running,
            1 => ProcessorState::Parked,
            _ => ProcessorState::Stopped,
        }
    }

    /// Processor index
    pub fn id(&self) -> usize {
        self.config.id
    }

    /// Snapshot of this processor's counters
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            routines_executed: AtomicUsize::new(
                self.stats.routines_executed.load(Ordering::Relaxed),
            ),
            routines_finished: AtomicUsize::new(
                self.stats.routines_finished.load(Ordering::Relaxed),
            ),
            park_count: AtomicUsize::new(self.stats.park_count.load(Ordering::Relaxed)),
        }
    }
}

/// Main processor loop: drain the policy, park when empty
fn processor_loop(
    policy: Arc<ChoreoPolicy>,
    parker: Arc<Parker>,
    state: Arc<AtomicUsize>,
    stats: Arc<ProcessorStats>,
    stop: Arc<AtomicBool>,
    park_timeout: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        if let Some(routine) = policy.next_routine() {
            let next = routine.resume();
            // End of the claim hand-off that began in next_routine
            routine.release();

            stats.routines_executed.fetch_add(1, Ordering::Relaxed);
            if next == RoutineState::Finished {
                stats.routines_finished.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            state.store(ProcessorState::Parked as usize, Ordering::Release);
            stats.park_count.fetch_add(1, Ordering::Relaxed);

            parker.park_timeout(park_timeout);

            state.store(ProcessorState::Running as usize, Ordering::Release);
        }
    }

    state.store(ProcessorState::Stopped as usize, Ordering::Release);
}
