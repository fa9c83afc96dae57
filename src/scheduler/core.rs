//! Global scheduler: processor contexts, routing table, placement
//!
//! One `Scheduler` is constructed explicitly at process startup and passed
//! by `Arc` handle into the task-creation path; it owns the fixed pool of
//! processor contexts and the authoritative routine-to-processor routing
//! table. Placement is two-phase: a routine id is registered in the routing
//! table first, then `dispatch` resolves its processor and enqueues it, so
//! any subsystem can answer "who owns routine X" with a single lookup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::routine::{Routine, RoutineBody, RoutineId};

use super::policy::ChoreoPolicy;
use super::processor::{Parker, Processor, ProcessorConfig, ProcessorState};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of processor threads (0 = number of CPU cores)
    pub num_processors: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Park timeout for idle processors in milliseconds
    pub park_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_processors: num_cpus::get(),
            thread_name_prefix: "choreo-processor".to_string(),
            park_timeout_ms: 1,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total routines placed through dispatch
    pub routines_dispatched: AtomicUsize,
    /// Total routines observed reaching the terminal state
    pub routines_finished: AtomicUsize,
    /// Number of processors currently running
    pub active_processors: AtomicUsize,
    /// Number of processors currently parked
    pub parked_processors: AtomicUsize,
}

/// The scheduler that owns all processor contexts and the routing table
pub struct Scheduler {
    /// Scheduler configuration
    config: SchedulerConfig,
    /// Per-processor queue policies, fixed at construction
    policies: Vec<Arc<ChoreoPolicy>>,
    /// Processor threads, kept for lifecycle management
    processors: Mutex<Vec<Processor>>,
    /// Routine id to owning-processor routing table
    routing: Mutex<HashMap<RoutineId, usize>>,
    /// Dispatch counter
    dispatched: AtomicUsize,
    /// Process-wide stop flag, shared with every policy and processor
    shutdown: Arc<AtomicBool>,
    /// Guards against double start
    started: AtomicBool,
}

impl Scheduler {
    /// Build the scheduler and its processor contexts. Worker threads are
    /// not spawned until [`Scheduler::start`], so placement and queue state
    /// can be exercised deterministically before anything runs.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let num_processors = if config.num_processors == 0 {
            num_cpus::get()
        } else {
            config.num_processors
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut policies = Vec::with_capacity(num_processors);
        let mut processors = Vec::with_capacity(num_processors);

        for i in 0..num_processors {
            let parker = Arc::new(Parker::new());
            let policy = Arc::new(ChoreoPolicy::new(
                i,
                Arc::clone(&shutdown),
                Arc::clone(&parker),
            ));

            let processor_config = ProcessorConfig {
                id: i,
                name: format!("{}-{}", config.thread_name_prefix, i),
                park_timeout: Duration::from_millis(config.park_timeout_ms),
            };
            processors.push(Processor::new(
                processor_config,
                Arc::clone(&policy),
                parker,
                Arc::clone(&shutdown),
            ));
            policies.push(policy);
        }

        Arc::new(Self {
            config,
            policies,
            processors: Mutex::new(processors),
            routing: Mutex::new(HashMap::new()),
            dispatched: AtomicUsize::new(0),
            shutdown,
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the processor threads
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::RuntimeError {
                reason: "Scheduler already started".to_string(),
            });
        }

        log::info!(
            "starting choreography scheduler with {} processors",
            self.policies.len()
        );

        let mut processors = self.processors.lock();
        for processor in processors.iter_mut() {
            processor.start()?;
        }
        Ok(())
    }

    /// Register a routine id in the routing table ahead of placement.
    /// Returns false if the id is already registered.
    pub fn register(&self, id: RoutineId) -> bool {
        let mut routing = self.routing.lock();
        if routing.contains_key(&id) {
            return false;
        }
        // Placeholder owner until dispatch resolves the real one
        routing.insert(id, 0);
        true
    }

    /// Remove a routine id from the routing table. Called by the creator
    /// once the routine has been observed FINISHED.
    pub fn deregister(&self, id: RoutineId) {
        self.routing.lock().remove(&id);
    }

    /// Look up which processor currently owns a routine
    pub fn owner_of(&self, id: RoutineId) -> Option<usize> {
        self.routing.lock().get(&id).copied()
    }

    /// Resolve a routine's processor assignment and enqueue it.
    ///
    /// A pre-set valid affinity is kept unconditionally, never consulting
    /// queue sizes. An unpinned (or out-of-range) routine goes to the
    /// processor with the smallest ready queue; ties break to the lowest
    /// index. Returns false without enqueuing when the routine id is absent
    /// from the routing table, which indicates a registration-order bug at
    /// the call site.
    pub fn dispatch(&self, routine: Arc<Routine>) -> bool {
        let num_processors = self.policies.len();

        let pid = match routine.processor_id() {
            Some(pid) if pid < num_processors => pid,
            _ => {
                let mut pid = 0;
                let mut qsize = self.policies[0].rq_size();
                for (i, policy) in self.policies.iter().enumerate().skip(1) {
                    let size = policy.rq_size();
                    if qsize > size {
                        qsize = size;
                        pid = i;
                    }
                }
                routine.set_processor_id(pid);
                pid
            }
        };

        {
            let mut routing = self.routing.lock();
            match routing.get_mut(&routine.id()) {
                Some(owner) => *owner = pid,
                None => return false,
            }
        }

        if self.policies[pid].enqueue(routine) {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Create, register and place a routine in one call.
    ///
    /// Refuses new work once shutdown has begun. Rolls the routing entry
    /// back if placement fails, so a failed spawn leaves no trace.
    pub fn spawn(
        &self,
        priority: u32,
        affinity: Option<usize>,
        body: RoutineBody,
    ) -> Result<RoutineId> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let routine = Arc::new(match affinity {
            Some(processor) => Routine::with_affinity(priority, processor, body),
            None => Routine::new(priority, body),
        });
        let id = routine.id();

        if !self.register(id) {
            return Err(Error::RuntimeError {
                reason: format!("routine id {} already registered", id.as_u64()),
            });
        }

        if !self.dispatch(routine) {
            self.deregister(id);
            return Err(Error::RuntimeError {
                reason: format!("failed to place routine {}", id.as_u64()),
            });
        }

        // Wake the owning processor in case it is parked
        if let Some(owner) = self.owner_of(id) {
            self.policies[owner].notify(id);
        }

        Ok(id)
    }

    /// Route a wake notification to the processor that owns the routine.
    /// Returns false when the routine is unknown or the notification was
    /// suppressed by the de-duplication set.
    pub fn notify(&self, id: RoutineId) -> bool {
        match self.owner_of(id) {
            Some(owner) => self.policies[owner].notify(id),
            None => false,
        }
    }

    /// The fixed processor contexts, indexed by processor id
    pub fn policies(&self) -> &[Arc<ChoreoPolicy>] {
        &self.policies
    }

    /// Number of processors
    pub fn num_processors(&self) -> usize {
        self.policies.len()
    }

    /// Check if the scheduler is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Set the stop flag, wake every processor and join their threads.
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        log::info!("shutting down choreography scheduler");

        let mut processors = self.processors.lock();
        for processor in processors.iter_mut() {
            processor.stop()?;
        }
        Ok(())
    }

    /// Aggregate scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let processors = self.processors.lock();

        let mut active = 0;
        let mut parked = 0;
        let mut finished = 0;

        for processor in processors.iter() {
            match processor.state() {
                ProcessorState::Running => active += 1,
                ProcessorState::Parked => parked += 1,
                ProcessorState::Stopped => {}
            }
            finished += processor
                .stats()
                .routines_finished
                .load(Ordering::Relaxed);
        }

        SchedulerStats {
            routines_dispatched: AtomicUsize::new(self.dispatched.load(Ordering::Relaxed)),
            routines_finished: AtomicUsize::new(finished),
            active_processors: AtomicUsize::new(active),
            parked_processors: AtomicUsize::new(parked),
        }
    }

    /// The configuration this scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::RoutineYield;

    fn scheduler(num_processors: usize) -> Arc<Scheduler> {
        Scheduler::new(SchedulerConfig {
            num_processors,
            ..Default::default()
        })
    }

    fn yielding(priority: u32, processor: usize) -> Arc<Routine> {
        Arc::new(Routine::with_affinity(
            priority,
            processor,
            Box::new(|| RoutineYield::Yield),
        ))
    }

    fn preload(sched: &Scheduler, sizes: &[usize]) {
        for (processor, &count) in sizes.iter().enumerate() {
            for _ in 0..count {
                assert!(sched.policies()[processor].enqueue(yielding(0, processor)));
            }
        }
    }

    #[test]
    fn test_scheduler_creation() {
        let sched = scheduler(3);
        assert_eq!(sched.num_processors(), 3);
        assert!(!sched.is_shutting_down());
    }

    #[test]
    fn test_dispatch_respects_preset_affinity() {
        let sched = scheduler(3);
        // Processor 2 is the busiest; a pinned routine must still land there
        preload(&sched, &[0, 0, 4]);

        let routine = yielding(1, 2);
        assert!(sched.register(routine.id()));
        assert!(sched.dispatch(Arc::clone(&routine)));

        assert_eq!(sched.owner_of(routine.id()), Some(2));
        assert_eq!(sched.policies()[2].rq_size(), 5);
    }

    #[test]
    fn test_dispatch_least_loaded_placement() {
        let sched = scheduler(3);
        preload(&sched, &[3, 1, 2]);

        let routine = Arc::new(Routine::new(0, Box::new(|| RoutineYield::Yield)));
        assert!(sched.register(routine.id()));
        assert!(sched.dispatch(Arc::clone(&routine)));

        assert_eq!(routine.processor_id(), Some(1));
        assert_eq!(sched.owner_of(routine.id()), Some(1));
        assert_eq!(sched.policies()[1].rq_size(), 2);
    }

    #[test]
    fn test_dispatch_tie_breaks_to_lowest_index() {
        let sched = scheduler(3);
        preload(&sched, &[2, 2, 5]);

        let routine = Arc::new(Routine::new(0, Box::new(|| RoutineYield::Yield)));
        assert!(sched.register(routine.id()));
        assert!(sched.dispatch(Arc::clone(&routine)));

        assert_eq!(routine.processor_id(), Some(0));
    }

    #[test]
    fn test_dispatch_out_of_range_affinity_falls_back() {
        let sched = scheduler(2);
        preload(&sched, &[1, 0]);

        let routine = yielding(0, 7);
        assert!(sched.register(routine.id()));
        assert!(sched.dispatch(Arc::clone(&routine)));

        assert_eq!(routine.processor_id(), Some(1));
    }

    #[test]
    fn test_dispatch_requires_registration() {
        let sched = scheduler(2);

        let routine = yielding(0, 0);
        assert!(!sched.dispatch(Arc::clone(&routine)));

        // Nothing was enqueued anywhere
        assert_eq!(sched.policies()[0].rq_size(), 0);
        assert_eq!(sched.policies()[1].rq_size(), 0);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let sched = scheduler(1);
        let id = RoutineId::new();

        assert!(sched.register(id));
        assert!(!sched.register(id));

        sched.deregister(id);
        assert!(sched.register(id));
    }

    #[test]
    fn test_spawn_after_shutdown_is_refused() {
        let sched = scheduler(1);
        sched.shutdown().unwrap();

        let result = sched.spawn(0, None, Box::new(|| RoutineYield::Finished));
        assert!(matches!(result, Err(Error::ShuttingDown)));
    }

    #[test]
    fn test_spawn_places_and_routes() {
        let sched = scheduler(2);

        let id = sched
            .spawn(3, None, Box::new(|| RoutineYield::Finished))
            .unwrap();

        let owner = sched.owner_of(id).unwrap();
        assert!(sched.policies()[owner].routine(id).is_some());
        assert_eq!(
            sched.stats().routines_dispatched.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_notify_unknown_routine() {
        let sched = scheduler(1);
        assert!(!sched.notify(RoutineId::new()));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let sched = scheduler(2);
        sched.start().unwrap();
        sched.shutdown().unwrap();
        sched.shutdown().unwrap();
        assert!(sched.is_shutting_down());
    }
}
