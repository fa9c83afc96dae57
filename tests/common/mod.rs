//! Common test helpers for choreo-sched integration tests

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use choreo_sched::prelude::*;
use choreo_sched::scheduler::Parker;

/// Poll `cond` until it returns true or the deadline elapses
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Build a standalone policy for processor 0, detached from any scheduler
pub fn standalone_policy() -> Arc<ChoreoPolicy> {
    Arc::new(ChoreoPolicy::new(
        0,
        Arc::new(AtomicBool::new(false)),
        Arc::new(Parker::new()),
    ))
}

/// A routine that yields `spins` times and then finishes
pub fn spinning_routine(priority: u32, processor: usize, mut spins: usize) -> Arc<Routine> {
    Arc::new(Routine::with_affinity(
        priority,
        processor,
        Box::new(move || {
            if spins == 0 {
                RoutineYield::Finished
            } else {
                spins -= 1;
                RoutineYield::Yield
            }
        }),
    ))
}
