//! # choreo-sched
//!
//! Priority-based cooperative scheduling core for real-time robotics
//! runtimes: routines (cooperatively-suspendable units of work) are placed
//! once onto a fixed pool of processor threads and each processor drains its
//! own priority-ordered queue.
//!
//! ## Features
//!
//! - **Routines**: schedulable units with identity, priority, optional
//!   processor affinity and a concurrent-safe state machine
//! - **Choreography policy**: per-processor admission and priority-ordered
//!   selection with race-free claim/release semantics
//! - **Load-aware placement**: unpinned routines go to the least-loaded
//!   processor; pinned routines go exactly where they ask
//! - **Trace bus**: fire-and-forget scheduling events for observers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use choreo_sched::prelude::*;
//!
//! let sched = Scheduler::new(SchedulerConfig {
//!     num_processors: 4,
//!     ..Default::default()
//! });
//! sched.start().unwrap();
//!
//! let mut ticks = 0;
//! let id = sched.spawn(1, None, Box::new(move || {
//!     ticks += 1;
//!     if ticks < 100 { RoutineYield::Yield } else { RoutineYield::Finished }
//! })).unwrap();
//!
//! // ... later, once the routine is done:
//! sched.deregister(id);
//! sched.shutdown().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod routine;
pub mod scheduler;
pub mod trace;

/// Convenient re-exports for common functionality
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::routine::{Routine, RoutineBody, RoutineId, RoutineState, RoutineYield};
    pub use crate::scheduler::{ChoreoPolicy, Scheduler, SchedulerConfig, SchedulerStats};
    pub use crate::trace::SchedEvent;
}

// Re-export the prelude at crate root for convenience
pub use prelude::*;
