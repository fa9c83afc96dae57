//! Choreography-mode scheduler
//!
//! This module implements the priority-based cooperative scheduling policy:
//! routines are placed once onto a fixed pool of processors and stay there;
//! each processor drains its own priority-ordered queue with no stealing.

pub mod core;
pub mod policy;
pub mod processor;

pub use self::core::{Scheduler, SchedulerConfig, SchedulerStats};
pub use policy::ChoreoPolicy;
pub use processor::{Parker, Processor, ProcessorConfig, ProcessorState, ProcessorStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_default_config() {
        let sched = Scheduler::new(SchedulerConfig::default());
        assert!(sched.num_processors() > 0);
        assert_eq!(sched.num_processors(), sched.policies().len());
    }
}
