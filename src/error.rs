//! Error types for choreo-sched
//!
//! This module provides error handling types used throughout the library.
//! Scheduling-path operations deliberately report failure through booleans
//! (see [`crate::scheduler::ChoreoPolicy`]); these types cover the runtime
//! lifecycle, where a failure is worth a reason string.

use thiserror::Error;

/// Main error type for choreo-sched operations
#[derive(Error, Debug)]
pub enum Error {
    /// Spawning a processor worker thread failed
    #[error("Failed to spawn processor thread: {reason}")]
    SpawnError {
        /// Reason for the spawn failure
        reason: String,
    },

    /// Runtime lifecycle error
    #[error("Runtime error: {reason}")]
    RuntimeError {
        /// Reason for the runtime error
        reason: String,
    },

    /// The scheduler is shutting down and refuses new work
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Convenient result type alias
pub type Result<T> = std::result::Result<T, Error>;
