//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while assembling or persisting the scheduler.
///
/// Tick-time failures never surface here: they are captured into
/// `ExecutionStats` at the tick boundary.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("state store error: {0}")]
    State(#[from] autobook_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
