// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use std::time::Duration;

use crate::dag::execution::ScheduledTask;
use crate::plan::TaskId;

/// Structured result of one scheduling pass.
///
/// Useful for tests that drive the scheduler by hand and make assertions
/// about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// The full ready set of this pass, in launch order (priority, then plan
    /// order).
    pub ready: Vec<TaskId>,
    /// Tasks transitioned to `Running`; the caller must invoke the performer
    /// for each of them.
    pub launched: Vec<ScheduledTask>,
    /// Ready tasks left for a later pass because no slot was free.
    pub deferred: Vec<TaskId>,
}

/// What recording a performer outcome did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStep {
    Completed,
    /// The task is `Retrying`; it may be relaunched once `delay` has passed.
    Retry { retry_attempts: u32, delay: Duration },
    /// Retry budget exhausted (or the failure is not retryable).
    Failed,
    /// The task was not running; the outcome was dropped.
    Ignored,
}

/// Result of checking a run that has nothing ready and nothing in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallResolution {
    /// There is still something ready or in flight.
    NotStalled,
    /// Every task was already terminal.
    Finished,
    /// The remaining tasks were starved by failed ancestors and are now
    /// `Blocked`; the run is finished.
    Blocked(Vec<TaskId>),
}
