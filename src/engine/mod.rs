// src/engine/mod.rs

//! Orchestration engine for plandag.
//!
//! This module ties together:
//! - the pure DAG scheduler (`crate::dag::Scheduler`)
//! - the retry policy ([`retry`])
//! - the async control loop that launches work, waits on completions and
//!   backoffs, and honours cancellation ([`runtime`])

use crate::exec::{STATUS_ERROR, STATUS_SUCCESS, WorkError, WorkErrorKind, WorkResult};
use crate::plan::TaskId;

pub mod retry;
pub mod runtime;

pub use retry::{RetryDecision, RetryPolicy};
pub use runtime::{Runtime, run_plan};

/// Outcome of one performer invocation, as the scheduler sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(WorkResult),
    Failed(WorkError),
}

impl TaskOutcome {
    /// Classify a performer return value.
    ///
    /// - `Ok` with status `"success"` → success
    /// - `Ok` with status `"error"` → performer failure
    /// - `Ok` with any other status → `UnexpectedOutcome` failure
    /// - `Err` → failure with the performer's own kind
    pub fn classify(result: Result<WorkResult, WorkError>) -> Self {
        match result {
            Ok(res) if res.status == STATUS_SUCCESS => TaskOutcome::Success(res),
            Ok(res) if res.status == STATUS_ERROR => {
                let message = res
                    .output
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| "performer reported an error".to_string());
                TaskOutcome::Failed(WorkError::performer(message))
            }
            Ok(res) => TaskOutcome::Failed(WorkError::new(
                WorkErrorKind::UnexpectedOutcome,
                format!("unrecognised result status '{}'", res.status),
            )),
            Err(err) => TaskOutcome::Failed(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Events flowing back into the control loop from in-flight work.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A performer invocation finished.
    TaskFinished { task: TaskId, outcome: TaskOutcome },
    /// A backoff elapsed; the task may be relaunched.
    RetryDue { task: TaskId },
    /// A backoff was abandoned because the run was cancelled.
    RetryAbandoned { task: TaskId },
}
