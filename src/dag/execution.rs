// src/dag/execution.rs

//! Per-task execution records and the task status state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::exec::{WorkErrorKind, WorkResult};
use crate::plan::{Task, TaskId};

/// Status of a task within one run.
///
/// ```text
/// Pending -> Ready -> Running -> Completed
///                        |  \--> Failed
///                        \-> Retrying -> Ready -> Running ...
/// Pending -> Blocked   (an ancestor failed; decided when the run stalls)
/// ```
///
/// `Completed`, `Failed` and `Blocked` are terminal. `Ready` only lives for
/// the duration of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Retrying,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Mutable execution record for one task. Owned by the scheduler.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: Arc<Task>,
    pub status: TaskStatus,
    /// Start of the most recent attempt.
    pub start_time: Option<Instant>,
    /// Set once the task reaches `Completed` or `Failed`.
    pub end_time: Option<Instant>,
    pub result: Option<WorkResult>,
    /// Last error seen, kept while retrying and on final failure.
    pub error: Option<String>,
    pub error_kind: Option<WorkErrorKind>,
    /// Retries consumed so far; never exceeds `task.retry_budget`.
    pub retry_attempts: u32,
    /// Total performer invocations (first attempt included).
    pub attempts: u32,
    /// Failed ancestors that starved this task (only for `Blocked`).
    pub blocked_by: Vec<TaskId>,
    /// A `Retrying` task whose backoff has elapsed and may be relaunched.
    pub(crate) retry_due: bool,
}

impl TaskExecution {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            error_kind: None,
            retry_attempts: 0,
            attempts: 0,
            blocked_by: Vec::new(),
            retry_due: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }

    /// `end_time - start_time` of the final attempt, if both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Description of a task the scheduler wants the performer to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task: Arc<Task>,
    /// 1 for the first invocation, 2 for the first retry, and so on.
    pub attempt: u32,
}

impl ScheduledTask {
    pub fn id(&self) -> &str {
        &self.task.id
    }
}
