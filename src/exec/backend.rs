// src/exec/backend.rs

//! Pluggable work performer abstraction.
//!
//! The runtime talks to a `WorkPerformer` for the actual unit of work behind
//! each task. This makes it easy to swap in a fake performer in tests while
//! keeping the production implementation in [`super::shell`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::plan::Task;

/// `status` value a performer uses to report success.
pub const STATUS_SUCCESS: &str = "success";
/// `status` value a performer uses to report a handled failure.
pub const STATUS_ERROR: &str = "error";

/// Opaque payload returned by a performer.
///
/// The scheduler only looks at `status`; `output` and `metrics` are carried
/// through to the report untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub status: String,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub metrics: Value,
}

impl WorkResult {
    pub fn success(output: Value) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            output,
            metrics: Value::Null,
        }
    }

    pub fn with_metrics(mut self, metrics: Value) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Error-kind tag attached to every task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkErrorKind {
    /// The performer reported a failure.
    Performer,
    /// The performer returned a status that is neither success nor error.
    UnexpectedOutcome,
    /// The performer panicked.
    Panicked,
    /// The invocation was abandoned because the run was cancelled.
    Cancelled,
}

impl fmt::Display for WorkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkErrorKind::Performer => "performer",
            WorkErrorKind::UnexpectedOutcome => "unexpected_outcome",
            WorkErrorKind::Panicked => "panicked",
            WorkErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct WorkError {
    pub kind: WorkErrorKind,
    pub message: String,
}

impl WorkError {
    pub fn new(kind: WorkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn performer(message: impl Into<String>) -> Self {
        Self::new(WorkErrorKind::Performer, message)
    }
}

/// Future returned by [`WorkPerformer::execute`].
pub type WorkFuture<'a> =
    Pin<Box<dyn Future<Output = Result<WorkResult, WorkError>> + Send + 'a>>;

/// Trait abstracting how a single task is performed.
///
/// Production code uses [`super::ShellPerformer`]; tests provide their own
/// implementation with scripted outcomes.
///
/// The performer never sees scheduler state. `cancel` fires when the run is
/// cancelled; honouring it is up to the implementation.
pub trait WorkPerformer: Send + Sync {
    fn execute<'a>(&'a self, task: &'a Task, cancel: CancellationToken) -> WorkFuture<'a>;
}
