use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of work a task represents, as labelled by the planner.
///
/// Purely descriptive: the scheduler never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Analysis,
    Generation,
    Transformation,
    Validation,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Analysis => "analysis",
            TaskType::Generation => "generation",
            TaskType::Transformation => "transformation",
            TaskType::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// How plan construction treats dependency ids that name no task in the plan.
///
/// - `Strict`: reject the plan (default).
/// - `Permissive`: keep the plan, log a warning, and let the runtime report
///   the dangling reference as an unresolvable deadlock once it stalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyPolicy {
    #[default]
    Strict,
    Permissive,
}

/// On-disk encoding of a plan document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Json,
    Toml,
}

impl PlanFormat {
    /// Pick the format from a file extension; anything but `.toml` is JSON.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => PlanFormat::Toml,
            _ => PlanFormat::Json,
        }
    }
}
