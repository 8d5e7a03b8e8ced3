// src/plan/model.rs

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::TaskType;

/// Canonical task identifier type used throughout the crate.
pub type TaskId = String;

/// A plan document as read from disk, before validation.
///
/// Mirrors what the planner produces:
///
/// ```json
/// {
///   "project_name": "erp-rewrite",
///   "tasks": [
///     { "id": "task_1", "name": "Analyse schema", "priority": 1 },
///     { "id": "task_2", "name": "Generate models", "dependencies": ["task_1"] }
///   ],
///   "critical_path": ["task_1", "task_2"],
///   "scheduler": { "max_parallel": 2 }
/// }
/// ```
///
/// All sections except `tasks` are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlanFile {
    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default)]
    pub objective: Option<String>,

    /// Planner's overall estimate; when absent the task estimates are summed.
    #[serde(default, alias = "estimated_total_time")]
    pub estimated_total_time_sec: Option<f64>,

    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Advisory longest chain, used only for reporting.
    #[serde(default)]
    pub critical_path: Vec<TaskId>,

    /// Advisory groups of tasks that may run together. Never enforced.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<TaskId>>,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One unit of work in a plan. Immutable once the plan is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub task_type: Option<TaskType>,

    /// Ids that must reach `Completed` before this task may become ready.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    /// Lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_retry_budget", alias = "retry_count")]
    pub retry_budget: u32,

    /// Advisory only; feeds the report, never scheduling decisions.
    #[serde(default = "default_estimated_duration", alias = "estimated_time")]
    pub estimated_duration_sec: f64,

    /// Shell command run by [`crate::exec::ShellPerformer`]. Other performers
    /// are free to ignore it.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_priority() -> u8 {
    3
}

fn default_retry_budget() -> u32 {
    3
}

fn default_estimated_duration() -> f64 {
    300.0
}

impl Task {
    /// Minimal task with defaults for everything but identity.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            task_type: None,
            dependencies: Vec::new(),
            priority: default_priority(),
            retry_budget: default_retry_budget(),
            estimated_duration_sec: default_estimated_duration(),
            cmd: None,
            metadata: Map::new(),
        }
    }
}

/// `scheduler` section of a plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Upper bound on concurrently running tasks.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Exponential base for the retry backoff.
    #[serde(default = "default_retry_base")]
    pub retry_base: u32,

    /// Length of one backoff time unit in milliseconds.
    #[serde(default = "default_retry_unit_ms")]
    pub retry_unit_ms: u64,

    /// Optional cap on a single backoff delay.
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
}

fn default_max_parallel() -> usize {
    3
}

fn default_retry_base() -> u32 {
    2
}

fn default_retry_unit_ms() -> u64 {
    1000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            retry_base: default_retry_base(),
            retry_unit_ms: default_retry_unit_ms(),
            max_backoff_ms: None,
        }
    }
}

/// A validated, immutable execution plan.
///
/// Construct via `Plan::try_from(raw)` (strict) or
/// [`Plan::from_raw`] with an explicit [`crate::types::DependencyPolicy`].
#[derive(Debug, Clone)]
pub struct Plan {
    project_name: Option<String>,
    objective: Option<String>,
    estimated_total_time_sec: Option<f64>,
    tasks: Vec<Arc<Task>>,
    index: HashMap<TaskId, usize>,
    critical_path: Vec<TaskId>,
    parallel_groups: Vec<Vec<TaskId>>,
    scheduler: SchedulerSection,
}

impl Plan {
    /// Build a plan without running validation.
    ///
    /// Callers must have checked id uniqueness already; a duplicate id would
    /// shadow the earlier task in the index.
    pub(crate) fn new_unchecked(raw: RawPlanFile) -> Self {
        let index = raw
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        Self {
            project_name: raw.project_name,
            objective: raw.objective,
            estimated_total_time_sec: raw.estimated_total_time_sec,
            tasks: raw.tasks.into_iter().map(Arc::new).collect(),
            index,
            critical_path: raw.critical_path,
            parallel_groups: raw.parallel_groups,
            scheduler: raw.scheduler,
        }
    }

    /// Tasks in plan order.
    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Arc<Task>> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Position of a task in plan order (used for deterministic tie-breaks).
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn objective(&self) -> Option<&str> {
        self.objective.as_deref()
    }

    pub fn critical_path(&self) -> &[TaskId] {
        &self.critical_path
    }

    pub fn parallel_groups(&self) -> &[Vec<TaskId>] {
        &self.parallel_groups
    }

    pub fn scheduler(&self) -> &SchedulerSection {
        &self.scheduler
    }

    /// Planner's total estimate, falling back to the sum of task estimates.
    pub fn estimated_total_time_sec(&self) -> f64 {
        self.estimated_total_time_sec.unwrap_or_else(|| {
            self.tasks.iter().map(|t| t.estimated_duration_sec).sum()
        })
    }
}
