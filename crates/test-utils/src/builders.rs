#![allow(dead_code)]

use std::sync::Arc;

use plandag::plan::{Plan, RawPlanFile, Task};
use plandag::types::DependencyPolicy;

/// Builder for `Plan` to simplify test setup.
pub struct PlanBuilder {
    raw: RawPlanFile,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawPlanFile::default(),
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.raw.tasks.push(task);
        self
    }

    /// Shorthand: task `id` depending on `deps`, everything else default.
    pub fn task(self, id: &str, deps: &[&str]) -> Self {
        let mut builder = TaskBuilder::new(id);
        for dep in deps {
            builder = builder.after(dep);
        }
        self.with_task(builder.build())
    }

    pub fn project_name(mut self, name: &str) -> Self {
        self.raw.project_name = Some(name.to_string());
        self
    }

    pub fn estimated_total_time_sec(mut self, secs: f64) -> Self {
        self.raw.estimated_total_time_sec = Some(secs);
        self
    }

    pub fn critical_path(mut self, ids: &[&str]) -> Self {
        self.raw.critical_path = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.raw.scheduler.max_parallel = n;
        self
    }

    pub fn retry_base(mut self, base: u32) -> Self {
        self.raw.scheduler.retry_base = base;
        self
    }

    pub fn retry_unit_ms(mut self, ms: u64) -> Self {
        self.raw.scheduler.retry_unit_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.raw.scheduler.max_backoff_ms = Some(ms);
        self
    }

    pub fn raw(self) -> RawPlanFile {
        self.raw
    }

    pub fn build(self) -> Plan {
        Plan::try_from(self.raw).expect("Failed to build valid plan from builder")
    }

    /// Build keeping dangling dependency ids.
    pub fn build_permissive(self) -> Plan {
        Plan::from_raw(self.raw, DependencyPolicy::Permissive)
            .expect("Failed to build permissive plan from builder")
    }

    pub fn build_arc(self) -> Arc<Plan> {
        Arc::new(self.build())
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    /// New task whose name equals its id.
    pub fn new(id: &str) -> Self {
        Self {
            task: Task::new(id, id),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.task.retry_budget = budget;
        self
    }

    pub fn estimate(mut self, secs: f64) -> Self {
        self.task.estimated_duration_sec = secs;
        self
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.task.cmd = Some(cmd.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
