// src/plan/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::errors::{PlandagError, Result};
use crate::plan::model::{Plan, RawPlanFile};
use crate::types::DependencyPolicy;

impl TryFrom<RawPlanFile> for Plan {
    type Error = PlandagError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        Plan::from_raw(raw, DependencyPolicy::Strict)
    }
}

impl Plan {
    /// Validate a raw plan document and build a [`Plan`].
    ///
    /// Always rejected:
    /// - empty or duplicate task ids
    /// - a task listing itself as a dependency
    /// - `scheduler.max_parallel == 0` or `scheduler.retry_base == 0`
    ///
    /// Dangling dependency ids are rejected under
    /// [`DependencyPolicy::Strict`] and only logged under
    /// [`DependencyPolicy::Permissive`].
    ///
    /// Cycles are *not* rejected here: they surface at run time as a deadlock
    /// once every independent branch has finished. A warning is logged so the
    /// problem is visible early.
    pub fn from_raw(raw: RawPlanFile, policy: DependencyPolicy) -> Result<Plan> {
        validate_scheduler_section(&raw)?;
        validate_task_ids(&raw)?;
        validate_task_dependencies(&raw, policy)?;
        warn_on_unknown_advisory_ids(&raw);
        warn_on_cycle(&raw);

        if raw.tasks.is_empty() {
            warn!("plan contains no tasks");
        }

        Ok(Plan::new_unchecked(raw))
    }
}

fn validate_scheduler_section(raw: &RawPlanFile) -> Result<()> {
    if raw.scheduler.max_parallel == 0 {
        return Err(PlandagError::InvalidPlan(
            "scheduler.max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }
    if raw.scheduler.retry_base == 0 {
        return Err(PlandagError::InvalidPlan(
            "scheduler.retry_base must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_task_ids(raw: &RawPlanFile) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for task in raw.tasks.iter() {
        if task.id.trim().is_empty() {
            return Err(PlandagError::InvalidPlan(format!(
                "task '{}' has an empty id",
                task.name
            )));
        }
        if !seen.insert(task.id.as_str()) {
            return Err(PlandagError::InvalidPlan(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(raw: &RawPlanFile, policy: DependencyPolicy) -> Result<()> {
    let ids: HashSet<&str> = raw.tasks.iter().map(|t| t.id.as_str()).collect();

    for task in raw.tasks.iter() {
        for dep in task.dependencies.iter() {
            if dep == &task.id {
                return Err(PlandagError::InvalidPlan(format!(
                    "task '{}' cannot depend on itself",
                    task.id
                )));
            }
            if ids.contains(dep.as_str()) {
                continue;
            }
            match policy {
                DependencyPolicy::Strict => {
                    return Err(PlandagError::InvalidPlan(format!(
                        "task '{}' has unknown dependency '{}'",
                        task.id, dep
                    )));
                }
                DependencyPolicy::Permissive => {
                    warn!(
                        task = %task.id,
                        dep = %dep,
                        "dependency names no task in the plan; it can never be satisfied"
                    );
                }
            }
        }
    }
    Ok(())
}

fn warn_on_unknown_advisory_ids(raw: &RawPlanFile) {
    let ids: HashSet<&str> = raw.tasks.iter().map(|t| t.id.as_str()).collect();

    for id in raw.critical_path.iter() {
        if !ids.contains(id.as_str()) {
            warn!(task = %id, "critical_path names an unknown task");
        }
    }
    for id in raw.parallel_groups.iter().flatten() {
        if !ids.contains(id.as_str()) {
            warn!(task = %id, "parallel_groups names an unknown task");
        }
    }
}

fn warn_on_cycle(raw: &RawPlanFile) {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for task in raw.tasks.iter() {
        graph.add_node(task.id.as_str());
    }
    for task in raw.tasks.iter() {
        for dep in task.dependencies.iter() {
            if graph.contains_node(dep.as_str()) {
                graph.add_edge(dep.as_str(), task.id.as_str(), ());
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        warn!(
            task = %cycle.node_id(),
            "plan contains a dependency cycle; the run will end in a deadlock"
        );
    }
}
