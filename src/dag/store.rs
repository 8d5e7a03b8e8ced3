// src/dag/store.rs

//! Execution state store: one [`TaskExecution`] per task, keyed by id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::dag::DagGraph;
use crate::dag::execution::{TaskExecution, TaskStatus};
use crate::plan::{Plan, Task, TaskId};

/// The single source of truth for per-task state during a run.
///
/// Only the scheduler holds a mutable reference, and the scheduler is only
/// driven from the control loop, so no locking is involved.
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    records: HashMap<TaskId, TaskExecution>,
    order: Vec<TaskId>,
}

impl ExecutionStore {
    /// Fresh store with every task `Pending`.
    pub fn new(plan: &Plan) -> Self {
        let records = plan
            .tasks()
            .iter()
            .map(|t| (t.id.clone(), TaskExecution::new(Arc::clone(t))))
            .collect();

        Self {
            records,
            order: plan.tasks().iter().map(|t| t.id.clone()).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&TaskExecution> {
        self.records.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut TaskExecution> {
        self.records.get_mut(id)
    }

    /// Records in plan order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskExecution> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.records.values().filter(|e| e.status == status).count()
    }

    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    /// Tasks occupying the control loop: running, or waiting out a backoff.
    pub fn in_flight_count(&self) -> usize {
        self.records
            .values()
            .filter(|e| matches!(e.status, TaskStatus::Running | TaskStatus::Retrying))
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.records.values().all(|e| e.is_terminal())
    }

    /// Whether every dependency of `task` is `Completed`.
    ///
    /// A dependency with no record (dangling id) is never satisfied.
    pub fn deps_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            matches!(
                self.records.get(dep).map(|e| e.status),
                Some(TaskStatus::Completed)
            )
        })
    }

    /// Ids eligible to launch right now, in plan order:
    /// - `Pending` tasks whose dependencies are all `Completed`
    /// - `Retrying` tasks whose backoff has elapsed
    pub fn ready_candidates(&self) -> Vec<TaskId> {
        self.iter()
            .filter(|e| match e.status {
                TaskStatus::Pending => self.deps_satisfied(&e.task),
                TaskStatus::Retrying => e.retry_due,
                _ => false,
            })
            .map(|e| e.task.id.clone())
            .collect()
    }

    /// Tasks that are not yet terminal, in plan order.
    pub fn non_terminal_tasks(&self) -> Vec<Arc<Task>> {
        self.iter()
            .filter(|e| !e.is_terminal())
            .map(|e| Arc::clone(&e.task))
            .collect()
    }

    /// Mark every `Pending` descendant of a `Failed` task as `Blocked`.
    ///
    /// Walks dependents downward from each failed task, recording the failed
    /// root(s) in `blocked_by`. Returns the newly blocked ids in plan order.
    pub fn mark_blocked_descendants(&mut self, graph: &DagGraph) -> Vec<TaskId> {
        let failed: Vec<TaskId> = self
            .iter()
            .filter(|e| e.status == TaskStatus::Failed)
            .map(|e| e.task.id.clone())
            .collect();

        let mut roots_of: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

        for root in failed.iter() {
            let mut stack: Vec<TaskId> = graph.dependents_of(root).to_vec();
            let mut visited: HashSet<TaskId> = HashSet::new();

            while let Some(id) = stack.pop() {
                if !visited.insert(id.clone()) {
                    continue;
                }
                match self.records.get(&id).map(|e| e.status) {
                    Some(TaskStatus::Pending) | Some(TaskStatus::Blocked) => {
                        roots_of.entry(id.clone()).or_default().push(root.clone());
                        stack.extend(graph.dependents_of(&id).iter().cloned());
                    }
                    Some(_) => {}
                    None => warn!(task = %id, "node in graph not present in store"),
                }
            }
        }

        let mut newly_blocked = Vec::new();
        for id in self.order.iter() {
            let Some(roots) = roots_of.remove(id) else {
                continue;
            };
            if let Some(exec) = self.records.get_mut(id) {
                if exec.status == TaskStatus::Pending {
                    debug!(task = %id, blocked_by = ?roots, "marking Blocked due to upstream failure");
                    exec.status = TaskStatus::Blocked;
                    newly_blocked.push(id.clone());
                }
                for root in roots {
                    if !exec.blocked_by.contains(&root) {
                        exec.blocked_by.push(root);
                    }
                }
            }
        }

        newly_blocked
    }
}
