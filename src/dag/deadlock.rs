// src/dag/deadlock.rs

//! Deadlock detection over the not-yet-terminal part of a plan.
//!
//! Only invoked when the control loop has nothing ready and nothing in
//! flight. Recomputed from scratch on every call; there is no incremental
//! state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::plan::{Plan, Task, TaskId};

/// Why the stuck tasks can never become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlockKind {
    /// The pending subgraph contains a dependency cycle.
    Cycle,
    /// Some pending task depends on an id that names no task in the plan.
    Unresolvable,
}

impl fmt::Display for DeadlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlockKind::Cycle => f.write_str("dependency cycle"),
            DeadlockKind::Unresolvable => f.write_str("unknown dependency"),
        }
    }
}

/// Fatal scheduling failure naming the tasks that can never run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deadlock ({kind}): tasks [{}] can never become ready", .stuck.join(", "))]
pub struct Deadlock {
    pub kind: DeadlockKind,
    /// Stuck task ids, in plan order.
    pub stuck: Vec<TaskId>,
    /// Dependency ids that name no task (only for `Unresolvable`).
    pub missing: Vec<TaskId>,
}

/// `true` if the pending tasks can never all complete.
pub fn detect(pending: &[Arc<Task>], plan: &Plan) -> bool {
    find(pending, plan).is_some()
}

/// Look for a deadlock among `pending` (non-terminal tasks, plan order).
///
/// Dangling references are checked first and reported as
/// [`DeadlockKind::Unresolvable`]; the stuck set is the tasks holding them
/// plus their pending descendants. Otherwise Kahn's algorithm runs over the
/// pending subgraph, counting only edges between pending tasks; whatever
/// cannot be removed is reported as [`DeadlockKind::Cycle`].
pub fn find(pending: &[Arc<Task>], plan: &Plan) -> Option<Deadlock> {
    if pending.is_empty() {
        return None;
    }

    let pending_ids: HashSet<&str> = pending.iter().map(|t| t.id.as_str()).collect();

    // Reverse edges inside the pending subgraph.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in pending.iter() {
        for dep in task.dependencies.iter() {
            if pending_ids.contains(dep.as_str()) {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }
    }

    if let Some(deadlock) = find_unresolvable(pending, plan, &dependents) {
        return Some(deadlock);
    }

    let mut in_degree: HashMap<&str, usize> = pending
        .iter()
        .map(|t| {
            let degree = t
                .dependencies
                .iter()
                .filter(|d| pending_ids.contains(d.as_str()))
                .count();
            (t.id.as_str(), degree)
        })
        .collect();

    let mut queue: VecDeque<&str> = pending
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut removed = 0usize;
    while let Some(id) = queue.pop_front() {
        removed += 1;
        for &next in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if removed == pending.len() {
        return None;
    }

    let stuck = pending
        .iter()
        .filter(|t| in_degree.get(t.id.as_str()).is_some_and(|d| *d > 0))
        .map(|t| t.id.clone())
        .collect();

    Some(Deadlock {
        kind: DeadlockKind::Cycle,
        stuck,
        missing: Vec::new(),
    })
}

fn find_unresolvable(
    pending: &[Arc<Task>],
    plan: &Plan,
    dependents: &HashMap<&str, Vec<&str>>,
) -> Option<Deadlock> {
    let mut missing: Vec<TaskId> = Vec::new();
    let mut stuck: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    for task in pending.iter() {
        for dep in task.dependencies.iter() {
            if !plan.contains(dep) {
                if !missing.contains(dep) {
                    missing.push(dep.clone());
                }
                stack.push(task.id.as_str());
            }
        }
    }

    if missing.is_empty() {
        return None;
    }

    while let Some(id) = stack.pop() {
        if stuck.insert(id) {
            stack.extend(dependents.get(id).into_iter().flatten().copied());
        }
    }

    Some(Deadlock {
        kind: DeadlockKind::Unresolvable,
        stuck: pending
            .iter()
            .filter(|t| stuck.contains(t.id.as_str()))
            .map(|t| t.id.clone())
            .collect(),
        missing,
    })
}
