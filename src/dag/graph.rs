// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::plan::{Plan, TaskId};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies, including ids that name no task in the plan.
    deps: Vec<TaskId>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskId>,
}

/// In-memory adjacency for a plan, keyed by task id.
///
/// Unlike the plan itself this also keeps reverse edges, which the store
/// needs to find the failed ancestors of a blocked task.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<TaskId, DagNode>,
    order: Vec<TaskId>,
}

impl DagGraph {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut nodes: HashMap<TaskId, DagNode> = HashMap::new();

        for task in plan.tasks() {
            nodes.insert(
                task.id.clone(),
                DagNode {
                    deps: task.dependencies.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for task in plan.tasks() {
            for dep in task.dependencies.iter() {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(task.id.clone());
                }
            }
        }

        Self {
            nodes,
            order: plan.tasks().iter().map(|t| t.id.clone()).collect(),
        }
    }

    /// All task ids in plan order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Group tasks into dependency levels: level 0 has no dependencies,
    /// level N depends on something in level N-1.
    ///
    /// Returns `None` if the graph contains a cycle. Dangling dependencies are
    /// ignored. Used for dry-run output only.
    pub fn levels(&self) -> Option<Vec<Vec<TaskId>>> {
        let graph = self.to_graphmap();
        let sorted = toposort(&graph, None).ok()?;

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        for id in sorted.iter() {
            let level = self
                .dependencies_of(id)
                .iter()
                .filter_map(|dep| level_of.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(id, level);
        }

        let depth = level_of.values().copied().max().map_or(0, |m| m + 1);
        let mut levels = vec![Vec::new(); depth];
        // Plan order within a level keeps the output stable.
        for id in self.order.iter() {
            if let Some(&l) = level_of.get(id.as_str()) {
                levels[l].push(id.clone());
            }
        }
        Some(levels)
    }

    /// One task that sits on a dependency cycle, if any.
    pub fn cycle_member(&self) -> Option<TaskId> {
        let graph = self.to_graphmap();
        toposort(&graph, None)
            .err()
            .map(|cycle| cycle.node_id().to_string())
    }

    fn to_graphmap(&self) -> DiGraphMap<&str, ()> {
        // Edge direction: dep -> task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.order.iter() {
            graph.add_node(id.as_str());
        }
        for id in self.order.iter() {
            for dep in self.dependencies_of(id) {
                if self.contains(dep) {
                    graph.add_edge(dep.as_str(), id.as_str(), ());
                }
            }
        }
        graph
    }
}
