// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`graph`] holds the adjacency (dependencies and dependents) of a plan.
//! - [`execution`] defines the per-task execution record and status machine.
//! - [`store`] owns all execution records for one run.
//! - [`scheduler`] contains the synchronous core that decides which tasks
//!   launch, records outcomes and resolves stalls.
//! - [`scheduler_step`] defines the result types for scheduler steps.
//! - [`deadlock`] detects cycles and unsatisfiable dependencies.

pub mod deadlock;
pub mod execution;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod store;

pub use deadlock::{Deadlock, DeadlockKind};
pub use execution::{ScheduledTask, TaskExecution, TaskStatus};
pub use graph::DagGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::{CompletionStep, SchedulerStep, StallResolution};
pub use store::ExecutionStore;
