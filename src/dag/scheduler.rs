use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dag::deadlock::{self, Deadlock, DeadlockKind};
use crate::dag::execution::{ScheduledTask, TaskExecution, TaskStatus};
use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::{CompletionStep, SchedulerStep, StallResolution};
use crate::dag::store::ExecutionStore;
use crate::engine::{RetryDecision, RetryPolicy, TaskOutcome};
use crate::errors::{PlandagError, Result};
use crate::exec::WorkErrorKind;
use crate::plan::{Plan, TaskId};
use crate::report::{self, ExecutionReport, RunStatus};

/// Scheduler holds the immutable plan plus the mutable execution store.
///
/// It is responsible for:
/// - computing the ready set and launching up to `max_parallel` tasks
/// - recording performer outcomes and applying the retry policy
/// - resolving a stalled run into "blocked" or a deadlock
/// - building the final report
///
/// It is synchronous and performs no IO; the caller passes the current
/// instant in, so it can be stepped by hand in tests.
#[derive(Debug)]
pub struct Scheduler {
    plan: Arc<Plan>,
    graph: DagGraph,
    store: ExecutionStore,
    max_parallel: usize,
    retry: RetryPolicy,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    peak_running: usize,
}

impl Scheduler {
    pub fn new(plan: Arc<Plan>, max_parallel: usize, retry: RetryPolicy) -> Result<Self> {
        if max_parallel == 0 {
            return Err(PlandagError::InvalidPlan(
                "max_parallel must be >= 1 (got 0)".to_string(),
            ));
        }

        let graph = DagGraph::from_plan(&plan);
        let store = ExecutionStore::new(&plan);

        Ok(Self {
            plan,
            graph,
            store,
            max_parallel,
            retry,
            started_at: None,
            finished_at: None,
            peak_running: 0,
        })
    }

    /// Construct a scheduler using the plan's own `scheduler` section.
    pub fn from_plan(plan: Arc<Plan>) -> Result<Self> {
        let section = plan.scheduler().clone();
        Self::new(plan, section.max_parallel, RetryPolicy::from_section(&section))
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    pub fn execution(&self, id: &str) -> Option<&TaskExecution> {
        self.store.get(id)
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.store.get(id).map(|e| e.status)
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn running_count(&self) -> usize {
        self.store.running_count()
    }

    /// Highest number of simultaneously running tasks seen so far.
    pub fn peak_running(&self) -> usize {
        self.peak_running
    }

    /// Whether every task has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.store.all_terminal()
    }

    /// Whether anything is running or waiting out a backoff.
    pub fn has_in_flight(&self) -> bool {
        self.store.in_flight_count() > 0
    }

    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            info!(
                tasks = self.plan.len(),
                max_parallel = self.max_parallel,
                "scheduler: starting run"
            );
            self.started_at = Some(now);
        }
    }

    pub fn finish(&mut self, now: Instant) {
        if self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
    }

    /// One scheduling pass.
    ///
    /// Computes the ready set, orders it by priority (ties by plan order),
    /// and launches as many tasks as there are free slots. Ready tasks that
    /// do not get a slot drop back to their previous status and are
    /// re-evaluated on the next pass.
    pub fn step_schedule(&mut self, now: Instant) -> SchedulerStep {
        let mut ready = self.store.ready_candidates();
        // Candidates arrive in plan order; a stable sort keeps it for ties.
        ready.sort_by_key(|id| self.plan.task(id).map_or(u8::MAX, |t| t.priority));

        for id in ready.iter() {
            if let Some(exec) = self.store.get_mut(id) {
                exec.status = TaskStatus::Ready;
            }
        }

        let slots = self.max_parallel.saturating_sub(self.store.running_count());
        let split = slots.min(ready.len());
        let (to_launch, to_defer) = ready.split_at(split);

        let mut launched = Vec::with_capacity(to_launch.len());
        for id in to_launch {
            if let Some(exec) = self.store.get_mut(id) {
                exec.status = TaskStatus::Running;
                exec.start_time = Some(now);
                exec.end_time = None;
                exec.attempts += 1;
                exec.retry_due = false;

                if exec.attempts > 1 {
                    info!(task = %id, attempt = exec.attempts, "relaunching task after backoff");
                } else {
                    info!(task = %id, priority = exec.task.priority, "launching task");
                }

                launched.push(ScheduledTask {
                    task: Arc::clone(&exec.task),
                    attempt: exec.attempts,
                });
            }
        }

        for id in to_defer {
            if let Some(exec) = self.store.get_mut(id) {
                exec.status = if exec.retry_attempts > 0 {
                    TaskStatus::Retrying
                } else {
                    TaskStatus::Pending
                };
                debug!(task = %id, "ready but no free slot; deferring");
            }
        }

        self.peak_running = self.peak_running.max(self.store.running_count());

        SchedulerStep {
            ready: ready.clone(),
            launched,
            deferred: to_defer.to_vec(),
        }
    }

    /// Record the outcome of a performer invocation.
    ///
    /// Failures consult the retry policy: while budget remains the task goes
    /// to `Retrying` and the caller must schedule a [`Self::handle_retry_due`]
    /// after the returned delay. Cancelled invocations never retry.
    pub fn handle_completion(
        &mut self,
        id: &str,
        outcome: TaskOutcome,
        now: Instant,
    ) -> Result<CompletionStep> {
        let retry = self.retry;
        let exec = self
            .store
            .get_mut(id)
            .ok_or_else(|| PlandagError::TaskNotFound(id.to_string()))?;

        if exec.status != TaskStatus::Running {
            warn!(task = %id, status = %exec.status, "outcome for a task that is not running; ignoring");
            return Ok(CompletionStep::Ignored);
        }

        match outcome {
            TaskOutcome::Success(result) => {
                exec.status = TaskStatus::Completed;
                exec.end_time = Some(now);
                exec.result = Some(result);
                exec.error = None;
                exec.error_kind = None;
                info!(
                    task = %id,
                    duration_ms = exec.duration().map(|d| d.as_millis() as u64),
                    retry_attempts = exec.retry_attempts,
                    "task completed"
                );
                Ok(CompletionStep::Completed)
            }
            TaskOutcome::Failed(err) => {
                exec.error = Some(err.message.clone());
                exec.error_kind = Some(err.kind);

                let decision = if err.kind == WorkErrorKind::Cancelled {
                    RetryDecision::GiveUp
                } else {
                    retry.decide(exec.retry_attempts, exec.task.retry_budget)
                };

                match decision {
                    RetryDecision::Retry {
                        retry_attempts,
                        delay,
                    } => {
                        exec.retry_attempts = retry_attempts;
                        exec.status = TaskStatus::Retrying;
                        exec.retry_due = false;
                        warn!(
                            task = %id,
                            error = %err,
                            retry_attempts,
                            retry_budget = exec.task.retry_budget,
                            delay_ms = delay.as_millis() as u64,
                            "task failed; retrying after backoff"
                        );
                        Ok(CompletionStep::Retry {
                            retry_attempts,
                            delay,
                        })
                    }
                    RetryDecision::GiveUp => {
                        exec.status = TaskStatus::Failed;
                        exec.end_time = Some(now);
                        error!(
                            task = %id,
                            error = %err,
                            retry_attempts = exec.retry_attempts,
                            "task failed permanently"
                        );
                        Ok(CompletionStep::Failed)
                    }
                }
            }
        }
    }

    /// A backoff elapsed: make the retrying task eligible again.
    pub fn handle_retry_due(&mut self, id: &str) {
        match self.store.get_mut(id) {
            Some(exec) if exec.status == TaskStatus::Retrying => {
                debug!(task = %id, "backoff elapsed; task re-queued");
                exec.retry_due = true;
            }
            Some(exec) => {
                debug!(task = %id, status = %exec.status, "stale retry timer; ignoring");
            }
            None => warn!(task = %id, "retry timer for unknown task; ignoring"),
        }
    }

    /// Decide what a run with nothing ready and nothing in flight means.
    ///
    /// - all tasks terminal → `Finished`
    /// - a cycle or dangling reference among the pending tasks → `Err(Deadlock)`
    /// - otherwise every pending task has a failed ancestor → those become
    ///   `Blocked` and the run is finished
    pub fn resolve_stall(&mut self) -> Result<StallResolution> {
        if self.store.all_terminal() {
            return Ok(StallResolution::Finished);
        }
        if self.has_in_flight() || !self.store.ready_candidates().is_empty() {
            return Ok(StallResolution::NotStalled);
        }

        let pending = self.store.non_terminal_tasks();
        if let Some(deadlock) = deadlock::find(&pending, &self.plan) {
            error!(
                kind = %deadlock.kind,
                stuck = ?deadlock.stuck,
                missing = ?deadlock.missing,
                "deadlock detected; aborting run"
            );
            return Err(deadlock.into());
        }

        let blocked = self.store.mark_blocked_descendants(&self.graph);
        if !blocked.is_empty() {
            warn!(blocked = ?blocked, "no further progress possible; dependents of failed tasks are blocked");
        }

        if !self.store.all_terminal() {
            // Nothing ready, nothing in flight, no cycle and no failed
            // ancestor: report what is left rather than spin.
            let stuck: Vec<TaskId> = self
                .store
                .non_terminal_tasks()
                .iter()
                .map(|t| t.id.clone())
                .collect();
            return Err(Deadlock {
                kind: DeadlockKind::Unresolvable,
                stuck,
                missing: Vec::new(),
            }
            .into());
        }

        Ok(StallResolution::Blocked(blocked))
    }

    /// Build the report from the current store.
    pub fn report(&self, status: RunStatus) -> ExecutionReport {
        let total_time = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => std::time::Duration::ZERO,
        };
        report::aggregate(&self.store, &self.plan, self.started_at, total_time, status)
    }
}
