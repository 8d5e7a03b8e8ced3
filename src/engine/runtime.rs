// src/engine/runtime.rs

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{CompletionStep, ScheduledTask, Scheduler, StallResolution};
use crate::errors::{PlandagError, Result};
use crate::exec::{WorkError, WorkErrorKind, WorkPerformer};
use crate::plan::{Plan, TaskId};
use crate::report::{ExecutionReport, RunStatus};

use super::retry::RetryPolicy;
use super::{RuntimeEvent, TaskOutcome};

/// What a spawned future in the in-flight set stands for.
#[derive(Debug, Clone)]
enum Flight {
    Attempt(TaskId),
    Backoff(TaskId),
}

/// Drives the pure [`Scheduler`] to completion.
///
/// This is the async IO shell: it launches performer invocations and backoff
/// timers on a `JoinSet`, waits for whichever finishes first, and feeds the
/// resulting [`RuntimeEvent`] back into the scheduler. The scheduler (and its
/// execution store) is only ever touched from this loop.
pub struct Runtime<P: WorkPerformer + 'static> {
    scheduler: Scheduler,
    performer: Arc<P>,
    cancel: CancellationToken,
}

impl<P: WorkPerformer + 'static> fmt::Debug for Runtime<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<P: WorkPerformer + 'static> Runtime<P> {
    pub fn new(scheduler: Scheduler, performer: Arc<P>) -> Self {
        Self {
            scheduler,
            performer,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Main control loop.
    ///
    /// - Launches every task the scheduler makes ready.
    /// - Suspends until an attempt or a backoff finishes (or the run is
    ///   cancelled).
    /// - When nothing is in flight, asks the scheduler to resolve the stall:
    ///   finished, blocked, or deadlocked.
    ///
    /// A deadlock aborts the run with [`PlandagError::Deadlock`]. Cancellation
    /// stops new launches, waits for in-flight work to wind down and returns a
    /// partial report.
    pub async fn run(mut self) -> Result<ExecutionReport> {
        let mut inflight: JoinSet<RuntimeEvent> = JoinSet::new();
        let mut flights: HashMap<task::Id, Flight> = HashMap::new();
        let mut cancelled = false;

        self.scheduler.start(Instant::now());

        let status = loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                info!("run cancelled; no new tasks will launch, waiting for in-flight work");
            }
            if !cancelled {
                let step = self.scheduler.step_schedule(Instant::now());
                if !step.deferred.is_empty() {
                    debug!(deferred = ?step.deferred, "ready tasks waiting for a slot");
                }
                for scheduled in step.launched {
                    self.spawn_attempt(&mut inflight, &mut flights, scheduled);
                }
            }

            if inflight.is_empty() {
                if cancelled {
                    break RunStatus::Partial;
                }
                match self.scheduler.resolve_stall() {
                    Ok(StallResolution::Finished) => break RunStatus::Complete,
                    Ok(StallResolution::Blocked(blocked)) => {
                        debug!(?blocked, "run finished with blocked tasks");
                        break RunStatus::Complete;
                    }
                    Ok(StallResolution::NotStalled) => {
                        return Err(PlandagError::Other(anyhow::anyhow!(
                            "control loop has nothing in flight but the scheduler is not stalled"
                        )));
                    }
                    Err(err) => {
                        self.scheduler.finish(Instant::now());
                        return Err(err);
                    }
                }
            }

            let joined = tokio::select! {
                joined = inflight.join_next_with_id() => joined,
                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!("run cancelled; no new tasks will launch, waiting for in-flight work");
                    continue;
                }
            };

            match joined {
                Some(Ok((id, event))) => {
                    flights.remove(&id);
                    self.handle_event(event, &mut inflight, &mut flights)?;
                }
                Some(Err(join_err)) => {
                    let Some(flight) = flights.remove(&join_err.id()) else {
                        warn!(error = %join_err, "unknown in-flight future failed; ignoring");
                        continue;
                    };
                    let event = event_for_join_error(flight, join_err);
                    self.handle_event(event, &mut inflight, &mut flights)?;
                }
                None => {}
            }
        };

        self.scheduler.finish(Instant::now());
        let report = self.scheduler.report(status);

        info!(
            ?status,
            completed = report.summary.completed,
            failed = report.summary.failed,
            blocked = report.summary.blocked,
            peak_running = self.scheduler.peak_running(),
            total_time_sec = report.summary.total_time_sec,
            "run finished"
        );

        Ok(report)
    }

    fn handle_event(
        &mut self,
        event: RuntimeEvent,
        inflight: &mut JoinSet<RuntimeEvent>,
        flights: &mut HashMap<task::Id, Flight>,
    ) -> Result<()> {
        match event {
            RuntimeEvent::TaskFinished { task, outcome } => {
                let step = self
                    .scheduler
                    .handle_completion(&task, outcome, Instant::now())?;
                if let CompletionStep::Retry { delay, .. } = step {
                    self.spawn_backoff(inflight, flights, task, delay);
                }
            }
            RuntimeEvent::RetryDue { task } => {
                self.scheduler.handle_retry_due(&task);
            }
            RuntimeEvent::RetryAbandoned { task } => {
                debug!(task = %task, "backoff abandoned on cancellation");
            }
        }
        Ok(())
    }

    fn spawn_attempt(
        &self,
        inflight: &mut JoinSet<RuntimeEvent>,
        flights: &mut HashMap<task::Id, Flight>,
        scheduled: ScheduledTask,
    ) {
        let performer = Arc::clone(&self.performer);
        let token = self.cancel.child_token();
        let task = scheduled.task;
        let id = task.id.clone();

        debug!(task = %id, attempt = scheduled.attempt, "invoking performer");

        let handle = inflight.spawn(async move {
            let result = performer.execute(&task, token).await;
            RuntimeEvent::TaskFinished {
                task: task.id.clone(),
                outcome: TaskOutcome::classify(result),
            }
        });
        flights.insert(handle.id(), Flight::Attempt(id));
    }

    fn spawn_backoff(
        &self,
        inflight: &mut JoinSet<RuntimeEvent>,
        flights: &mut HashMap<task::Id, Flight>,
        task: TaskId,
        delay: Duration,
    ) {
        let token = self.cancel.child_token();
        let owned = task.clone();

        let handle = inflight.spawn(async move {
            let elapsed = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = token.cancelled() => false,
            };
            if elapsed {
                RuntimeEvent::RetryDue { task: owned }
            } else {
                RuntimeEvent::RetryAbandoned { task: owned }
            }
        });
        flights.insert(handle.id(), Flight::Backoff(task));
    }
}

/// Turn a panicked or aborted in-flight future into the event it would have
/// produced.
fn event_for_join_error(flight: Flight, err: JoinError) -> RuntimeEvent {
    match flight {
        Flight::Attempt(task) => {
            let error = if err.is_panic() {
                let message = panic_message(err.into_panic());
                warn!(task = %task, %message, "performer panicked");
                WorkError::new(WorkErrorKind::Panicked, message)
            } else {
                WorkError::new(WorkErrorKind::Cancelled, "invocation aborted")
            };
            RuntimeEvent::TaskFinished {
                task,
                outcome: TaskOutcome::Failed(error),
            }
        }
        Flight::Backoff(task) => {
            warn!(task = %task, error = %err, "backoff timer failed; retrying now");
            RuntimeEvent::RetryDue { task }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "performer panicked".to_string()
    }
}

/// Run a plan to completion with the given performer.
///
/// `max_parallel` overrides the plan's own `scheduler.max_parallel` when set;
/// the backoff policy comes from the plan.
pub async fn run_plan<P: WorkPerformer + 'static>(
    plan: Arc<Plan>,
    max_parallel: Option<usize>,
    performer: Arc<P>,
) -> Result<ExecutionReport> {
    let retry = RetryPolicy::from_section(plan.scheduler());
    let max_parallel = max_parallel.unwrap_or(plan.scheduler().max_parallel);
    let scheduler = Scheduler::new(plan, max_parallel, retry)?;
    Runtime::new(scheduler, performer).run().await
}
