use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use plandag::exec::{
    STATUS_SUCCESS, WorkError, WorkErrorKind, WorkFuture, WorkPerformer, WorkResult,
};
use plandag::plan::Task;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a scripted task does when invoked.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    /// Fail the first `n` attempts, then succeed.
    FailTimes(u32),
    AlwaysFail,
    /// Return `Ok` with this (non-standard) status string.
    Status(String),
    Panic,
}

/// One finished performer invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task: String,
    /// 1-based attempt number for this task.
    pub attempt: u32,
    pub started: Instant,
    pub finished: Instant,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct Record {
    attempts: HashMap<String, u32>,
    start_order: Vec<String>,
    invocations: Vec<Invocation>,
}

/// A fake performer that:
/// - follows a per-task script (succeed, fail N times, always fail, ...)
/// - optionally sleeps per task, honouring cancellation while it does
/// - records every invocation and the peak number running at once.
#[derive(Debug, Default)]
pub struct ScriptedPerformer {
    behaviours: HashMap<String, Behaviour>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    record: Mutex<Record>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct RunningGuard<'a> {
    running: &'a AtomicUsize,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { running }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedPerformer {
    /// Every task succeeds immediately unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_string(), delay);
        self
    }

    pub fn with_behaviour(mut self, task: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(task.to_string(), behaviour);
        self
    }

    pub fn fail_times(self, task: &str, n: u32) -> Self {
        self.with_behaviour(task, Behaviour::FailTimes(n))
    }

    pub fn always_fail(self, task: &str) -> Self {
        self.with_behaviour(task, Behaviour::AlwaysFail)
    }

    /// Number of times `task` was invoked (including ones still running).
    pub fn calls(&self, task: &str) -> u32 {
        let record = self.record.lock().unwrap();
        record.attempts.get(task).copied().unwrap_or(0)
    }

    /// Task ids in the order their invocations started.
    pub fn start_order(&self) -> Vec<String> {
        self.record.lock().unwrap().start_order.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.record.lock().unwrap().invocations.clone()
    }

    pub fn invocations_of(&self, task: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.task == task)
            .collect()
    }

    /// Highest number of invocations in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn begin(&self, task: &str) -> u32 {
        let mut record = self.record.lock().unwrap();
        let attempt = {
            let n = record.attempts.entry(task.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        record.start_order.push(task.to_string());
        attempt
    }

    fn finish(&self, invocation: Invocation) {
        self.record.lock().unwrap().invocations.push(invocation);
    }

    fn outcome(&self, task: &Task, attempt: u32) -> Result<WorkResult, WorkError> {
        let behaviour = self
            .behaviours
            .get(&task.id)
            .cloned()
            .unwrap_or(Behaviour::Succeed);

        match behaviour {
            Behaviour::Succeed => Ok(WorkResult::success(json!({ "task": task.id }))),
            Behaviour::FailTimes(n) if attempt <= n => Err(WorkError::performer(format!(
                "scripted failure {attempt}/{n}"
            ))),
            Behaviour::FailTimes(_) => Ok(WorkResult::success(json!({ "task": task.id }))),
            Behaviour::AlwaysFail => Err(WorkError::performer("scripted permanent failure")),
            Behaviour::Status(status) => Ok(WorkResult {
                status,
                output: json!({}),
                metrics: json!({}),
            }),
            Behaviour::Panic => panic!("scripted panic in task {}", task.id),
        }
    }
}

impl WorkPerformer for ScriptedPerformer {
    fn execute<'a>(&'a self, task: &'a Task, cancel: CancellationToken) -> WorkFuture<'a> {
        Box::pin(async move {
            let attempt = self.begin(&task.id);
            let _guard = RunningGuard::enter(&self.running, &self.peak);
            let started = Instant::now();

            let delay = self
                .delays
                .get(&task.id)
                .copied()
                .unwrap_or(self.default_delay);

            let cancelled = if delay.is_zero() {
                tokio::task::yield_now().await;
                false
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = cancel.cancelled() => true,
                }
            };

            let outcome = if cancelled {
                Err(WorkError::new(WorkErrorKind::Cancelled, "cancelled during delay"))
            } else {
                self.outcome(task, attempt)
            };

            self.finish(Invocation {
                task: task.id.clone(),
                attempt,
                started,
                finished: Instant::now(),
                succeeded: matches!(&outcome, Ok(r) if r.status == STATUS_SUCCESS),
            });

            outcome
        })
    }
}
