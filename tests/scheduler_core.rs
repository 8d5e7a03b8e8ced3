// tests/scheduler_core.rs
//
// Drives the synchronous scheduler by hand, without a runtime.

use plandag_test_utils::builders::{PlanBuilder, TaskBuilder};
use plandag_test_utils::init_tracing;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use plandag::dag::{
    CompletionStep, DeadlockKind, Scheduler, SchedulerStep, StallResolution, TaskStatus, deadlock,
};
use plandag::engine::{RetryDecision, RetryPolicy, TaskOutcome};
use plandag::errors::PlandagError;
use plandag::exec::{WorkError, WorkErrorKind, WorkResult};
use plandag::plan::Plan;
use plandag::report::RunStatus;

type TestResult = Result<(), Box<dyn Error>>;

fn ok() -> TaskOutcome {
    TaskOutcome::Success(WorkResult::success(json!({})))
}

fn fail(msg: &str) -> TaskOutcome {
    TaskOutcome::Failed(WorkError::performer(msg))
}

fn launched(step: &SchedulerStep) -> Vec<&str> {
    step.launched.iter().map(|t| t.id()).collect()
}

fn scheduler(plan: Plan, max_parallel: usize) -> Result<Scheduler, PlandagError> {
    Scheduler::new(Arc::new(plan), max_parallel, RetryPolicy::default())
}

#[test]
fn root_runs_alone_then_dependents_launch_together() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &[])
        .task("b", &["a"])
        .task("c", &["a"])
        .build();
    let mut s = scheduler(plan, 2)?;
    let now = Instant::now();
    s.start(now);

    let step = s.step_schedule(now);
    assert_eq!(launched(&step), vec!["a"]);
    assert_eq!(s.status_of("b"), Some(TaskStatus::Pending));
    assert_eq!(s.status_of("c"), Some(TaskStatus::Pending));

    // Nothing else can start while A runs.
    let step = s.step_schedule(now);
    assert!(step.launched.is_empty());
    assert!(step.ready.is_empty());

    assert_eq!(s.handle_completion("a", ok(), now)?, CompletionStep::Completed);

    let step = s.step_schedule(now);
    assert_eq!(launched(&step), vec!["b", "c"]);
    assert_eq!(s.running_count(), 2);

    s.handle_completion("b", ok(), now)?;
    s.handle_completion("c", ok(), now)?;
    assert!(s.is_finished());
    assert_eq!(s.resolve_stall()?, StallResolution::Finished);

    s.finish(now);
    let report = s.report(RunStatus::Complete);
    assert_eq!(report.summary.completed, 3);
    assert_eq!(report.summary.success_rate, 1.0);
    assert_eq!(s.peak_running(), 2);
    Ok(())
}

#[test]
fn ready_set_is_ordered_by_priority_then_plan_order() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("x").priority(3).build())
        .with_task(TaskBuilder::new("y").priority(1).build())
        .with_task(TaskBuilder::new("z").priority(1).build())
        .build();
    let mut s = scheduler(plan, 1)?;
    let now = Instant::now();

    let step = s.step_schedule(now);
    assert_eq!(step.ready, vec!["y", "z", "x"]);
    assert_eq!(launched(&step), vec!["y"]);
    assert_eq!(step.deferred, vec!["z", "x"]);

    // Deferred tasks are not left in READY.
    assert_eq!(s.status_of("z"), Some(TaskStatus::Pending));
    assert_eq!(s.status_of("x"), Some(TaskStatus::Pending));

    s.handle_completion("y", ok(), now)?;
    let step = s.step_schedule(now);
    assert_eq!(launched(&step), vec!["z"]);
    Ok(())
}

#[test]
fn launches_never_exceed_max_parallel() -> TestResult {
    init_tracing();

    let mut builder = PlanBuilder::new();
    for i in 0..6 {
        builder = builder.task(&format!("t{i}"), &[]);
    }
    let mut s = scheduler(builder.build(), 2)?;
    let now = Instant::now();

    let step = s.step_schedule(now);
    assert_eq!(step.launched.len(), 2);
    assert_eq!(step.deferred.len(), 4);

    let step = s.step_schedule(now);
    assert!(step.launched.is_empty());
    assert_eq!(s.running_count(), 2);

    s.handle_completion("t0", ok(), now)?;
    let step = s.step_schedule(now);
    assert_eq!(launched(&step), vec!["t2"]);
    assert!(s.running_count() <= 2);
    Ok(())
}

#[test]
fn failure_retries_after_backoff_until_budget_is_spent() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("a").retry_budget(2).build())
        .build();
    let mut s = scheduler(plan, 1)?;
    let now = Instant::now();

    let step = s.step_schedule(now);
    assert_eq!(step.launched[0].attempt, 1);

    let res = s.handle_completion("a", fail("boom 1"), now)?;
    assert_eq!(
        res,
        CompletionStep::Retry {
            retry_attempts: 1,
            delay: Duration::from_secs(2),
        }
    );
    assert_eq!(s.status_of("a"), Some(TaskStatus::Retrying));

    // Backoff not elapsed yet: nothing to launch.
    assert!(s.step_schedule(now).launched.is_empty());
    assert_eq!(s.resolve_stall()?, StallResolution::NotStalled);

    s.handle_retry_due("a");
    let step = s.step_schedule(now);
    assert_eq!(step.launched[0].attempt, 2);

    let res = s.handle_completion("a", fail("boom 2"), now)?;
    assert_eq!(
        res,
        CompletionStep::Retry {
            retry_attempts: 2,
            delay: Duration::from_secs(4),
        }
    );

    s.handle_retry_due("a");
    assert_eq!(s.step_schedule(now).launched[0].attempt, 3);

    let res = s.handle_completion("a", fail("boom 3"), now)?;
    assert_eq!(res, CompletionStep::Failed);

    let exec = s.execution("a").ok_or("missing a")?;
    assert_eq!(exec.status, TaskStatus::Failed);
    assert_eq!(exec.retry_attempts, 2);
    assert_eq!(exec.attempts, 3);
    assert_eq!(exec.error.as_deref(), Some("boom 3"));
    assert_eq!(exec.error_kind, Some(WorkErrorKind::Performer));
    Ok(())
}

#[test]
fn zero_budget_failure_blocks_descendants_only() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("a").retry_budget(0).build())
        .task("b", &["a"])
        .task("c", &["b"])
        .task("d", &[])
        .build();
    let mut s = scheduler(plan, 2)?;
    let now = Instant::now();

    assert_eq!(launched(&s.step_schedule(now)), vec!["a", "d"]);
    assert_eq!(s.handle_completion("a", fail("nope"), now)?, CompletionStep::Failed);
    s.handle_completion("d", ok(), now)?;

    assert!(s.step_schedule(now).launched.is_empty());
    assert_eq!(
        s.resolve_stall()?,
        StallResolution::Blocked(vec!["b".to_string(), "c".to_string()])
    );
    assert!(s.is_finished());

    let b = s.execution("b").ok_or("missing b")?;
    assert_eq!(b.status, TaskStatus::Blocked);
    assert_eq!(b.blocked_by, vec!["a"]);
    let c = s.execution("c").ok_or("missing c")?;
    assert_eq!(c.blocked_by, vec!["a"]);
    assert_eq!(c.attempts, 0);

    let report = s.report(RunStatus::Complete);
    assert_eq!(report.summary.completed, 1);
    assert_eq!(report.summary.failed, 3);
    assert_eq!(report.summary.blocked, 2);
    assert_eq!(
        report.summary.completed + report.summary.failed,
        report.summary.total_tasks
    );
    assert_eq!(report.failed("a").map(|f| f.retry_attempts), Some(0));
    Ok(())
}

#[test]
fn cancelled_attempts_are_never_retried() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("a").retry_budget(3).build())
        .build();
    let mut s = scheduler(plan, 1)?;
    let now = Instant::now();
    s.step_schedule(now);

    let outcome = TaskOutcome::Failed(WorkError::new(WorkErrorKind::Cancelled, "stop"));
    assert_eq!(s.handle_completion("a", outcome, now)?, CompletionStep::Failed);
    assert_eq!(
        s.execution("a").and_then(|e| e.error_kind),
        Some(WorkErrorKind::Cancelled)
    );
    Ok(())
}

#[test]
fn outcome_for_idle_or_unknown_task_is_not_recorded() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new().task("a", &[]).build();
    let mut s = scheduler(plan, 1)?;
    let now = Instant::now();

    assert_eq!(s.handle_completion("a", ok(), now)?, CompletionStep::Ignored);
    assert_eq!(s.status_of("a"), Some(TaskStatus::Pending));

    let err = s.handle_completion("ghost", ok(), now).unwrap_err();
    assert!(matches!(err, PlandagError::TaskNotFound(id) if id == "ghost"));
    Ok(())
}

#[test]
fn zero_max_parallel_is_rejected() {
    let plan = PlanBuilder::new().task("a", &[]).build();
    let err = scheduler(plan, 0).unwrap_err();
    assert!(matches!(err, PlandagError::InvalidPlan(_)));
}

#[test]
fn cycle_is_reported_after_independent_work_finishes() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &["c"])
        .task("b", &["a"])
        .task("c", &["b"])
        .task("d", &[])
        .build();
    let mut s = scheduler(plan, 3)?;
    let now = Instant::now();

    assert_eq!(launched(&s.step_schedule(now)), vec!["d"]);
    // D still running: not a stall yet.
    assert_eq!(s.resolve_stall()?, StallResolution::NotStalled);

    s.handle_completion("d", ok(), now)?;
    assert!(s.step_schedule(now).launched.is_empty());

    let err = s.resolve_stall().unwrap_err();
    let dl = match err {
        PlandagError::Deadlock(dl) => dl,
        other => panic!("expected deadlock, got {other:?}"),
    };
    assert_eq!(dl.kind, DeadlockKind::Cycle);
    assert_eq!(dl.stuck, vec!["a", "b", "c"]);
    assert_eq!(s.status_of("d"), Some(TaskStatus::Completed));
    Ok(())
}

#[test]
fn dangling_dependency_is_an_unresolvable_deadlock() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("x", &["ghost"])
        .task("y", &["x"])
        .task("z", &[])
        .build_permissive();
    let mut s = scheduler(plan, 2)?;
    let now = Instant::now();

    assert_eq!(launched(&s.step_schedule(now)), vec!["z"]);
    s.handle_completion("z", ok(), now)?;
    s.step_schedule(now);

    let err = s.resolve_stall().unwrap_err();
    let dl = match err {
        PlandagError::Deadlock(dl) => dl,
        other => panic!("expected deadlock, got {other:?}"),
    };
    assert_eq!(dl.kind, DeadlockKind::Unresolvable);
    assert_eq!(dl.stuck, vec!["x", "y"]);
    assert_eq!(dl.missing, vec!["ghost"]);
    Ok(())
}

#[test]
fn detector_only_considers_pending_subgraph() {
    let plan = PlanBuilder::new()
        .task("a", &[])
        .task("b", &["a"])
        .task("c", &["b"])
        .build();

    // A finished: B and C remain and form a chain, not a cycle.
    let pending: Vec<_> = plan.tasks()[1..].to_vec();
    assert!(!deadlock::detect(&pending, &plan));

    let cyclic = PlanBuilder::new()
        .task("a", &["b"])
        .task("b", &["a"])
        .build();
    assert!(deadlock::detect(cyclic.tasks(), &cyclic));
    assert!(!deadlock::detect(&[], &cyclic));
}

#[test]
fn classify_maps_statuses_to_outcomes() {
    let res = WorkResult {
        status: "error".to_string(),
        output: json!({ "error": "bad input" }),
        metrics: json!(null),
    };
    assert_eq!(
        TaskOutcome::classify(Ok(res)),
        TaskOutcome::Failed(WorkError::performer("bad input"))
    );

    let res = WorkResult {
        status: "maybe".to_string(),
        output: json!({}),
        metrics: json!(null),
    };
    match TaskOutcome::classify(Ok(res)) {
        TaskOutcome::Failed(err) => {
            assert_eq!(err.kind, WorkErrorKind::UnexpectedOutcome);
            assert!(err.message.contains("maybe"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert!(TaskOutcome::classify(Ok(WorkResult::success(json!(1)))).is_success());
}

#[test]
fn backoff_grows_exponentially_and_respects_cap() {
    let policy = RetryPolicy {
        base: 2,
        unit: Duration::from_millis(100),
        max_backoff: None,
    };
    assert_eq!(policy.backoff(1), Duration::from_millis(200));
    assert_eq!(policy.backoff(2), Duration::from_millis(400));
    assert_eq!(policy.backoff(3), Duration::from_millis(800));

    let capped = RetryPolicy {
        max_backoff: Some(Duration::from_millis(300)),
        ..policy
    };
    assert_eq!(capped.backoff(2), Duration::from_millis(300));

    // Huge exponents saturate instead of overflowing.
    assert_eq!(capped.backoff(200), Duration::from_millis(300));

    assert_eq!(policy.decide(0, 0), RetryDecision::GiveUp);
    assert_eq!(
        policy.decide(1, 2),
        RetryDecision::Retry {
            retry_attempts: 2,
            delay: Duration::from_millis(400),
        }
    );
    assert_eq!(policy.decide(2, 2), RetryDecision::GiveUp);
}

#[test]
fn empty_plan_finishes_immediately_with_zero_success_rate() -> TestResult {
    let mut s = scheduler(PlanBuilder::new().build(), 1)?;
    let now = Instant::now();
    s.start(now);

    assert!(s.step_schedule(now).launched.is_empty());
    assert_eq!(s.resolve_stall()?, StallResolution::Finished);

    s.finish(now);
    let report = s.report(RunStatus::Complete);
    assert_eq!(report.summary.total_tasks, 0);
    assert_eq!(report.summary.success_rate, 0.0);
    assert_eq!(report.summary.time_efficiency, 0.0);
    Ok(())
}
