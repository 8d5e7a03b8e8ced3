// tests/runtime_scenarios.rs
//
// End-to-end runs through the async runtime with a scripted performer.
// Timing-sensitive tests pause the clock so backoffs and delays are exact.

use plandag_test_utils::builders::{PlanBuilder, TaskBuilder};
use plandag_test_utils::fake_performer::{Behaviour, Invocation, ScriptedPerformer};
use plandag_test_utils::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use plandag::dag::{DeadlockKind, Scheduler, TaskStatus};
use plandag::engine::{Runtime, run_plan};
use plandag::errors::PlandagError;
use plandag::exec::WorkErrorKind;
use plandag::report::RunStatus;
use plandag::{EXIT_FAILED, EXIT_OK, exit_code};

type TestResult = Result<(), Box<dyn Error>>;

fn only(invocations: Vec<Invocation>) -> Result<Invocation, Box<dyn Error>> {
    match invocations.as_slice() {
        [one] => Ok(one.clone()),
        other => Err(format!("expected exactly one invocation, got {}", other.len()).into()),
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_fan_out_after_root() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &[])
        .task("b", &["a"])
        .task("c", &["a"])
        .build_arc();
    let performer =
        Arc::new(ScriptedPerformer::new().with_default_delay(Duration::from_millis(100)));

    let report = with_timeout(run_plan(plan, Some(2), Arc::clone(&performer))).await?;

    assert_eq!(performer.start_order()[0], "a");
    let a = only(performer.invocations_of("a"))?;
    let b = only(performer.invocations_of("b"))?;
    let c = only(performer.invocations_of("c"))?;

    // A runs alone; B and C start once A is done and overlap.
    assert!(b.started >= a.finished);
    assert!(c.started >= a.finished);
    assert!(b.started < c.finished && c.started < b.finished);
    assert_eq!(performer.peak_concurrency(), 2);

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.summary.completed, 3);
    assert_eq!(report.summary.success_rate, 1.0);
    assert_eq!(exit_code(&report), EXIT_OK);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scenario_retry_with_exponential_backoff() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("a").retry_budget(2).build())
        .retry_base(2)
        .retry_unit_ms(1000)
        .build_arc();
    let performer = Arc::new(ScriptedPerformer::new().fail_times("a", 2));

    let report = with_timeout(run_plan(plan, None, Arc::clone(&performer))).await?;

    let completed = report.completed("a").ok_or("a not completed")?;
    assert_eq!(completed.retry_attempts, 2);
    assert_eq!(performer.calls("a"), 3);

    let attempts = performer.invocations_of("a");
    assert_eq!(attempts.len(), 3);
    assert!(!attempts[0].succeeded && !attempts[1].succeeded && attempts[2].succeeded);

    // Delays are minimums: base^1 and base^2 units.
    let first_gap = attempts[1].started - attempts[0].finished;
    let second_gap = attempts[2].started - attempts[1].finished;
    assert!(first_gap >= Duration::from_secs(2), "first gap {first_gap:?}");
    assert!(second_gap >= Duration::from_secs(4), "second gap {second_gap:?}");
    Ok(())
}

#[tokio::test]
async fn scenario_failed_root_blocks_dependent_and_run_terminates() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("a").retry_budget(0).build())
        .task("b", &["a"])
        .build_arc();
    let performer = Arc::new(ScriptedPerformer::new().always_fail("a"));

    let report = with_timeout(run_plan(plan, None, Arc::clone(&performer))).await?;

    let a = report.failed("a").ok_or("a not failed")?;
    assert_eq!(a.retry_attempts, 0);
    assert_eq!(a.error_kind, Some(WorkErrorKind::Performer));
    assert_eq!(performer.calls("a"), 1);
    assert_eq!(performer.calls("b"), 0);

    assert_eq!(report.blocked_tasks.len(), 1);
    assert_eq!(report.blocked_tasks[0].id, "b");
    assert_eq!(report.blocked_tasks[0].blocked_by, vec!["a"]);

    assert_eq!(report.summary.completed, 0);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.blocked, 1);
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(exit_code(&report), EXIT_FAILED);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_branch_does_not_stop_unrelated_branch() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("a").retry_budget(1).build())
        .task("b", &["a"])
        .task("c", &[])
        .task("d", &["c"])
        .retry_unit_ms(10)
        .build_arc();
    let performer = Arc::new(
        ScriptedPerformer::new()
            .always_fail("a")
            .with_delay("c", Duration::from_millis(50)),
    );

    let report = with_timeout(run_plan(plan, None, Arc::clone(&performer))).await?;

    assert_eq!(report.completed_ids(), vec!["c", "d"]);
    assert_eq!(report.failed("a").map(|f| f.retry_attempts), Some(1));
    assert_eq!(performer.calls("a"), 2);
    assert_eq!(performer.calls("b"), 0);
    assert_eq!(
        report.summary.completed + report.summary.failed,
        report.summary.total_tasks
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dependencies_finish_before_dependents_start() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &[])
        .task("b", &["a"])
        .task("c", &["a"])
        .task("d", &["b", "c"])
        .task("e", &["d"])
        .task("f", &[])
        .build_arc();
    let performer = Arc::new(
        ScriptedPerformer::new()
            .with_delay("a", Duration::from_millis(30))
            .with_delay("b", Duration::from_millis(200))
            .with_delay("c", Duration::from_millis(10))
            .with_delay("d", Duration::from_millis(20))
            .with_delay("f", Duration::from_millis(500)),
    );

    let report = with_timeout(run_plan(Arc::clone(&plan), Some(4), Arc::clone(&performer))).await?;
    assert!(report.all_completed());

    for task in plan.tasks() {
        let this = only(performer.invocations_of(&task.id))?;
        for dep in task.dependencies.iter() {
            let dep_run = only(performer.invocations_of(dep))?;
            assert!(
                this.started >= dep_run.finished,
                "{} started before {} finished",
                task.id,
                dep
            );
        }
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn running_tasks_never_exceed_max_parallel() -> TestResult {
    init_tracing();

    let mut builder = PlanBuilder::new().max_parallel(3);
    for i in 0..8 {
        builder = builder.task(&format!("t{i}"), &[]);
    }
    let performer =
        Arc::new(ScriptedPerformer::new().with_default_delay(Duration::from_millis(100)));

    let report = with_timeout(run_plan(builder.build_arc(), None, Arc::clone(&performer))).await?;

    assert_eq!(report.summary.completed, 8);
    assert_eq!(performer.peak_concurrency(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cli_override_of_max_parallel_wins() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .max_parallel(4)
        .task("a", &[])
        .task("b", &[])
        .task("c", &[])
        .build_arc();
    let performer =
        Arc::new(ScriptedPerformer::new().with_default_delay(Duration::from_millis(10)));

    with_timeout(run_plan(plan, Some(1), Arc::clone(&performer))).await?;

    assert_eq!(performer.peak_concurrency(), 1);
    assert_eq!(performer.start_order(), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn priority_decides_launch_order_when_slots_are_scarce() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("low").priority(5).build())
        .with_task(TaskBuilder::new("mid").priority(3).build())
        .with_task(TaskBuilder::new("high").priority(1).build())
        .build_arc();
    let performer =
        Arc::new(ScriptedPerformer::new().with_default_delay(Duration::from_millis(10)));

    with_timeout(run_plan(plan, Some(1), Arc::clone(&performer))).await?;

    assert_eq!(performer.start_order(), vec!["high", "mid", "low"]);
    Ok(())
}

#[tokio::test]
async fn cycle_deadlocks_after_independent_task_completes() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &["c"])
        .task("b", &["a"])
        .task("c", &["b"])
        .task("d", &[])
        .build_arc();
    let performer = Arc::new(ScriptedPerformer::new());

    let err = with_timeout(run_plan(plan, None, Arc::clone(&performer)))
        .await
        .unwrap_err();

    let dl = match err {
        PlandagError::Deadlock(dl) => dl,
        other => return Err(format!("expected deadlock, got {other}").into()),
    };
    assert_eq!(dl.kind, DeadlockKind::Cycle);
    assert_eq!(dl.stuck, vec!["a", "b", "c"]);

    let d = only(performer.invocations_of("d"))?;
    assert!(d.succeeded);
    assert_eq!(performer.calls("a"), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_dependency_deadlocks_as_unresolvable() -> TestResult {
    init_tracing();

    let plan = Arc::new(
        PlanBuilder::new()
            .task("x", &["ghost"])
            .task("y", &["x"])
            .task("z", &[])
            .build_permissive(),
    );
    let performer = Arc::new(ScriptedPerformer::new());

    let err = with_timeout(run_plan(plan, None, Arc::clone(&performer)))
        .await
        .unwrap_err();

    assert!(err.is_deadlock());
    let dl = match err {
        PlandagError::Deadlock(dl) => dl,
        other => return Err(format!("expected deadlock, got {other}").into()),
    };
    assert_eq!(dl.kind, DeadlockKind::Unresolvable);
    assert_eq!(dl.missing, vec!["ghost"]);
    assert_eq!(dl.stuck, vec!["x", "y"]);
    assert_eq!(performer.calls("z"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn panicking_performer_fails_task_with_panicked_kind() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("boom").retry_budget(1).build())
        .task("ok", &[])
        .retry_unit_ms(10)
        .build_arc();
    let performer = Arc::new(ScriptedPerformer::new().with_behaviour("boom", Behaviour::Panic));

    let report = with_timeout(run_plan(plan, None, Arc::clone(&performer))).await?;

    let failed = report.failed("boom").ok_or("boom not failed")?;
    assert_eq!(failed.error_kind, Some(WorkErrorKind::Panicked));
    assert!(failed.error.contains("scripted panic"));
    assert_eq!(failed.retry_attempts, 1);
    assert_eq!(performer.calls("boom"), 2);
    assert!(report.completed("ok").is_some());
    Ok(())
}

#[tokio::test]
async fn unrecognised_status_is_an_unexpected_outcome() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .with_task(TaskBuilder::new("odd").retry_budget(0).build())
        .build_arc();
    let performer = Arc::new(
        ScriptedPerformer::new().with_behaviour("odd", Behaviour::Status("partial".to_string())),
    );

    let report = with_timeout(run_plan(plan, None, performer)).await?;

    let failed = report.failed("odd").ok_or("odd not failed")?;
    assert_eq!(failed.error_kind, Some(WorkErrorKind::UnexpectedOutcome));
    assert!(failed.error.contains("partial"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_partial_report() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("fast", &[])
        .task("slow", &[])
        .task("after_slow", &["slow"])
        .with_task(TaskBuilder::new("flaky").retry_budget(5).build())
        .max_parallel(3)
        .retry_unit_ms(1000)
        .build_arc();
    let performer = Arc::new(
        ScriptedPerformer::new()
            .with_delay("fast", Duration::from_secs(1))
            .with_delay("slow", Duration::from_secs(60))
            .always_fail("flaky"),
    );

    let runtime = Runtime::new(Scheduler::from_plan(plan)?, Arc::clone(&performer));
    let token = runtime.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
    });

    let report = with_timeout(runtime.run()).await?;

    assert_eq!(report.status, RunStatus::Partial);
    assert!(report.completed("fast").is_some());

    let slow = report.failed("slow").ok_or("slow not failed")?;
    assert_eq!(slow.error_kind, Some(WorkErrorKind::Cancelled));

    // flaky failed at t=0 and t=2s; its next backoff was still pending.
    assert_eq!(performer.calls("flaky"), 2);
    let unfinished: Vec<_> = report
        .unfinished_tasks
        .iter()
        .map(|t| (t.id.as_str(), t.status))
        .collect();
    assert_eq!(
        unfinished,
        vec![
            ("after_slow", TaskStatus::Pending),
            ("flaky", TaskStatus::Retrying),
        ]
    );
    assert_eq!(performer.calls("after_slow"), 0);
    assert_eq!(exit_code(&report), EXIT_FAILED);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_launches_nothing() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &[])
        .task("b", &[])
        .task("c", &["a"])
        .build_arc();
    let performer = Arc::new(ScriptedPerformer::new());

    let runtime = Runtime::new(Scheduler::from_plan(plan)?, Arc::clone(&performer));
    runtime.cancellation_token().cancel();

    let report = with_timeout(runtime.run()).await?;

    assert_eq!(report.status, RunStatus::Partial);
    assert!(performer.invocations().is_empty());
    assert_eq!(report.summary.completed, 0);
    let unfinished: Vec<_> = report
        .unfinished_tasks
        .iter()
        .map(|t| (t.id.as_str(), t.status))
        .collect();
    assert_eq!(
        unfinished,
        vec![
            ("a", TaskStatus::Pending),
            ("b", TaskStatus::Pending),
            ("c", TaskStatus::Pending),
        ]
    );
    assert_eq!(exit_code(&report), EXIT_FAILED);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn report_times_follow_the_critical_path() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new()
        .task("a", &[])
        .task("b", &["a"])
        .task("side", &[])
        .critical_path(&["a", "b"])
        .estimated_total_time_sec(4.0)
        .project_name("demo")
        .build_arc();
    let performer = Arc::new(
        ScriptedPerformer::new()
            .with_delay("a", Duration::from_secs(1))
            .with_delay("b", Duration::from_secs(1))
            .with_delay("side", Duration::from_millis(500)),
    );

    let report = with_timeout(run_plan(plan, None, performer)).await?;

    assert_eq!(report.project_name.as_deref(), Some("demo"));
    assert!((report.critical_path_time_sec - 2.0).abs() < 0.05);
    assert!((report.summary.total_time_sec - 2.0).abs() < 0.05);
    assert!((report.summary.time_efficiency - 2.0).abs() < 0.1);
    assert_eq!(report.summary.estimated_time_sec, 4.0);

    let b = report.completed("b").ok_or("b not completed")?;
    assert!((b.duration_sec - 1.0).abs() < 0.05);
    assert!((b.started_at_sec - 1.0).abs() < 0.05);
    assert!((b.finished_at_sec - 2.0).abs() < 0.05);
    Ok(())
}

#[tokio::test]
async fn empty_plan_completes_with_zero_rate() -> TestResult {
    init_tracing();

    let plan = PlanBuilder::new().build_arc();
    let report = with_timeout(run_plan(plan, None, Arc::new(ScriptedPerformer::new()))).await?;

    assert_eq!(report.summary.total_tasks, 0);
    assert_eq!(report.summary.success_rate, 0.0);
    assert_eq!(report.critical_path_time_sec, 0.0);
    Ok(())
}
