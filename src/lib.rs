// src/lib.rs

pub mod cli;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod report;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::dag::{DagGraph, Scheduler};
use crate::engine::{RetryPolicy, Runtime};
use crate::errors::Result;
use crate::exec::ShellPerformer;
use crate::plan::{Plan, load_and_validate};
use crate::report::{ExecutionReport, render_summary, write_report};
use crate::types::DependencyPolicy;

/// Every task completed.
pub const EXIT_OK: u8 = 0;
/// Some task failed or was blocked, the run was cancelled, or the plan could
/// not be loaded.
pub const EXIT_FAILED: u8 = 1;
/// The run aborted on a deadlock.
pub const EXIT_DEADLOCK: u8 = 2;

/// Exit code for a run that produced a report.
pub fn exit_code(report: &ExecutionReport) -> u8 {
    if report.all_completed() {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading and validation
/// - scheduler + runtime with the shell performer
/// - Ctrl-C handling
/// - report printing and persistence
///
/// A deadlock is returned as an error so the caller can report it
/// distinctly.
pub async fn run(args: CliArgs) -> Result<u8> {
    let policy = if args.allow_dangling {
        DependencyPolicy::Permissive
    } else {
        DependencyPolicy::Strict
    };
    let plan = load_and_validate(&args.plan, policy)?;

    if args.dry_run {
        print_dry_run(&plan);
        return Ok(EXIT_OK);
    }

    let mut retry = RetryPolicy::from_section(plan.scheduler());
    if let Some(ms) = args.retry_unit_ms {
        retry.unit = Duration::from_millis(ms);
    }
    let max_parallel = args.max_parallel.unwrap_or(plan.scheduler().max_parallel);

    let scheduler = Scheduler::new(Arc::new(plan), max_parallel, retry)?;

    // Ctrl-C → cancel the run; in-flight work winds down, report is partial.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            cancel.cancel();
        });
    }

    let runtime =
        Runtime::new(scheduler, Arc::new(ShellPerformer::new())).with_cancellation(cancel);
    let report = runtime.run().await?;

    print!("{}", render_summary(&report));

    if let Some(path) = args.report.as_ref() {
        write_report(path, &report)?;
        info!(path = %path.display(), "report written");
    }

    Ok(exit_code(&report))
}

/// Dry-run output: tasks, dependencies, derived levels, advisory hints.
fn print_dry_run(plan: &Plan) {
    println!("plandag dry-run");
    if let Some(name) = plan.project_name() {
        println!("  project: {name}");
    }
    if let Some(objective) = plan.objective() {
        println!("  objective: {objective}");
    }
    let section = plan.scheduler();
    println!("  scheduler.max_parallel = {}", section.max_parallel);
    println!(
        "  scheduler.retry = {}^n x {}ms",
        section.retry_base, section.retry_unit_ms
    );
    println!(
        "  estimated total time = {:.0}s",
        plan.estimated_total_time_sec()
    );
    println!();

    println!("tasks ({}):", plan.len());
    for task in plan.tasks() {
        println!("  - {} ({})", task.id, task.name);
        if let Some(kind) = task.task_type {
            println!("      type: {kind}");
        }
        println!(
            "      priority: {}, retry_budget: {}, estimate: {:.0}s",
            task.priority, task.retry_budget, task.estimated_duration_sec
        );
        if !task.dependencies.is_empty() {
            println!("      dependencies: {:?}", task.dependencies);
        }
        if let Some(ref cmd) = task.cmd {
            println!("      cmd: {cmd}");
        }
    }

    let graph = DagGraph::from_plan(plan);
    println!();
    match graph.levels() {
        Some(levels) => {
            println!("levels:");
            for (i, level) in levels.iter().enumerate() {
                println!("  {i}: {}", level.join(", "));
            }
        }
        None => {
            let member = graph.cycle_member().unwrap_or_default();
            println!("WARNING: dependency cycle (involving '{member}'); the run would deadlock");
        }
    }

    if !plan.critical_path().is_empty() {
        println!("critical path: {}", plan.critical_path().join(" -> "));
    }
    if !plan.parallel_groups().is_empty() {
        println!("parallel groups:");
        for group in plan.parallel_groups() {
            println!("  [{}]", group.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
}
