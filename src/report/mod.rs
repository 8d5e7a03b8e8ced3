// src/report/mod.rs

//! Execution report: aggregation, rendering and persistence.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::time::Instant;

use crate::dag::{ExecutionStore, TaskStatus};
use crate::errors::Result;
use crate::exec::{WorkErrorKind, WorkResult};
use crate::plan::{Plan, TaskId};

/// Whether the run went to completion or was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub summary: ReportSummary,
    pub completed_tasks: Vec<CompletedTask>,
    pub failed_tasks: Vec<FailedTask>,
    pub blocked_tasks: Vec<BlockedTask>,
    /// Only non-empty for partial reports.
    pub unfinished_tasks: Vec<UnfinishedTask>,
    pub critical_path_time_sec: f64,
}

/// Counts and timings for the whole run.
///
/// `failed` includes blocked tasks, so for a complete run
/// `completed + failed == total_tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub unfinished: usize,
    pub success_rate: f64,
    pub total_time_sec: f64,
    pub estimated_time_sec: f64,
    pub time_efficiency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub id: TaskId,
    pub name: String,
    pub duration_sec: f64,
    /// Offsets of the final attempt from the start of the run.
    pub started_at_sec: f64,
    pub finished_at_sec: f64,
    pub retry_attempts: u32,
    pub result: Option<WorkResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub id: TaskId,
    pub name: String,
    pub error: String,
    pub error_kind: Option<WorkErrorKind>,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedTask {
    pub id: TaskId,
    pub name: String,
    pub blocked_by: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnfinishedTask {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
}

impl ExecutionReport {
    /// `true` when every task completed.
    pub fn all_completed(&self) -> bool {
        self.status == RunStatus::Complete && self.summary.completed == self.summary.total_tasks
    }

    pub fn completed_ids(&self) -> Vec<&str> {
        self.completed_tasks.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn completed(&self, id: &str) -> Option<&CompletedTask> {
        self.completed_tasks.iter().find(|t| t.id == id)
    }

    pub fn failed(&self, id: &str) -> Option<&FailedTask> {
        self.failed_tasks.iter().find(|t| t.id == id)
    }
}

/// Turn the execution store into a report.
///
/// `run_started` anchors the per-task offsets; `total_time` is the wall-clock
/// length of the run.
pub fn aggregate(
    store: &ExecutionStore,
    plan: &Plan,
    run_started: Option<Instant>,
    total_time: Duration,
    status: RunStatus,
) -> ExecutionReport {
    let offset = |at: Option<Instant>| -> f64 {
        match (run_started, at) {
            (Some(start), Some(at)) => at.saturating_duration_since(start).as_secs_f64(),
            _ => 0.0,
        }
    };

    let mut completed_tasks = Vec::new();
    let mut failed_tasks = Vec::new();
    let mut blocked_tasks = Vec::new();
    let mut unfinished_tasks = Vec::new();

    for exec in store.iter() {
        let task = &exec.task;
        match exec.status {
            TaskStatus::Completed => completed_tasks.push(CompletedTask {
                id: task.id.clone(),
                name: task.name.clone(),
                duration_sec: exec.duration().map_or(0.0, |d| d.as_secs_f64()),
                started_at_sec: offset(exec.start_time),
                finished_at_sec: offset(exec.end_time),
                retry_attempts: exec.retry_attempts,
                result: exec.result.clone(),
            }),
            TaskStatus::Failed => failed_tasks.push(FailedTask {
                id: task.id.clone(),
                name: task.name.clone(),
                error: exec.error.clone().unwrap_or_default(),
                error_kind: exec.error_kind,
                retry_attempts: exec.retry_attempts,
            }),
            TaskStatus::Blocked => blocked_tasks.push(BlockedTask {
                id: task.id.clone(),
                name: task.name.clone(),
                blocked_by: exec.blocked_by.clone(),
            }),
            other => unfinished_tasks.push(UnfinishedTask {
                id: task.id.clone(),
                name: task.name.clone(),
                status: other,
            }),
        }
    }

    let total_tasks = store.len();
    let completed = completed_tasks.len();
    let blocked = blocked_tasks.len();
    let failed = failed_tasks.len() + blocked;

    let success_rate = if total_tasks > 0 {
        completed as f64 / total_tasks as f64
    } else {
        0.0
    };

    let total_time_sec = total_time.as_secs_f64();
    let estimated_time_sec = plan.estimated_total_time_sec();
    let time_efficiency = if total_time_sec > 0.0 {
        estimated_time_sec / total_time_sec
    } else {
        0.0
    };

    ExecutionReport {
        status,
        project_name: plan.project_name().map(str::to_string),
        summary: ReportSummary {
            total_tasks,
            completed,
            failed,
            blocked,
            unfinished: unfinished_tasks.len(),
            success_rate,
            total_time_sec,
            estimated_time_sec,
            time_efficiency,
        },
        completed_tasks,
        failed_tasks,
        blocked_tasks,
        unfinished_tasks,
        critical_path_time_sec: critical_path_time(store, plan),
    }
}

/// Sum of the durations of the plan's critical-path tasks.
///
/// Zero if there is no critical path or any task on it never ran to an end.
pub fn critical_path_time(store: &ExecutionStore, plan: &Plan) -> f64 {
    let mut total = 0.0;
    for id in plan.critical_path() {
        match store.get(id).and_then(|e| e.duration()) {
            Some(d) => total += d.as_secs_f64(),
            None => return 0.0,
        }
    }
    total
}

/// Human-readable summary for the terminal.
pub fn render_summary(report: &ExecutionReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    let title = report.project_name.as_deref().unwrap_or("plan");
    let _ = writeln!(out, "plandag run: {title}");
    if report.status == RunStatus::Partial {
        let _ = writeln!(out, "  status: PARTIAL (run cancelled)");
    }
    let _ = writeln!(out, "  completed: {}/{}", s.completed, s.total_tasks);
    let _ = writeln!(out, "  failed:    {} (blocked: {})", s.failed, s.blocked);
    if s.unfinished > 0 {
        let _ = writeln!(out, "  unfinished: {}", s.unfinished);
    }
    let _ = writeln!(out, "  success rate: {:.1}%", s.success_rate * 100.0);
    let _ = writeln!(
        out,
        "  time: {:.2}s actual, {:.2}s estimated, efficiency {:.2}x",
        s.total_time_sec, s.estimated_time_sec, s.time_efficiency
    );
    let _ = writeln!(out, "  critical path: {:.2}s", report.critical_path_time_sec);

    if !report.failed_tasks.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "failed tasks:");
        for t in report.failed_tasks.iter() {
            let kind = t.error_kind.map(|k| k.to_string()).unwrap_or_default();
            let _ = writeln!(
                out,
                "  - {} ({}) after {} retries [{}]: {}",
                t.id, t.name, t.retry_attempts, kind, t.error
            );
        }
    }

    if !report.blocked_tasks.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "blocked tasks:");
        for t in report.blocked_tasks.iter() {
            let _ = writeln!(
                out,
                "  - {} ({}) blocked by {}",
                t.id,
                t.name,
                t.blocked_by.join(", ")
            );
        }
    }

    if !report.unfinished_tasks.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "unfinished tasks:");
        for t in report.unfinished_tasks.iter() {
            let _ = writeln!(out, "  - {} ({}) {}", t.id, t.name, t.status);
        }
    }

    out
}

/// Write the report as pretty-printed JSON.
pub fn write_report(path: impl AsRef<Path>, report: &ExecutionReport) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("writing report to {:?}", path))?;
    Ok(())
}
