// src/exec/shell.rs

//! Work performer that runs a task's `cmd` through the platform shell.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::backend::{WorkError, WorkErrorKind, WorkFuture, WorkPerformer, WorkResult};
use crate::plan::Task;

/// Runs `task.cmd` with `sh -c` (`cmd /C` on Windows).
///
/// - exit status 0 → success, stdout captured into `output.stdout`
/// - non-zero exit → performer failure carrying the exit code
/// - cancellation → child killed, `Cancelled` failure
///
/// Tasks without a `cmd` succeed immediately.
#[derive(Debug, Clone, Default)]
pub struct ShellPerformer;

impl ShellPerformer {
    pub fn new() -> Self {
        Self
    }
}

impl WorkPerformer for ShellPerformer {
    fn execute<'a>(&'a self, task: &'a Task, cancel: CancellationToken) -> WorkFuture<'a> {
        Box::pin(async move {
            let Some(cmd) = task.cmd.as_deref() else {
                debug!(task = %task.id, "no cmd configured; nothing to run");
                return Ok(WorkResult::success(json!({ "note": "no command" })));
            };

            match run_command(task, cmd, cancel).await {
                Ok(outcome) => outcome,
                Err(err) => Err(WorkError::performer(format!("{err:#}"))),
            }
        })
    }
}

/// Spawn the child and wait for it or for cancellation.
///
/// The outer `Result` carries IO failures (spawn / wait); the inner one is
/// the task outcome.
async fn run_command(
    task: &Task,
    cmd_str: &str,
    cancel: CancellationToken,
) -> Result<Result<WorkResult, WorkError>> {
    info!(task = %task.id, cmd = %cmd_str, "starting task process");
    let started = Instant::now();

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_str);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_str);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.id))?;

    let stdout_reader = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        })
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_id = task.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of task '{}'", task.id))?;
            let code = status.code().unwrap_or(-1);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            info!(
                task = %task.id,
                exit_code = code,
                success = status.success(),
                "task process exited"
            );

            if !status.success() {
                return Ok(Err(WorkError::performer(format!(
                    "command exited with code {code}"
                ))));
            }

            let stdout = match stdout_reader {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };

            Ok(Ok(WorkResult::success(json!({
                "exit_code": code,
                "stdout": stdout.trim_end(),
            }))
            .with_metrics(json!({ "duration_ms": elapsed_ms }))))
        }

        _ = cancel.cancelled() => {
            info!(task = %task.id, "run cancelled; killing task process");
            if let Err(e) = child.kill().await {
                warn!(task = %task.id, error = %e, "failed to kill child process on cancellation");
            }
            Ok(Err(WorkError::new(WorkErrorKind::Cancelled, "run cancelled while task was running")))
        }
    }
}
