//! Worker invocation: one external process per task.
//!
//! Process exit status and logical completion are independent signals. Exit
//! status detects launch problems and crashes; the ledger record is the only
//! evidence the task's work actually happened. A worker that exits 0 without
//! marking its record has not completed its task.

use crate::errors::OrchestratorError;
use crate::ledger::{CompletionStore, FileLedger};
use crate::plan::Task;
use crate::prompt::WorkerPayload;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Spawn `command` via `sh -c`, writing `payload_text` to its stdin and its
/// combined output to `log_file`. Shared by task workers, triage repairs,
/// and backlog repairs. Only launch-level problems are errors; the child's
/// exit status is returned for the caller to interpret.
pub(crate) async fn spawn_logged(
    command: &str,
    unit: &str,
    payload_text: &str,
    env: &[(String, String)],
    log_file: &Path,
    workdir: &Path,
) -> Result<std::process::ExitStatus, OrchestratorError> {
    let open_err = |source| OrchestratorError::LogOpenFailed {
        path: log_file.to_path_buf(),
        source,
    };
    let stdout_log = std::fs::File::create(log_file).map_err(open_err)?;
    let stderr_log = stdout_log.try_clone().map_err(open_err)?;

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log));
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|source| OrchestratorError::SpawnFailed {
        unit: unit.to_string(),
        source,
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(payload_text.as_bytes()).await {
            tracing::warn!(unit, "failed to write payload to stdin: {e}");
        }
        let _ = stdin.shutdown().await;
    }

    child
        .wait()
        .await
        .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("failed waiting for {unit}: {e}")))
}

/// What happened to one task's worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ledger already marked the task done; nothing was launched.
    AlreadyComplete,
    /// Process exited zero and the ledger records completion.
    Completed { exit_code: i32 },
    /// The worker process could not be started.
    LaunchFailed { error: String },
    /// Process exited non-zero.
    ProcessFailed { exit_code: i32 },
    /// Process exited zero but never marked its ledger record.
    ExitedWithoutMark { exit_code: i32 },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyComplete | Self::Completed { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::AlreadyComplete => "already complete, skipped".to_string(),
            Self::Completed { .. } => "completed".to_string(),
            Self::LaunchFailed { error } => format!("launch failed: {error}"),
            Self::ProcessFailed { exit_code } => {
                format!("worker exited with code {exit_code}")
            }
            Self::ExitedWithoutMark { .. } => {
                "worker exited cleanly but never marked its ledger record".to_string()
            }
        }
    }
}

/// Result of one `WorkerInvoker::run` call.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub log_file: PathBuf,
    pub duration: Duration,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Launches one external worker process per task.
#[derive(Debug, Clone)]
pub struct WorkerInvoker {
    command: String,
    ledger: FileLedger,
    log_dir: PathBuf,
    workdir: PathBuf,
}

impl WorkerInvoker {
    pub fn new(
        command: impl Into<String>,
        ledger: FileLedger,
        log_dir: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            ledger,
            log_dir: log_dir.into(),
            workdir: workdir.into(),
        }
    }

    /// Run the worker for `task`, or skip if the ledger already marks it
    /// done. Never returns an error: every failure mode is a report, so a
    /// bad task cannot take its siblings down with it.
    pub async fn run(&self, wave: &str, task: &Task) -> TaskReport {
        let start = Instant::now();
        let log_file = self.log_dir.join(format!("task-{}.log", task.id));

        let already_done = match self.ledger.is_done(&task.id) {
            Ok(done) => done,
            Err(e) => {
                return TaskReport {
                    task_id: task.id.clone(),
                    outcome: TaskOutcome::LaunchFailed {
                        error: e.to_string(),
                    },
                    log_file,
                    duration: start.elapsed(),
                };
            }
        };
        if already_done {
            tracing::debug!(task = %task.id, "ledger already records completion, skipping");
            return TaskReport {
                task_id: task.id.clone(),
                outcome: TaskOutcome::AlreadyComplete,
                log_file,
                duration: start.elapsed(),
            };
        }

        let payload = WorkerPayload {
            task_id: &task.id,
            summary: &task.summary,
            wave,
            ledger_file: self.ledger.path(),
            log_file: &log_file,
        };
        let outcome = self.launch(&payload, &task.id, &log_file).await;
        tracing::info!(task = %task.id, outcome = %outcome.describe(), "worker finished");

        TaskReport {
            task_id: task.id.clone(),
            outcome,
            log_file,
            duration: start.elapsed(),
        }
    }

    async fn launch(
        &self,
        payload: &WorkerPayload<'_>,
        task_id: &str,
        log_file: &Path,
    ) -> TaskOutcome {
        // One log per task, overwritten on rerun.
        let env = payload.env();
        let status = match spawn_logged(
            &self.command,
            &format!("task {task_id}"),
            &payload.render(),
            &env,
            log_file,
            &self.workdir,
        )
        .await
        {
            Ok(status) => status,
            Err(e) => {
                return TaskOutcome::LaunchFailed {
                    error: e.to_string(),
                };
            }
        };
        let exit_code = status.code().unwrap_or(-1);

        // Exit status alone is not completion; the ledger decides.
        let marked = self.ledger.is_done(task_id).unwrap_or(false);
        match (status.success(), marked) {
            (true, true) => TaskOutcome::Completed { exit_code },
            (true, false) => TaskOutcome::ExitedWithoutMark { exit_code },
            (false, _) => TaskOutcome::ProcessFailed { exit_code },
        }
    }
}
