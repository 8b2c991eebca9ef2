//! Final repair pass over deferred backlog items.
//!
//! Backlog items are defects deferred during triage so a wave's gate could
//! pass without claiming the defect was fixed. Once every wave has passed,
//! each open item gets one dedicated repair invocation, closure is checked
//! against the ledger, and the full verification command runs once more.
//! This is a single best-effort pass: remaining failures are reported, never
//! retried.

use crate::config::Config;
use crate::errors::OrchestratorError;
use crate::gate::{GateResult, GateRunner};
use crate::ledger::{CompletionStore, FileLedger};
use crate::prompt::BugfixPayload;
use crate::ui::PipelineUi;
use crate::worker::spawn_logged;

/// Ledger namespace prefix for backlog items.
pub const BACKLOG_PREFIX: &str = "B";

/// Gate name used for the post-backlog verification run.
pub const FINAL_GATE: &str = "final";

/// What the pass did and where it left the verification state.
#[derive(Debug)]
pub struct BacklogReport {
    pub attempted: Vec<String>,
    pub closed: Vec<String>,
    pub still_open: Vec<String>,
    /// Verdict of the post-pass verification run; `None` when there was
    /// nothing to repair and no re-run was needed.
    pub final_gate: Option<GateResult>,
}

impl BacklogReport {
    pub fn had_items(&self) -> bool {
        !self.attempted.is_empty()
    }

    /// Clean means the final verification run (if one happened) passed.
    pub fn is_clean(&self) -> bool {
        self.final_gate.as_ref().map(|g| g.passed).unwrap_or(true)
    }
}

pub struct BacklogPass<'a> {
    config: &'a Config,
    gate: &'a GateRunner,
    ledger: &'a FileLedger,
    ui: &'a PipelineUi,
}

impl<'a> BacklogPass<'a> {
    pub fn new(
        config: &'a Config,
        gate: &'a GateRunner,
        ledger: &'a FileLedger,
        ui: &'a PipelineUi,
    ) -> Self {
        Self {
            config,
            gate,
            ledger,
            ui,
        }
    }

    pub async fn run(&self) -> Result<BacklogReport, OrchestratorError> {
        let items = self.ledger.open_items(BACKLOG_PREFIX)?;
        if items.is_empty() {
            tracing::info!("no open backlog items");
            return Ok(BacklogReport {
                attempted: Vec::new(),
                closed: Vec::new(),
                still_open: Vec::new(),
                final_gate: None,
            });
        }

        self.ui.backlog_pass_started(items.len());

        let mut attempted = Vec::new();
        let mut closed = Vec::new();
        let mut still_open = Vec::new();

        for item in &items {
            self.ui.backlog_item_started(&item.id, &item.summary);
            attempted.push(item.id.clone());

            let payload = BugfixPayload {
                item_id: &item.id,
                summary: &item.summary,
                gate_cmd: self.gate.command(),
                ledger_file: self.ledger.path(),
            };
            let log_file = self.config.log_dir.join(format!("backlog-{}.log", item.id));
            let env = payload.env();
            let status = spawn_logged(
                &self.config.repair_cmd,
                &format!("backlog item {}", item.id),
                &payload.render(),
                &env,
                &log_file,
                &self.config.project_dir,
            )
            .await?;
            if !status.success() {
                tracing::warn!(
                    item = %item.id,
                    code = status.code().unwrap_or(-1),
                    "backlog repair exited non-zero"
                );
            }

            // Closure is the ledger's call, not the process exit status.
            let done = self.ledger.is_done(&item.id)?;
            self.ui.backlog_item_finished(&item.id, done);
            if done {
                closed.push(item.id.clone());
            } else {
                still_open.push(item.id.clone());
            }
        }

        // One full verification run; the previously ignored checks should
        // now participate again.
        let final_gate = self.gate.run(FINAL_GATE, 0).await?;
        if final_gate.passed {
            self.ui.gate_passed(FINAL_GATE, final_gate.summary.as_deref());
        } else {
            self.ui
                .gate_failed(FINAL_GATE, &final_gate.failures, &final_gate.log_file);
        }

        Ok(BacklogReport {
            attempted,
            closed,
            still_open,
            final_gate: Some(final_gate),
        })
    }
}
