//! Bounded repair-and-reverify loop for a failing gate.
//!
//! The orchestrator never classifies or fixes failures itself. Each attempt
//! hands the external repair process the gate log, the wave's task ids, the
//! attempt position, and the full prior journal, then re-runs the gate. The
//! loop resolves as soon as the gate passes and gives up when the attempt
//! budget is spent.

use crate::backlog::BACKLOG_PREFIX;
use crate::config::Config;
use crate::errors::OrchestratorError;
use crate::gate::{GateResult, GateRunner};
use crate::journal::Journal;
use crate::ledger::{CompletionStore, FileLedger};
use crate::plan::Wave;
use crate::prompt::RepairPayload;
use crate::ui::PipelineUi;
use crate::worker::spawn_logged;

/// Terminal state of one triage sequence.
#[derive(Debug)]
pub enum TriageOutcome {
    /// The gate passed within the budget.
    Resolved { attempts: u32, result: GateResult },
    /// The budget ran out with the gate still failing.
    Exhausted { attempts: u32, result: GateResult },
}

impl TriageOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

pub struct TriageLoop<'a> {
    config: &'a Config,
    gate: &'a GateRunner,
    journal: &'a Journal,
    ledger: &'a FileLedger,
    ui: &'a PipelineUi,
}

impl<'a> TriageLoop<'a> {
    pub fn new(
        config: &'a Config,
        gate: &'a GateRunner,
        journal: &'a Journal,
        ledger: &'a FileLedger,
        ui: &'a PipelineUi,
    ) -> Self {
        Self {
            config,
            gate,
            journal,
            ledger,
            ui,
        }
    }

    /// Drive the sequence for `wave`, starting from an already-failed gate
    /// result. The journal for this gate starts fresh here and accumulates
    /// one section per attempt until the sequence ends.
    pub async fn run(
        &self,
        wave: &Wave,
        first_failure: GateResult,
    ) -> Result<TriageOutcome, OrchestratorError> {
        let gate_name = wave.name.as_str();
        let budget = self.config.max_triage;

        self.journal.reset(gate_name)?;

        let mut last = first_failure;
        for attempt in 1..=budget {
            self.ui.triage_attempt(gate_name, attempt, budget);

            // Prior history first: the payload must carry everything written
            // before this attempt, and the sentinel on the first.
            let prior = self.journal.read(gate_name)?;
            self.journal.append(
                gate_name,
                &format!(
                    "### Attempt {attempt} of {budget} ({ts})\n\nObserved failures ({count}):\n{list}",
                    ts = chrono::Utc::now().to_rfc3339(),
                    count = last.failure_count(),
                    list = bullet_list(&last.failures),
                ),
            )?;

            let backlog_before = self.ledger.highest_id(BACKLOG_PREFIX)?;
            let next_backlog_id = format!("B{:02}", backlog_before + 1);
            let task_ids = wave.task_ids();
            let journal_file = self.journal.path_for(gate_name);
            let payload = RepairPayload {
                wave: gate_name,
                gate_cmd: self.gate.command(),
                gate_log: &last.log_file,
                task_ids: &task_ids,
                attempt,
                budget,
                journal_text: &prior,
                journal_file: &journal_file,
                ledger_file: self.ledger.path(),
                next_backlog_id: &next_backlog_id,
            };

            let repair_log = self
                .config
                .log_dir
                .join(format!("triage-{gate_name}-attempt-{attempt}.log"));
            let env = payload.env();
            let status = spawn_logged(
                &self.config.repair_cmd,
                &format!("repair for gate '{gate_name}'"),
                &payload.render(),
                &env,
                &repair_log,
                &self.config.project_dir,
            )
            .await?;
            if !status.success() {
                // The repair process is opaque; a bad exit is recorded but
                // the gate still decides.
                tracing::warn!(
                    gate = gate_name,
                    attempt,
                    code = status.code().unwrap_or(-1),
                    "repair process exited non-zero"
                );
            }

            let result = self.gate.run(gate_name, attempt).await?;
            self.journal.append(
                gate_name,
                &format!(
                    "Attempt {attempt} outcome: gate {verdict}, {count} failure(s).\n",
                    verdict = if result.passed { "passed" } else { "still failing" },
                    count = result.failure_count(),
                ),
            )?;

            let backlog_after = self.ledger.highest_id(BACKLOG_PREFIX)?;
            if backlog_after > backlog_before {
                let ids: Vec<String> = (backlog_before + 1..=backlog_after)
                    .map(|n| format!("B{n:02}"))
                    .collect();
                self.ui.backlog_items_noted(&ids);
            }

            if result.passed {
                self.ui.triage_resolved(gate_name, attempt);
                return Ok(TriageOutcome::Resolved {
                    attempts: attempt,
                    result,
                });
            }

            // Progress signal only; the loop continues either way.
            tracing::info!(
                gate = gate_name,
                attempt,
                before = last.failure_count(),
                after = result.failure_count(),
                "gate still failing"
            );
            last = result;
        }

        self.ui
            .triage_exhausted(gate_name, &last.failures, &self.journal.path_for(gate_name));
        Ok(TriageOutcome::Exhausted {
            attempts: budget,
            result: last,
        })
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "  (none extracted; see the gate log)\n".to_string();
    }
    let mut out = String::new();
    for item in items {
        out.push_str("  - ");
        out.push_str(item);
        out.push('\n');
    }
    out
}
