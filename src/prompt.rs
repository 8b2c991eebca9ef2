//! Structured instruction payloads for worker and repair processes.
//!
//! Each payload is a plain struct with typed fields; `render()` produces the
//! instruction text written to the child's stdin and `env()` exposes the same
//! facts as `WAVEGATE_*` variables so shell workers need not parse prose.
//! Multi-line content (the triage journal in particular) travels as a field
//! and is embedded whole, never spliced into the text by token replacement.

use std::path::Path;

/// Instructions for one task's worker process.
#[derive(Debug)]
pub struct WorkerPayload<'a> {
    pub task_id: &'a str,
    pub summary: &'a str,
    pub wave: &'a str,
    pub ledger_file: &'a Path,
    pub log_file: &'a Path,
}

impl WorkerPayload<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"## TASK
You are implementing task {id} in wave {wave}.

{summary}

## COMPLETION PROTOCOL
Work until the task is fully complete and verified. Only then flip the
task's record in {ledger} from `- [ ] {id}` to `- [x] {id}`, keeping the
rest of the line unchanged. Never mark any other record, and never unmark
a record. If you cannot finish, leave the record open and exit.

Your output is captured to {log}.
"#,
            id = self.task_id,
            wave = self.wave,
            summary = self.summary,
            ledger = self.ledger_file.display(),
            log = self.log_file.display(),
        )
    }

    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("WAVEGATE_TASK_ID".into(), self.task_id.into()),
            ("WAVEGATE_WAVE".into(), self.wave.into()),
            (
                "WAVEGATE_LEDGER".into(),
                self.ledger_file.display().to_string(),
            ),
            (
                "WAVEGATE_LOG_FILE".into(),
                self.log_file.display().to_string(),
            ),
        ]
    }
}

/// Instructions for one triage attempt's repair process.
#[derive(Debug)]
pub struct RepairPayload<'a> {
    pub wave: &'a str,
    pub gate_cmd: &'a str,
    pub gate_log: &'a Path,
    pub task_ids: &'a [String],
    pub attempt: u32,
    pub budget: u32,
    /// Full prior-journal text, or the journal's empty sentinel on attempt 1.
    pub journal_text: &'a str,
    pub journal_file: &'a Path,
    pub ledger_file: &'a Path,
    /// First unused id in the backlog namespace (e.g. "B04").
    pub next_backlog_id: &'a str,
}

impl RepairPayload<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"## GATE FAILURE
The verification command `{gate}` failed after wave {wave} completed.
Full output is in {gate_log}.
Tasks in this wave: {tasks}.
This is repair attempt {attempt} of {budget}.

## PRIOR ATTEMPTS
{prior}

## WHAT TO DO
For each failing check, classify it and act:

1. Broken check: the check itself is wrong. Fix the check in place.
2. Defect in the system under test: the check is right. Do not change the
   system under test to paper over it. Append a new open record
   `- [ ] {next_id}: <symptom, suspected location, artifact to modify>` to
   {ledger} (use the next unused number for each further item), mark the
   discovering check as ignored with a comment naming that id, and move on.
3. Integration conflict: independently produced changes are incompatible.
   Reconcile both sides and re-run the affected checks locally before
   finishing.
4. Environmental leakage: the check depends on ambient state set up
   elsewhere. Make the check self-sufficient with explicit setup. Do not
   ignore it.

When you are done, append an entry to {journal} describing what you
observed, how you classified each failure, what you changed, and what the
next attempt should try if the gate still fails. The gate will be re-run
after you exit.
"#,
            gate = self.gate_cmd,
            wave = self.wave,
            gate_log = self.gate_log.display(),
            tasks = self.task_ids.join(", "),
            attempt = self.attempt,
            budget = self.budget,
            prior = self.journal_text,
            journal = self.journal_file.display(),
            next_id = self.next_backlog_id,
            ledger = self.ledger_file.display(),
        )
    }

    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("WAVEGATE_WAVE".into(), self.wave.into()),
            (
                "WAVEGATE_GATE_LOG".into(),
                self.gate_log.display().to_string(),
            ),
            ("WAVEGATE_ATTEMPT".into(), self.attempt.to_string()),
            ("WAVEGATE_TRIAGE_BUDGET".into(), self.budget.to_string()),
            (
                "WAVEGATE_JOURNAL".into(),
                self.journal_file.display().to_string(),
            ),
            (
                "WAVEGATE_LEDGER".into(),
                self.ledger_file.display().to_string(),
            ),
            (
                "WAVEGATE_NEXT_BACKLOG_ID".into(),
                self.next_backlog_id.into(),
            ),
        ]
    }
}

/// Instructions for the dedicated repair pass over one backlog item.
#[derive(Debug)]
pub struct BugfixPayload<'a> {
    pub item_id: &'a str,
    pub summary: &'a str,
    pub gate_cmd: &'a str,
    pub ledger_file: &'a Path,
}

impl BugfixPayload<'_> {
    pub fn render(&self) -> String {
        format!(
            r#"## BACKLOG ITEM
{id}: {summary}

This defect was deferred during an earlier triage pass. The check that
discovered it is currently ignored, with a comment naming {id}.

## WHAT TO DO
Fix the defect in the system under test. Remove the ignore from the
discovering check and confirm `{gate}` passes it. Only when the fix is
verified, flip `- [ ] {id}` to `- [x] {id}` in {ledger}. If you cannot
finish, leave the record open and exit.
"#,
            id = self.item_id,
            summary = self.summary,
            gate = self.gate_cmd,
            ledger = self.ledger_file.display(),
        )
    }

    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("WAVEGATE_BACKLOG_ID".into(), self.item_id.into()),
            (
                "WAVEGATE_LEDGER".into(),
                self.ledger_file.display().to_string(),
            ),
        ]
    }
}
