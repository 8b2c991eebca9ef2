//! Pipeline driver: waves strictly in order, a gate after each wave, triage
//! on gate failure, and the backlog pass once every wave has passed.
//!
//! Waves never overlap. The next wave starts only after the current wave's
//! gate (and any triage it needed) reports pass, because later waves may
//! depend on artifacts the earlier wave produced. A wave whose triage budget
//! runs out blocks the whole pipeline; later waves never run.

use crate::backlog::{BacklogPass, BacklogReport};
use crate::config::Config;
use crate::errors::{OrchestratorError, PipelineError};
use crate::gate::{GatePatterns, GateRunner};
use crate::journal::Journal;
use crate::ledger::{CompletionStore, FileLedger};
use crate::plan::{Plan, Wave, WaveStatus};
use crate::pool::WorkerPool;
use crate::state::{PIPELINE_RECORD, StateManager};
use crate::triage::{TriageLoop, TriageOutcome};
use crate::ui::PipelineUi;
use crate::worker::{TaskReport, WorkerInvoker};
use uuid::Uuid;

/// Terminal result of a pipeline run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every wave passed and the backlog pass left verification clean.
    Passed {
        waves_run: usize,
        backlog: BacklogReport,
    },
    /// A wave's triage budget ran out; later waves never started.
    Blocked {
        wave: String,
        attempts: u32,
        failures: Vec<String>,
    },
    /// Every wave passed, but the verification run after the backlog pass
    /// still reports failures. Reported once, never retried.
    BacklogUnresolved {
        waves_run: usize,
        backlog: BacklogReport,
    },
    /// Single-wave mode: the requested wave passed its gate.
    WavePassed { wave: String },
}

impl PipelineOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Passed { .. } | Self::WavePassed { .. } => 0,
            Self::Blocked { .. } => 1,
            Self::BacklogUnresolved { .. } => 2,
        }
    }
}

enum WaveVerdict {
    Passed,
    Blocked { attempts: u32, failures: Vec<String> },
}

pub struct PipelineDriver {
    config: Config,
    plan: Plan,
    ledger: FileLedger,
    gate: GateRunner,
    journal: Journal,
    state: StateManager,
    ui: PipelineUi,
}

impl PipelineDriver {
    pub fn new(config: Config, plan: Plan) -> Result<Self, OrchestratorError> {
        let patterns = GatePatterns::new(&config.failure_pattern, &config.summary_pattern)?;
        let gate = GateRunner::new(
            config.gate_cmd.clone(),
            config.project_dir.clone(),
            config.log_dir.clone(),
            patterns,
        );
        let journal = Journal::new(config.log_dir.clone());
        let ledger = FileLedger::new(config.ledger_file.clone());
        let state = StateManager::new(config.state_file.clone());
        let ui = PipelineUi::new(plan.waves.len() as u64, config.verbose);
        Ok(Self {
            config,
            plan,
            ledger,
            gate,
            journal,
            state,
            ui,
        })
    }

    /// Run the pipeline, optionally starting from a later wave of the plan.
    pub async fn run(&self, from: Option<&str>) -> Result<PipelineOutcome, PipelineError> {
        let waves = self.plan.starting_from(from)?;
        let run_id = Uuid::new_v4();
        self.state
            .start_run(run_id)
            .map_err(OrchestratorError::Other)?;
        tracing::info!(%run_id, waves = waves.len(), "pipeline started");

        let mut waves_run = 0;
        for wave in waves {
            waves_run += 1;
            match self.execute_wave(wave).await? {
                WaveVerdict::Passed => {}
                WaveVerdict::Blocked { attempts, failures } => {
                    self.ui.finish("pipeline blocked");
                    return Ok(PipelineOutcome::Blocked {
                        wave: wave.name.clone(),
                        attempts,
                        failures,
                    });
                }
            }
        }

        self.state
            .save(PIPELINE_RECORD, "backlog")
            .map_err(OrchestratorError::Other)?;
        let backlog = BacklogPass::new(&self.config, &self.gate, &self.ledger, &self.ui)
            .run()
            .await?;

        if backlog.is_clean() {
            self.state
                .save(PIPELINE_RECORD, "passed")
                .map_err(OrchestratorError::Other)?;
            self.ui.finish("pipeline passed");
            Ok(PipelineOutcome::Passed { waves_run, backlog })
        } else {
            self.state
                .save(PIPELINE_RECORD, "backlog-unresolved")
                .map_err(OrchestratorError::Other)?;
            self.ui.finish("pipeline finished with open failures");
            Ok(PipelineOutcome::BacklogUnresolved { waves_run, backlog })
        }
    }

    /// Run one named wave through its gate and triage, without the backlog
    /// pass. Useful for resuming or re-verifying a single wave.
    pub async fn run_single(&self, name: &str) -> Result<PipelineOutcome, PipelineError> {
        let wave = self
            .plan
            .get_wave(name)
            .ok_or_else(|| PipelineError::UnknownWave {
                wave: name.to_string(),
            })?;
        match self.execute_wave(wave).await? {
            WaveVerdict::Passed => {
                self.ui.finish("wave passed");
                Ok(PipelineOutcome::WavePassed {
                    wave: name.to_string(),
                })
            }
            WaveVerdict::Blocked { attempts, failures } => {
                self.ui.finish("wave blocked");
                Ok(PipelineOutcome::Blocked {
                    wave: name.to_string(),
                    attempts,
                    failures,
                })
            }
        }
    }

    async fn execute_wave(&self, wave: &Wave) -> Result<WaveVerdict, PipelineError> {
        self.state
            .save(&wave.name, WaveStatus::Running.as_str())
            .map_err(OrchestratorError::Other)?;

        let reports = self.run_wave(wave).await?;
        let failed = reports.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            tracing::warn!(wave = %wave.name, failed, "wave drained with task failures");
        }

        self.state
            .save(&wave.name, WaveStatus::Gated.as_str())
            .map_err(OrchestratorError::Other)?;
        self.ui.gate_running(&wave.name, 0);
        let result = self.gate.run(&wave.name, 0).await?;

        if result.passed {
            self.ui.gate_passed(&wave.name, result.summary.as_deref());
            self.state
                .save(&wave.name, WaveStatus::Passed.as_str())
                .map_err(OrchestratorError::Other)?;
            self.ui.wave_passed(&wave.name);
            return Ok(WaveVerdict::Passed);
        }

        self.ui
            .gate_failed(&wave.name, &result.failures, &result.log_file);
        let triage = TriageLoop::new(
            &self.config,
            &self.gate,
            &self.journal,
            &self.ledger,
            &self.ui,
        );
        match triage.run(wave, result).await? {
            TriageOutcome::Resolved { .. } => {
                self.state
                    .save(&wave.name, WaveStatus::Passed.as_str())
                    .map_err(OrchestratorError::Other)?;
                self.ui.wave_passed(&wave.name);
                Ok(WaveVerdict::Passed)
            }
            TriageOutcome::Exhausted { attempts, result } => {
                self.state
                    .save(&wave.name, WaveStatus::Blocked.as_str())
                    .map_err(OrchestratorError::Other)?;
                self.ui.wave_blocked(&wave.name);
                Ok(WaveVerdict::Blocked {
                    attempts,
                    failures: result.failures,
                })
            }
        }
    }

    /// The wave runner: filter out ledger-complete tasks, submit the rest to
    /// the pool, block until all are reaped. A wave with nothing left is
    /// already satisfied, which is what makes restarting a partially
    /// completed pipeline safe.
    async fn run_wave(&self, wave: &Wave) -> Result<Vec<TaskReport>, PipelineError> {
        let mut pending = Vec::new();
        let mut skipped = 0usize;
        for task in &wave.tasks {
            if self.ledger.is_done(&task.id)? {
                skipped += 1;
            } else {
                pending.push(task.clone());
            }
        }

        if pending.is_empty() {
            self.ui.wave_already_satisfied(&wave.name, skipped);
            return Ok(Vec::new());
        }
        self.ui.start_wave(&wave.name, pending.len(), skipped);

        let invoker = WorkerInvoker::new(
            self.config.worker_cmd.clone(),
            self.ledger.clone(),
            self.config.log_dir.clone(),
            self.config.project_dir.clone(),
        );
        let mut pool = WorkerPool::new(self.config.max_parallel);
        for task in pending {
            let invoker = invoker.clone();
            let wave_name = wave.name.clone();
            pool.submit(async move { invoker.run(&wave_name, &task).await })
                .await
                .map_err(OrchestratorError::Other)?;
        }

        let reports = pool.drain().await;
        for report in &reports {
            self.ui.task_finished(report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Overrides;
    use crate::plan::Task;
    use std::fs;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
    }

    /// Worker marks its own ledger record and appends its id to `ran.txt`,
    /// so tests can assert exactly which tasks were launched.
    const RECORDING_WORKER: &str = concat!(
        r#"echo "$WAVEGATE_TASK_ID" >> ran.txt; "#,
        r#"printf -- '- [x] %s\n' "$WAVEGATE_TASK_ID" >> "$WAVEGATE_LEDGER""#,
    );

    fn fixture(plan: &Plan, worker: &str, repair: &str, gate: &str, max_triage: u32) -> Fixture {
        let dir = tempdir().unwrap();
        let overrides = Overrides {
            worker_cmd: Some(worker.to_string()),
            repair_cmd: Some(repair.to_string()),
            gate_cmd: Some(gate.to_string()),
            max_triage: Some(max_triage),
            ..Default::default()
        };
        let config = Config::new(dir.path().to_path_buf(), false, overrides).unwrap();
        config.ensure_directories().unwrap();

        let mut ledger_lines = String::from("# Ledger\n");
        for wave in &plan.waves {
            for task in &wave.tasks {
                ledger_lines.push_str(&format!("- [ ] {}: {}\n", task.id, task.summary));
            }
        }
        fs::write(&config.ledger_file, ledger_lines).unwrap();

        Fixture { _dir: dir, config }
    }

    fn two_wave_plan() -> Plan {
        Plan {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            waves: vec![
                Wave {
                    name: "wave-1".to_string(),
                    tasks: vec![Task::new("T01", "first"), Task::new("T02", "second")],
                },
                Wave {
                    name: "wave-2".to_string(),
                    tasks: vec![Task::new("T03", "third")],
                },
            ],
        }
    }

    fn ran_tasks(config: &Config) -> Vec<String> {
        fs::read_to_string(config.project_dir.join("ran.txt"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn clean_run_passes_without_any_triage() {
        let plan = two_wave_plan();
        let f = fixture(&plan, RECORDING_WORKER, "true", "true", 3);
        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();

        let outcome = driver.run(None).await.unwrap();
        match &outcome {
            PipelineOutcome::Passed { waves_run, backlog } => {
                assert_eq!(*waves_run, 2);
                assert!(!backlog.had_items());
            }
            other => panic!("expected Passed, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 0);

        // Gates passed first try, so no journal was ever created.
        assert!(!f.config.log_dir.join("journal-wave-1.md").exists());
        assert!(!f.config.log_dir.join("journal-wave-2.md").exists());

        let ledger = FileLedger::new(&f.config.ledger_file);
        for id in ["T01", "T02", "T03"] {
            assert!(ledger.is_done(id).unwrap(), "{id} should be marked done");
        }
    }

    #[tokio::test]
    async fn restart_skips_tasks_the_ledger_already_records() {
        let plan = two_wave_plan();
        let f = fixture(&plan, RECORDING_WORKER, "true", "true", 3);

        // Simulate an earlier, interrupted run that finished T01 only.
        let ledger = FileLedger::new(&f.config.ledger_file);
        ledger.mark_done("T01").unwrap();

        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();
        driver.run(None).await.unwrap();

        let ran = ran_tasks(&f.config);
        assert!(!ran.contains(&"T01".to_string()), "T01 must not be resubmitted");
        assert!(ran.contains(&"T02".to_string()));
        assert!(ran.contains(&"T03".to_string()));
    }

    #[tokio::test]
    async fn sibling_failure_does_not_stop_the_other_tasks() {
        let plan = Plan {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            waves: vec![Wave {
                name: "wave-1".to_string(),
                tasks: vec![Task::new("T01", "fails"), Task::new("T02", "succeeds")],
            }],
        };
        // T01's worker exits non-zero and never marks; T02 completes.
        let worker = concat!(
            r#"echo "$WAVEGATE_TASK_ID" >> ran.txt; "#,
            r#"if [ "$WAVEGATE_TASK_ID" = T01 ]; then exit 1; fi; "#,
            r#"printf -- '- [x] %s\n' "$WAVEGATE_TASK_ID" >> "$WAVEGATE_LEDGER""#,
        );
        let f = fixture(&plan, worker, "true", "true", 3);
        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();
        driver.run(None).await.unwrap();

        let ledger = FileLedger::new(&f.config.ledger_file);
        assert!(ledger.is_done("T02").unwrap(), "T02's completion must survive T01's failure");
        assert!(!ledger.is_done("T01").unwrap());
        let ran = ran_tasks(&f.config);
        assert_eq!(ran.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_triage_blocks_later_waves() {
        let plan = two_wave_plan();
        // wave-1's gate never passes and the repair does nothing.
        let gate = r#"echo 'test stuck ... FAILED'; exit 1"#;
        let f = fixture(&plan, RECORDING_WORKER, "true", gate, 2);
        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();

        let outcome = driver.run(None).await.unwrap();
        match &outcome {
            PipelineOutcome::Blocked {
                wave,
                attempts,
                failures,
            } => {
                assert_eq!(wave, "wave-1");
                assert_eq!(*attempts, 2);
                assert_eq!(failures, &vec!["stuck".to_string()]);
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
        assert_ne!(outcome.exit_code(), 0);

        // Wave ordering: wave-2's task never launched.
        let ran = ran_tasks(&f.config);
        assert!(!ran.contains(&"T03".to_string()), "wave-2 must not start");
    }

    #[tokio::test]
    async fn triage_defers_a_defect_and_the_backlog_pass_closes_it() {
        let plan = Plan {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            waves: vec![Wave {
                name: "wave-1".to_string(),
                tasks: vec![Task::new("T01", "work")],
            }],
        };
        // Gate passes once the failing check is marked ignored.
        let gate = r#"if [ -f suppressed ]; then echo 'test result: ok. 5 passed'; else echo 'test deep::defect ... FAILED'; exit 1; fi"#;
        // The repair process plays both roles: during triage it defers the
        // defect (ignore the check, open a backlog record); during the
        // backlog pass it fixes it and closes the record.
        let repair = concat!(
            r#"if [ -n "$WAVEGATE_BACKLOG_ID" ]; then "#,
            r#"sed -i "s/^- \[ \] $WAVEGATE_BACKLOG_ID/- [x] $WAVEGATE_BACKLOG_ID/" "$WAVEGATE_LEDGER"; "#,
            r#"else touch suppressed; "#,
            r#"printf -- '- [ ] %s: deep defect deferred\n' "$WAVEGATE_NEXT_BACKLOG_ID" >> "$WAVEGATE_LEDGER"; fi"#,
        );
        let f = fixture(&plan, RECORDING_WORKER, repair, gate, 3);
        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();

        let outcome = driver.run(None).await.unwrap();
        match &outcome {
            PipelineOutcome::Passed { backlog, .. } => {
                assert_eq!(backlog.attempted, vec!["B01"]);
                assert_eq!(backlog.closed, vec!["B01"]);
                assert!(backlog.final_gate.as_ref().unwrap().passed);
            }
            other => panic!("expected Passed, got {other:?}"),
        }

        let ledger = FileLedger::new(&f.config.ledger_file);
        assert!(ledger.is_done("B01").unwrap());
        // The triage sequence wrote exactly one attempt to the journal.
        let journal = fs::read_to_string(f.config.log_dir.join("journal-wave-1.md")).unwrap();
        assert!(journal.contains("### Attempt 1"));
        assert!(!journal.contains("### Attempt 2"));
    }

    #[tokio::test]
    async fn leftover_failures_after_the_backlog_pass_are_reported_once() {
        let plan = Plan {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            waves: vec![Wave {
                name: "wave-1".to_string(),
                tasks: vec![Task::new("T01", "work")],
            }],
        };
        // Wave gate passes, but a pre-existing backlog item never gets fixed
        // and the final verification still fails on it.
        let gate = r#"if [ -f final-was-run ]; then echo 'test leftover ... FAILED'; exit 1; fi"#;
        let f = fixture(&plan, RECORDING_WORKER, "touch final-was-run", gate, 3);
        let ledger = FileLedger::new(&f.config.ledger_file);
        ledger.append_open("B01", "known defect").unwrap();

        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();
        let outcome = driver.run(None).await.unwrap();
        match &outcome {
            PipelineOutcome::BacklogUnresolved { backlog, .. } => {
                assert_eq!(backlog.still_open, vec!["B01"]);
                assert!(!backlog.final_gate.as_ref().unwrap().passed);
            }
            other => panic!("expected BacklogUnresolved, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test]
    async fn single_wave_mode_runs_only_the_named_wave() {
        let plan = two_wave_plan();
        let f = fixture(&plan, RECORDING_WORKER, "true", "true", 3);
        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();

        let outcome = driver.run_single("wave-2").await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::WavePassed { .. }));

        let ran = ran_tasks(&f.config);
        assert_eq!(ran, vec!["T03".to_string()]);
    }

    #[tokio::test]
    async fn unknown_wave_is_rejected() {
        let plan = two_wave_plan();
        let f = fixture(&plan, RECORDING_WORKER, "true", "true", 3);
        let driver = PipelineDriver::new(f.config.clone(), plan).unwrap();
        assert!(matches!(
            driver.run_single("wave-9").await,
            Err(PipelineError::UnknownWave { .. })
        ));
    }
}
