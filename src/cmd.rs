//! Subcommand implementations for the wavegate CLI.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use wavegate::backlog::BACKLOG_PREFIX;
use wavegate::config::{Config, wavegate_dir};
use wavegate::ledger::{CompletionStore, FileLedger};
use wavegate::pipeline::{PipelineDriver, PipelineOutcome};
use wavegate::plan::{Plan, WaveStatus};
use wavegate::state::StateManager;

const CONFIG_TEMPLATE: &str = r#"# wavegate configuration. CLI flags and WAVEGATE_* environment variables
# override these values.

[commands]
# worker = "claude --print --dangerously-skip-permissions"
# repair = "claude --print --dangerously-skip-permissions"
# gate = "cargo test"

[limits]
# max_parallel = 4
# max_triage = 3

[gate]
# failure_pattern = "^test (\\S+) \\.\\.\\. FAILED$"
# summary_pattern = "^test result: (.+)$"
"#;

pub fn is_initialized(project_dir: &Path) -> bool {
    wavegate_dir(project_dir).join("plan.json").exists()
}

/// Scaffold `.wavegate/`: a starter plan, a commented config, and a ledger
/// seeded from the plan. Never overwrites anything that already exists.
pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let dir = wavegate_dir(project_dir);
    std::fs::create_dir_all(dir.join("logs")).context("Failed to create .wavegate directory")?;

    let plan_file = dir.join("plan.json");
    let plan = if plan_file.exists() {
        println!(
            "  {} plan already exists: {}",
            style("·").dim(),
            plan_file.display()
        );
        Plan::load(&plan_file)?
    } else {
        let plan = Plan::sample();
        plan.save(&plan_file)?;
        println!("  {} wrote {}", style("+").green(), plan_file.display());
        plan
    };

    let config_file = dir.join("config.toml");
    if !config_file.exists() {
        std::fs::write(&config_file, CONFIG_TEMPLATE).context("Failed to write config template")?;
        println!("  {} wrote {}", style("+").green(), config_file.display());
    }

    let ledger_file = dir.join("ledger.md");
    if !ledger_file.exists() {
        std::fs::write(&ledger_file, "# Ledger\n\n").context("Failed to write ledger")?;
        println!("  {} wrote {}", style("+").green(), ledger_file.display());
    }
    let ledger = FileLedger::new(&ledger_file);
    for wave in &plan.waves {
        for task in &wave.tasks {
            ledger.append_open(&task.id, &task.summary)?;
        }
    }

    println!("Initialized wavegate project in {}", dir.display());
    println!("Edit the plan and config, then run 'wavegate run'.");
    Ok(())
}

/// Run the pipeline (or a single wave) and return the process exit code.
pub async fn cmd_run(config: Config, from: Option<String>, wave: Option<String>) -> Result<i32> {
    let plan = Plan::load(&config.plan_file)?;

    // Make sure every planned task has a ledger record, so completion state
    // is visible in one place before any worker runs.
    let ledger = FileLedger::new(&config.ledger_file);
    for w in &plan.waves {
        for task in &w.tasks {
            ledger.append_open(&task.id, &task.summary)?;
        }
    }

    let driver = PipelineDriver::new(config, plan)?;
    let outcome = match wave {
        Some(name) => driver.run_single(&name).await?,
        None => driver.run(from.as_deref()).await?,
    };

    match &outcome {
        PipelineOutcome::Passed { waves_run, backlog } => {
            println!(
                "{} {} wave(s) passed{}",
                style("✔").green().bold(),
                waves_run,
                if backlog.had_items() {
                    format!(
                        ", backlog: {} closed, {} still open",
                        backlog.closed.len(),
                        backlog.still_open.len()
                    )
                } else {
                    String::new()
                }
            );
        }
        PipelineOutcome::WavePassed { wave } => {
            println!("{} wave {} passed", style("✔").green().bold(), wave);
        }
        PipelineOutcome::Blocked {
            wave,
            attempts,
            failures,
        } => {
            println!(
                "{} pipeline blocked at {} after {} repair attempt(s), {} failure(s) remain",
                style("✖").red().bold(),
                wave,
                attempts,
                failures.len()
            );
        }
        PipelineOutcome::BacklogUnresolved { backlog, .. } => {
            println!(
                "{} all waves passed, but verification still fails after the backlog pass ({} item(s) open)",
                style("✖").red().bold(),
                backlog.still_open.len()
            );
        }
    }

    Ok(outcome.exit_code())
}

pub fn cmd_status(config: &Config) -> Result<()> {
    if !is_initialized(&config.project_dir) {
        println!("Not initialized. Run 'wavegate init' first.");
        return Ok(());
    }
    let plan = Plan::load(&config.plan_file)?;
    let ledger = FileLedger::new(&config.ledger_file);
    let state = StateManager::new(config.state_file.clone());

    // Latest recorded stage per wave.
    let entries = state.entries()?;
    let latest_stage = |wave: &str| -> Option<String> {
        entries
            .iter()
            .rev()
            .find(|e| e.name == wave)
            .map(|e| e.stage.clone())
    };

    println!("Waves:");
    for wave in &plan.waves {
        let done = wave
            .tasks
            .iter()
            .filter(|t| ledger.is_done(&t.id).unwrap_or(false))
            .count();
        let stage = latest_stage(&wave.name).unwrap_or_else(|| "pending".to_string());
        let stage_styled = match WaveStatus::from_stage(&stage) {
            Some(s) if s.is_passed() => style(stage).green().to_string(),
            Some(WaveStatus::Blocked) => style(stage).red().to_string(),
            _ => style(stage).yellow().to_string(),
        };
        println!(
            "  {:<12} {:>2}/{} tasks done  [{}]",
            wave.name,
            done,
            wave.tasks.len(),
            stage_styled
        );
    }

    if let Some(last) = state.last_passed_wave() {
        println!("Last passed wave: {last}");
    }
    let open_backlog = ledger.open_items(BACKLOG_PREFIX)?;
    if !open_backlog.is_empty() {
        println!("Backlog: {} open item(s)", open_backlog.len());
    }
    Ok(())
}

pub fn cmd_plan(config: &Config) -> Result<()> {
    if !is_initialized(&config.project_dir) {
        println!("No plan found. Run 'wavegate init' first.");
        return Ok(());
    }
    let plan = Plan::load(&config.plan_file)?;
    let ledger = FileLedger::new(&config.ledger_file);

    for wave in &plan.waves {
        println!("{}", style(&wave.name).bold());
        for task in &wave.tasks {
            let marker = if ledger.is_done(&task.id).unwrap_or(false) {
                style("[x]").green()
            } else {
                style("[ ]").dim()
            };
            println!("  {} {}: {}", marker, task.id, task.summary);
        }
    }
    println!("{} wave(s), {} task(s)", plan.waves.len(), plan.task_count());
    Ok(())
}

pub fn cmd_backlog(config: &Config) -> Result<()> {
    let ledger = FileLedger::new(&config.ledger_file);
    let entries = ledger.entries()?;
    let backlog: Vec<_> = entries
        .iter()
        .filter(|e| {
            e.id.len() > 1
                && e.id.starts_with('B')
                && e.id[1..].chars().all(|c| c.is_ascii_digit())
        })
        .collect();

    if backlog.is_empty() {
        println!("No backlog items recorded.");
        return Ok(());
    }
    for item in backlog {
        let marker = if item.done {
            style("[x]").green()
        } else {
            style("[ ]").yellow()
        };
        println!("  {} {}: {}", marker, item.id, item.summary);
    }
    Ok(())
}
