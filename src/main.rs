use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wavegate::config::{Config, Overrides};

mod cmd;

#[derive(Parser)]
#[command(name = "wavegate")]
#[command(version, about = "Wave-gated task orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Maximum concurrent worker processes
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    /// Repair attempts allowed per failing gate
    #[arg(long, global = true)]
    pub max_triage: Option<u32>,

    /// Worker command, run once per task via `sh -c`
    #[arg(long, global = true)]
    pub worker_cmd: Option<String>,

    /// Repair command, run per triage attempt and per backlog item
    #[arg(long, global = true)]
    pub repair_cmd: Option<String>,

    /// Verification command, run as the gate after each wave
    #[arg(long, global = true)]
    pub gate_cmd: Option<String>,

    /// Directory for worker, gate, and triage logs
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a wavegate project (plan, config, ledger)
    Init,
    /// Run the pipeline: waves in order, each gated and triaged
    Run {
        /// Start from this wave, skipping earlier ones
        #[arg(long)]
        from: Option<String>,

        /// Run only this wave, without the backlog pass
        #[arg(long, conflicts_with = "from")]
        wave: Option<String>,
    },
    /// Show wave progress and ledger completion
    Status,
    /// List the plan's waves and tasks
    Plan,
    /// List backlog items and their state
    Backlog,
}

fn overrides_from(cli: &Cli) -> Overrides {
    Overrides {
        max_parallel: cli.max_parallel,
        max_triage: cli.max_triage,
        worker_cmd: cli.worker_cmd.clone(),
        repair_cmd: cli.repair_cmd.clone(),
        gate_cmd: cli.gate_cmd.clone(),
        log_dir: cli.log_dir.clone(),
    }
}

/// Install the tracing subscriber: stderr always, plus a per-run file log
/// when a log directory is known. The returned guard must stay alive for
/// the file writer to flush.
fn init_tracing(
    verbose: bool,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "wavegate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => {
            let _guard = init_tracing(cli.verbose, None);
            cmd::cmd_init(&project_dir)?;
        }
        Commands::Run { from, wave } => {
            let config = Config::new(project_dir, cli.verbose, overrides_from(&cli))?;
            config.ensure_directories()?;
            let _guard = init_tracing(cli.verbose, Some(&config.log_dir));
            let code = cmd::cmd_run(config, from.clone(), wave.clone()).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Status => {
            let _guard = init_tracing(cli.verbose, None);
            let config = Config::new(project_dir, cli.verbose, overrides_from(&cli))?;
            cmd::cmd_status(&config)?;
        }
        Commands::Plan => {
            let _guard = init_tracing(cli.verbose, None);
            let config = Config::new(project_dir, cli.verbose, overrides_from(&cli))?;
            cmd::cmd_plan(&config)?;
        }
        Commands::Backlog => {
            let _guard = init_tracing(cli.verbose, None);
            let config = Config::new(project_dir, cli.verbose, overrides_from(&cli))?;
            cmd::cmd_backlog(&config)?;
        }
    }

    Ok(())
}
