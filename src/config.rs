//! Runtime configuration for wavegate.
//!
//! All knobs resolve through the same layering: CLI flag, then `WAVEGATE_*`
//! environment variable, then `.wavegate/config.toml`, then the built-in
//! default. Paths are derived from the project's `.wavegate/` directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_PARALLEL: usize = 4;
pub const DEFAULT_MAX_TRIAGE: u32 = 3;

/// Failure-descriptor lines in gate output, `cargo test` convention.
pub const DEFAULT_FAILURE_PATTERN: &str = r"^test (\S+) \.\.\. FAILED$";
/// One-line pass summary in gate output, `cargo test` convention.
pub const DEFAULT_SUMMARY_PATTERN: &str = r"^test result: (.+)$";

const DEFAULT_WORKER_CMD: &str = "claude --print --dangerously-skip-permissions";
const DEFAULT_GATE_CMD: &str = "cargo test";

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub plan_file: PathBuf,
    pub ledger_file: PathBuf,
    pub log_dir: PathBuf,
    pub state_file: PathBuf,
    /// Command launched once per task, `sh -c` style.
    pub worker_cmd: String,
    /// Command launched once per triage attempt and per backlog item.
    pub repair_cmd: String,
    /// External verification command whose exit status is the gate verdict.
    pub gate_cmd: String,
    /// Concurrency limit for worker processes within a wave.
    pub max_parallel: usize,
    /// Repair attempts allowed per failing gate.
    pub max_triage: u32,
    pub failure_pattern: String,
    pub summary_pattern: String,
    pub verbose: bool,
}

/// Values taken from CLI flags; `None` falls through to env/file/default.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_parallel: Option<usize>,
    pub max_triage: Option<u32>,
    pub worker_cmd: Option<String>,
    pub repair_cmd: Option<String>,
    pub gate_cmd: Option<String>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    commands: CommandsSection,
    limits: LimitsSection,
    gate: GateSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CommandsSection {
    worker: Option<String>,
    repair: Option<String>,
    gate: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LimitsSection {
    max_parallel: Option<usize>,
    max_triage: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct GateSection {
    failure_pattern: Option<String>,
    summary_pattern: Option<String>,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, overrides: Overrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let dir = wavegate_dir(&project_dir);

        let file = load_config_file(&dir.join("config.toml"))?;

        let worker_cmd = resolve(
            overrides.worker_cmd,
            env_string("WAVEGATE_WORKER_CMD"),
            file.commands.worker.clone(),
            DEFAULT_WORKER_CMD.to_string(),
        );
        // The repair command falls back to the worker command: many setups
        // drive both with the same agent binary.
        let repair_cmd = resolve(
            overrides.repair_cmd,
            env_string("WAVEGATE_REPAIR_CMD"),
            file.commands.repair.clone(),
            worker_cmd.clone(),
        );
        let gate_cmd = resolve(
            overrides.gate_cmd,
            env_string("WAVEGATE_GATE_CMD"),
            file.commands.gate.clone(),
            DEFAULT_GATE_CMD.to_string(),
        );
        let max_parallel = resolve(
            overrides.max_parallel,
            env_parsed("WAVEGATE_MAX_PARALLEL"),
            file.limits.max_parallel,
            DEFAULT_MAX_PARALLEL,
        )
        .max(1);
        let max_triage = resolve(
            overrides.max_triage,
            env_parsed("WAVEGATE_MAX_TRIAGE"),
            file.limits.max_triage,
            DEFAULT_MAX_TRIAGE,
        );
        let log_dir = resolve(
            overrides.log_dir,
            env_string("WAVEGATE_LOG_DIR").map(PathBuf::from),
            None,
            dir.join("logs"),
        );

        Ok(Self {
            plan_file: dir.join("plan.json"),
            ledger_file: dir.join("ledger.md"),
            state_file: dir.join("state"),
            log_dir,
            project_dir,
            worker_cmd,
            repair_cmd,
            gate_cmd,
            max_parallel,
            max_triage,
            failure_pattern: file
                .gate
                .failure_pattern
                .unwrap_or_else(|| DEFAULT_FAILURE_PATTERN.to_string()),
            summary_pattern: file
                .gate
                .summary_pattern
                .unwrap_or_else(|| DEFAULT_SUMMARY_PATTERN.to_string()),
            verbose,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(wavegate_dir(&self.project_dir))
            .context("Failed to create .wavegate directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }
}

/// The per-project directory holding plan, ledger, state, and logs.
pub fn wavegate_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".wavegate")
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

fn resolve<T>(cli: Option<T>, env: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(env).or(file).unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_without_config_file() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, Overrides::default()).unwrap();

        assert_eq!(config.max_parallel, DEFAULT_MAX_PARALLEL);
        assert_eq!(config.max_triage, DEFAULT_MAX_TRIAGE);
        assert_eq!(config.gate_cmd, DEFAULT_GATE_CMD);
        assert_eq!(config.worker_cmd, config.repair_cmd);
        assert_eq!(
            config.plan_file,
            dir.path().canonicalize().unwrap().join(".wavegate/plan.json")
        );
        assert_eq!(
            config.ledger_file,
            dir.path().canonicalize().unwrap().join(".wavegate/ledger.md")
        );
    }

    #[test]
    fn config_file_values_are_picked_up() {
        let dir = tempdir().unwrap();
        let wg = dir.path().join(".wavegate");
        fs::create_dir_all(&wg).unwrap();
        fs::write(
            wg.join("config.toml"),
            r#"
[commands]
worker = "./run-worker.sh"
gate = "make check"

[limits]
max_parallel = 2
max_triage = 5

[gate]
failure_pattern = "^FAIL: (.+)$"
"#,
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), false, Overrides::default()).unwrap();
        assert_eq!(config.worker_cmd, "./run-worker.sh");
        // Unset repair command inherits the worker command.
        assert_eq!(config.repair_cmd, "./run-worker.sh");
        assert_eq!(config.gate_cmd, "make check");
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.max_triage, 5);
        assert_eq!(config.failure_pattern, "^FAIL: (.+)$");
        assert_eq!(config.summary_pattern, DEFAULT_SUMMARY_PATTERN);
    }

    #[test]
    fn cli_overrides_beat_the_config_file() {
        let dir = tempdir().unwrap();
        let wg = dir.path().join(".wavegate");
        fs::create_dir_all(&wg).unwrap();
        fs::write(wg.join("config.toml"), "[limits]\nmax_parallel = 2\n").unwrap();

        let overrides = Overrides {
            max_parallel: Some(8),
            gate_cmd: Some("true".to_string()),
            ..Default::default()
        };
        let config = Config::new(dir.path().to_path_buf(), false, overrides).unwrap();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.gate_cmd, "true");
    }

    #[test]
    fn max_parallel_is_clamped_to_at_least_one() {
        let dir = tempdir().unwrap();
        let overrides = Overrides {
            max_parallel: Some(0),
            ..Default::default()
        };
        let config = Config::new(dir.path().to_path_buf(), false, overrides).unwrap();
        assert_eq!(config.max_parallel, 1);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        let wg = dir.path().join(".wavegate");
        fs::create_dir_all(&wg).unwrap();
        fs::write(wg.join("config.toml"), "not toml [").unwrap();

        let result = Config::new(dir.path().to_path_buf(), false, Overrides::default());
        assert!(result.is_err());
    }

    #[test]
    fn resolve_layering_order() {
        assert_eq!(resolve(Some(1), Some(2), Some(3), 4), 1);
        assert_eq!(resolve(None, Some(2), Some(3), 4), 2);
        assert_eq!(resolve(None::<u32>, None, Some(3), 4), 3);
        assert_eq!(resolve(None::<u32>, None, None, 4), 4);
    }
}
