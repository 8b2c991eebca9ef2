//! Gate execution: running the external verification command.
//!
//! Pass or fail is the command's own exit status, nothing else. The combined
//! output is captured verbatim to a per-attempt log; a one-line summary and
//! discrete failure descriptors are extracted from it by pattern, and the
//! patterns are configuration, not syntax this module owns.

use crate::errors::OrchestratorError;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Extraction patterns for gate output.
#[derive(Debug, Clone)]
pub struct GatePatterns {
    failure: Regex,
    summary: Regex,
}

impl GatePatterns {
    pub fn new(failure: &str, summary: &str) -> Result<Self, OrchestratorError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| OrchestratorError::BadPattern {
                pattern: pattern.to_string(),
                source,
            })
        };
        Ok(Self {
            failure: compile(failure)?,
            summary: compile(summary)?,
        })
    }

    /// Failure descriptors, one per matching line. A capture group narrows
    /// the descriptor to the interesting part; without one the whole line is
    /// kept.
    fn failures(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| {
                self.failure.captures(line).map(|caps| {
                    caps.get(1)
                        .map(|m| m.as_str())
                        .unwrap_or(line)
                        .to_string()
                })
            })
            .collect()
    }

    fn summary(&self, output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            self.summary.captures(line).map(|caps| {
                caps.get(1)
                    .map(|m| m.as_str())
                    .unwrap_or(line)
                    .to_string()
            })
        })
    }
}

/// Verdict of one gate invocation. Recomputed on every run, never persisted
/// beyond its log file.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub passed: bool,
    pub exit_code: i32,
    pub summary: Option<String>,
    pub failures: Vec<String>,
    pub log_file: PathBuf,
}

impl GateResult {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Runs the verification command and parses its output.
#[derive(Debug, Clone)]
pub struct GateRunner {
    command: String,
    project_dir: PathBuf,
    log_dir: PathBuf,
    patterns: GatePatterns,
}

impl GateRunner {
    pub fn new(
        command: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        patterns: GatePatterns,
    ) -> Self {
        Self {
            command: command.into(),
            project_dir: project_dir.into(),
            log_dir: log_dir.into(),
            patterns,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the gate once. `attempt` 0 is the post-wave run; triage re-runs
    /// count up from 1, giving each invocation its own log.
    pub async fn run(&self, gate_name: &str, attempt: u32) -> Result<GateResult, OrchestratorError> {
        let log_file = self
            .log_dir
            .join(format!("gate-{gate_name}-attempt-{attempt}.log"));

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| OrchestratorError::SpawnFailed {
                unit: format!("gate '{gate_name}'"),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        std::fs::write(&log_file, &combined).map_err(|source| OrchestratorError::LogOpenFailed {
            path: log_file.clone(),
            source,
        })?;

        let passed = output.status.success();
        let exit_code = output.status.code().unwrap_or(-1);
        let failures = self.patterns.failures(&combined);
        let summary = self.patterns.summary(&combined);

        tracing::info!(
            gate = gate_name,
            attempt,
            passed,
            failures = failures.len(),
            "gate finished"
        );

        Ok(GateResult {
            passed,
            exit_code,
            summary,
            failures,
            log_file,
        })
    }
}
