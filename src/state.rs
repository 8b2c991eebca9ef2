//! Append-only run state, one pipe-delimited record per transition.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

/// Record name used for pipeline-level transitions (run start, backlog pass).
pub const PIPELINE_RECORD: &str = "pipeline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub name: String,
    pub stage: String,
    pub timestamp: String,
}

pub struct StateManager {
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    /// Append a `name|stage|timestamp` record.
    pub fn save(&self, name: &str, stage: &str) -> Result<()> {
        let entry = format!("{}|{}|{}\n", name, stage, Utc::now().to_rfc3339());
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .context("Failed to open state file")?
            .write_all(entry.as_bytes())
            .context("Failed to write state entry")?;
        Ok(())
    }

    pub fn start_run(&self, run_id: Uuid) -> Result<()> {
        self.save(PIPELINE_RECORD, &format!("run-started {run_id}"))
    }

    pub fn entries(&self) -> Result<Vec<StateEntry>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;
        Ok(content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.splitn(3, '|').collect();
                if parts.len() == 3 {
                    Some(StateEntry {
                        name: parts[0].to_string(),
                        stage: parts[1].to_string(),
                        timestamp: parts[2].to_string(),
                    })
                } else {
                    None
                }
            })
            .collect())
    }

    /// The most recently passed wave, if any.
    pub fn last_passed_wave(&self) -> Option<String> {
        self.entries()
            .ok()?
            .iter()
            .rev()
            .find(|e| e.stage == "passed" && e.name != PIPELINE_RECORD)
            .map(|e| e.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_append_in_order() {
        let dir = tempdir().unwrap();
        let state = StateManager::new(dir.path().join("state"));
        state.save("wave-1", "started").unwrap();
        state.save("wave-1", "gated").unwrap();
        state.save("wave-1", "passed").unwrap();

        let entries = state.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].stage, "started");
        assert_eq!(entries[2].stage, "passed");
    }

    #[test]
    fn last_passed_wave_skips_pipeline_records() {
        let dir = tempdir().unwrap();
        let state = StateManager::new(dir.path().join("state"));
        state.start_run(Uuid::new_v4()).unwrap();
        state.save("wave-1", "passed").unwrap();
        state.save("wave-2", "blocked").unwrap();
        state.save(PIPELINE_RECORD, "passed").unwrap();

        assert_eq!(state.last_passed_wave().as_deref(), Some("wave-1"));
    }

    #[test]
    fn missing_state_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let state = StateManager::new(dir.path().join("absent"));
        assert!(state.entries().unwrap().is_empty());
        assert!(state.last_passed_wave().is_none());
    }
}
