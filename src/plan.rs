//! Wave plan definition and JSON loading.
//!
//! A plan is an ordered list of waves; each wave is an unordered set of
//! mutually independent tasks. Wave order is fixed when the plan is written
//! and is the pipeline's unit of sequencing.

use crate::errors::PipelineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Smallest independently schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Stable identifier, matching the task's ledger record (e.g. "T07").
    pub id: String,
    /// Human-readable description, passed to the worker payload.
    #[serde(default)]
    pub summary: String,
}

impl Task {
    pub fn new(id: &str, summary: &str) -> Self {
        Self {
            id: id.to_string(),
            summary: summary.to_string(),
        }
    }
}

/// An ordered group of independent tasks, gated as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wave {
    pub name: String,
    pub tasks: Vec<Task>,
}

impl Wave {
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }
}

/// Lifecycle of a wave within one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// Tasks submitted to the pool.
    Running,
    /// Tasks drained, awaiting the gate verdict.
    Gated,
    /// Gate passed, directly or via triage.
    Passed,
    /// Triage budget exhausted without a passing gate.
    Blocked,
}

impl WaveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Blocked)
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Stage token used in the run state file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Gated => "gated",
            Self::Passed => "passed",
            Self::Blocked => "blocked",
        }
    }

    /// Inverse of [`Self::as_str`], for reading state records back.
    pub fn from_stage(stage: &str) -> Option<Self> {
        match stage {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "gated" => Some(Self::Gated),
            "passed" => Some(Self::Passed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// The full plan.json file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Timestamp when the plan was written.
    pub generated_at: String,
    /// Waves in execution order.
    pub waves: Vec<Wave>,
}

impl Plan {
    /// Load and validate a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingPlan {
                path: path.to_path_buf(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let plan: Plan = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Save the plan to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize plan to JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
        Ok(())
    }

    /// Reject plans that could make scheduling ambiguous: unnamed waves,
    /// duplicate wave names, or a task id claimed by more than one wave.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut wave_names = HashSet::new();
        let mut task_ids = HashSet::new();
        for wave in &self.waves {
            if wave.name.trim().is_empty() {
                return Err(PipelineError::InvalidPlan {
                    message: "wave with an empty name".to_string(),
                });
            }
            if !wave_names.insert(wave.name.as_str()) {
                return Err(PipelineError::InvalidPlan {
                    message: format!("duplicate wave name '{}'", wave.name),
                });
            }
            for task in &wave.tasks {
                if task.id.trim().is_empty() {
                    return Err(PipelineError::InvalidPlan {
                        message: format!("wave '{}' contains a task with an empty id", wave.name),
                    });
                }
                if !task_ids.insert(task.id.as_str()) {
                    return Err(PipelineError::InvalidPlan {
                        message: format!("task id '{}' appears in more than one wave", task.id),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get_wave(&self, name: &str) -> Option<&Wave> {
        self.waves.iter().find(|w| w.name == name)
    }

    /// Waves at or after the named wave, preserving order. `None` means the
    /// whole plan. An unknown name is an error rather than an empty run.
    pub fn starting_from(&self, name: Option<&str>) -> Result<Vec<&Wave>, PipelineError> {
        match name {
            None => Ok(self.waves.iter().collect()),
            Some(start) => {
                let pos = self
                    .waves
                    .iter()
                    .position(|w| w.name == start)
                    .ok_or_else(|| PipelineError::UnknownWave {
                        wave: start.to_string(),
                    })?;
                Ok(self.waves[pos..].iter().collect())
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.waves.iter().map(|w| w.tasks.len()).sum()
    }

    /// Starter plan written by `wavegate init`.
    pub fn sample() -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            waves: vec![
                Wave {
                    name: "wave-1".to_string(),
                    tasks: vec![
                        Task::new("T01", "describe the first unit of work"),
                        Task::new("T02", "describe the second unit of work"),
                    ],
                },
                Wave {
                    name: "wave-2".to_string(),
                    tasks: vec![Task::new("T03", "work that depends on wave-1 artifacts")],
                },
            ],
        }
    }
}
