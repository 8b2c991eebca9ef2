//! Typed error hierarchy for the wavegate orchestrator.
//!
//! Two top-level enums cover the two subsystems:
//! - `OrchestratorError` — process plumbing and durable-artifact failures
//! - `PipelineError` — plan resolution and whole-run failures
//!
//! Worker and gate *outcomes* (a task that ran but never marked itself done,
//! a verification command that reported failures) are not errors; they are
//! ordinary results carried by `worker::TaskOutcome` and `gate::GateResult`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from process plumbing and the durable artifacts the orchestrator owns.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to spawn process for {unit}: {source}")]
    SpawnFailed {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log file at {path}: {source}")]
    LogOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read ledger at {path}: {source}")]
    LedgerReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write ledger at {path}: {source}")]
    LedgerWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write journal at {path}: {source}")]
    JournalWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read journal at {path}: {source}")]
    JournalReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid gate pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors that decide the fate of a whole pipeline run before it can start
/// or while it is sequencing waves.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Wave '{wave}' is not defined in the plan")]
    UnknownWave { wave: String },

    #[error("Plan file not found at {path}. Run 'wavegate init' first.")]
    MissingPlan { path: PathBuf },

    #[error("Plan is invalid: {message}")]
    InvalidPlan { message: String },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
