//! Per-gate triage journal.
//!
//! One append-only file per gate, truncated at the start of each triage
//! sequence and growing by at least one section per attempt within it. Both
//! the orchestrator (attempt preamble, post-gate outcome) and the external
//! repair process (its own classification entry) write here.

use crate::errors::OrchestratorError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Text handed to the first repair attempt, when no history exists yet.
pub const EMPTY_SENTINEL: &str = "No prior triage attempts have been recorded for this gate.";

#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, gate: &str) -> PathBuf {
        self.dir.join(format!("journal-{gate}.md"))
    }

    /// Begin a fresh sequence: any previous sequence's history is discarded.
    pub fn reset(&self, gate: &str) -> Result<(), OrchestratorError> {
        let path = self.path_for(gate);
        std::fs::write(&path, "").map_err(|source| OrchestratorError::JournalWriteFailed {
            path,
            source,
        })
    }

    pub fn append(&self, gate: &str, text: &str) -> Result<(), OrchestratorError> {
        let path = self.path_for(gate);
        let append_err = |source| OrchestratorError::JournalWriteFailed {
            path: self.path_for(gate),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(append_err)?;
        file.write_all(text.as_bytes()).map_err(append_err)?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").map_err(append_err)?;
        }
        Ok(())
    }

    /// Full journal text, or the empty sentinel if nothing has been written
    /// in the current sequence.
    pub fn read(&self, gate: &str) -> Result<String, OrchestratorError> {
        match std::fs::read_to_string(self.path_for(gate)) {
            Ok(content) if content.trim().is_empty() => Ok(EMPTY_SENTINEL.to_string()),
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EMPTY_SENTINEL.to_string()),
            Err(source) => Err(OrchestratorError::JournalReadFailed {
                path: self.path_for(gate),
                source,
            }),
        }
    }

    /// Whether a journal file exists for this gate at all. A gate that never
    /// needed triage never gets one.
    pub fn exists(&self, gate: &str) -> bool {
        self.path_for(gate).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unwritten_journal_reads_as_the_sentinel() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        assert!(!journal.exists("wave-1"));
        assert_eq!(journal.read("wave-1").unwrap(), EMPTY_SENTINEL);
    }

    #[test]
    fn reset_then_read_is_still_the_sentinel() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.reset("wave-1").unwrap();
        assert!(journal.exists("wave-1"));
        assert_eq!(journal.read("wave-1").unwrap(), EMPTY_SENTINEL);
    }

    #[test]
    fn appends_accumulate_within_a_sequence() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.reset("wave-1").unwrap();
        journal.append("wave-1", "### Attempt 1\nsaw two failures").unwrap();
        journal.append("wave-1", "### Attempt 2\nsaw one failure").unwrap();

        let text = journal.read("wave-1").unwrap();
        assert!(text.contains("Attempt 1"));
        assert!(text.contains("Attempt 2"));
        let attempt1 = text.find("Attempt 1").unwrap();
        let attempt2 = text.find("Attempt 2").unwrap();
        assert!(attempt1 < attempt2);
    }

    #[test]
    fn reset_discards_the_previous_sequence() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.append("wave-1", "stale history").unwrap();
        journal.reset("wave-1").unwrap();
        assert_eq!(journal.read("wave-1").unwrap(), EMPTY_SENTINEL);
    }

    #[test]
    fn gates_have_independent_journals() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.append("wave-1", "first gate").unwrap();
        assert_eq!(journal.read("wave-2").unwrap(), EMPTY_SENTINEL);
        assert!(journal.read("wave-1").unwrap().contains("first gate"));
    }

    #[test]
    fn append_terminates_lines() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.append("wave-1", "no trailing newline").unwrap();
        journal.append("wave-1", "next entry").unwrap();
        let text = journal.read("wave-1").unwrap();
        assert!(text.contains("no trailing newline\nnext entry"));
    }
}
