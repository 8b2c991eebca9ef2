//! Durable completion store backed by a human-readable checklist file.
//!
//! The ledger is the single source of truth for "is this unit of work done".
//! Each record is one checklist line:
//!
//! ```text
//! - [ ] T07: render the status column
//! - [x] B03: off-by-one in the wrap logic
//! ```
//!
//! Task ids and backlog ids live in disjoint namespaces (backlog ids are a
//! prefix plus a monotonically increasing number), so scanning never
//! conflates the two. External worker processes mark their own line done;
//! the orchestrator mostly reads. Completion is monotonic: nothing here ever
//! flips a `[x]` back to `[ ]`.
//!
//! Writes go through a temp file renamed into place while holding an
//! exclusive sidecar lock, so a crashed or concurrent writer can never leave
//! a half-written record behind.

use crate::errors::OrchestratorError;
use fs2::FileExt;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ENTRY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^- \[([ xX])\] ([A-Za-z][A-Za-z0-9_-]*)(?::\s*(.*))?$").unwrap()
});

/// One parsed checklist record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub done: bool,
    pub summary: String,
}

/// Narrow contract for completion storage.
///
/// The flat-file backend below is the only implementation shipped, but the
/// orchestrator only ever talks through this trait, so the backing store is
/// swappable without touching scheduling code.
pub trait CompletionStore {
    /// Whether the record for `id` exists and is marked closed.
    fn is_done(&self, id: &str) -> Result<bool, OrchestratorError>;

    /// Close the record for `id`, appending one if it does not exist.
    /// Closing an already-closed record is a no-op.
    fn mark_done(&self, id: &str) -> Result<(), OrchestratorError>;

    /// Highest number used by any `<prefix><number>` id, open or closed.
    /// Returns 0 when the namespace is empty.
    fn highest_id(&self, prefix: &str) -> Result<u32, OrchestratorError>;
}

/// Checklist-file ledger.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All checklist records, in file order. Lines that are not checklist
    /// records (headers, blanks, prose) are skipped.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, OrchestratorError> {
        let content = self.read_raw()?;
        Ok(content.lines().filter_map(parse_line).collect())
    }

    /// Open records in the `<prefix><number>` namespace, ascending by number
    /// and deduplicated by id.
    pub fn open_items(&self, prefix: &str) -> Result<Vec<LedgerEntry>, OrchestratorError> {
        let mut items: Vec<(u32, LedgerEntry)> = Vec::new();
        for entry in self.entries()? {
            if entry.done {
                continue;
            }
            if let Some(n) = numbered_id(&entry.id, prefix)
                && !items.iter().any(|(_, e)| e.id == entry.id)
            {
                items.push((n, entry));
            }
        }
        items.sort_by_key(|(n, _)| *n);
        Ok(items.into_iter().map(|(_, e)| e).collect())
    }

    /// Append an open record, unless a record for `id` already exists.
    pub fn append_open(&self, id: &str, summary: &str) -> Result<(), OrchestratorError> {
        self.locked_rewrite(|content| {
            if content.lines().filter_map(parse_line).any(|e| e.id == id) {
                return content.to_string();
            }
            let mut out = ensure_trailing_newline(content);
            out.push_str(&format_line(false, id, summary));
            out.push('\n');
            out
        })
    }

    fn read_raw(&self) -> Result<String, OrchestratorError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(OrchestratorError::LedgerReadFailed {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Rewrite the ledger through `f` under an exclusive sidecar lock,
    /// publishing the result with a rename so readers never observe a
    /// partial file.
    fn locked_rewrite<F>(&self, f: F) -> Result<(), OrchestratorError>
    where
        F: FnOnce(&str) -> String,
    {
        let write_err = |e: std::io::Error| OrchestratorError::LedgerWriteFailed {
            path: self.path.clone(),
            source: e,
        };

        let lock_path = sidecar_lock_path(&self.path);
        let lock = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(write_err)?;
        lock.lock_exclusive().map_err(write_err)?;

        let current = self.read_raw()?;
        let next = f(&current);

        let tmp_path = self.path.with_extension("md.tmp");
        fs::write(&tmp_path, next).map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        // Lock released when `lock` drops.
        Ok(())
    }
}

impl CompletionStore for FileLedger {
    fn is_done(&self, id: &str) -> Result<bool, OrchestratorError> {
        let content = self.read_raw()?;
        Ok(content
            .lines()
            .filter_map(parse_line)
            .any(|e| e.id == id && e.done))
    }

    fn mark_done(&self, id: &str) -> Result<(), OrchestratorError> {
        self.locked_rewrite(|content| {
            let mut found = false;
            let mut lines: Vec<String> = Vec::new();
            for line in content.lines() {
                match parse_line(line) {
                    Some(entry) if entry.id == id => {
                        found = true;
                        lines.push(format_line(true, &entry.id, &entry.summary));
                    }
                    _ => lines.push(line.to_string()),
                }
            }
            if !found {
                lines.push(format_line(true, id, ""));
            }
            let mut out = lines.join("\n");
            out.push('\n');
            out
        })
    }

    fn highest_id(&self, prefix: &str) -> Result<u32, OrchestratorError> {
        Ok(self
            .entries()?
            .iter()
            .filter_map(|e| numbered_id(&e.id, prefix))
            .max()
            .unwrap_or(0))
    }
}

fn parse_line(line: &str) -> Option<LedgerEntry> {
    let caps = ENTRY_REGEX.captures(line.trim_end())?;
    Some(LedgerEntry {
        id: caps.get(2)?.as_str().to_string(),
        done: caps.get(1)?.as_str() != " ",
        summary: caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

fn format_line(done: bool, id: &str, summary: &str) -> String {
    let marker = if done { 'x' } else { ' ' };
    if summary.is_empty() {
        format!("- [{marker}] {id}")
    } else {
        format!("- [{marker}] {id}: {summary}")
    }
}

/// Parse `id` as `<prefix><number>`; anything else is outside the namespace.
fn numbered_id(id: &str, prefix: &str) -> Option<u32> {
    let rest = id.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn sidecar_lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "ledger".to_string());
    name.push_str(".lock");
    path.with_file_name(name)
}

fn ensure_trailing_newline(content: &str) -> String {
    if content.is_empty() || content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ledger_with(content: &str) -> (tempfile::TempDir, FileLedger) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.md");
        fs::write(&path, content).unwrap();
        (dir, FileLedger::new(path))
    }

    #[test]
    fn parses_open_and_closed_records() {
        let (_dir, ledger) = ledger_with("- [ ] T01: first\n- [x] T02: second\n");
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].done);
        assert_eq!(entries[0].id, "T01");
        assert_eq!(entries[0].summary, "first");
        assert!(entries[1].done);
    }

    #[test]
    fn skips_non_record_lines() {
        let (_dir, ledger) = ledger_with("# Ledger\n\nsome prose\n- [ ] T01: real\n");
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "T01");
    }

    #[test]
    fn is_done_distinguishes_open_from_closed() {
        let (_dir, ledger) = ledger_with("- [ ] T01: open\n- [x] T02: closed\n");
        assert!(!ledger.is_done("T01").unwrap());
        assert!(ledger.is_done("T02").unwrap());
        assert!(!ledger.is_done("T99").unwrap());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let ledger = FileLedger::new(dir.path().join("absent.md"));
        assert!(ledger.entries().unwrap().is_empty());
        assert!(!ledger.is_done("T01").unwrap());
        assert_eq!(ledger.highest_id("B").unwrap(), 0);
    }

    #[test]
    fn mark_done_flips_existing_record_in_place() {
        let (_dir, ledger) = ledger_with("# Ledger\n- [ ] T01: the work\n- [ ] T02: other\n");
        ledger.mark_done("T01").unwrap();
        assert!(ledger.is_done("T01").unwrap());
        assert!(!ledger.is_done("T02").unwrap());

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert!(content.contains("# Ledger"));
        assert!(content.contains("- [x] T01: the work"));
        assert!(content.contains("- [ ] T02: other"));
    }

    #[test]
    fn mark_done_appends_when_record_is_missing() {
        let (_dir, ledger) = ledger_with("- [ ] T01: existing\n");
        ledger.mark_done("B01").unwrap();
        assert!(ledger.is_done("B01").unwrap());
    }

    #[test]
    fn mark_done_is_idempotent_and_never_unmarks() {
        let (_dir, ledger) = ledger_with("- [x] T01: already closed\n");
        ledger.mark_done("T01").unwrap();
        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.matches("T01").count(), 1);
        assert!(ledger.is_done("T01").unwrap());
    }

    #[test]
    fn highest_id_scans_the_whole_namespace() {
        let (_dir, ledger) = ledger_with(
            "- [x] B01: fixed\n- [ ] B03: open\n- [ ] B02: open\n- [ ] T07: not backlog\n",
        );
        assert_eq!(ledger.highest_id("B").unwrap(), 3);
        assert_eq!(ledger.highest_id("Z").unwrap(), 0);
    }

    #[test]
    fn highest_id_ignores_lookalike_ids() {
        let (_dir, ledger) = ledger_with("- [ ] B12x: not numeric\n- [ ] B: bare prefix\n");
        assert_eq!(ledger.highest_id("B").unwrap(), 0);
    }

    #[test]
    fn open_items_are_sorted_and_deduplicated() {
        let (_dir, ledger) = ledger_with(
            "- [ ] B03: late\n- [ ] B01: early\n- [ ] B01: early again\n- [x] B02: closed\n",
        );
        let items = ledger.open_items("B").unwrap();
        let ids: Vec<&str> = items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["B01", "B03"]);
    }

    #[test]
    fn append_open_skips_existing_ids() {
        let (_dir, ledger) = ledger_with("- [x] T01: done\n");
        ledger.append_open("T01", "duplicate").unwrap();
        ledger.append_open("T02", "fresh").unwrap();

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.matches("T01").count(), 1);
        assert!(content.contains("- [ ] T02: fresh"));
        // The existing closed record must survive untouched.
        assert!(ledger.is_done("T01").unwrap());
    }

    #[test]
    fn rewrite_leaves_no_temp_file_behind() {
        let (dir, ledger) = ledger_with("- [ ] T01\n");
        ledger.mark_done("T01").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
