//! Terminal UI for the pipeline, rendered via `indicatif` progress bars.
//!
//! Two bars are stacked vertically:
//! - Wave bar — tracks how many waves have reached a terminal state
//! - Unit bar — spinner with the currently running stage (tasks, gate, triage)
//!
//! All output goes through `MultiProgress` so bars and log lines interleave
//! cleanly; if the rich UI is unavailable the lines fall back to stderr.

use crate::worker::TaskReport;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// How many still-failing descriptors are echoed when triage gives up.
pub const EXHAUSTED_PREVIEW_LINES: usize = 10;

pub struct PipelineUi {
    multi: MultiProgress,
    wave_bar: ProgressBar,
    unit_bar: ProgressBar,
    verbose: bool,
}

impl PipelineUi {
    pub fn new(total_waves: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let wave_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let wave_bar = multi.add(ProgressBar::new(total_waves));
        wave_bar.set_style(wave_style);
        wave_bar.set_prefix("Waves");

        let unit_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let unit_bar = multi.add(ProgressBar::new_spinner());
        unit_bar.set_style(unit_style);
        unit_bar.set_prefix("     ");

        Self {
            multi,
            wave_bar,
            unit_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails, so terminal problems never swallow a status line.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn start_wave(&self, wave: &str, pending: usize, skipped: usize) {
        self.wave_bar.set_message(style(wave).yellow().to_string());
        if skipped > 0 {
            self.print_line(format!(
                "{} {}: {} task(s) to run, {} already complete",
                style("▶").cyan(),
                wave,
                pending,
                skipped
            ));
        } else {
            self.print_line(format!(
                "{} {}: {} task(s) to run",
                style("▶").cyan(),
                wave,
                pending
            ));
        }
        self.unit_bar.set_message(format!("running tasks for {wave}"));
        self.unit_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn wave_already_satisfied(&self, wave: &str, skipped: usize) {
        self.print_line(format!(
            "{} {}: all {} task(s) already complete",
            style("▶").cyan(),
            wave,
            skipped
        ));
    }

    pub fn task_finished(&self, report: &TaskReport) {
        let line = if report.is_success() {
            format!(
                "  {} {} ({})",
                style("✓").green(),
                report.task_id,
                report.outcome.describe()
            )
        } else {
            format!(
                "  {} {} ({}) log: {}",
                style("✗").red(),
                report.task_id,
                report.outcome.describe(),
                report.log_file.display()
            )
        };
        self.print_line(line);
    }

    pub fn gate_running(&self, wave: &str, attempt: u32) {
        let msg = if attempt == 0 {
            format!("gate for {wave}")
        } else {
            format!("gate for {wave} (re-run {attempt})")
        };
        self.unit_bar.set_message(msg);
        self.unit_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn gate_passed(&self, wave: &str, summary: Option<&str>) {
        self.unit_bar.disable_steady_tick();
        match summary {
            Some(s) => self.print_line(format!(
                "  {} gate passed for {}: {}",
                style("✓").green(),
                wave,
                style(s).dim()
            )),
            None => self.print_line(format!("  {} gate passed for {}", style("✓").green(), wave)),
        }
    }

    pub fn gate_failed(&self, wave: &str, failures: &[String], log_file: &Path) {
        self.unit_bar.disable_steady_tick();
        self.print_line(format!(
            "  {} gate failed for {} with {} failure(s), log: {}",
            style("✗").red(),
            wave,
            failures.len(),
            log_file.display()
        ));
        if self.verbose {
            for failure in failures {
                self.print_line(format!("      {failure}"));
            }
        }
    }

    pub fn triage_attempt(&self, wave: &str, attempt: u32, budget: u32) {
        self.print_line(format!(
            "  {} triage attempt {}/{} for {}",
            style("⟳").yellow(),
            attempt,
            budget,
            wave
        ));
        self.unit_bar
            .set_message(format!("repairing {wave} (attempt {attempt}/{budget})"));
        self.unit_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn triage_resolved(&self, wave: &str, attempts: u32) {
        self.unit_bar.disable_steady_tick();
        self.print_line(format!(
            "  {} {} resolved after {} attempt(s)",
            style("✓").green(),
            wave,
            attempts
        ));
    }

    pub fn triage_exhausted(&self, wave: &str, failures: &[String], journal: &Path) {
        self.unit_bar.disable_steady_tick();
        self.print_line(format!(
            "  {} triage budget exhausted for {}, {} failure(s) remain:",
            style("✗").red(),
            wave,
            failures.len()
        ));
        for failure in failures.iter().take(EXHAUSTED_PREVIEW_LINES) {
            self.print_line(format!("      {failure}"));
        }
        if failures.len() > EXHAUSTED_PREVIEW_LINES {
            self.print_line(format!(
                "      ... and {} more",
                failures.len() - EXHAUSTED_PREVIEW_LINES
            ));
        }
        self.print_line(format!(
            "  journal for manual follow-up: {}",
            journal.display()
        ));
    }

    pub fn backlog_items_noted(&self, ids: &[String]) {
        self.print_line(format!(
            "  {} deferred to backlog: {}",
            style("●").yellow(),
            ids.join(", ")
        ));
    }

    pub fn backlog_pass_started(&self, open: usize) {
        self.print_line(format!(
            "{} backlog pass: {} open item(s)",
            style("▶").cyan(),
            open
        ));
    }

    pub fn backlog_item_started(&self, id: &str, summary: &str) {
        self.unit_bar.set_message(format!("repairing backlog item {id}"));
        self.unit_bar.enable_steady_tick(Duration::from_millis(100));
        if self.verbose {
            self.print_line(format!("  {} {}: {}", style("⟳").yellow(), id, summary));
        }
    }

    pub fn backlog_item_finished(&self, id: &str, closed: bool) {
        self.unit_bar.disable_steady_tick();
        if closed {
            self.print_line(format!("  {} {} closed", style("✓").green(), id));
        } else {
            self.print_line(format!("  {} {} still open", style("✗").red(), id));
        }
    }

    pub fn wave_passed(&self, wave: &str) {
        self.wave_bar.inc(1);
        self.print_line(format!("{} {} passed", style("✔").green().bold(), wave));
    }

    pub fn wave_blocked(&self, wave: &str) {
        self.wave_bar.inc(1);
        self.print_line(format!("{} {} blocked", style("✖").red().bold(), wave));
    }

    pub fn finish(&self, message: &str) {
        self.unit_bar.finish_and_clear();
        self.wave_bar.finish_with_message(message.to_string());
    }
}
