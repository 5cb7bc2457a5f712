//! TAP-style pass/fail report

use colored::Colorize;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io::{self, Write};

/// One reported task result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub ok: bool,
    pub describe: String,
    pub detail: Option<String>,
}

/// Accumulates task results from every running task
#[derive(Debug, Default)]
pub struct Report {
    entries: Mutex<Vec<ReportEntry>>,
    color: bool,
}

impl Report {
    pub fn new() -> Self {
        Report {
            entries: Mutex::new(Vec::new()),
            color: true,
        }
    }

    /// Report without terminal colors
    pub fn plain() -> Self {
        Report::default()
    }

    pub fn ok(&self, describe: &str) {
        self.record(true, describe, None);
    }

    pub fn not_ok(&self, describe: &str, detail: impl Into<String>) {
        self.record(false, describe, Some(detail.into()));
    }

    pub fn record(&self, ok: bool, describe: &str, detail: Option<String>) {
        self.entries.lock().push(ReportEntry {
            ok,
            describe: describe.to_string(),
            detail,
        });
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn failed(&self) -> usize {
        self.entries.lock().iter().filter(|e| !e.ok).count()
    }

    /// Render the results followed by the plan line
    pub fn render(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();

        for (i, entry) in entries.iter().enumerate() {
            let status = match (entry.ok, self.color) {
                (true, true) => "ok".green().to_string(),
                (false, true) => "not ok".red().bold().to_string(),
                (true, false) => "ok".to_string(),
                (false, false) => "not ok".to_string(),
            };
            let _ = writeln!(out, "{} {} - {}", status, i + 1, entry.describe);
            if let Some(detail) = &entry.detail {
                let _ = writeln!(out, "  # {}", detail);
            }
        }
        let _ = writeln!(out, "1..{}", entries.len());
        out
    }

    /// Write the report to stdout
    pub fn emit(&self) {
        let rendered = self.render();
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(rendered.as_bytes());
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let report = Report::plain();
        report.ok("start busybox: echo hi");
        report.not_ok("start loader", "exit code 2");

        assert_eq!(report.len(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.render(),
            "ok 1 - start busybox: echo hi\nnot ok 2 - start loader\n  # exit code 2\n1..2\n"
        );
    }

    #[test]
    fn test_empty_report_has_plan() {
        let report = Report::plain();
        assert!(report.is_empty());
        assert_eq!(report.render(), "1..0\n");
    }
}
