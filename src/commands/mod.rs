pub mod archive;
pub mod checksums;
pub mod correct_dates;
pub mod reclaim;

use crate::archiver::engine::{RunOutcome, fatal_message};
use crate::archiver::util::human_size;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }

    /// Copies an engine run's counters and failures into this report.
    pub fn record_run(&mut self, outcome: &RunOutcome) {
        let run = &outcome.report;
        self.detail(format!("copied={}", run.copied));
        self.detail(format!("total={}", run.total));
        self.detail(format!("bytes_copied={}", human_size(run.bytes_copied)));
        if run.validating {
            self.detail(format!("invalid={}", run.invalid));
        }
        if !run.folders.is_empty() {
            self.detail(format!("folders={}", run.folder_names().join(";")));
        }
        if run.diagnostics {
            self.detail("diagnostics=true");
        }

        match &outcome.error {
            Some(err) => self.issue(fatal_message(err)),
            None if run.canceled => self.issue("run canceled before completion"),
            None => {}
        }
        if run.invalid > 0 {
            self.issue(format!("{} of {} files failed validation", run.invalid, run.total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_failures() {
        let mut first = CommandReport::new("archive");
        first.detail("copied=1");
        let mut second = CommandReport::new("archive");
        second.issue("E002_NO_SPACE no space left");
        first.merge(second);
        assert!(!first.ok);
        assert_eq!(first.details, vec!["copied=1".to_string()]);
        assert_eq!(first.issues.len(), 1);
    }
}
