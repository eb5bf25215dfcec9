use anyhow::Result;
use std::path::PathBuf;

use crate::archiver::console::Console;
use crate::archiver::correct::correct_tree_dates;
use crate::archiver::date::DateResolver;
use crate::commands::CommandReport;

#[derive(Debug, Clone)]
pub struct CorrectDatesOptions {
    pub path: PathBuf,
    pub diagnostics: bool,
    pub quiet: bool,
}

pub fn run(opts: &CorrectDatesOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("correct-dates");
    if !opts.path.is_dir() {
        report.issue(format!("not a directory: {}", opts.path.display()));
        return Ok(report);
    }

    let out = correct_tree_dates(
        &opts.path,
        &DateResolver::default(),
        &Console::new(!opts.quiet),
        opts.diagnostics,
    );
    report.detail(format!("seen={}", out.seen));
    report.detail(format!("corrected={}", out.corrected));
    if opts.diagnostics {
        report.detail("diagnostics=true");
    }
    if out.failed > 0 {
        report.issue(format!("{} files could not be updated", out.failed));
    }
    Ok(report)
}
