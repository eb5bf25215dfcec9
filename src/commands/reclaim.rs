use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::archiver::console::Console;
use crate::archiver::reclaim::SpaceReclaimer;
use crate::archiver::util::human_size;
use crate::commands::CommandReport;

#[derive(Debug, Clone)]
pub struct ReclaimOptions {
    pub destination: PathBuf,
    pub bytes: u64,
    pub diagnostics: bool,
    pub quiet: bool,
}

pub fn run(opts: &ReclaimOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("reclaim");
    if !opts.destination.is_dir() {
        report.issue(format!("not a directory: {}", opts.destination.display()));
        return Ok(report);
    }

    let console = Console::new(!opts.quiet);
    let freed = SpaceReclaimer::new(&console, opts.diagnostics)
        .reclaim(&opts.destination, opts.bytes)
        .with_context(|| format!("failed to reclaim space in {}", opts.destination.display()))?;

    report.detail(format!("requested={}", opts.bytes));
    report.detail(format!("freed={freed}"));
    if opts.diagnostics {
        report.detail("diagnostics=true");
    }
    if freed < opts.bytes {
        report.issue(format!(
            "archive exhausted: freed {} of {} requested",
            human_size(freed),
            human_size(opts.bytes)
        ));
    }
    Ok(report)
}
