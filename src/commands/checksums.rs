use anyhow::Result;
use std::path::PathBuf;

use crate::archiver::audit;
use crate::archiver::config::{ChecksumMode, load_config};
use crate::archiver::console::Console;
use crate::archiver::engine::{ArchiveEngine, EngineOptions};
use crate::archiver::paths::resolve_paths;
use crate::commands::CommandReport;

#[derive(Debug, Clone)]
pub struct ChecksumOptions {
    pub source: PathBuf,
    pub ledger_root: Option<PathBuf>,
    pub mode: ChecksumMode,
    pub log_file: Option<PathBuf>,
    pub quiet: bool,
}

fn command_name(mode: ChecksumMode) -> &'static str {
    match mode {
        ChecksumMode::ValidateOnly => "validate",
        _ => "update-checksums",
    }
}

/// Walks an archive tree and checks or refreshes its ledgers. Nothing is copied.
pub fn run(opts: &ChecksumOptions) -> Result<CommandReport> {
    let name = command_name(opts.mode);
    let mut report = CommandReport::new(name);
    if !opts.source.exists() {
        report.issue(format!(
            "Please specify a valid folder or file: {}",
            opts.source.display()
        ));
        return Ok(report);
    }

    let archive_root = if opts.source.is_file() {
        opts.source
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| opts.source.clone())
    } else {
        opts.source.clone()
    };

    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths)?;
    cfg.archive.destination = Some(archive_root.clone());
    cfg.archive.move_destination = None;
    cfg.archive.move_files = false;
    cfg.archive.rotate = false;
    cfg.archive.diagnostics = false;
    cfg.archive.checksum_mode = opts.mode;
    if opts.log_file.is_some() {
        cfg.archive.log_file = opts.log_file.clone();
    }

    let mut engine_opts = EngineOptions::from_config(&cfg)?;
    engine_opts.ledger_root = opts.ledger_root.clone().unwrap_or(archive_root);
    report.detail(format!("ledger_root={}", engine_opts.ledger_root.display()));

    let console = Console::new(cfg.archive.verbose && !opts.quiet);
    let outcome = ArchiveEngine::new(engine_opts, console).run(std::slice::from_ref(&opts.source));
    report.record_run(&outcome);

    let status = if outcome.report.is_clean() { "ok" } else { "failed" };
    let message = format!(
        "{} checked, {} invalid",
        outcome.report.total, outcome.report.invalid
    );
    if let Err(err) = audit::append_event(&paths, name, status, &message) {
        report.detail(format!("audit log not written: {err:#}"));
    }
    Ok(report)
}
