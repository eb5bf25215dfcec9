use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::archiver::audit;
use crate::archiver::cancel::CancelFlag;
use crate::archiver::config::{ArcConfig, ChecksumMode, load_config};
use crate::archiver::console::Console;
use crate::archiver::engine::{ArchiveEngine, EngineOptions};
use crate::archiver::ownership::Ownership;
use crate::archiver::paths::resolve_paths;
use crate::archiver::storage::{LocalStorage, Storage};
use crate::archiver::util::human_size;
use crate::commands::CommandReport;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub sources: Vec<PathBuf>,
    pub destination: Option<PathBuf>,
    pub move_destination: Option<PathBuf>,
    pub move_files: bool,
    pub diagnostics: bool,
    pub rotate: bool,
    pub log_file: Option<PathBuf>,
    pub exclude_extensions: Vec<String>,
    pub older_than: Option<String>,
    pub checksum_mode: Option<ChecksumMode>,
    pub scan_only: bool,
    pub no_video: bool,
    pub quiet: bool,
}

fn apply_overrides(cfg: &mut ArcConfig, opts: &ArchiveOptions) {
    let a = &mut cfg.archive;
    if let Some(dest) = &opts.destination {
        a.destination = Some(dest.clone());
    }
    if let Some(relay) = &opts.move_destination {
        a.move_destination = Some(relay.clone());
    }
    a.move_files |= opts.move_files;
    a.diagnostics |= opts.diagnostics;
    a.rotate |= opts.rotate;
    if opts.no_video {
        a.include_video = false;
    }
    if opts.quiet {
        a.verbose = false;
    }
    if let Some(log_file) = &opts.log_file {
        a.log_file = Some(log_file.clone());
    }
    a.exclude_extensions
        .extend(opts.exclude_extensions.iter().cloned());
    if let Some(cutoff) = &opts.older_than {
        a.exclude_older_than = Some(cutoff.clone());
    }
    if let Some(mode) = opts.checksum_mode {
        a.checksum_mode = mode;
    }
    if !opts.sources.is_empty() {
        a.source_folders = opts.sources.clone();
    }
}

fn scan_sources(sources: &[PathBuf]) -> CommandReport {
    let mut report = CommandReport::new("archive");
    for source in sources {
        let state = if !source.exists() {
            "not-found"
        } else if source.join(".no_backup").exists() {
            "ignored"
        } else {
            "ready"
        };
        report.detail(format!("source={} state={state}", source.display()));
    }
    report
}

pub fn run(opts: &ArchiveOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = load_config(&paths)?;
    apply_overrides(&mut cfg, opts);
    cfg.validate()?;

    let mut report = CommandReport::new("archive");
    report.detail(format!("arcpics_home={}", paths.home.display()));
    let sources = cfg.archive.source_folders.clone();
    if sources.is_empty() {
        report.issue("no sources given; pass SOURCES or set archive.source_folders");
        return Ok(report);
    }
    if opts.scan_only {
        report.merge(scan_sources(&sources));
        return Ok(report);
    }

    let engine_opts = EngineOptions::from_config(&cfg)?;
    let console = Console::new(cfg.archive.verbose);

    let ownership = if cfg.ownership.is_empty() {
        Ownership::none()
    } else {
        match Ownership::resolve(&cfg.ownership) {
            Ok(ownership) => ownership,
            Err(err) => {
                console.error(&err);
                report.detail(format!("ownership disabled: {err}"));
                Ownership::none()
            }
        }
    };
    console.info(&format!(
        "Backup location: {} {}",
        engine_opts.destination.display(),
        ownership.label()
    ));

    if let Some(min_mb) = cfg.archive.min_free_mb {
        let free = LocalStorage
            .available_space(&engine_opts.destination)
            .with_context(|| {
                format!(
                    "failed to read free space of {}",
                    engine_opts.destination.display()
                )
            })?;
        if free < min_mb.saturating_mul(MIB) {
            report.issue(format!(
                "No enough space in {}: {} free, {min_mb}MiB required",
                engine_opts.destination.display(),
                human_size(free)
            ));
            return Ok(report);
        }
    }

    let cancel = CancelFlag::new();
    cancel
        .install_signal_handlers()
        .context("failed to install signal handlers")?;

    let outcome = ArchiveEngine::new(engine_opts, console)
        .with_ownership(ownership)
        .with_cancel(cancel)
        .run(&sources);
    report.record_run(&outcome);

    let status = if outcome.report.is_clean() { "ok" } else { "failed" };
    let message = format!("{} of {} files copied", outcome.report.copied, outcome.report.total);
    if let Err(err) = audit::append_event(&paths, "archive", status, &message) {
        report.detail(format!("audit log not written: {err:#}"));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_config_file() {
        let mut cfg = ArcConfig::default();
        cfg.archive.destination = Some(PathBuf::from("/from/config"));
        cfg.archive.exclude_extensions = vec!["thm".to_string()];
        cfg.archive.source_folders = vec![PathBuf::from("/card")];

        let opts = ArchiveOptions {
            destination: Some(PathBuf::from("/from/cli")),
            exclude_extensions: vec!["lrv".to_string()],
            checksum_mode: Some(ChecksumMode::None),
            no_video: true,
            quiet: true,
            ..Default::default()
        };
        apply_overrides(&mut cfg, &opts);

        assert_eq!(cfg.archive.destination, Some(PathBuf::from("/from/cli")));
        assert_eq!(cfg.archive.exclude_extensions, vec!["thm", "lrv"]);
        assert_eq!(cfg.archive.checksum_mode, ChecksumMode::None);
        assert_eq!(cfg.archive.source_folders, vec![PathBuf::from("/card")]);
        assert!(!cfg.archive.include_video);
        assert!(!cfg.archive.verbose);
    }

    #[test]
    fn scan_reports_source_states() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ignored = tmp.path().join("ignored");
        std::fs::create_dir_all(&ignored).expect("mkdir");
        std::fs::write(ignored.join(".no_backup"), b"").expect("marker");

        let report = scan_sources(&[ignored, tmp.path().join("missing")]);
        assert!(report.details[0].ends_with("state=ignored"));
        assert!(report.details[1].ends_with("state=not-found"));
    }
}
