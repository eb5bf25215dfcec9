//! Directory-walking archive state machine.
//!
//! Every regular file goes through
//! `Discovered -> DateResolved -> PlacementComputed -> PlacementChecked ->
//! {Skipped | Copied | Moved} -> ChecksumRecorded -> Counted`.
//! The walk is single-threaded and depth-first. At most one ledger partition
//! is open at a time; it is swapped whenever the content year changes.

use crate::archiver::cancel::CancelFlag;
use crate::archiver::config::{ArcConfig, ChecksumMode, PostProcessConfig};
use crate::archiver::console::Console;
use crate::archiver::date::{DateResolver, local_epoch_secs};
use crate::archiver::ledger::{ChecksumLedger, LEDGER_DIR, file_checksum, partition_path};
use crate::archiver::media::{MediaFile, MediaKind, extension_of};
use crate::archiver::ownership::Ownership;
use crate::archiver::placement::Placement;
use crate::archiver::post_process;
use crate::archiver::reclaim::SpaceReclaimer;
use crate::archiver::report::{RunReport, RunState};
use crate::archiver::storage::{LocalStorage, Storage, is_out_of_space};
use crate::archiver::warn::{self, WarnEvent};
use crate::error::ArchiveError;
use chrono::{Datelike, NaiveDateTime};
use filetime::FileTime;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

const NO_BACKUP_MARKER: &str = ".no_backup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Discovered,
    DateResolved,
    PlacementComputed,
    PlacementChecked,
    Skipped,
    Copied,
    Moved,
    ChecksumRecorded,
    Counted,
}

/// Notified synchronously after each step. A panicking observer is ignored.
pub trait ProgressObserver {
    fn advance(&mut self, step: Step, path: &Path);
}

/// Run settings resolved from [`ArcConfig`] plus command-line overrides.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub destination: PathBuf,
    pub ledger_root: PathBuf,
    pub move_destination: Option<PathBuf>,
    pub move_files: bool,
    pub force_move_prefixes: Vec<PathBuf>,
    pub diagnostics: bool,
    pub rotate: bool,
    pub include_video: bool,
    pub exclude_extensions: Vec<String>,
    pub cutoff: Option<NaiveDateTime>,
    pub checksum_mode: ChecksumMode,
    pub max_retries: u32,
    pub log_file: Option<PathBuf>,
    pub post_process: PostProcessConfig,
}

impl EngineOptions {
    pub fn from_config(cfg: &ArcConfig) -> Result<Self, ArchiveError> {
        cfg.validate()?;
        let destination = cfg.archive.destination.clone().ok_or_else(|| {
            ArchiveError::InvalidConfig("no archive destination configured".to_string())
        })?;
        Ok(Self {
            ledger_root: destination.clone(),
            destination,
            move_destination: cfg.archive.move_destination.clone(),
            move_files: cfg.archive.move_files,
            force_move_prefixes: cfg.archive.force_move_prefixes.clone(),
            diagnostics: cfg.archive.diagnostics,
            rotate: cfg.archive.rotate,
            include_video: cfg.archive.include_video,
            exclude_extensions: cfg.archive.exclude_extensions.clone(),
            cutoff: cfg.cutoff().map_err(ArchiveError::InvalidConfig)?,
            checksum_mode: cfg.archive.checksum_mode,
            max_retries: cfg.archive.max_retries.max(1),
            log_file: cfg.archive.log_file.clone(),
            post_process: cfg.post_process.clone(),
        })
    }

    fn is_excluded(&self, ext: &str) -> bool {
        self.exclude_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    fn forces_move(&self, source: &Path) -> bool {
        self.move_files
            || self
                .force_move_prefixes
                .iter()
                .any(|prefix| source.starts_with(prefix))
    }
}

/// Final report plus the fatal condition that ended the run, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub error: Option<ArchiveError>,
}

enum Transfer {
    Done { moved: bool },
    Failed { source_gone: bool },
}

pub struct ArchiveEngine {
    opts: EngineOptions,
    console: Console,
    ownership: Ownership,
    resolver: DateResolver,
    storage: Box<dyn Storage>,
    observer: Option<Box<dyn ProgressObserver>>,
    cancel: CancelFlag,
    ledger: Option<(i32, ChecksumLedger)>,
    state: RunState,
    disk_full: bool,
    report: Option<RunReport>,
}

impl ArchiveEngine {
    pub fn new(opts: EngineOptions, console: Console) -> Self {
        Self {
            opts,
            console,
            ownership: Ownership::none(),
            resolver: DateResolver::default(),
            storage: Box::new(LocalStorage),
            observer: None,
            cancel: CancelFlag::new(),
            ledger: None,
            state: RunState::new(),
            disk_full: false,
            report: None,
        }
    }

    pub fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    #[cfg(test)]
    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Archives every source and finalizes the run exactly once.
    pub fn run(&mut self, sources: &[PathBuf]) -> RunOutcome {
        if self.opts.diagnostics {
            self.console.warn("Diagnostics mode activated.");
        }
        let result = self.walk_sources(sources);
        let error = result.err();
        if let Some(err) = &error {
            self.console.error(&fatal_message(err));
        }
        let canceled = self.cancel.is_canceled() || error.is_some();
        let report = self.finalize(canceled, error.as_ref().map(fatal_message));
        RunOutcome { report, error }
    }

    /// Closes the ledger, writes the run log, runs post-processing and prints
    /// the summary. Later calls return the first report unchanged.
    pub fn finalize(&mut self, canceled: bool, error: Option<String>) -> RunReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let mut error = error;
        if let Err(err) = self.close_ledger() {
            self.console.error(&err.to_string());
            error.get_or_insert_with(|| err.to_string());
        }

        let mut report = RunReport::from_state(&self.state, &self.opts.destination);
        report.canceled = canceled;
        report.error = error;
        report.diagnostics = self.opts.diagnostics;
        report.validating = self.opts.checksum_mode == ChecksumMode::ValidateOnly;
        report.free_space = self.storage.available_space(&self.opts.destination).ok();

        if let Some(log_file) = &self.opts.log_file {
            self.console
                .info(&format!("Saving result logs: {}", log_file.display()));
            if let Err(err) = report.write_log_file(log_file) {
                self.console.error(&format!("{err:#}"));
            }
        }

        if !self.opts.checksum_mode.is_ledger_only() && !self.opts.diagnostics {
            post_process::run(
                &self.console,
                &self.opts.post_process,
                &report.folder_names(),
                &self.opts.destination,
            );
        }

        for line in report.summary_lines() {
            self.console.summary(&line);
        }

        self.report = Some(report.clone());
        report
    }

    fn notify(&mut self, step: Step, path: &Path) {
        if let Some(observer) = self.observer.as_mut() {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| observer.advance(step, path)));
        }
    }

    fn walk_sources(&mut self, sources: &[PathBuf]) -> Result<(), ArchiveError> {
        for source in sources {
            if self.cancel.is_canceled() {
                return Ok(());
            }
            if !source.exists() {
                self.console
                    .warn(&format!("NOT FOUND: '{}'", source.display()));
                continue;
            }
            if source.is_dir() && source.join(NO_BACKUP_MARKER).exists() {
                self.console
                    .info(&format!("IGNORING: '{}'", source.display()));
                continue;
            }
            if source.is_file() {
                self.process_file(source)?;
            } else {
                self.walk_dir(source, true)?;
            }
        }
        Ok(())
    }

    fn walk_dir(&mut self, dir: &Path, is_root: bool) -> Result<(), ArchiveError> {
        let mut entries = match fs::read_dir(dir) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| !is_hidden_by_name(p))
                .collect::<Vec<_>>(),
            Err(err) => {
                self.skip_with_error(dir, "read-dir", &err);
                return Ok(());
            }
        };
        entries.sort();

        let mut remaining = entries.iter().filter(|p| p.is_file()).count();
        let had_files = remaining > 0;

        for path in entries {
            if self.cancel.is_canceled() {
                return Ok(());
            }
            if path.is_dir() {
                if self.below_cutoff_year(&path) {
                    continue;
                }
                self.walk_dir(&path, false)?;
                continue;
            }
            if !path.is_file() {
                continue;
            }
            if self.process_file(&path)? {
                remaining -= 1;
            }
        }

        if had_files && remaining == 0 && !is_root && !self.opts.diagnostics {
            self.remove_emptied_dir(dir);
        }
        Ok(())
    }

    fn below_cutoff_year(&self, dir: &Path) -> bool {
        let Some(cutoff) = self.opts.cutoff else {
            return false;
        };
        dir.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<i32>().ok())
            .is_some_and(|year| year < cutoff.year())
    }

    fn remove_emptied_dir(&self, dir: &Path) {
        let empty = fs::read_dir(dir).map(|mut r| r.next().is_none());
        if !matches!(empty, Ok(true)) {
            return;
        }
        if let Err(err) = fs::remove_dir(dir) {
            self.console
                .error(&format!("Error removing dir '{}': {err}", dir.display()));
        }
    }

    /// Returns whether the source file left its directory.
    fn process_file(&mut self, path: &Path) -> Result<bool, ArchiveError> {
        self.state.seen += 1;
        self.notify(Step::Discovered, path);

        let Some(kind) = MediaKind::from_path(path) else {
            return Ok(self.skip(path, &format!("'{}'", path.display())));
        };
        if kind.is_video() && !self.opts.include_video {
            return Ok(self.skip(
                path,
                &format!("'{}' {} files are excluded", path.display(), kind.as_str()),
            ));
        }
        if extension_of(path).is_some_and(|ext| self.opts.is_excluded(&ext)) {
            return Ok(self.skip(
                path,
                &format!("'{}' has an excluded extension", path.display()),
            ));
        }

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                self.skip_with_error(path, "stat", &err);
                return Ok(false);
            }
        };

        let taken_at = if self.opts.checksum_mode.is_ledger_only() {
            self.resolver.resolve_archived(path)
        } else {
            self.resolver.resolve(path)
        };
        self.notify(Step::DateResolved, path);

        if let Some(cutoff) = self.opts.cutoff
            && taken_at < cutoff
        {
            return Ok(self.skip(
                path,
                &format!(
                    "'{}' is older than {}",
                    path.display(),
                    cutoff.format("%Y-%m-%d %H:%M")
                ),
            ));
        }

        let file = MediaFile {
            path: path.to_path_buf(),
            size,
            taken_at,
            kind,
        };
        let placement = Placement::new(file.taken_at, file.kind);
        self.notify(Step::PlacementComputed, path);

        if self.opts.checksum_mode.is_ledger_only() {
            self.check_ledger(&file, &placement)?;
            return Ok(false);
        }

        self.archive_file(&file, &placement)
    }

    fn archive_file(
        &mut self,
        file: &MediaFile,
        placement: &Placement,
    ) -> Result<bool, ArchiveError> {
        let (path, size, taken_at) = (file.path.as_path(), file.size, file.taken_at);
        let file_name = file.file_name().to_string();
        let dest_dir = self.opts.destination.join(placement.relative_dir());
        let dest_file = dest_dir.join(&file_name);

        if dest_file.is_file() && same_file(path, &dest_file) {
            return Ok(self.skip(
                path,
                &format!(
                    "'{}' Source and destination are the same.",
                    dest_file.display()
                ),
            ));
        }

        let update = dest_file.is_file();
        if update {
            let dest_size = fs::metadata(&dest_file).map(|m| m.len()).unwrap_or(0);
            if dest_size >= size {
                self.skip(path, &format!("'{}' already exists.", dest_file.display()));
                return Ok(self.relay(path, &dest_file, placement, &file_name));
            }
        }
        self.notify(Step::PlacementChecked, path);

        let key = placement.ledger_key(&file_name);
        let track = self.opts.checksum_mode == ChecksumMode::Normal && !self.opts.diagnostics;
        let mut checksum = None;
        if track {
            let crc = match file_checksum(path) {
                Ok(crc) => crc,
                Err(err) => {
                    self.skip_with_error(path, "checksum", &err);
                    return Ok(false);
                }
            };
            let destination = self.opts.destination.clone();
            let duplicate = self
                .ledger_for(taken_at.year())?
                .find_duplicate(crc, size)?
                .filter(|existing| *existing != key && destination.join(existing).is_file());
            if let Some(existing) = duplicate {
                return Ok(self.skip(
                    path,
                    &format!("'{}' duplicate of '{existing}'", path.display()),
                ));
            }
            checksum = Some(crc);
        }

        let moved = match self.transfer_with_retries(path, &dest_dir, &dest_file, size, update)? {
            Transfer::Done { moved } => moved,
            Transfer::Failed { source_gone } => return Ok(source_gone),
        };
        self.notify(if moved { Step::Moved } else { Step::Copied }, path);

        let verified = self.opts.diagnostics
            || ((!moved || !path.exists())
                && dest_file.is_file()
                && fs::metadata(&dest_file).map(|m| m.len()).ok() == Some(size));
        if !verified {
            self.console.error(&format!(
                "'{}' failed size verification after transfer",
                dest_file.display()
            ));
            warn::emit(WarnEvent {
                code: "VERIFY_FAILED",
                stage: "verify",
                action: if moved { "move" } else { "copy" },
                path: &dest_file.display().to_string(),
                retry: "next-file",
                reason: "size-mismatch",
                err: "destination missing or truncated",
            });
            return Ok(!path.exists());
        }

        let timestamp = local_epoch_secs(taken_at);
        if !self.opts.diagnostics {
            self.state.bytes_copied += size;
            let when = FileTime::from_unix_time(timestamp, 0);
            if let Err(err) = filetime::set_file_times(&dest_file, when, when) {
                self.skip_with_error(&dest_file, "set-times", &err);
            }
        }

        if let Some(crc) = checksum {
            let recorded =
                self.ledger_for(taken_at.year())?
                    .insert_or_replace(&key, crc, size, timestamp);
            match recorded {
                Ok(()) => self.notify(Step::ChecksumRecorded, path),
                Err(err @ ArchiveError::LedgerKeyTooLong { .. }) => {
                    self.console.error(&err.to_string());
                }
                Err(err) => return Err(err),
            }
        }

        let relayed = self.relay(path, &dest_file, placement, &file_name);
        self.state.archived += 1;
        self.state.touch_folder(&placement.date_folder);
        self.notify(Step::Counted, path);
        Ok(moved || relayed)
    }

    fn transfer_with_retries(
        &mut self,
        path: &Path,
        dest_dir: &Path,
        dest_file: &Path,
        size: u64,
        update: bool,
    ) -> Result<Transfer, ArchiveError> {
        let max = self.opts.max_retries;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rotate_if_needed(dest_dir, size)?;
            let err = match self.transfer_once(path, dest_dir, dest_file, update) {
                Ok(moved) => return Ok(Transfer::Done { moved }),
                Err(err) => err,
            };

            if !is_out_of_space(&err) {
                self.skip_with_error(path, "transfer", &err);
                return Ok(Transfer::Failed {
                    source_gone: !path.exists(),
                });
            }
            if !self.opts.rotate {
                return Err(ArchiveError::OutOfSpace {
                    path: self.opts.destination.clone(),
                    needed: size,
                    freed: 0,
                });
            }
            if attempt >= max {
                return Err(ArchiveError::RetriesExhausted {
                    path: path.to_path_buf(),
                    attempts: attempt,
                });
            }

            warn::emit(WarnEvent {
                code: "NO_SPACE",
                stage: "transfer",
                action: "rotate",
                path: &path.display().to_string(),
                retry: &format!("{}/{max}", attempt + 1),
                reason: "storage-full",
                err: &err.to_string(),
            });
            self.console.warn(&format!(
                "No space left, deleting older pictures (attempt {}/{max})",
                attempt + 1
            ));
            self.disk_full = true;
        }
    }

    /// Returns whether the file was moved rather than copied.
    fn transfer_once(
        &mut self,
        path: &Path,
        dest_dir: &Path,
        dest_file: &Path,
        update: bool,
    ) -> io::Result<bool> {
        if !dest_dir.is_dir() {
            self.console
                .action("CREATING", &format!("Folder '{}'", dest_dir.display()));
            if !self.opts.diagnostics {
                self.ownership.create_dir_all(dest_dir)?;
            }
        }

        let moved = self.opts.forces_move(path);
        let verb = match (moved, update) {
            (true, _) => "MOVING",
            (false, true) => "UPDATING",
            (false, false) => "COPYING",
        };
        self.console.action(
            verb,
            &format!("'{}' to '{}'", path.display(), dest_file.display()),
        );
        if self.opts.diagnostics {
            return Ok(moved);
        }

        if moved {
            self.storage.move_file(path, dest_file)?;
        } else {
            self.storage.copy_file(path, dest_file)?;
        }
        self.ownership.apply(dest_file);
        Ok(moved)
    }

    /// Frees exactly `size` bytes when the disk was flagged full or lacks room.
    fn rotate_if_needed(&mut self, dest_dir: &Path, size: u64) -> Result<(), ArchiveError> {
        if !self.opts.rotate {
            return Ok(());
        }
        let short = self
            .storage
            .available_space(dest_dir)
            .map(|free| free < size)
            .unwrap_or(false);
        if !self.disk_full && !short {
            return Ok(());
        }

        let freed = SpaceReclaimer::new(&self.console, self.opts.diagnostics)
            .reclaim(&self.opts.destination, size)?;
        self.disk_full = false;
        if freed < size {
            return Err(ArchiveError::OutOfSpace {
                path: self.opts.destination.clone(),
                needed: size,
                freed,
            });
        }
        Ok(())
    }

    /// Relays the file to the move-destination. Moves the source when it still
    /// exists, otherwise copies the archived file. Returns whether the source left.
    fn relay(
        &mut self,
        source: &Path,
        archived: &Path,
        placement: &Placement,
        file_name: &str,
    ) -> bool {
        let Some(root) = self.opts.move_destination.clone() else {
            return false;
        };
        let dir = root.join(placement.relative_dir());
        let target = dir.join(file_name);

        if !dir.is_dir() {
            self.console
                .action("CREATING", &format!("Folder '{}'", dir.display()));
            if !self.opts.diagnostics
                && let Err(err) = self.ownership.create_dir_all(&dir)
            {
                self.skip_with_error(&dir, "relay", &err);
                return false;
            }
        }

        let from_source = source.exists();
        let from = if from_source { source } else { archived };
        self.console.action(
            if from_source { "MOVING" } else { "COPYING" },
            &format!("'{}' to '{}'", from.display(), target.display()),
        );
        if self.opts.diagnostics {
            return false;
        }

        let result = if from_source {
            self.storage.move_file(source, &target)
        } else {
            self.storage.copy_file(archived, &target).map(|_| ())
        };
        match result {
            Ok(()) => {
                self.ownership.apply(&target);
                from_source
            }
            Err(err) => {
                self.skip_with_error(from, "relay", &err);
                false
            }
        }
    }

    fn check_ledger(&mut self, file: &MediaFile, placement: &Placement) -> Result<(), ArchiveError> {
        let (path, size, taken_at) = (file.path.as_path(), file.size, file.taken_at);
        let checksum = match file_checksum(path) {
            Ok(crc) => crc,
            Err(err) => {
                self.skip_with_error(path, "checksum", &err);
                return Ok(());
            }
        };
        let key = placement.ledger_key(file.file_name());
        let timestamp = local_epoch_secs(taken_at);
        let console = self.console;
        let diagnostics = self.opts.diagnostics;

        match self.opts.checksum_mode {
            ChecksumMode::ValidateOnly => {
                let valid = self
                    .ledger_for(taken_at.year())?
                    .is_valid(&console, &key, checksum, size, timestamp)?;
                if valid {
                    self.state.archived += 1;
                } else {
                    self.state.invalid += 1;
                }
            }
            _ => {
                console.action("UPDATING", &key);
                if !diagnostics {
                    let recorded = self
                        .ledger_for(taken_at.year())?
                        .insert_or_replace(&key, checksum, size, timestamp);
                    match recorded {
                        Ok(()) => {}
                        Err(err @ ArchiveError::LedgerKeyTooLong { .. }) => {
                            console.error(&err.to_string());
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    }
                }
                self.state.archived += 1;
            }
        }
        self.state.touch_folder(&placement.date_folder);
        self.notify(Step::ChecksumRecorded, path);
        self.notify(Step::Counted, path);
        Ok(())
    }

    /// The partition for `year`, closing whichever partition was open before.
    fn ledger_for(&mut self, year: i32) -> Result<&ChecksumLedger, ArchiveError> {
        if self.ledger.as_ref().is_some_and(|(open, _)| *open != year) {
            self.close_ledger()?;
        }
        if self.ledger.is_none() {
            let path = partition_path(&self.opts.ledger_root, year);
            let ledger = ChecksumLedger::open(&path)?;
            self.console
                .action("OPENED", &format!("'{}'", path.display()));
            self.ledger = Some((year, ledger));
        }
        self.ledger
            .as_ref()
            .map(|(_, ledger)| ledger)
            .ok_or_else(|| ArchiveError::Io(io::Error::other("ledger partition not open")))
    }

    fn close_ledger(&mut self) -> Result<(), ArchiveError> {
        if let Some((_, mut ledger)) = self.ledger.take() {
            ledger.close()?;
            self.console
                .action("CLOSED", &format!("'{}'", ledger.path().display()));
        }
        Ok(())
    }

    fn skip(&mut self, path: &Path, text: &str) -> bool {
        self.console.skip(text);
        self.notify(Step::Skipped, path);
        false
    }

    fn skip_with_error(&mut self, path: &Path, action: &str, err: &io::Error) {
        self.console
            .error(&format!("'{}': {err}", path.display()));
        warn::emit(WarnEvent {
            code: "FILE_SKIPPED",
            stage: "archive",
            action,
            path: &path.display().to_string(),
            retry: "next-file",
            reason: "io-error",
            err: &err.to_string(),
        });
        self.notify(Step::Skipped, path);
    }
}

impl Drop for ArchiveEngine {
    fn drop(&mut self) {
        if self.report.is_none() {
            let _ = self.finalize(true, Some("run aborted before completion".to_string()));
        }
    }
}

pub fn fatal_message(err: &ArchiveError) -> String {
    match err.code() {
        Some(code) => format!("{} {err}", code.as_str()),
        None => err.to_string(),
    }
}

fn is_hidden_by_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('@') || name == LEDGER_DIR || name == NO_BACKUP_MARKER)
}

fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(ma), Ok(mb)) = (fs::metadata(a), fs::metadata(b)) {
            return ma.dev() == mb.dev() && ma.ino() == mb.ino();
        }
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}
