use crate::archiver::console::Console;
use crate::archiver::date::{DateResolver, local_epoch_secs};
use crate::archiver::ledger::LEDGER_DIR;
use crate::archiver::warn::{self, WarnEvent};
use filetime::FileTime;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Corrections {
    pub seen: u64,
    pub corrected: u64,
    pub failed: u64,
}

/// Sets every file's mtime and atime under `root` to its resolved content date.
pub fn correct_tree_dates(
    root: &Path,
    resolver: &DateResolver,
    console: &Console,
    diagnostics: bool,
) -> Corrections {
    let mut out = Corrections::default();
    let files = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name().to_str() != Some(LEDGER_DIR))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in files {
        out.seen += 1;
        let path = entry.path();
        let (taken_at, source) = resolver.resolve_with_source(path);
        console.action(
            "CORRECTING",
            &format!(
                "'{}' to {} ({})",
                path.display(),
                taken_at.format("%Y-%m-%d %H:%M:%S"),
                source.as_str()
            ),
        );
        if diagnostics {
            out.corrected += 1;
            continue;
        }

        let when = FileTime::from_unix_time(local_epoch_secs(taken_at), 0);
        match filetime::set_file_times(path, when, when) {
            Ok(()) => out.corrected += 1,
            Err(err) => {
                out.failed += 1;
                warn::emit(WarnEvent {
                    code: "SET_TIMES_FAILED",
                    stage: "correct-dates",
                    action: "set-file-times",
                    path: &path.display().to_string(),
                    retry: "next-file",
                    reason: "io-error",
                    err: &err.to_string(),
                });
            }
        }
    }
    out
}
