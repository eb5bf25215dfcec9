use crate::archiver::console::Console;
use crate::archiver::warn::{self, WarnEvent};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// OS bookkeeping files that do not count as archive content.
const AUX_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

fn is_aux_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| AUX_FILES.contains(&name))
}

/// Deletes the oldest archived files, by archive structure, to free space.
pub struct SpaceReclaimer<'a> {
    console: &'a Console,
    diagnostics: bool,
}

impl<'a> SpaceReclaimer<'a> {
    pub fn new(console: &'a Console, diagnostics: bool) -> Self {
        Self {
            console,
            diagnostics,
        }
    }

    /// Returns the bytes actually freed, which is less than `bytes_needed`
    /// when the tree runs out of content.
    pub fn reclaim(&self, root: &Path, bytes_needed: u64) -> io::Result<u64> {
        let mut freed = 0u64;
        if bytes_needed == 0 {
            return Ok(0);
        }

        for (_, year_dir) in numbered_dirs(root, 1900..=2999)? {
            for (_, month_dir) in numbered_dirs(&year_dir, 1..=12)? {
                for day_dir in sorted_dirs(&month_dir)? {
                    freed += self.drain_day(&day_dir, bytes_needed - freed)?;
                    self.prune_empty(&day_dir)?;
                    if freed >= bytes_needed {
                        self.prune_empty(&month_dir)?;
                        self.prune_empty(&year_dir)?;
                        return Ok(freed);
                    }
                }
                self.prune_empty(&month_dir)?;
            }
            self.prune_empty(&year_dir)?;
        }

        Ok(freed)
    }

    fn drain_day(&self, day_dir: &Path, bytes_needed: u64) -> io::Result<u64> {
        let mut freed = 0u64;
        let files = WalkDir::new(day_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && !is_aux_file(e.path()))
            .map(|e| e.into_path())
            .collect::<Vec<_>>();

        for file in files {
            if freed >= bytes_needed {
                break;
            }
            let size = match fs::metadata(&file) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            self.console
                .action("DELETING", &format!("'{}' to free space", file.display()));
            if !self.diagnostics
                && let Err(err) = fs::remove_file(&file)
            {
                warn::emit(WarnEvent {
                    code: "RECLAIM_DELETE_FAILED",
                    stage: "reclaim",
                    action: "remove-file",
                    path: &file.display().to_string(),
                    retry: "next-file",
                    reason: "remove-failed",
                    err: &err.to_string(),
                });
                continue;
            }
            freed += size;
        }
        Ok(freed)
    }

    /// Removes `dir` and any nested directories left with no real content.
    fn prune_empty(&self, dir: &Path) -> io::Result<()> {
        if self.diagnostics || !dir.is_dir() {
            return Ok(());
        }
        let dirs = WalkDir::new(dir)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect::<Vec<_>>();
        for sub in dirs {
            remove_dir_if_empty(&sub)?;
        }
        Ok(())
    }
}

fn remove_dir_if_empty(dir: &Path) -> io::Result<bool> {
    let mut aux = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_aux_file(&path) {
            aux.push(path);
        } else {
            return Ok(false);
        }
    }
    for file in aux {
        fs::remove_file(file)?;
    }
    fs::remove_dir(dir)?;
    Ok(true)
}

fn numbered_dirs(
    dir: &Path,
    range: std::ops::RangeInclusive<u32>,
) -> io::Result<Vec<(u32, PathBuf)>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(number) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if range.contains(&number) {
            out.push((number, path));
        }
    }
    out.sort();
    Ok(out)
}

fn sorted_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
