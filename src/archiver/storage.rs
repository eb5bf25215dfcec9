use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

/// Filesystem operations the engine performs against the archive.
pub trait Storage {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or_else(|| Path::new("."));
        fs2::available_space(existing)
    }

    /// Copies into a staging file beside `to` and renames it into place, so a
    /// failed copy leaves any previous `to` untouched.
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let dir = to
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staged = tempfile::Builder::new()
            .prefix(".arcpics-")
            .suffix(".part")
            .tempfile_in(dir)?;
        let copied = fs::copy(from, staged.path())?;
        staged.persist(to).map_err(|err| err.error)?;
        Ok(copied)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        if from == to {
            return Ok(());
        }
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(rename_err)
                if matches!(
                    rename_err.kind(),
                    ErrorKind::CrossesDevices | ErrorKind::PermissionDenied
                ) =>
            {
                self.copy_file(from, to)?;
                fs::remove_file(from)
            }
            Err(rename_err) => Err(rename_err),
        }
    }
}

pub fn is_out_of_space(err: &io::Error) -> bool {
    err.kind() == ErrorKind::StorageFull
}
