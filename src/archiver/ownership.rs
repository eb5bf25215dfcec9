use crate::archiver::warn::{self, WarnEvent};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Owner, group and file mode applied to every path the archiver creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipConfig {
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Octal string such as `"0644"`.
    pub mode: Option<String>,
}

impl OwnershipConfig {
    pub fn parsed_mode(&self) -> Result<Option<u32>, String> {
        match self.mode.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => u32::from_str_radix(raw.trim_start_matches("0o"), 8)
                .map(Some)
                .map_err(|_| format!("invalid octal mode `{raw}`")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.group.is_none() && self.mode.is_none()
    }
}

/// Ownership with names resolved to ids. Built once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ownership {
    ids: Option<(u32, u32)>,
    mode: Option<u32>,
}

impl Ownership {
    pub fn none() -> Self {
        Self::default()
    }

    /// Owner and group only take effect together; an unknown name disables both.
    pub fn resolve(cfg: &OwnershipConfig) -> Result<Self, String> {
        let mode = cfg.parsed_mode()?;
        let ids = match (cfg.owner.as_deref(), cfg.group.as_deref()) {
            (Some(owner), Some(group)) => lookup_ids(owner, group)?,
            _ => None,
        };
        Ok(Self { ids, mode })
    }

    pub fn label(&self) -> String {
        match self.ids {
            Some((uid, gid)) => format!("({uid}:{gid})"),
            None => String::new(),
        }
    }

    /// Owner/group for directories, plus the mode for files. Failures are reported, not fatal.
    pub fn apply(&self, path: &Path) {
        if let Err(err) = self.try_apply(path) {
            warn::emit(WarnEvent {
                code: "OWNERSHIP_FAILED",
                stage: "ownership",
                action: "chown",
                path: &path.display().to_string(),
                retry: "none",
                reason: "set-owner-failed",
                err: &err.to_string(),
            });
        }
    }

    fn try_apply(&self, path: &Path) -> io::Result<()> {
        if let Some((uid, gid)) = self.ids {
            chown(path, uid, gid)?;
        }
        if let Some(mode) = self.mode {
            if path.is_file() {
                set_mode(path, mode)?;
            }
        }
        Ok(())
    }

    /// `create_dir_all` that applies ownership to each directory it creates.
    pub fn create_dir_all(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        let mut cursor = Some(dir);
        while let Some(current) = cursor {
            if current.as_os_str().is_empty() || current.is_dir() {
                break;
            }
            missing.push(current.to_path_buf());
            cursor = current.parent();
        }

        missing.reverse();
        for created in &missing {
            match fs::create_dir(created) {
                Ok(()) => self.apply(created),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err),
            }
        }
        Ok(missing)
    }
}

#[cfg(unix)]
fn lookup_ids(owner: &str, group: &str) -> Result<Option<(u32, u32)>, String> {
    use nix::unistd::{Group, User};
    let user = User::from_name(owner)
        .map_err(|err| format!("failed to look up user `{owner}`: {err}"))?
        .ok_or_else(|| format!("unknown user `{owner}`"))?;
    let grp = Group::from_name(group)
        .map_err(|err| format!("failed to look up group `{group}`: {err}"))?
        .ok_or_else(|| format!("unknown group `{group}`"))?;
    Ok(Some((user.uid.as_raw(), grp.gid.as_raw())))
}

#[cfg(not(unix))]
fn lookup_ids(_owner: &str, _group: &str) -> Result<Option<(u32, u32)>, String> {
    Ok(None)
}

#[cfg(unix)]
fn chown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    use nix::unistd::{Gid, Uid};
    nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        .map_err(io::Error::from)
}

#[cfg(not(unix))]
fn chown(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_octal_modes() {
        let cfg = OwnershipConfig {
            mode: Some("0644".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.parsed_mode(), Ok(Some(0o644)));

        let bad = OwnershipConfig {
            mode: Some("rwx".to_string()),
            ..Default::default()
        };
        assert!(bad.parsed_mode().is_err());
    }

    #[test]
    fn owner_without_group_is_ignored() {
        let cfg = OwnershipConfig {
            owner: Some("nobody-in-particular".to_string()),
            ..Default::default()
        };
        assert_eq!(Ownership::resolve(&cfg), Ok(Ownership::none()));
    }

    #[cfg(unix)]
    #[test]
    fn unknown_user_is_an_error() {
        let cfg = OwnershipConfig {
            owner: Some("arcpics-no-such-user".to_string()),
            group: Some("arcpics-no-such-group".to_string()),
            mode: None,
        };
        assert!(Ownership::resolve(&cfg).is_err());
    }

    #[test]
    fn create_dir_all_reports_created_dirs() {
        let tmp = tempdir().expect("tempdir");
        let target = tmp.path().join("2023/06/2023-06-15");
        let created = Ownership::none().create_dir_all(&target).expect("create");
        assert_eq!(created.len(), 3);
        assert!(target.is_dir());
        assert!(Ownership::none().create_dir_all(&target).expect("again").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn mode_is_applied_to_files() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempdir().expect("tempdir");
        let file = tmp.path().join("a.jpg");
        fs::write(&file, b"x").expect("write");
        let ownership = Ownership::resolve(&OwnershipConfig {
            mode: Some("600".to_string()),
            ..Default::default()
        })
        .expect("resolve");
        ownership.apply(&file);
        let mode = fs::metadata(&file).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
