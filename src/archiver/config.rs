use crate::archiver::ownership::OwnershipConfig;
use crate::archiver::paths::ArcPaths;
use crate::error::ArchiveError;
use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

include!(concat!(env!("OUT_DIR"), "/arcpics_env_allowlist.rs"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumMode {
    None,
    UpdateOnly,
    ValidateOnly,
    #[default]
    Normal,
}

impl ChecksumMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::UpdateOnly => "update-only",
            Self::ValidateOnly => "validate-only",
            Self::Normal => "normal",
        }
    }

    /// Modes that only touch the ledger and never transfer files.
    pub fn is_ledger_only(self) -> bool {
        matches!(self, Self::UpdateOnly | Self::ValidateOnly)
    }
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Self::None),
            "update-only" | "update" => Ok(Self::UpdateOnly),
            "validate-only" | "validate" => Ok(Self::ValidateOnly),
            "normal" => Ok(Self::Normal),
            other => Err(format!(
                "invalid checksum mode `{other}`: use none, update-only, validate-only or normal"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub destination: Option<PathBuf>,
    pub move_destination: Option<PathBuf>,
    pub move_files: bool,
    pub diagnostics: bool,
    pub rotate: bool,
    pub include_video: bool,
    pub exclude_extensions: Vec<String>,
    /// `YYYY-MM-DD HH:MM` or `YYYY-MM-DD`.
    pub exclude_older_than: Option<String>,
    pub checksum_mode: ChecksumMode,
    pub max_retries: u32,
    /// Sources under these prefixes are always moved, never copied.
    pub force_move_prefixes: Vec<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub source_folders: Vec<PathBuf>,
    pub min_free_mb: Option<u64>,
    pub verbose: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            destination: None,
            move_destination: None,
            move_files: false,
            diagnostics: false,
            rotate: false,
            include_video: true,
            exclude_extensions: Vec::new(),
            exclude_older_than: None,
            checksum_mode: ChecksumMode::Normal,
            max_retries: 5,
            force_move_prefixes: Vec::new(),
            log_file: None,
            source_folders: Vec::new(),
            min_free_mb: None,
            verbose: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub command: Option<String>,
    /// `{}` is replaced by all touched folders, `{{}}` runs once per folder.
    pub args: Option<String>,
    pub enabled: bool,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArcConfig {
    pub archive: ArchiveConfig,
    pub ownership: OwnershipConfig,
    pub post_process: PostProcessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArcConfig {
    archive: Option<ArchiveConfig>,
    ownership: Option<OwnershipConfig>,
    post_process: Option<PostProcessConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_string(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn env_or_csv_paths(var: &str, fallback: &[PathBuf]) -> Vec<PathBuf> {
    let as_strings = fallback
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>();
    env_or_csv(var, &as_strings)
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

pub fn parse_cutoff(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| format!("invalid cutoff `{raw}`: use `YYYY-MM-DD HH:MM`"))
}

impl ArcConfig {
    pub fn cutoff(&self) -> Result<Option<NaiveDateTime>, String> {
        self.archive
            .exclude_older_than
            .as_deref()
            .map(parse_cutoff)
            .transpose()
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        let invalid = |msg: String| -> Result<(), ArchiveError> {
            Err(ArchiveError::InvalidConfig(msg))
        };
        if self.archive.max_retries == 0 {
            return invalid("max_retries must be >= 1".to_string());
        }
        if let Err(msg) = self.cutoff() {
            return invalid(msg);
        }
        if let Err(msg) = self.ownership.parsed_mode() {
            return invalid(msg);
        }
        if let (Some(dest), Some(relay)) = (
            self.archive.destination.as_deref(),
            self.archive.move_destination.as_deref(),
        ) && dest == relay
        {
            return invalid("move_destination must differ from the archive destination".to_string());
        }
        if self.post_process.enabled && self.post_process.command.is_none() {
            return invalid("post_process.enabled requires post_process.command".to_string());
        }
        Ok(())
    }
}

fn merge_file_config(base: &mut ArcConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialArcConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse arcpics config {}: {err}", path.display()))?;
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(ownership) = parsed.ownership {
        base.ownership = ownership;
    }
    if let Some(post_process) = parsed.post_process {
        base.post_process = post_process;
    }
    Ok(())
}

fn apply_env(cfg: &mut ArcConfig) -> Result<()> {
    let a = &mut cfg.archive;
    if let Some(dest) = env_string("ARCPICS_DESTINATION") {
        a.destination = Some(PathBuf::from(dest));
    }
    if let Some(relay) = env_string("ARCPICS_MOVE_DESTINATION") {
        a.move_destination = Some(PathBuf::from(relay));
    }
    a.move_files = env_or_bool("ARCPICS_MOVE_FILES", a.move_files);
    a.diagnostics = env_or_bool("ARCPICS_DIAGNOSTICS", a.diagnostics);
    a.rotate = env_or_bool("ARCPICS_ROTATE", a.rotate);
    a.include_video = env_or_bool("ARCPICS_INCLUDE_VIDEO", a.include_video);
    a.verbose = env_or_bool("ARCPICS_VERBOSE", a.verbose);
    a.exclude_extensions = env_or_csv("ARCPICS_EXCLUDE_EXTENSIONS", &a.exclude_extensions);
    if let Some(cutoff) = env_string("ARCPICS_EXCLUDE_OLDER_THAN") {
        a.exclude_older_than = Some(cutoff);
    }
    if let Some(mode) = env_string("ARCPICS_CHECKSUM_MODE") {
        a.checksum_mode = mode.parse().map_err(|msg: String| anyhow!(msg))?;
    }
    a.max_retries = env_or_u64("ARCPICS_MAX_RETRIES", u64::from(a.max_retries))
        .try_into()
        .unwrap_or(u32::MAX);
    a.force_move_prefixes =
        env_or_csv_paths("ARCPICS_FORCE_MOVE_PREFIXES", &a.force_move_prefixes);
    if let Some(log_file) = env_string("ARCPICS_LOG_FILE") {
        a.log_file = Some(PathBuf::from(log_file));
    }
    a.source_folders = env_or_csv_paths("ARCPICS_SOURCE_FOLDERS", &a.source_folders);
    if let Some(min) = env_string("ARCPICS_MIN_FREE_MB").and_then(|v| v.parse().ok()) {
        a.min_free_mb = Some(min);
    }

    let o = &mut cfg.ownership;
    if let Some(owner) = env_string("ARCPICS_NEW_OWNER") {
        o.owner = Some(owner);
    }
    if let Some(group) = env_string("ARCPICS_NEW_GROUP") {
        o.group = Some(group);
    }
    if let Some(mode) = env_string("ARCPICS_NEW_MODE") {
        o.mode = Some(mode);
    }

    let p = &mut cfg.post_process;
    if let Some(command) = env_string("ARCPICS_POST_PROC_CMD") {
        p.command = Some(command);
    }
    if let Some(args) = env_string("ARCPICS_POST_PROC_ARGS") {
        p.args = Some(args);
    }
    p.enabled = env_or_bool("ARCPICS_ENABLE_POST_PROC_CMD", p.enabled);
    Ok(())
}

/// `ARCPICS_*` variables set in the environment that nothing reads.
pub fn unknown_env_keys() -> Vec<String> {
    let mut out = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("ARCPICS_"))
        .filter(|key| !GENERATED_ARCPICS_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

pub fn load_config(paths: &ArcPaths) -> Result<ArcConfig> {
    let mut cfg = ArcConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;
    apply_env(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = ArcConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.archive.max_retries, 5);
        assert_eq!(cfg.archive.checksum_mode, ChecksumMode::Normal);
        assert!(!cfg.post_process.enabled);
    }

    #[test]
    fn file_sections_override_defaults() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("arcpics.toml");
        fs::write(
            &path,
            r#"
[archive]
destination = "/mnt/photos"
rotate = true
exclude_extensions = ["thm", "lrv"]
checksum_mode = "validate-only"

[ownership]
owner = "media"
group = "media"
mode = "0644"
"#,
        )
        .expect("write");

        let mut cfg = ArcConfig::default();
        merge_file_config(&mut cfg, &path).expect("merge");
        assert_eq!(cfg.archive.destination, Some(PathBuf::from("/mnt/photos")));
        assert!(cfg.archive.rotate);
        assert_eq!(cfg.archive.checksum_mode, ChecksumMode::ValidateOnly);
        assert_eq!(cfg.archive.max_retries, 5);
        assert_eq!(cfg.archive.exclude_extensions, vec!["thm", "lrv"]);
        assert_eq!(cfg.ownership.parsed_mode(), Ok(Some(0o644)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = ArcConfig::default();
        cfg.archive.max_retries = 0;
        assert!(matches!(cfg.validate(), Err(ArchiveError::InvalidConfig(_))));

        let mut cfg = ArcConfig::default();
        cfg.archive.exclude_older_than = Some("yesterday".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = ArcConfig::default();
        cfg.archive.destination = Some(PathBuf::from("/a"));
        cfg.archive.move_destination = Some(PathBuf::from("/a"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cutoff_accepts_date_and_datetime() {
        assert_eq!(
            parse_cutoff("2020-01-02 03:04").map(|d| d.to_string()),
            Ok("2020-01-02 03:04:00".to_string())
        );
        assert_eq!(
            parse_cutoff("2020-01-02").map(|d| d.to_string()),
            Ok("2020-01-02 00:00:00".to_string())
        );
    }

    #[test]
    fn checksum_mode_parses_all_names() {
        assert_eq!("none".parse(), Ok(ChecksumMode::None));
        assert_eq!("update-only".parse(), Ok(ChecksumMode::UpdateOnly));
        assert_eq!("validate-only".parse(), Ok(ChecksumMode::ValidateOnly));
        assert_eq!("normal".parse(), Ok(ChecksumMode::Normal));
        assert!("sometimes".parse::<ChecksumMode>().is_err());
    }
}
