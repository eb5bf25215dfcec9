use crate::archiver::util::{human_duration, human_size};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Counters owned by the engine for a single run.
#[derive(Debug)]
pub struct RunState {
    pub seen: u64,
    pub archived: u64,
    pub bytes_copied: u64,
    pub invalid: u64,
    /// Destination date folder -> files placed there.
    pub folders: BTreeMap<String, u64>,
    started: Instant,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            seen: 0,
            archived: 0,
            bytes_copied: 0,
            invalid: 0,
            folders: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn touch_folder(&mut self, folder: &str) {
        *self.folders.entry(folder.to_string()).or_insert(0) += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// End-of-run summary. Built exactly once from the final [`RunState`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub copied: u64,
    pub total: u64,
    pub bytes_copied: u64,
    pub invalid: u64,
    pub folders: BTreeMap<String, u64>,
    pub elapsed_secs: u64,
    pub destination: PathBuf,
    pub free_space: Option<u64>,
    pub canceled: bool,
    pub error: Option<String>,
    pub diagnostics: bool,
    pub validating: bool,
}

impl RunReport {
    pub fn from_state(state: &RunState, destination: &Path) -> Self {
        Self {
            copied: state.archived,
            total: state.seen,
            bytes_copied: state.bytes_copied,
            invalid: state.invalid,
            folders: state.folders.clone(),
            elapsed_secs: state.elapsed().as_secs(),
            destination: destination.to_path_buf(),
            free_space: None,
            canceled: false,
            error: None,
            diagnostics: false,
            validating: false,
        }
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.folders.keys().cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        !self.canceled && self.error.is_none() && self.invalid == 0
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let duration = human_duration(Duration::from_secs(self.elapsed_secs));
        let mut lines = Vec::new();
        if self.validating {
            lines.push(format!(
                "{} of {} files invalid.",
                self.invalid, self.total
            ));
        } else {
            lines.push(format!("{} of {} files copied.", self.copied, self.total));
        }
        lines.push(format!(
            "{} copied in {duration}",
            human_size(self.bytes_copied)
        ));
        if self.canceled {
            lines.push("Run canceled before completion.".to_string());
        }
        lines
    }

    /// `KEY=value` lines consumed by shell wrappers.
    pub fn log_file_contents(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("COPIED_NUMBER={}\n", self.copied));
        out.push_str(&format!("TOTAL_NUMBER={}\n", self.total));
        out.push_str(&format!("DATA_AMOUNT='{}'\n", human_size(self.bytes_copied)));
        out.push_str(&format!(
            "DESTINATION_PATH='{}'\n",
            self.destination.display()
        ));
        out.push_str(&format!(
            "FREE_SPACE_IN_DESTINATION_PATH='{}'\n",
            self.free_space.map(human_size).unwrap_or_default()
        ));
        out.push_str(&format!(
            "DURATION_TIME='{}'\n",
            human_duration(Duration::from_secs(self.elapsed_secs))
        ));
        out.push_str(&format!(
            "CANCELED={}\n",
            if self.canceled { "True" } else { "False" }
        ));
        out.push_str(&format!(
            "ERROR='{}'\n",
            self.error.as_deref().unwrap_or("None")
        ));
        out.push_str(&format!(
            "FOLDERS='{}'\n",
            self.folder_names().join(";")
        ));
        if self.validating {
            out.push_str(&format!("INVALID_NUMBER={}\n", self.invalid));
        }
        if self.diagnostics {
            out.push_str("DIAGNOSTICS=True\n");
        }
        out
    }

    pub fn write_log_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.log_file_contents())
            .with_context(|| format!("failed to write run log {}", path.display()))
    }
}
