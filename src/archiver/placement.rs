use crate::archiver::media::MediaKind;
use chrono::NaiveDateTime;
use std::path::PathBuf;

/// Destination folder of a file, derived only from its timestamp and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// `YYYY/MM/YYYY-MM-DD`; also the key of the per-run folder histogram.
    pub date_folder: String,
    pub subfolder: &'static str,
}

impl Placement {
    pub fn new(taken_at: NaiveDateTime, kind: MediaKind) -> Self {
        Self {
            date_folder: taken_at.format("%Y/%m/%Y-%m-%d").to_string(),
            subfolder: kind.subfolder(),
        }
    }

    /// Directory relative to an archive root.
    pub fn relative_dir(&self) -> PathBuf {
        let mut dir = PathBuf::new();
        for part in self.date_folder.split('/') {
            dir.push(part);
        }
        if !self.subfolder.is_empty() {
            dir.push(self.subfolder);
        }
        dir
    }

    /// Ledger key: `/`-separated path of `file_name` under the archive root.
    pub fn ledger_key(&self, file_name: &str) -> String {
        if self.subfolder.is_empty() {
            format!("{}/{file_name}", self.date_folder)
        } else {
            format!("{}/{}/{file_name}", self.date_folder, self.subfolder)
        }
    }
}
