use crate::archiver::media::has_embedded_metadata;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone};
use exif::{In, Tag, Value};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

const MIN_YEAR: i32 = 1971;

/// Reads an embedded capture time from a media file.
pub trait MetadataDateReader {
    fn read_date(&self, path: &Path) -> Option<NaiveDateTime>;
}

/// EXIF-backed reader. Checks original, digitized, then generic modified tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifDateReader;

impl MetadataDateReader for ExifDateReader {
    fn read_date(&self, path: &Path) -> Option<NaiveDateTime> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

        [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
            .into_iter()
            .find_map(|tag| {
                let field = exif.get_field(tag, In::PRIMARY)?;
                let Value::Ascii(ref values) = field.value else {
                    return None;
                };
                let dt = exif::DateTime::from_ascii(values.first()?).ok()?;
                NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))?
                    .and_hms_opt(
                        u32::from(dt.hour),
                        u32::from(dt.minute),
                        u32::from(dt.second),
                    )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Metadata,
    FileName,
    FolderName,
    Modified,
}

impl DateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::FileName => "file-name",
            Self::FolderName => "folder-name",
            Self::Modified => "modified-time",
        }
    }
}

pub struct DateResolver {
    reader: Box<dyn MetadataDateReader>,
    max_year: i32,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new(Box::new(ExifDateReader))
    }
}

impl DateResolver {
    pub fn new(reader: Box<dyn MetadataDateReader>) -> Self {
        Self {
            reader,
            max_year: Local::now().year(),
        }
    }

    #[cfg(test)]
    pub fn with_max_year(mut self, max_year: i32) -> Self {
        self.max_year = max_year;
        self
    }

    /// Never fails: the filesystem mtime, or the current time, is the last resort.
    pub fn resolve(&self, path: &Path) -> NaiveDateTime {
        self.resolve_with_source(path).0
    }

    pub fn resolve_with_source(&self, path: &Path) -> (NaiveDateTime, DateSource) {
        if has_embedded_metadata(path)
            && let Some(date) = self.reader.read_date(path)
        {
            return (date, DateSource::Metadata);
        }

        if let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| date_from_digits(name, self.max_year))
        {
            return (date, DateSource::FileName);
        }

        if let Some(date) = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .filter(|name| name.chars().count() >= 4)
            .and_then(|name| date_from_digits(name, self.max_year))
        {
            return (date, DateSource::FolderName);
        }

        (modified_time(path), DateSource::Modified)
    }

    /// Resolves a file that already sits in an archive day folder. A date taken
    /// from that folder's own name is replaced by the mtime the archiver set.
    pub fn resolve_archived(&self, path: &Path) -> NaiveDateTime {
        let (date, source) = self.resolve_with_source(path);
        let day_folder = date.format("%Y-%m-%d").to_string();
        let in_own_day_folder = path
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|name| name.to_str() == Some(day_folder.as_str()));
        if source == DateSource::FolderName && in_own_day_folder {
            return modified_time(path);
        }
        date
    }
}

/// Interprets the digits of `name` as `YYYYMMDD[HHMM[SS]]`.
pub fn date_from_digits(name: &str, max_year: i32) -> Option<NaiveDateTime> {
    let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return None;
    }

    let year: i32 = digits[0..4].parse().ok()?;
    if !(MIN_YEAR..=max_year).contains(&year) {
        return None;
    }
    let month: u32 = digits[4..6].parse().ok()?;
    let day: u32 = digits[6..8].parse().ok()?;

    let (mut hour, mut minute, mut second) = (0u32, 0u32, 0u32);
    if digits.len() >= 12 {
        hour = digits[8..10].parse::<u32>().ok()?.min(23);
        minute = digits[10..12].parse::<u32>().ok()?.min(59);
        if digits.len() >= 14 {
            second = digits[12..14].parse::<u32>().ok()?.min(59);
        }
    }

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

fn modified_time(path: &Path) -> NaiveDateTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| DateTime::<Local>::from(modified).naive_local())
        .unwrap_or_else(|_| Local::now().naive_local())
}

/// Epoch seconds of a local wall-clock time.
pub fn local_epoch_secs(at: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&at)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| at.and_utc().timestamp())
}
