use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    RawImage,
    Video,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "bmp" | "gif" | "jpeg" | "jpg" | "thm" | "png" | "heic" | "tif" | "tiff" => {
                Some(Self::Image)
            }
            "cr2" | "dng" | "orf" | "nef" | "arw" => Some(Self::RawImage),
            "3gpp" | "3gp" | "avi" | "mov" | "mp4" | "lrv" | "mpeg" | "mpg" | "mpeg4" | "asf"
            | "wmv" | "mts" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(extension_of(path)?.as_str())
    }

    /// Bucket below the day folder; empty for standard images.
    pub fn subfolder(self) -> &'static str {
        match self {
            Self::Image => "",
            Self::RawImage => "raw",
            Self::Video => "video",
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::RawImage => "raw",
            Self::Video => "video",
        }
    }
}

/// Lowercased extension without the leading dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Formats that may carry an embedded capture date.
pub fn has_embedded_metadata(path: &Path) -> bool {
    matches!(
        extension_of(path).as_deref(),
        Some("jpg" | "jpeg" | "png" | "dng" | "orf" | "cr2" | "nef" | "arw" | "heic" | "tif" | "tiff")
    )
}

/// A source-tree entry, recomputed on every walk.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub taken_at: NaiveDateTime,
    pub kind: MediaKind,
}

impl MediaFile {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_case_insensitively() {
        assert_eq!(
            MediaKind::from_path(Path::new("a/IMG_0001.JPG")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("a/IMG_0001.cr2")),
            Some(MediaKind::RawImage)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("a/clip.MP4")),
            Some(MediaKind::Video)
        );
        assert_eq!(MediaKind::from_path(Path::new("a/notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("a/no_extension")), None);
    }

    #[test]
    fn subfolders_split_raw_and_video() {
        assert_eq!(MediaKind::Image.subfolder(), "");
        assert_eq!(MediaKind::RawImage.subfolder(), "raw");
        assert_eq!(MediaKind::Video.subfolder(), "video");
    }

    #[test]
    fn metadata_formats_exclude_videos() {
        assert!(has_embedded_metadata(Path::new("x.jpeg")));
        assert!(has_embedded_metadata(Path::new("x.DNG")));
        assert!(!has_embedded_metadata(Path::new("x.mov")));
        assert!(!has_embedded_metadata(Path::new("x.gif")));
    }
}
