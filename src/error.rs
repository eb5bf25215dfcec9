use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("checksum ledger {path} is locked by another archiver instance")]
    LedgerLocked { path: PathBuf },
    #[error("no space left in {path}: needed {needed} bytes, reclaimed {freed} bytes")]
    OutOfSpace {
        path: PathBuf,
        needed: u64,
        freed: u64,
    },
    #[error("giving up on {path} after {attempts} out-of-space attempts")]
    RetriesExhausted { path: PathBuf, attempts: u32 },
    #[error("config invalid: {0}")]
    InvalidConfig(String),
    #[error("ledger key longer than 128 characters: {key}")]
    LedgerKeyTooLong { key: String },
    #[error("ledger storage failure: {0}")]
    Ledger(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Operator code for conditions that terminate the run.
    pub fn code(&self) -> Option<ArchiveErrorCode> {
        match self {
            Self::LedgerLocked { .. } => Some(ArchiveErrorCode::E001LedgerLocked),
            Self::OutOfSpace { .. } => Some(ArchiveErrorCode::E002NoSpace),
            Self::RetriesExhausted { .. } => Some(ArchiveErrorCode::E003RetriesExhausted),
            Self::InvalidConfig(_) => Some(ArchiveErrorCode::E004ConfigInvalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveErrorCode {
    E001LedgerLocked,
    E002NoSpace,
    E003RetriesExhausted,
    E004ConfigInvalid,
}

impl ArchiveErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001LedgerLocked => "E001_LEDGER_LOCKED",
            Self::E002NoSpace => "E002_NO_SPACE",
            Self::E003RetriesExhausted => "E003_RETRIES_EXHAUSTED",
            Self::E004ConfigInvalid => "E004_CONFIG_INVALID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_variants_carry_codes() {
        let err = ArchiveError::LedgerLocked {
            path: PathBuf::from("/tmp/checksums-2023.db"),
        };
        assert_eq!(err.code().map(|c| c.as_str()), Some("E001_LEDGER_LOCKED"));

        let io = ArchiveError::Io(std::io::Error::other("boom"));
        assert!(io.code().is_none());
    }
}
