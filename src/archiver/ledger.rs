//! Per-year checksum ledger.
//!
//! Each calendar year of content lives in its own SQLite file under
//! `<root>/.arcpics/checksums-<year>.db`. A partition is held by at most one
//! process: `open` probes for an exclusive lock without waiting and fails with
//! [`ArchiveError::LedgerLocked`] when another archiver owns it, then keeps a
//! write transaction open until `close` so later writers fail fast too.

use crate::archiver::console::Console;
use crate::archiver::util::now_epoch_secs;
use crate::error::ArchiveError;
use crc32fast::Hasher as Crc32;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_KEY_CHARS: usize = 128;
pub const LEDGER_DIR: &str = ".arcpics";

const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS pictures (
    name      TEXT    NOT NULL PRIMARY KEY,
    checksum  INTEGER NOT NULL,
    size      INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    added_on  INTEGER NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS pictures_checksum_size ON pictures (checksum, size);
";

pub fn partition_path(root: &Path, year: i32) -> PathBuf {
    root.join(LEDGER_DIR).join(format!("checksums-{year}.db"))
}

/// CRC-32 of a file's contents.
pub fn file_checksum(path: &Path) -> std::io::Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Crc32::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub checksum: u32,
    pub size: u64,
    pub timestamp: i64,
    pub added_on: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMismatch {
    Checksum { actual: u32, recorded: u32 },
    Size { actual: u64, recorded: u64 },
    Timestamp { actual: i64, recorded: i64 },
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checksum { actual, recorded } => {
                write!(f, "CHECKSUM: {actual:08x} != {recorded:08x}")
            }
            Self::Size { actual, recorded } => write!(f, "SIZE: {actual} != {recorded}"),
            Self::Timestamp { actual, recorded } => {
                write!(f, "TIMESTAMP: {actual} != {recorded}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Missing,
    Mismatch(Vec<FieldMismatch>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[derive(Debug)]
pub struct ChecksumLedger {
    path: PathBuf,
    conn: Option<Connection>,
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn lock_error(path: &Path, err: rusqlite::Error) -> ArchiveError {
    if is_busy(&err) {
        ArchiveError::LedgerLocked {
            path: path.to_path_buf(),
        }
    } else {
        ArchiveError::Ledger(err)
    }
}

fn connect(path: &Path) -> Result<Connection, ArchiveError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::ZERO)?;
    Ok(conn)
}

impl ChecksumLedger {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        {
            let probe = connect(path)?;
            probe
                .execute_batch("BEGIN EXCLUSIVE;")
                .map_err(|err| lock_error(path, err))?;
            probe.execute_batch("ROLLBACK;")?;
        }

        let conn = connect(path)?;
        conn.execute_batch("BEGIN IMMEDIATE;")
            .map_err(|err| lock_error(path, err))?;
        conn.execute_batch(CREATE_TABLE_SQL)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&self) -> Result<&Connection, ArchiveError> {
        self.conn.as_ref().ok_or_else(|| {
            ArchiveError::Io(std::io::Error::other(format!(
                "ledger {} already closed",
                self.path.display()
            )))
        })
    }

    pub fn insert_or_replace(
        &self,
        name: &str,
        checksum: u32,
        size: u64,
        timestamp: i64,
    ) -> Result<(), ArchiveError> {
        if name.chars().count() > MAX_KEY_CHARS {
            return Err(ArchiveError::LedgerKeyTooLong {
                key: name.to_string(),
            });
        }
        let added_on = now_epoch_secs().map(|s| s as i64).unwrap_or_default();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO pictures (name, checksum, size, timestamp, added_on)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, i64::from(checksum), size as i64, timestamp, added_on],
        )?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<ArchiveEntry>, ArchiveError> {
        let entry = self
            .conn()?
            .query_row(
                "SELECT name, checksum, size, timestamp, added_on FROM pictures WHERE name = ?1",
                [name],
                |row| {
                    Ok(ArchiveEntry {
                        name: row.get(0)?,
                        checksum: row.get::<_, i64>(1)? as u32,
                        size: row.get::<_, i64>(2)? as u64,
                        timestamp: row.get(3)?,
                        added_on: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Every differing field is reported, not only the first.
    pub fn validate(
        &self,
        name: &str,
        checksum: u32,
        size: u64,
        timestamp: i64,
    ) -> Result<Validation, ArchiveError> {
        let Some(entry) = self.get(name)? else {
            return Ok(Validation::Missing);
        };

        let mut mismatches = Vec::new();
        if entry.checksum != checksum {
            mismatches.push(FieldMismatch::Checksum {
                actual: checksum,
                recorded: entry.checksum,
            });
        }
        if entry.size != size {
            mismatches.push(FieldMismatch::Size {
                actual: size,
                recorded: entry.size,
            });
        }
        if entry.timestamp != timestamp {
            mismatches.push(FieldMismatch::Timestamp {
                actual: timestamp,
                recorded: entry.timestamp,
            });
        }

        if mismatches.is_empty() {
            Ok(Validation::Valid)
        } else {
            Ok(Validation::Mismatch(mismatches))
        }
    }

    /// Like [`validate`](Self::validate), printing one diagnostic per outcome.
    pub fn is_valid(
        &self,
        console: &Console,
        name: &str,
        checksum: u32,
        size: u64,
        timestamp: i64,
    ) -> Result<bool, ArchiveError> {
        let outcome = self.validate(name, checksum, size, timestamp)?;
        match &outcome {
            Validation::Valid => console.ok("VALID", name),
            Validation::Missing => console.invalid(&format!("{name} checksum record missing")),
            Validation::Mismatch(fields) => {
                for field in fields {
                    console.invalid(&format!("{name} {field}"));
                }
            }
        }
        Ok(outcome.is_valid())
    }

    pub fn find_duplicate(&self, checksum: u32, size: u64) -> Result<Option<String>, ArchiveError> {
        let name = self
            .conn()?
            .query_row(
                "SELECT name FROM pictures WHERE checksum = ?1 AND size = ?2 ORDER BY name LIMIT 1",
                params![i64::from(checksum), size as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Commits and releases the partition. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.execute_batch("COMMIT;")?;
        conn.close().map_err(|(_, err)| ArchiveError::Ledger(err))?;
        Ok(())
    }
}

impl Drop for ChecksumLedger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_then_validate_exact_triple() {
        let tmp = tempdir().expect("tempdir");
        let ledger = ChecksumLedger::open(&partition_path(tmp.path(), 2023)).expect("open");
        ledger
            .insert_or_replace("2023/06/2023-06-15/a.jpg", 0xdead_beef, 42, 1_686_824_130)
            .expect("insert");

        let key = "2023/06/2023-06-15/a.jpg";
        assert_eq!(
            ledger.validate(key, 0xdead_beef, 42, 1_686_824_130).expect("v"),
            Validation::Valid
        );
        assert_eq!(
            ledger.validate(key, 0xdead_beef, 43, 1_686_824_130).expect("v"),
            Validation::Mismatch(vec![FieldMismatch::Size {
                actual: 43,
                recorded: 42
            }])
        );
        assert!(matches!(
            ledger.validate(key, 1, 42, 1_686_824_130).expect("v"),
            Validation::Mismatch(ref f) if matches!(f[0], FieldMismatch::Checksum { .. })
        ));
        assert!(matches!(
            ledger.validate(key, 0xdead_beef, 42, 0).expect("v"),
            Validation::Mismatch(ref f) if matches!(f[0], FieldMismatch::Timestamp { .. })
        ));
        assert_eq!(
            ledger.validate("2023/06/2023-06-15/b.jpg", 1, 1, 1).expect("v"),
            Validation::Missing
        );
    }

    #[test]
    fn reinsert_replaces_row() {
        let tmp = tempdir().expect("tempdir");
        let path = partition_path(tmp.path(), 2020);
        let mut ledger = ChecksumLedger::open(&path).expect("open");
        ledger.insert_or_replace("k.jpg", 1, 10, 100).expect("insert");
        ledger.insert_or_replace("k.jpg", 2, 20, 200).expect("replace");
        let entry = ledger.get("k.jpg").expect("get").expect("row");
        assert_eq!((entry.checksum, entry.size, entry.timestamp), (2, 20, 200));
        ledger.close().expect("close");

        let conn = Connection::open(&path).expect("reopen");
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM pictures", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[test]
    fn find_duplicate_matches_checksum_and_size() {
        let tmp = tempdir().expect("tempdir");
        let ledger = ChecksumLedger::open(&partition_path(tmp.path(), 2022)).expect("open");
        ledger.insert_or_replace("2022/01/2022-01-01/a.jpg", 7, 70, 1).expect("insert");
        assert_eq!(
            ledger.find_duplicate(7, 70).expect("dup"),
            Some("2022/01/2022-01-01/a.jpg".to_string())
        );
        assert_eq!(ledger.find_duplicate(7, 71).expect("dup"), None);
    }

    #[test]
    fn second_open_fails_fast_while_held() {
        let tmp = tempdir().expect("tempdir");
        let path = partition_path(tmp.path(), 2019);
        let mut first = ChecksumLedger::open(&path).expect("open");
        let err = ChecksumLedger::open(&path).expect_err("locked");
        assert!(matches!(err, ArchiveError::LedgerLocked { .. }));

        first.close().expect("close");
        let mut second = ChecksumLedger::open(&path).expect("reopen after close");
        second.close().expect("close");
    }

    #[test]
    fn close_is_idempotent_and_persists() {
        let tmp = tempdir().expect("tempdir");
        let path = partition_path(tmp.path(), 2018);
        let mut ledger = ChecksumLedger::open(&path).expect("open");
        ledger.insert_or_replace("x.jpg", 5, 6, 7).expect("insert");
        ledger.close().expect("close");
        ledger.close().expect("close again");
        assert!(!ledger.is_open());

        let reopened = ChecksumLedger::open(&path).expect("reopen");
        assert!(reopened.get("x.jpg").expect("get").is_some());
    }

    #[test]
    fn rejects_overlong_keys() {
        let tmp = tempdir().expect("tempdir");
        let ledger = ChecksumLedger::open(&partition_path(tmp.path(), 2017)).expect("open");
        let key = "a".repeat(MAX_KEY_CHARS + 1);
        assert!(matches!(
            ledger.insert_or_replace(&key, 1, 1, 1),
            Err(ArchiveError::LedgerKeyTooLong { .. })
        ));
    }

    #[test]
    fn checksum_is_crc32_of_contents() {
        let tmp = tempdir().expect("tempdir");
        let file = tmp.path().join("f.bin");
        fs::write(&file, b"123456789").expect("write");
        assert_eq!(file_checksum(&file).expect("crc"), 0xcbf4_3926);
    }

    #[test]
    fn mismatch_display_names_both_values() {
        let text = FieldMismatch::Size {
            actual: 10,
            recorded: 12,
        }
        .to_string();
        assert_eq!(text, "SIZE: 10 != 12");
    }
}
