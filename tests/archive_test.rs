use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const PICTURE: &str = "IMG_20230615_101530.jpg";
const ARCHIVED: &str = "2023/06/2023-06-15/IMG_20230615_101530.jpg";

fn arcpics(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("arcpics");
    cmd.env("ARCPICS_HOME", home).env("NO_COLOR", "1");
    cmd
}

fn ledger_row(dest: &Path, name: &str) -> Option<(u32, u64)> {
    let conn = rusqlite::Connection::open(dest.join(".arcpics/checksums-2023.db")).expect("open db");
    conn.query_row(
        "SELECT checksum, size FROM pictures WHERE name = ?1",
        [name],
        |row| Ok((row.get::<_, i64>(0)? as u32, row.get::<_, i64>(1)? as u64)),
    )
    .ok()
}

#[test]
fn archive_places_file_by_name_date_and_records_checksum() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let src = tmp.path().join("card");
    let dest = tmp.path().join("archive");
    fs::create_dir_all(&src).expect("mkdir src");
    fs::write(src.join(PICTURE), b"jpeg-bytes").expect("write picture");

    arcpics(&home)
        .arg("archive")
        .arg(&src)
        .arg("--dest")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 of 1 files copied."))
        .stdout(predicate::str::contains("copied=1"));

    let archived = dest.join(ARCHIVED);
    assert_eq!(fs::read(&archived).expect("read archived"), b"jpeg-bytes");
    assert_eq!(
        ledger_row(&dest, ARCHIVED),
        Some((crc32fast::hash(b"jpeg-bytes"), 10))
    );

    let audit = fs::read_to_string(home.join("logs/audit.log")).expect("audit log");
    assert!(audit.contains("\"phase\":\"archive\""));
}

#[test]
fn second_archive_run_copies_nothing() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let src = tmp.path().join("card");
    let dest = tmp.path().join("archive");
    fs::create_dir_all(&src).expect("mkdir src");
    fs::write(src.join(PICTURE), b"jpeg-bytes").expect("write picture");

    arcpics(&home)
        .arg("archive")
        .arg(&src)
        .arg("--dest")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("copied=1"));

    arcpics(&home)
        .arg("archive")
        .arg(&src)
        .arg("--dest")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"))
        .stdout(predicate::str::contains("copied=0"));

    assert_eq!(
        ledger_row(&dest, ARCHIVED),
        Some((crc32fast::hash(b"jpeg-bytes"), 10))
    );
}

#[test]
fn archive_writes_run_log() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let src = tmp.path().join("card");
    let dest = tmp.path().join("archive");
    let log = tmp.path().join("run.log");
    fs::create_dir_all(&src).expect("mkdir src");
    fs::write(src.join(PICTURE), b"jpeg-bytes").expect("write picture");
    fs::write(src.join("readme.txt"), b"not media").expect("write text");

    arcpics(&home)
        .arg("archive")
        .arg(&src)
        .arg("--dest")
        .arg(&dest)
        .arg("-l")
        .arg(&log)
        .arg("--quiet")
        .assert()
        .success();

    let body = fs::read_to_string(&log).expect("run log");
    assert!(body.contains("COPIED_NUMBER=1\n"));
    assert!(body.contains("TOTAL_NUMBER=2\n"));
    assert!(body.contains("CANCELED=False\n"));
    assert!(body.contains("FOLDERS='2023/06/2023-06-15'\n"));
}

#[test]
fn sources_and_destination_come_from_config_file() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let src = tmp.path().join("card");
    let dest = tmp.path().join("archive");
    fs::create_dir_all(&src).expect("mkdir src");
    fs::create_dir_all(&home).expect("mkdir home");
    fs::write(src.join(PICTURE), b"jpeg-bytes").expect("write picture");
    fs::write(
        home.join("arcpics.toml"),
        format!(
            "[archive]\ndestination = {:?}\nsource_folders = [{:?}]\nmove_files = true\n",
            dest.display().to_string(),
            src.display().to_string()
        ),
    )
    .expect("write config");

    arcpics(&home).arg("archive").assert().success();

    assert!(dest.join(ARCHIVED).exists());
    assert!(!src.join(PICTURE).exists());
}

#[test]
fn invalid_config_is_fatal_with_code() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let src = tmp.path().join("card");
    fs::create_dir_all(&src).expect("mkdir src");

    arcpics(&home)
        .env("ARCPICS_MAX_RETRIES", "0")
        .arg("archive")
        .arg(&src)
        .arg("--dest")
        .arg(tmp.path().join("archive"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("E004_CONFIG_INVALID"));
}

#[test]
fn scan_only_lists_sources_without_copying() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let src = tmp.path().join("card");
    let dest = tmp.path().join("archive");
    fs::create_dir_all(&src).expect("mkdir src");
    fs::write(src.join(PICTURE), b"jpeg-bytes").expect("write picture");

    arcpics(&home)
        .arg("archive")
        .arg(&src)
        .arg("--dest")
        .arg(&dest)
        .arg("--scan-only")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("state=ready"))
        .stdout(predicate::str::contains("\"command\": \"archive\""));

    assert!(!dest.exists());
}
