use chrono::{Local, TimeZone};
use filetime::FileTime;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn arcpics(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("arcpics");
    cmd.env("ARCPICS_HOME", home).env("NO_COLOR", "1");
    cmd
}

fn put(root: &Path, rel: &str, len: usize) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, vec![b'x'; len]).expect("write");
}

#[test]
fn reclaim_deletes_oldest_day_first() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("archive");
    put(&archive, "2020/01/2020-01-01/a.jpg", 100);
    put(&archive, "2021/01/2021-01-01/b.jpg", 100);

    arcpics(&tmp.path().join("home"))
        .arg("reclaim")
        .arg(&archive)
        .arg("--bytes")
        .arg("50")
        .assert()
        .success()
        .stdout(predicate::str::contains("freed=100"));

    assert!(!archive.join("2020").exists());
    assert!(archive.join("2021/01/2021-01-01/b.jpg").exists());
}

#[test]
fn reclaim_under_fulfilment_fails() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("archive");
    put(&archive, "2020/01/2020-01-01/a.jpg", 10);

    arcpics(&tmp.path().join("home"))
        .arg("reclaim")
        .arg(&archive)
        .arg("--bytes")
        .arg("1000")
        .arg("-d")
        .assert()
        .failure()
        .stdout(predicate::str::contains("freed=10"));

    assert!(archive.join("2020/01/2020-01-01/a.jpg").exists());
}

#[test]
fn correct_dates_sets_mtime_from_file_name() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path().join("pictures");
    put(&dir, "IMG_20200102_030405.jpg", 4);

    arcpics(&tmp.path().join("home"))
        .arg("correct-dates")
        .arg(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("corrected=1"));

    let expected = Local
        .with_ymd_and_hms(2020, 1, 2, 3, 4, 5)
        .earliest()
        .expect("local time")
        .timestamp();
    let meta = fs::metadata(dir.join("IMG_20200102_030405.jpg")).expect("meta");
    assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), expected);
}

#[test]
fn unknown_env_keys_are_reported() {
    let tmp = tempdir().expect("tempdir");
    let archive = tmp.path().join("archive");
    fs::create_dir_all(&archive).expect("mkdir");

    arcpics(&tmp.path().join("home"))
        .env("ARCPICS_NOT_A_SETTING", "1")
        .arg("reclaim")
        .arg(&archive)
        .arg("--bytes")
        .arg("0")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "ARCPICS_WARN code=UNKNOWN_ENV stage=config action=read-env path=ARCPICS_NOT_A_SETTING",
        ));
}
