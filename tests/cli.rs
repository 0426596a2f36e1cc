//! End-to-end tests for the md2org binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn md2org(cwd: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("md2org"));
    cmd.current_dir(cwd).env_remove("RUST_LOG");
    cmd
}

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

#[test]
fn test_converts_tree_and_reports_progress() {
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("src/a/b/note.md"),
        "---\ntitle: Test\n---\n# Hi\n",
    );

    md2org(temp_dir.path())
        .args(["src", "dst"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1/1"));

    let org = fs::read_to_string(temp_dir.path().join("dst/a/b/note.org")).unwrap();
    assert!(org.starts_with(":PROPERTIES:\n"), "got {org}");
    assert!(org.contains(":TITLE: Test\n"), "got {org}");
    assert!(org.ends_with(":END:\n* Hi\n"), "got {org}");
    assert!(temp_dir.path().join("src/a/b/note.md.bak").exists());
}

#[test]
fn test_empty_source_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("src")).unwrap();

    md2org(temp_dir.path())
        .args(["src", "dst"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted 0/0 files"))
        .stderr(predicate::str::contains("No markdown files found"));

    let dst = temp_dir.path().join("dst");
    assert_eq!(fs::read_dir(dst).unwrap().count(), 0);
}

#[test]
fn test_missing_source_fails_without_creating_dest() {
    let temp_dir = TempDir::new().unwrap();

    md2org(temp_dir.path())
        .args(["missing", "dst"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Source directory not found"));

    assert!(!temp_dir.path().join("dst").exists());
}

#[test]
fn test_wrong_argument_count_prints_usage() {
    let temp_dir = TempDir::new().unwrap();

    md2org(temp_dir.path())
        .arg("only-one")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_log_file_flag_writes_log() {
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("src/n.md"), "text\n");

    md2org(temp_dir.path())
        .args(["--log-file", "src", "dst"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());

    let log = fs::read_to_string(temp_dir.path().join("md2org.log")).unwrap();
    assert!(log.contains(" - INFO - Found 1 markdown files to process"), "got {log}");
}

#[test]
fn test_failed_pandoc_is_reported_per_file() {
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("src/n.md"), "text\n");

    md2org(temp_dir.path())
        .args(["--engine", "pandoc", "--pandoc", "/nonexistent/pandoc", "src", "dst"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted 0/1 files"))
        .stderr(predicate::str::contains("1 files failed to convert"));

    assert!(!temp_dir.path().join("dst/n.org").exists());
}

#[test]
fn test_empty_backup_suffix_is_a_usage_error() {
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("src/n.md"), "keep me\n");

    md2org(temp_dir.path())
        .args(["--backup-suffix", "", "src", "dst"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--backup-suffix"));

    let text = fs::read_to_string(temp_dir.path().join("src/n.md")).unwrap();
    assert_eq!(text, "keep me\n");
}
