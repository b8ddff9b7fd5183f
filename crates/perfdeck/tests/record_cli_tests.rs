//! End-to-end tests for `perfdeck record`, driven through a stub perf
//! binary so they run without perf installed.

#![cfg(unix)]

use std::path::Path;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_stub_perf(dir: &Path) -> PathBuf {
    let path = dir.join("fake-perf");
    let script = concat!(
        "#!/bin/sh\n",
        "out=\"\"\n",
        "while [ $# -gt 0 ]; do\n",
        "  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift 2; else shift; fi\n",
        "done\n",
        "echo recording\n",
        "printf 'PERFDATA' > \"$out\"\n",
        "exit 0\n",
    );
    std::fs::write(&path, script).unwrap();
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[test]
fn test_record_pid_target_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_stub_perf(dir.path());
    let output = dir.path().join("out.data");

    Command::cargo_bin("perfdeck")
        .unwrap()
        .arg("record")
        .args(["--pid", "4242"])
        .arg("-o")
        .arg(&output)
        .env("PERFDECK_PERF", &stub)
        .assert()
        .success()
        .stdout(predicate::str::contains("recording"));

    assert_eq!(std::fs::read(&output).unwrap(), b"PERFDATA");
}

#[test]
fn test_record_missing_output_folder_fails() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_stub_perf(dir.path());

    Command::cargo_bin("perfdeck")
        .unwrap()
        .args(["record", "--pid", "4242", "-o", "/no/such/folder/out.data"])
        .env("PERFDECK_PERF", &stub)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_record_without_target_fails() {
    Command::cargo_bin("perfdeck")
        .unwrap()
        .arg("record")
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing to record"));
}

#[test]
fn test_record_launch_target_passes_exe_tokens() {
    let dir = tempfile::tempdir().unwrap();
    // stub that echoes its arguments so the assembled command is visible
    let stub = dir.path().join("echo-perf");
    let script = concat!(
        "#!/bin/sh\n",
        "echo \"$@\"\n",
        "out=\"\"\n",
        "while [ $# -gt 0 ]; do\n",
        "  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift 2; else shift; fi\n",
        "done\n",
        "printf 'PERFDATA' > \"$out\"\n",
    );
    std::fs::write(&stub, script).unwrap();
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(&stub).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&stub, perms).unwrap();

    let output = dir.path().join("out.data");
    Command::cargo_bin("perfdeck")
        .unwrap()
        .arg("record")
        .arg("-o")
        .arg(&output)
        .args(["--perf-option", "--call-graph"])
        .arg("/bin/true")
        .env("PERFDECK_PERF", &stub)
        .assert()
        .success()
        .stdout(predicate::str::contains("record -o"))
        .stdout(predicate::str::contains("--call-graph"))
        .stdout(predicate::str::contains("/bin/true"));
}
