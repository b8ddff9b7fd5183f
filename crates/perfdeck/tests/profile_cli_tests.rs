//! End-to-end tests for `perfdeck profile` against a temp config file.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn perfdeck(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("perfdeck").unwrap();
    cmd.env("PERFDECK_CONFIG", config);
    cmd
}

#[test]
fn test_profile_save_show_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("profiles.toml");

    perfdeck(&config)
        .args(["profile", "save", "board"])
        .args(["--sysroot", "/opt/sysroot"])
        .args(["--extra-lib-paths", "/opt/lib:/opt/lib64"])
        .args(["--arch", "aarch64"])
        .assert()
        .success();

    perfdeck(&config)
        .args(["profile", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("board"));

    perfdeck(&config)
        .args(["profile", "show", "board"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/opt/sysroot"))
        .stdout(predicate::str::contains("/opt/lib:/opt/lib64"))
        .stdout(predicate::str::contains("aarch64"));

    perfdeck(&config)
        .args(["profile", "show", "board", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sysroot\": \"/opt/sysroot\""));
}

#[test]
fn test_profile_save_tracks_last_used() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("profiles.toml");

    perfdeck(&config)
        .args(["profile", "save", "first"])
        .assert()
        .success();
    perfdeck(&config)
        .args(["profile", "save", "second"])
        .assert()
        .success();

    perfdeck(&config)
        .args(["profile", "last-used"])
        .assert()
        .success()
        .stdout(predicate::str::contains("second"));

    perfdeck(&config)
        .args(["profile", "last-used", "first"])
        .assert()
        .success();
    perfdeck(&config)
        .args(["profile", "last-used"])
        .assert()
        .success()
        .stdout(predicate::str::contains("first"));
}

#[test]
fn test_profile_rename_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("profiles.toml");

    perfdeck(&config)
        .args(["profile", "save", "old", "--objdump", "my-objdump"])
        .assert()
        .success();
    perfdeck(&config)
        .args(["profile", "rename", "old", "new"])
        .assert()
        .success();

    perfdeck(&config)
        .args(["profile", "show", "new"])
        .assert()
        .success()
        .stdout(predicate::str::contains("my-objdump"));
    perfdeck(&config)
        .args(["profile", "show", "old"])
        .assert()
        .failure();

    perfdeck(&config)
        .args(["profile", "remove", "new"])
        .assert()
        .success();
    perfdeck(&config)
        .args(["profile", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_profile_remove_unknown_uses_config_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("profiles.toml");

    perfdeck(&config)
        .args(["profile", "remove", "ghost"])
        .assert()
        .code(78)
        .stderr(predicate::str::contains("no profile named 'ghost'"));
}
