use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_config_path_command() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_creates_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");

    assert!(!config_path.exists());

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config at"));

    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("client_id ="));
    assert!(contents.contains("dialog_page ="));
}

#[test]
fn test_config_init_fails_if_exists() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");

    fs::write(&config_path, "# existing config").unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_flag_overrides_home() {
    let dir = tempdir().unwrap();
    let custom = dir.path().join("custom.toml");

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .args(["config", "path", "--config"])
        .arg(&custom)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "origin = \"not a url\"\n").unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .arg("dialog-url")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config"));
}
