use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_dialog_url_defaults_to_empty_context() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .arg("dialog-url")
        .assert()
        .success()
        .stdout("https://localhost:3000/dialog.html?accountContext=%7B%7D\n");
}

#[test]
fn test_dialog_url_encodes_login_hint() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .args(["dialog-url", "--login-hint", "alice@contoso.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("accountContext="))
        .stdout(predicate::str::contains("%22loginHint%22"))
        .stdout(predicate::str::contains("tenantId").not());
}

#[test]
fn test_dialog_url_logout() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .args(["dialog-url", "--logout"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("dialog.html?logout=1\n"));
}

#[test]
fn test_dialog_url_logout_conflicts_with_hint() {
    cargo_bin_cmd!("paneauth")
        .args(["dialog-url", "--logout", "--login-hint", "a@b.c"])
        .assert()
        .failure();
}

#[test]
fn test_dialog_url_uses_configured_origin() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "origin = \"https://addin.contoso.com\"\ndialog_page = \"auth/dialog.html\"\n",
    )
    .unwrap();

    cargo_bin_cmd!("paneauth")
        .env("PANEAUTH_HOME", dir.path())
        .env_remove("PANEAUTH_CONFIG")
        .args(["dialog-url", "--logout"])
        .assert()
        .success()
        .stdout("https://addin.contoso.com/auth/dialog.html?logout=1\n");
}
