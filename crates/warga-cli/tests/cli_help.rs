use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("warga")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("signup"))
        .stdout(predicate::str::contains("whoami"))
        .stdout(predicate::str::contains("shell"))
        .stdout(predicate::str::contains("--offline"));
}

#[test]
fn test_signup_help_lists_profile_fields() {
    cargo_bin_cmd!("warga")
        .args(["signup", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--full-name"))
        .stdout(predicate::str::contains("--nik"))
        .stdout(predicate::str::contains("--address"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("warga")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("warga"));
}
