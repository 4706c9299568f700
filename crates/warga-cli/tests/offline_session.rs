//! Session commands against the in-memory backend.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn temp_home() -> TempDir {
    TempDir::new().expect("create temp warga home")
}

#[test]
fn test_whoami_signed_out() {
    let home = temp_home();

    cargo_bin_cmd!("warga")
        .env("WARGA_HOME", home.path())
        .args(["--offline", "whoami"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not signed in"));
}

#[test]
fn test_login_with_demo_account() {
    let home = temp_home();

    cargo_bin_cmd!("warga")
        .env("WARGA_HOME", home.path())
        .args(["--offline", "login", "--email", "admin@desa.id", "--password", "admin123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed in as admin@desa.id (administrator)"));
}

#[test]
fn test_login_with_wrong_password_fails() {
    let home = temp_home();

    cargo_bin_cmd!("warga")
        .env("WARGA_HOME", home.path())
        .env_remove("WARGA_PASSWORD")
        .args(["--offline", "login", "--email", "warga@desa.id", "--password", "salah"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid login credentials"));
}

#[test]
fn test_shell_redirects_on_sign_in_and_out() {
    let home = temp_home();

    cargo_bin_cmd!("warga")
        .env("WARGA_HOME", home.path())
        .args(["--offline", "shell"])
        .write_stdin(
            "go login\n\
             login warga@desa.id warga123\n\
             go statistics\n\
             go profile\n\
             logout\n\
             quit\n",
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("[login] Sign in"))
        .stdout(predicate::str::contains("[dashboard] Resident dashboard"))
        .stdout(predicate::str::contains("[statistics] Resident dashboard"))
        .stdout(predicate::str::contains("[profile] My profile"))
        .stdout(predicate::str::contains("[landing] Welcome"));
}

#[test]
fn test_shell_rejects_unknown_view() {
    let home = temp_home();

    cargo_bin_cmd!("warga")
        .env("WARGA_HOME", home.path())
        .args(["--offline", "shell"])
        .write_stdin("go complaints\nquit\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("unknown view `complaints`"));
}

#[test]
fn test_shell_signup_asks_for_profile_fields() {
    let home = temp_home();

    cargo_bin_cmd!("warga")
        .env("WARGA_HOME", home.path())
        .args(["--offline", "shell"])
        .write_stdin(
            "signup siti@desa.id rahasia\n\
             Siti Aminah\n\
             3201234567890001\n\
             Jl. Melati 4\n\
             \n\
             state\n\
             quit\n",
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("full name:"))
        .stdout(predicate::str::contains("Registered siti@desa.id"))
        .stdout(predicate::str::contains("name:    Siti Aminah"))
        .stdout(predicate::str::contains("role:    resident"));
}
