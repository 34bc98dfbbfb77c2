//! Front-end smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn valise() -> Command {
    Command::cargo_bin("valise").unwrap()
}

#[test]
fn version_prints_release_string() {
    valise().arg("--version").assert().success().stdout(predicate::str::contains("valise"));
}

#[test]
fn list_on_empty_root_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    valise()
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .args(["--config", dir.path().join("nonexistent.d").to_str().unwrap()])
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn unknown_package_maps_to_not_found_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    valise()
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .args(["--config", dir.path().join("nonexistent.d").to_str().unwrap()])
        .args(["show", "no-such-package"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn keygen_sign_verify_flow() {
    let dir = tempfile::tempdir().unwrap();
    let seckey = dir.path().join("test.key");
    let pubkey = dir.path().join("test.pub");
    let message = dir.path().join("payload");
    std::fs::write(&message, b"index bytes").unwrap();

    valise()
        .args(["keygen", "-s", seckey.to_str().unwrap(), "-p", pubkey.to_str().unwrap()])
        .assert()
        .success();
    valise()
        .args(["sign", message.to_str().unwrap(), "-s", seckey.to_str().unwrap()])
        .assert()
        .success();
    valise()
        .args(["verify", message.to_str().unwrap(), "-p", pubkey.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("verified"));

    // Tampering breaks verification.
    std::fs::write(&message, b"tampered bytes").unwrap();
    valise()
        .args(["verify", message.to_str().unwrap(), "-p", pubkey.to_str().unwrap()])
        .assert()
        .code(8);
}
