use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("gall-preview")
        .expect("binary built")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("gall-preview")
        .expect("binary built")
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("gall-preview").and(predicate::str::contains("--version")));
}

#[test]
fn missing_link_is_a_usage_error() {
    Command::cargo_bin("gall-preview")
        .expect("binary built")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing post url"));
}

#[test]
fn unknown_flag_is_rejected() {
    Command::cargo_bin("gall-preview")
        .expect("binary built")
        .arg("--frobnicate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown flag --frobnicate"));
}
