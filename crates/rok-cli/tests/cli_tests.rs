// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `rok` CLI binary. These only exercise argument
//! parsing and usage errors — every command that touches the store or
//! signer requires live infrastructure and is covered at the unit level in
//! `src/commands.rs` instead.

use assert_cmd::Command;
use predicates::str::contains;

fn rok() -> Command {
    Command::cargo_bin("rok").expect("binary `rok` should be built")
}

#[test]
fn help_flag_prints_usage() {
    rok()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("verify-chain"))
        .stdout(contains("export"))
        .stdout(contains("replay"))
        .stdout(contains("publish"));
}

#[test]
fn version_flag_prints_version() {
    rok()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn verify_chain_requires_from_and_to() {
    rok().arg("verify-chain").assert().failure();
}

#[test]
fn verify_chain_rejects_a_malformed_timestamp() {
    rok()
        .args(["verify-chain", "--from", "not-a-date", "--to", "2026-01-01T00:00:00Z"])
        .assert()
        .failure()
        .stderr(contains("not a valid RFC 3339 timestamp"));
}

#[test]
fn publish_resubmit_rejects_a_non_uuid_task_id() {
    rok()
        .args(["publish", "resubmit", "not-a-uuid"])
        .assert()
        .failure()
        .stderr(contains("not a valid task id"));
}

#[test]
fn export_rejects_an_unsupported_uri_scheme() {
    rok()
        .args([
            "export",
            "--from",
            "2026-01-01T00:00:00Z",
            "--to",
            "2026-01-02T00:00:00Z",
            "--to-uri",
            "ftp://nowhere/bucket",
        ])
        .assert()
        .failure();
}
