//! Integration tests for the flowcraft CLI binary.
//!
//! These run the actual binary and verify diagnostics format, manifest
//! output, and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn flowcraft_cmd() -> Command {
    Command::cargo_bin("flowcraft").unwrap()
}

fn write(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

const VALID_PROJECT: &str = r#"
/** @step */
export async function greet(name: string): Promise<string> { return hello(name); }

/** @flow */
export async function main() {
  await greet("world");
}
"#;

#[test]
fn help_shows_subcommands() {
    flowcraft_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn check_succeeds_on_a_valid_project() {
    let dir = TempDir::new().unwrap();
    write(&dir, "src/index.ts", VALID_PROJECT);

    flowcraft_cmd()
        .args(["check", "--project"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("checked"))
        .stdout(predicate::str::contains("1 flow(s)"));
}

#[test]
fn check_summary_lists_flows() {
    let dir = TempDir::new().unwrap();
    write(&dir, "src/index.ts", VALID_PROJECT);

    flowcraft_cmd()
        .args(["check", "--summary", "--project"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("main:"))
        .stdout(predicate::str::contains("nodes"));
}

#[test]
fn compile_writes_the_manifest() {
    let dir = TempDir::new().unwrap();
    write(&dir, "src/index.ts", VALID_PROJECT);

    flowcraft_cmd()
        .args(["compile", "--project"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("compiled"));

    let manifest = fs::read_to_string(dir.path().join("dist/flowcraft.manifest.ts")).unwrap();
    assert!(manifest.contains("export const registry"));
    assert!(manifest.contains("export const blueprints"));
    assert!(manifest.contains("\"greet\""));
}

#[test]
fn config_file_overrides_entry_points() {
    let dir = TempDir::new().unwrap();
    write(&dir, "app/flows.ts", VALID_PROJECT);
    write(
        &dir,
        "flowcraft.config.json",
        r#"{"entryPoints": ["app/flows.ts"], "manifestPath": "out/manifest.ts"}"#,
    );

    flowcraft_cmd()
        .args(["compile", "--project"])
        .arg(dir.path())
        .assert()
        .success();

    assert!(dir.path().join("out/manifest.ts").is_file());
}

#[test]
fn error_diagnostics_fail_the_build_with_location() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "src/index.ts",
        r#"
/** @flow */
export async function main() {
  break;
}
"#,
    );

    flowcraft_cmd()
        .args(["check", "--project"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("'break' outside of a loop"))
        .stderr(predicate::str::is_match(r"index\.ts:\d+:\d+ - ").unwrap());
}

#[test]
fn warnings_do_not_fail_the_build() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "src/index.ts",
        r#"
import { sleep } from "flowcraft/durable";

/** @step */
export async function go(): Promise<void> { return g(); }

/** @flow */
export async function main() {
  sleep(1000);
  await go();
}
"#,
    );

    flowcraft_cmd()
        .args(["check", "--project"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "durable primitive called without suspension",
        ));
}

#[test]
fn missing_entry_file_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    // no src/index.ts at all

    flowcraft_cmd()
        .args(["check", "--project"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read entry file"));
}
