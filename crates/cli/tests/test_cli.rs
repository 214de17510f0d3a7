//! Exercises the `lit` binary end-to-end: a script file on disk, inline
//! `-e` source, and the exit-code contract (0 success, 2 failure, CLI
//! misuse truncated to 255 by `process::exit`).

use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn lit() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lit"))
}

#[test]
fn runs_a_script_file_from_disk() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("hello.lit");
    fs::write(&script, "print(1 + 2);").unwrap();

    let output = lit().arg(&script).output().expect("failed to run lit");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "3");
}

#[test]
fn runs_inline_source_via_exec_flag() {
    let output = lit()
        .arg("-e")
        .arg("print(\"hi\");")
        .output()
        .expect("failed to run lit");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hi");
}

#[test]
fn compile_error_exits_with_failure_code() {
    let output = lit()
        .arg("-e")
        .arg("var a = ;")
        .output()
        .expect("failed to run lit");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn no_arguments_is_cli_misuse() {
    let output = lit().output().expect("failed to run lit");
    // `process::exit(-1)` truncates to the low 8 bits of the process exit
    // status, which the shell reports as 255.
    assert_eq!(output.status.code(), Some(255));
}

#[test]
fn missing_file_is_a_failure_not_a_panic() {
    let output = lit()
        .arg("/nonexistent/path/does-not-exist.lit")
        .output()
        .expect("failed to run lit");
    assert_eq!(output.status.code(), Some(2));
}
