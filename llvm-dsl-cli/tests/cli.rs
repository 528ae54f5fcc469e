//! Tests for the CLI
//!
//! Miri is globally disabled for these tests because they mostly involve
//! calling the CLI binary, which Miri doesn't support.
#![cfg(all(test, not(miri)))]

use assert_cmd::Command;
use assert_fs::NamedTempFile;
use assert_fs::fixture::FileWriteStr;
use llvm_dsl_cli::verify::VALID_PRINT;
use predicates::prelude::*;
use predicates::str::contains;
use rstest::{fixture, rstest};

const ADD_ONE: &str = r#"
define i32 @add_one(i32 %x) {
entry:
  %y = add i32 %x, 1
  ret i32 %y
}
"#;

const TWICE: &str = r#"
declare i32 @add_one(i32)

define i32 @twice(i32 %x) {
entry:
  %a = call i32 @add_one(i32 %x)
  %b = call i32 @add_one(i32 %a)
  ret i32 %b
}
"#;

const BAD_DOMINANCE: &str = r#"
define i32 @f(i32 %x) {
entry:
  br label %exit
exit:
  ret i32 %y
other:
  %y = add i32 %x, 1
  br label %exit
}
"#;

#[fixture]
fn cmd() -> Command {
    Command::cargo_bin("llvm-dsl").unwrap()
}

fn ir_file(name: &str, ir: &str) -> NamedTempFile {
    let file = NamedTempFile::new(name).unwrap();
    file.write_str(ir).unwrap();
    file
}

#[rstest]
fn verify_from_stdin(mut cmd: Command) {
    cmd.arg("verify").write_stdin(ADD_ONE);
    cmd.assert().success().stderr(contains(VALID_PRINT));
}

#[rstest]
#[case::verifier(BAD_DOMINANCE)]
#[case::parser("define i32 @f( {")]
fn verify_rejects(mut cmd: Command, #[case] ir: &str) {
    cmd.arg("verify").write_stdin(ir);
    cmd.assert().failure().stderr(contains(VALID_PRINT).not());
}

#[rstest]
fn quiet_failures_print_nothing(mut cmd: Command) {
    cmd.args(["-qq", "verify"]).write_stdin(BAD_DOMINANCE);
    cmd.assert().failure().stderr(predicate::str::is_empty());
}

#[rstest]
fn missing_input_file(mut cmd: Command) {
    cmd.args(["verify", "no-such-module.ll"]);
    cmd.assert().failure();
}

#[rstest]
fn convert_round_trip(mut cmd: Command) {
    let input = ir_file("add_one.ll", ADD_ONE);
    let bitcode = NamedTempFile::new("add_one.bc").unwrap();
    cmd.args(["convert", "--binary", "-o"])
        .arg(bitcode.path())
        .arg(input.path());
    cmd.assert().success();
    let bytes = std::fs::read(bitcode.path()).unwrap();
    assert!(bytes.starts_with(b"BC\xC0\xDE"));

    let mut back = Command::cargo_bin("llvm-dsl").unwrap();
    back.args(["convert", "--verify"]).arg(bitcode.path());
    back.assert()
        .success()
        .stdout(contains("define i32 @add_one(i32 %x)"));
}

#[rstest]
fn link_modules(mut cmd: Command) {
    let first = ir_file("twice.ll", TWICE);
    let second = ir_file("add_one.ll", ADD_ONE);
    cmd.arg("link").arg(first.path()).arg(second.path());
    cmd.assert()
        .success()
        .stdout(contains("define i32 @twice").and(contains("define i32 @add_one")));
}

#[rstest]
fn link_rejects_duplicate_definitions(mut cmd: Command) {
    let first = ir_file("a.ll", ADD_ONE);
    let second = ir_file("b.ll", ADD_ONE);
    cmd.arg("link").arg(first.path()).arg(second.path());
    cmd.assert().failure();
}

#[rstest]
#[case("0")]
#[case("2")]
#[case("s")]
fn optimize_levels(mut cmd: Command, #[case] level: &str) {
    cmd.args(["optimize", "-O", level]).write_stdin(TWICE);
    cmd.assert().success().stdout(contains("@twice"));
}

#[rstest]
fn optimize_rejects_unknown_levels(mut cmd: Command) {
    cmd.args(["optimize", "-O", "fast"]).write_stdin(ADD_ONE);
    cmd.assert().failure().stderr(contains("fast"));
}

#[rstest]
fn describe_symbols(mut cmd: Command) {
    cmd.arg("describe").write_stdin(TWICE);
    cmd.assert()
        .success()
        .stdout(contains("declare add_one").and(contains("define twice")));
}
