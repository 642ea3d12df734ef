use predicates::prelude::*;
use std::fs;

fn el2() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("el2").unwrap()
}

fn fixture_path(name: &str) -> String {
    format!(
        "{}/tests/fixtures/{}.el2",
        env!("CARGO_MANIFEST_DIR"),
        name
    )
}

// ── check command ───────────────────────────────────────────

#[test]
fn check_valid_file_exits_zero() {
    el2()
        .args(["check", &fixture_path("identity")])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn check_type_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.el2");
    fs::write(&file, "let main () : i64 = true").unwrap();

    el2()
        .args(["check", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot unify"));
}

#[test]
fn syntax_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.el2");
    fs::write(&file, "let main ( = 1").unwrap();

    el2()
        .args(["check", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

// ── compile command ─────────────────────────────────────────

#[test]
fn compile_identity_emits_specialization() {
    el2()
        .args(["compile", &fixture_path("identity")])
        .assert()
        .success()
        .stdout(predicate::str::contains("identity_id_inst_I64"))
        .stdout(predicate::str::contains("int main(void)"))
        .stdout(predicate::str::contains("#include <stdint.h>"));
}

#[test]
fn compile_option_emits_tagged_union() {
    el2()
        .args(["compile", &fixture_path("option")])
        .assert()
        .success()
        .stdout(predicate::str::contains("enum option_I64_tag"))
        .stdout(predicate::str::contains("option_I64_Some_TAG"))
        .stdout(predicate::str::contains(".data.Some"));
}

#[test]
fn compile_mutual_recursion_emits_both_functions() {
    el2()
        .args(["compile", &fixture_path("mutual")])
        .assert()
        .success()
        .stdout(predicate::str::contains("bool mutual_even(int64_t"))
        .stdout(predicate::str::contains("bool mutual_odd(int64_t"));
}

#[test]
fn compile_hello_uses_external_name_without_declaration() {
    el2()
        .args(["compile", &fixture_path("hello")])
        .assert()
        .success()
        .stdout(predicate::str::contains("puts(\"Hello, world!\")"))
        .stdout(predicate::str::contains("extern int puts").not());
}

#[test]
fn compile_structs_uses_designated_initializers() {
    el2()
        .args(["compile", &fixture_path("structs")])
        .assert()
        .success()
        .stdout(predicate::str::contains("struct point {"))
        .stdout(predicate::str::contains(".x = 3LL"));
}

// ── module handling ─────────────────────────────────────────

#[test]
fn module_cycle_is_reported() {
    el2()
        .args(["compile", &fixture_path("cycle_a")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("module cycle"))
        .stderr(predicate::str::contains("Cycle_a"));
}

#[test]
fn cycle_failure_writes_no_c_output() {
    el2()
        .args(["compile", &fixture_path("cycle_a")])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}

#[test]
fn open_across_files_compiles() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("util.el2"),
        "let double (x : i64) : i64 = x * 2",
    )
    .unwrap();
    fs::write(
        dir.path().join("app.el2"),
        "open Util\nlet main () : i64 = double(21)",
    )
    .unwrap();

    el2()
        .args(["compile", dir.path().join("app.el2").to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("util_double"));
}

// ── error handling ──────────────────────────────────────────

#[test]
fn missing_file_produces_error() {
    el2()
        .args(["compile", "nonexistent.el2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn no_subcommand_shows_help() {
    el2()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn unknown_variable_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.el2");
    fs::write(&file, "let main () = missing").unwrap();

    el2()
        .args(["check", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown variable `missing`"));
}
