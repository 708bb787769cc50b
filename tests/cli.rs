//! End-to-end tests driving the binary over fixture programs.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

fn program(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/programs")
        .join(name)
}

fn basic64() -> Command {
    Command::cargo_bin("basic64").expect("binary builds")
}

#[test]
fn sum_program_prints_55() {
    basic64()
        .arg(program("sum.bas"))
        .assert()
        .success()
        .stdout("55\n");
}

#[test]
fn sum_program_through_the_vm() {
    basic64()
        .arg(program("sum.bas"))
        .arg("--vm")
        .assert()
        .success()
        .stdout("55\n");
}

#[test]
fn comma_advances_to_the_tab_stop() {
    basic64()
        .arg(program("tabs.bas"))
        .assert()
        .success()
        .stdout(format!("A{}B\n", " ".repeat(14)));
}

#[test]
fn comma_tab_width_is_configurable() {
    basic64()
        .arg(program("tabs.bas"))
        .args(["--tabs", "8"])
        .assert()
        .success()
        .stdout(format!("A{}B\n", " ".repeat(7)));
}

#[test]
fn gosub_returns_to_the_caller() {
    basic64()
        .arg(program("gosub.bas"))
        .assert()
        .success()
        .stdout("Y\nX\n");
}

#[test]
fn two_dimensional_array_roundtrip() {
    basic64()
        .arg(program("dim.bas"))
        .assert()
        .success()
        .stdout("7\n");
}

#[test]
fn linear_solver_consumes_its_data() {
    let output = basic64()
        .arg(program("linear.bas"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    // One X1, X2 pair per DATA pair, then a clean stop on underflow.
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with('4'));
    assert!(lines[0].contains("-5.5"));
    assert!(lines[1].contains("0.666667"));
    assert!(lines[1].contains("0.166667"));
}

#[test]
fn seeded_rnd_is_reproducible() {
    let first = basic64()
        .arg(program("rnd.bas"))
        .args(["--random", "1"])
        .output()
        .unwrap();
    let second = basic64()
        .arg(program("rnd.bas"))
        .args(["--random", "1"])
        .output()
        .unwrap();

    assert_eq!(first.stdout, second.stdout);

    let text = String::from_utf8(first.stdout).unwrap();
    let values: Vec<f64> = text.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(values.len(), 2);
    for value in values {
        assert!((0.0..1.0).contains(&value));
    }
}

#[test]
fn missing_goto_target_is_reported_with_exit_zero() {
    basic64()
        .arg(program("gotomiss.bas"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Undefined line 99"));
}

#[test]
fn go_next_turns_the_missing_target_into_fallthrough() {
    basic64()
        .arg(program("gotomiss.bas"))
        .arg("--go-next")
        .assert()
        .success()
        .stdout("HERE\n");
}

#[test]
fn end_not_on_the_last_line_fails_preflight() {
    basic64()
        .arg(program("endmid.bas"))
        .assert()
        .success()
        .stdout("")
        .stderr(predicate::str::contains("END is not the last instruction"));
}

#[test]
fn parse_only_produces_no_output() {
    basic64()
        .arg(program("sum.bas"))
        .arg("--no-run")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn syntax_error_is_underlined_and_exit_is_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.bas");
    fs::write(&path, "10 LET = 5\n20 END\n").unwrap();

    basic64()
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("Syntax error"))
        .stderr(predicate::str::contains("^"));
}

#[test]
fn missing_input_file_is_a_driver_failure() {
    basic64().arg("no-such-file.bas").assert().failure();
}

#[test]
fn lex_dump_writes_the_token_listing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sum.bas");
    fs::copy(program("sum.bas"), &path).unwrap();

    basic64().arg(&path).arg("--lex").assert().success();

    let dump = fs::read_to_string(dir.path().join("sum.lex")).unwrap();
    assert!(dump.contains("Token(type=LET, value=LET, position=1:4)"));
    assert!(dump.contains("Token(type=INTEGER, value=10, position=1:1)"));
}

#[test]
fn ast_dump_writes_dot_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sum.bas");
    fs::copy(program("sum.bas"), &path).unwrap();

    basic64()
        .arg(&path)
        .args(["--ast", "dot"])
        .assert()
        .success();

    let dump = fs::read_to_string(dir.path().join("sum.dot")).unwrap();
    assert!(dump.starts_with("digraph AST {"));
    assert!(dump.contains("Command\\nlineno: 10"));
}

#[test]
fn symbol_table_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sum.bas");
    fs::copy(program("sum.bas"), &path).unwrap();

    basic64().arg(&path).arg("--sym").assert().success();

    let dump = fs::read_to_string(dir.path().join("sum_symtab.txt")).unwrap();
    assert!(dump.starts_with("SYMBOL TABLE"));
    assert!(dump.contains("I"));
    assert!(dump.contains("S"));
}

#[test]
fn ir_dump_lists_opcodes() {
    basic64()
        .arg(program("sum.bas"))
        .arg("--ir")
        .assert()
        .success()
        .stdout(predicate::str::contains("function main()"))
        .stdout(predicate::str::contains("LINE 10"))
        .stdout(predicate::str::contains("LOCAL_SET S"));
}

#[test]
fn input_redirection_reads_values_from_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let values = dir.path().join("values.txt");
    fs::write(&values, "41\nhello\n").unwrap();

    basic64()
        .arg(program("inputs.bas"))
        .arg("--uppercase")
        .args(["--input-file", values.to_str().unwrap()])
        .assert()
        .success()
        .stdout("41 HELLO\n");
}

#[test]
fn print_redirection_writes_the_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sum.bas");
    fs::copy(program("sum.bas"), &path).unwrap();

    basic64()
        .arg(&path)
        .arg("--output-file")
        .assert()
        .success()
        .stdout("");

    let text = fs::read_to_string(dir.path().join("sum_print.txt")).unwrap();
    assert_eq!(text, "55\n");
}

#[test]
fn stats_file_is_written_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sum.bas");
    fs::copy(program("sum.bas"), &path).unwrap();

    basic64().arg(&path).arg("--write-stats").assert().success();

    let text = fs::read_to_string(dir.path().join("sum_stats.txt")).unwrap();
    assert!(text.contains("seconds to run"));
    assert!(text.contains("Total number of processed lines:"));
}

#[test]
fn legacy_single_dash_flags_are_accepted() {
    // -rn behaves like --random.
    let first = basic64()
        .arg(program("rnd.bas"))
        .args(["-rn", "1"])
        .output()
        .unwrap();
    let second = basic64()
        .arg(program("rnd.bas"))
        .args(["--random", "1"])
        .output()
        .unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);

    // -ar behaves like --array-base.
    let dir = tempfile::tempdir().unwrap();
    let base0 = dir.path().join("base0.bas");
    fs::write(&base0, "10 DIM A(3)\n20 LET A(0) = 5\n30 PRINT A(0)\n40 END\n").unwrap();
    basic64()
        .arg(&base0)
        .args(["-ar", "0"])
        .assert()
        .success()
        .stdout("5\n");

    // -sl behaves like --slicing.
    let slice = dir.path().join("slice.bas");
    fs::write(&slice, "10 LET A$ = \"ABCDE\"\n20 PRINT A$(2, 3)\n30 END\n").unwrap();
    basic64().arg(&slice).arg("-sl").assert().success().stdout("BC\n");
}

#[test]
fn legacy_redirection_flags_are_accepted() {
    let dir = tempfile::tempdir().unwrap();

    // -of behaves like --output-file.
    let path = dir.path().join("sum.bas");
    fs::copy(program("sum.bas"), &path).unwrap();
    basic64().arg(&path).arg("-of").assert().success().stdout("");
    let text = fs::read_to_string(dir.path().join("sum_print.txt")).unwrap();
    assert_eq!(text, "55\n");

    // -if behaves like --input-file.
    let values = dir.path().join("values.txt");
    fs::write(&values, "41\nHELLO\n").unwrap();
    basic64()
        .arg(program("inputs.bas"))
        .args(["-if", values.to_str().unwrap()])
        .assert()
        .success()
        .stdout("41 HELLO\n");
}

#[test]
fn trace_announces_executed_lines() {
    basic64()
        .arg(program("sum.bas"))
        .arg("--trace")
        .assert()
        .success()
        .stdout(predicate::str::contains("Executing line 10"))
        .stdout(predicate::str::contains("Executing line 60"));
}
