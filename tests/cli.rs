use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn origami() -> Command {
    let mut cmd = Command::cargo_bin("origami").expect("binary exists");
    cmd.env_remove("ORIGAMI_ROOT")
        .env_remove("ORIGAMI_MAX_STEPS")
        .env_remove("ORIGAMI_MAX_CALL_DEPTH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn origami_run_quickstart() {
    let mut cmd = origami();
    cmd.arg("run").arg("demos/quickstart.zy");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Hello from Origami!"))
        .stdout(predicate::str::contains("1, 4, 9, 16, 25"))
        .stdout(predicate::str::ends_with("5 squares, sum 55\n"));
}

#[test]
fn origami_run_resolves_namespaces_next_to_the_script() {
    let mut cmd = origami();
    cmd.arg("run").arg("demos/shapes.zy");
    cmd.assert().success().stdout("5\n");
}

#[test]
fn origami_run_exceptions_demo() {
    let mut cmd = origami();
    cmd.arg("run").arg("demos/exceptions.zy");
    cmd.assert()
        .success()
        .stdout("[42, \"|\", \"not a number: abc\", \"|\", 7, \"|\"]\n");
}

#[test]
fn origami_eval_snippet() {
    let mut cmd = origami();
    cmd.arg("eval").arg("1 + 2;");
    cmd.assert().success().stdout("3\n");
}

#[test]
fn origami_eval_without_a_value_prints_nothing() {
    let mut cmd = origami();
    cmd.arg("eval").arg("$x = null; $x;");
    cmd.assert().success().stdout("");
}

#[test]
fn origami_eval_parse_error_fails() {
    let mut cmd = origami();
    cmd.arg("eval").arg("1 +");
    cmd.assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::starts_with("Parse error: "));
}

#[test]
fn origami_eval_runtime_error_fails() {
    let mut cmd = origami();
    cmd.arg("eval").arg("intdiv(1, 0);");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Fatal error: Division by zero in inmem.zy on line 1"));
}

#[test]
fn origami_run_names_errors_after_the_script() {
    let dir = tempdir().expect("create temp dir");
    let script = dir.path().join("broken.zy");
    fs::write(&script, "<?php\n\nundefined_thing();\n").expect("write script");

    let mut cmd = origami();
    cmd.arg("run").arg(&script);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Call to undefined function undefined_thing() in broken.zy on line 3",
    ));
}

#[test]
fn origami_restricted_refuses_namespace_files() {
    let dir = tempdir().expect("create temp dir");
    fs::write(dir.path().join("helper.zy"), "function helper() { return 1; }").expect("write helper");
    let script = dir.path().join("main.zy");
    fs::write(&script, "use helper; helper();").expect("write script");

    origami()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout("1\n");

    origami()
        .arg("--restricted")
        .arg("run")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("namespace `helper` not found"));
}

#[test]
fn origami_step_budget_from_the_environment() {
    let mut cmd = origami();
    cmd.env("ORIGAMI_MAX_STEPS", "100")
        .arg("eval")
        .arg("while (true) {}");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Maximum execution steps of 100 exceeded"));
}

#[test]
fn origami_run_missing_script_fails() {
    let mut cmd = origami();
    cmd.arg("run").arg("demos/does-not-exist.zy");
    cmd.assert().failure().stderr(predicate::str::contains("Error: Io"));
}
