use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SCRIPT: &str = "const n = slider(\"n\");\nconst doubled = n * 2;\nconsole.log(doubled);\n";

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn atomflow(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("atomflow").unwrap();
    cmd.arg("--config").arg(temp_dir.path().join("atomflow.toml"));
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("atomflow")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: atomflow"))
        .stdout(predicate::str::contains("lift"))
        .stdout(predicate::str::contains("plan"));
}

#[test]
fn test_lift_prints_rewritten_script() {
    let temp_dir = TempDir::new().unwrap();
    let script = write(temp_dir.path(), "app.js", SCRIPT);

    atomflow(&temp_dir)
        .arg("lift")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow.atom({"))
        .stdout(predicate::str::contains("name: \"_auto_atom_"))
        .stdout(predicate::str::contains("component: \"slider-"))
        .stdout(predicate::str::contains("let n = param0;"))
        .stdout(predicate::str::ends_with("workflow.execute();\n"));
}

#[test]
fn test_plan_lists_atoms_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let script = write(temp_dir.path(), "app.js", SCRIPT);

    atomflow(&temp_dir)
        .arg("plan")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("Execution Plan:"))
        .stdout(predicate::str::contains("1. _auto_atom_"))
        .stdout(predicate::str::contains("3. _auto_atom_"))
        .stdout(predicate::str::contains("[depends on: _auto_atom_"))
        .stdout(predicate::str::contains("Total: 3 atom(s) in 3 level(s)"));
}

#[test]
fn test_extra_reactive_operation() {
    let temp_dir = TempDir::new().unwrap();
    let script = write(temp_dir.path(), "app.js", "const p = fetch_prices();\n");

    atomflow(&temp_dir)
        .arg("plan")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("No atoms to execute."));

    atomflow(&temp_dir)
        .args(["--reactive", "fetch_prices", "plan"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("1. _auto_atom_"));
}

#[test]
fn test_unsupported_assignment_is_data_error() {
    let temp_dir = TempDir::new().unwrap();
    let script = write(temp_dir.path(), "bad.js", "const a = get_df(\"a\");\nobj.attr = a;\n");

    atomflow(&temp_dir)
        .arg("lift")
        .arg(&script)
        .assert()
        .code(exitcode::DATAERR)
        .stderr(predicate::str::contains("Unsupported assignment (attribute target) at line 2"));
}

#[test]
fn test_missing_script() {
    let temp_dir = TempDir::new().unwrap();

    atomflow(&temp_dir)
        .arg("lift")
        .arg(temp_dir.path().join("nope.js"))
        .assert()
        .code(exitcode::NOINPUT);
}

#[test]
fn test_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "atomflow.toml", "max_concurrency = \"many\"\n");
    let script = write(temp_dir.path(), "app.js", SCRIPT);

    atomflow(&temp_dir)
        .arg("plan")
        .arg(&script)
        .assert()
        .code(exitcode::CONFIG);
}

#[test]
fn test_exported_lifted_value_is_data_error() {
    let temp_dir = TempDir::new().unwrap();
    let script = write(temp_dir.path(), "export.js", "export const n = get_df(\"n\");\n");

    atomflow(&temp_dir)
        .arg("lift")
        .arg(&script)
        .assert()
        .code(exitcode::DATAERR)
        .stderr(predicate::str::contains("Unsupported statement (export of a lifted value) at line 1"));
}
