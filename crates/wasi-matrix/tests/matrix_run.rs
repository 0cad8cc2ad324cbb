//! End-to-end run: corpus discovery through report rendering, driven by a
//! shell-backed adapter so no WASI engine needs to be installed.

#![cfg(unix)]

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use wasi_matrix::{
    discover, run_matrix, write_report, AdapterError, Invocation, RunConfig, RuntimeAdapter,
    Sandbox, TestSpec, Verdict,
};

/// Runs the "compiled program" as a shell script with the engine-agnostic
/// argv convention: program path first, then the spec's arguments.
struct ShellEngine;

impl RuntimeAdapter for ShellEngine {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn prepare(
        &self,
        spec: &TestSpec,
        program: &Path,
        _sandbox: &Sandbox,
    ) -> Result<Invocation, AdapterError> {
        let mut args = vec![program.display().to_string()];
        args.extend(spec.args.iter().cloned());
        Ok(Invocation {
            program: "sh".to_string(),
            args,
        })
    }
}

/// An engine whose binary is not installed on this host.
struct AbsentEngine;

impl RuntimeAdapter for AbsentEngine {
    fn name(&self) -> &'static str {
        "absent"
    }

    fn prepare(
        &self,
        _spec: &TestSpec,
        _program: &Path,
        _sandbox: &Sandbox,
    ) -> Result<Invocation, AdapterError> {
        Ok(Invocation {
            program: "wasi-matrix-absent-engine".to_string(),
            args: vec![],
        })
    }
}

fn corpus_root() -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "wasi_matrix_e2e_{}_{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let tests = root.join("tests");
    fs::create_dir_all(tests.join("fixtures")).expect("corpus dirs");
    fs::write(tests.join("fixtures/data.txt"), b"shared fixture\n").expect("fixture");

    // Uppercases stdin.
    fs::write(tests.join("upper.wasm"), "tr a-z A-Z\n").expect("program");
    fs::write(
        tests.join("upper.json"),
        r#"{"stdin": "hello", "stdout": "HELLO"}"#,
    )
    .expect("spec");

    // Echoes its first argument.
    fs::write(tests.join("argv.wasm"), "echo \"$1\"\n").expect("program");
    fs::write(
        tests.join("argv.json"),
        r#"{"args": ["--flag"], "stdout": "--flag\n", "exitCode": 0}"#,
    )
    .expect("spec");

    // Reads the provisioned fixture copy relative to the sandbox.
    fs::write(tests.join("fixture_read.wasm"), "cat fixtures/data.txt\n").expect("program");
    fs::write(
        tests.join("fixture_read.json"),
        r#"{"stdout": "shared fixture\n"}"#,
    )
    .expect("spec");

    // Prints the wrong thing.
    fs::write(tests.join("wrong.wasm"), "printf nope\n").expect("program");
    fs::write(tests.join("wrong.json"), r#"{"stdout": "expected"}"#).expect("spec");

    // Spec document missing entirely.
    fs::write(tests.join("orphan.wasm"), "exit 0\n").expect("program");

    root
}

#[test]
fn full_run_produces_a_complete_report() {
    let root = corpus_root();
    let tests_dir = root.join("tests");

    let cases = discover(&tests_dir).expect("discover");
    let ids: Vec<&str> = cases.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["argv", "fixture_read", "orphan", "upper", "wrong"]);

    let adapters: Vec<Box<dyn RuntimeAdapter>> =
        vec![Box::new(ShellEngine), Box::new(AbsentEngine)];
    let config = RunConfig {
        fixture_source: tests_dir.join("fixtures"),
        timeout: None,
        keep_sandboxes: false,
    };

    let matrix = run_matrix(&cases, &adapters, &config, 2);

    // Every cell present, 5 tests x 2 adapters.
    let (pass, fail, error) = matrix.verdict_counts();
    assert_eq!(pass + fail + error, 10);

    let row = |id: &str| {
        matrix
            .tests()
            .iter()
            .position(|t| t == id)
            .expect("known row")
    };
    // Shell engine column is 0, absent engine column is 1.
    assert_eq!(matrix.cell(row("upper"), 0).verdict, Verdict::Pass);
    assert_eq!(matrix.cell(row("argv"), 0).verdict, Verdict::Pass);
    assert_eq!(matrix.cell(row("fixture_read"), 0).verdict, Verdict::Pass);
    assert_eq!(matrix.cell(row("wrong"), 0).verdict, Verdict::Fail);
    assert_eq!(matrix.cell(row("orphan"), 0).verdict, Verdict::Error);
    for id in ["upper", "argv", "fixture_read", "wrong", "orphan"] {
        assert_eq!(
            matrix.cell(row(id), 1).verdict,
            Verdict::Error,
            "absent engine must error for {id} without affecting other cells"
        );
    }

    let report_path = root.join("index.html");
    write_report(&matrix, &report_path).expect("write report");
    let doc = fs::read_to_string(&report_path).expect("read report");
    assert_eq!(doc.matches("<td class=").count(), 10);
    assert!(doc.contains("<th>shell</th>"));
    assert!(doc.contains("<th>absent</th>"));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn rerunning_a_cell_yields_the_same_matrix() {
    let root = corpus_root();
    let tests_dir = root.join("tests");
    let cases = discover(&tests_dir).expect("discover");
    let adapters: Vec<Box<dyn RuntimeAdapter>> = vec![Box::new(ShellEngine)];
    let config = RunConfig {
        fixture_source: tests_dir.join("fixtures"),
        timeout: None,
        keep_sandboxes: false,
    };

    let first = run_matrix(&cases, &adapters, &config, 1);
    let second = run_matrix(&cases, &adapters, &config, 1);
    for row in 0..first.tests().len() {
        assert_eq!(
            first.cell(row, 0).verdict,
            second.cell(row, 0).verdict,
            "verdict for {} must be stable",
            first.tests()[row]
        );
    }

    let _ = fs::remove_dir_all(root);
}
