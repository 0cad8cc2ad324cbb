//! Per-cell execution and verdict classification, plus the run loop that
//! turns (tests × adapters) into a flat stream of independent cells.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapter::{CapturedProcess, RuntimeAdapter};
use crate::matrix::Matrix;
use crate::sandbox::Sandbox;
use crate::spec::{TestCase, TestSpec};

/// Execution knobs shared by every cell of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Shared read-only fixture tree copied into every sandbox.
    pub fixture_source: PathBuf,
    /// Optional per-cell deadline; a hang is an infrastructure concern and
    /// classifies as `error`.
    pub timeout: Option<Duration>,
    /// Keep sandbox directories for post-mortem inspection.
    pub keep_sandboxes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Error => "error",
        }
    }
}

/// The result of one (test, adapter) cell.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set only for `error` verdicts: the infrastructure failure message.
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Run one cell: provision a sandbox, launch the engine through its
/// adapter, classify the observations. Infrastructure failures become
/// `error` outcomes; a correctness mismatch is a recorded `fail`. This
/// function never returns an error, so one broken cell cannot abort the
/// rest of the matrix.
pub fn execute_cell(
    spec: &TestSpec,
    program: &Path,
    adapter: &dyn RuntimeAdapter,
    config: &RunConfig,
) -> ExecutionOutcome {
    let mut sandbox = match Sandbox::provision(&config.fixture_source) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            warn!(engine = adapter.name(), error = %e, "sandbox provision failed");
            return ExecutionOutcome::infrastructure(e.to_string());
        }
    };
    if config.keep_sandboxes {
        sandbox.retain();
    }

    let invocation = match adapter.prepare(spec, program, &sandbox) {
        Ok(invocation) => invocation,
        Err(e) => {
            warn!(engine = adapter.name(), error = %e, "adapter preparation failed");
            return ExecutionOutcome::infrastructure(e.to_string());
        }
    };
    debug!(
        engine = adapter.name(),
        program = %invocation.program,
        args = ?invocation.args,
        sandbox = %sandbox.root().display(),
        "launching cell"
    );

    let stdin = spec.stdin.as_deref().map(str::as_bytes);
    match invocation.spawn_and_capture(adapter.name(), sandbox.root(), stdin, config.timeout) {
        Ok(captured) => classify(spec, captured),
        Err(e) => {
            warn!(engine = adapter.name(), error = %e, "engine invocation failed");
            ExecutionOutcome::infrastructure(e.to_string())
        }
    }
}

/// Compare observations against the spec's present expectations. Exact byte
/// equality on the streams, no normalization. An absent exit-code
/// expectation still requires a clean zero exit: a signal death or nonzero
/// status never silently passes.
fn classify(spec: &TestSpec, captured: CapturedProcess) -> ExecutionOutcome {
    let exit_ok = match spec.exit_code {
        Some(expected) => captured.exit_code == Some(expected),
        None => captured.exit_code == Some(0),
    };
    let stdout_ok = spec
        .stdout
        .as_ref()
        .map(|expected| expected.as_bytes() == captured.stdout.as_slice())
        .unwrap_or(true);
    let stderr_ok = spec
        .stderr
        .as_ref()
        .map(|expected| expected.as_bytes() == captured.stderr.as_slice())
        .unwrap_or(true);

    let verdict = if exit_ok && stdout_ok && stderr_ok {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    ExecutionOutcome {
        verdict,
        exit_code: captured.exit_code,
        stdout: captured.stdout,
        stderr: captured.stderr,
        error: None,
    }
}

/// Run the whole corpus against the whole adapter set and aggregate into a
/// matrix. `jobs <= 1` runs strictly sequentially; larger values dispatch
/// the flat cell list onto that many worker threads, each cell keeping its
/// own sandbox and one blocking spawn/wait.
pub fn run_matrix(
    cases: &[TestCase],
    adapters: &[Box<dyn RuntimeAdapter>],
    config: &RunConfig,
    jobs: usize,
) -> Matrix {
    info!(
        tests = cases.len(),
        engines = adapters.len(),
        jobs = jobs.max(1),
        "starting matrix run"
    );

    // Spec load happens once per test. A failure poisons the whole row:
    // every cell records the error so the matrix stays complete.
    let specs: Vec<Result<TestSpec, String>> = cases
        .iter()
        .map(|case| case.load_spec().map_err(|e| e.to_string()))
        .collect();

    let work: Vec<(usize, usize)> = (0..cases.len())
        .flat_map(|t| (0..adapters.len()).map(move |a| (t, a)))
        .collect();

    let run_one = |test_idx: usize, adapter_idx: usize| -> ExecutionOutcome {
        match &specs[test_idx] {
            Ok(spec) => execute_cell(
                spec,
                &cases[test_idx].program,
                adapters[adapter_idx].as_ref(),
                config,
            ),
            Err(message) => ExecutionOutcome::infrastructure(message.clone()),
        }
    };

    let mut results: Vec<(String, String, ExecutionOutcome)> =
        Vec::with_capacity(work.len());
    if jobs <= 1 {
        for (test_idx, adapter_idx) in work {
            let outcome = run_one(test_idx, adapter_idx);
            results.push((
                cases[test_idx].id.clone(),
                adapters[adapter_idx].name().to_string(),
                outcome,
            ));
        }
    } else {
        let queue = Mutex::new(VecDeque::from(work));
        let collected = Mutex::new(Vec::with_capacity(cases.len() * adapters.len()));
        std::thread::scope(|scope| {
            for _ in 0..jobs {
                scope.spawn(|| loop {
                    let item = queue.lock().expect("work queue lock").pop_front();
                    let Some((test_idx, adapter_idx)) = item else {
                        break;
                    };
                    let outcome = run_one(test_idx, adapter_idx);
                    collected.lock().expect("result lock").push((
                        cases[test_idx].id.clone(),
                        adapters[adapter_idx].name().to_string(),
                        outcome,
                    ));
                });
            }
        });
        results = collected.into_inner().expect("result lock");
    }

    let test_ids: Vec<String> = cases.iter().map(|c| c.id.clone()).collect();
    let adapter_names: Vec<String> = adapters.iter().map(|a| a.name().to_string()).collect();
    Matrix::aggregate(test_ids, adapter_names, results)
}
