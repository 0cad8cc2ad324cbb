use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use wasi_matrix::{default_adapters, discover, run_matrix, write_report, RunConfig};

#[derive(Parser)]
#[command(
    name = "wasi-matrix",
    version,
    about = "WASI engine compatibility matrix harness"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every discovered test against every configured engine and write
    /// the matrix report.
    Run {
        /// Directory holding the compiled test programs and their spec
        /// documents.
        #[arg(long, default_value = "tests")]
        tests: PathBuf,
        /// Shared fixture tree copied into every sandbox. Defaults to
        /// `<tests>/fixtures`.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        /// Report output path.
        #[arg(long, default_value = "index.html")]
        out: PathBuf,
        /// Restrict the run to the named engines, keeping their configured
        /// column order. Repeatable.
        #[arg(long = "engine")]
        engines: Vec<String>,
        /// Number of cells to run concurrently. 1 runs strictly
        /// sequentially.
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        /// Per-cell deadline in seconds; a hang is recorded as an error
        /// verdict.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Keep sandbox directories for post-mortem inspection.
        #[arg(long)]
        keep_sandboxes: bool,
        #[arg(long)]
        json: bool,
    },
    /// List discovered test cases and the state of their spec documents.
    Discover {
        #[arg(long, default_value = "tests")]
        tests: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json!({
                    "ok": false,
                    "error": { "code": "command_failed", "message": err.to_string() }
                }));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            tests,
            fixtures,
            out,
            engines,
            jobs,
            timeout_secs,
            keep_sandboxes,
            json,
        } => {
            let cases = discover(&tests)?;
            let adapters = select_adapters(&engines)?;
            let fixture_source = fixtures.unwrap_or_else(|| tests.join("fixtures"));
            let config = RunConfig {
                fixture_source,
                timeout: timeout_secs.map(Duration::from_secs),
                keep_sandboxes,
            };

            let matrix = run_matrix(&cases, &adapters, &config, jobs);
            write_report(&matrix, &out)?;
            let (pass, fail, error) = matrix.verdict_counts();

            // Aggregate failure is conveyed by the report, not the exit
            // code: the harness runs to completion and exits 0.
            if json {
                let cells: Vec<Value> = matrix
                    .rows()
                    .flat_map(|(test, row)| {
                        matrix.adapters().iter().zip(row).map(move |(adapter, cell)| {
                            json!({
                                "test": test,
                                "adapter": adapter,
                                "verdict": cell.verdict.label(),
                                "exit_code": cell.exit_code,
                                "error": cell.error,
                            })
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "report": out.display().to_string(),
                    "tests": matrix.tests().len(),
                    "engines": matrix.adapters(),
                    "pass": pass,
                    "fail": fail,
                    "error": error,
                    "cells": cells,
                })));
            }
            println!("tests: {}", matrix.tests().len());
            println!("engines: {}", matrix.adapters().join(", "));
            println!("pass: {pass}");
            println!("fail: {fail}");
            println!("error: {error}");
            println!("report: {}", out.display());
        }
        Commands::Discover { tests, json } => {
            let cases = discover(&tests)?;
            if json {
                let entries: Vec<Value> = cases
                    .iter()
                    .map(|case| {
                        let spec_state = match case.load_spec() {
                            Ok(_) => "ok".to_string(),
                            Err(e) => e.to_string(),
                        };
                        json!({
                            "id": case.id,
                            "program": case.program.display().to_string(),
                            "spec": case.spec_path.display().to_string(),
                            "spec_state": spec_state,
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "discover",
                    "tests": entries,
                })));
            }
            for case in &cases {
                let spec_state = match case.load_spec() {
                    Ok(_) => "ok".to_string(),
                    Err(e) => e.to_string(),
                };
                println!("{}: {}", case.id, spec_state);
            }
        }
    }
    Ok(None)
}

fn select_adapters(
    engines: &[String],
) -> Result<Vec<Box<dyn wasi_matrix::RuntimeAdapter>>> {
    let mut adapters = default_adapters();
    if engines.is_empty() {
        return Ok(adapters);
    }
    let known: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
    for requested in engines {
        if !known.contains(&requested.as_str()) {
            return Err(anyhow!(
                "unknown engine '{}' (known: {})",
                requested,
                known.join(", ")
            ));
        }
    }
    adapters.retain(|a| engines.iter().any(|e| e == a.name()));
    Ok(adapters)
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Discover { json, .. } => *json,
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}
