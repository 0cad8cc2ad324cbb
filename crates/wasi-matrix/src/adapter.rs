//! Runtime adapters: one per engine under test.
//!
//! An adapter translates a [`TestSpec`] into the concrete launch convention
//! of its engine. Everything downstream of that translation (stdin piping,
//! output capture, waiting, exit-code recording) goes through one shared
//! spawn path so that a behavioral divergence is attributable to the engine
//! and not to harness plumbing.
//!
//! Two engine families exist:
//! - native-flag engines (wasmtime, wasmer) whose CLIs take `--env` and
//!   `--mapdir` grants directly;
//! - bridge engines (node, deno) that execute inside a managed scripting
//!   runtime and need a small bootstrap program wiring the engine's WASI
//!   shim to the guest module.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::AdapterError;
use crate::sandbox::Sandbox;
use crate::spec::TestSpec;

/// Drives one engine. Stateless across runs: holds only static identity and
/// is safe to share between concurrent cells.
pub trait RuntimeAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Translate one test's contract into this engine's launch invocation.
    fn prepare(
        &self,
        spec: &TestSpec,
        program: &Path,
        sandbox: &Sandbox,
    ) -> Result<Invocation, AdapterError>;
}

/// A concrete launch: host binary plus full argv, executed with the sandbox
/// root as working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Raw observations from one completed (or failed) engine process.
#[derive(Debug, Clone)]
pub struct CapturedProcess {
    /// None when the process died to a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Invocation {
    /// Spawn the process, pipe `stdin` if present, capture both output
    /// streams to completion, and wait, optionally bounded by `deadline`.
    /// A spawn failure maps to [`AdapterError::Invocation`]; an elapsed
    /// deadline kills the child and maps to [`AdapterError::Timeout`].
    pub fn spawn_and_capture(
        &self,
        engine: &'static str,
        cwd: &Path,
        stdin: Option<&[u8]>,
        deadline: Option<Duration>,
    ) -> Result<CapturedProcess, AdapterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(cwd);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|source| AdapterError::Invocation { engine, source })?;

        // Both streams are drained on their own threads so a chatty guest
        // cannot deadlock against a full pipe while we wait. The stdin
        // write runs on its own thread for the same reason: a guest that
        // never reads must not stall the wait loop (and its deadline)
        // behind a full pipe buffer.
        let stdout_reader = child.stdout.take().map(spawn_drain);
        let stderr_reader = child.stderr.take().map(spawn_drain);
        if let Some(bytes) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                let bytes = bytes.to_vec();
                thread::spawn(move || {
                    let _ = pipe.write_all(&bytes);
                    // pipe drops here, closing the guest's stdin
                });
            }
        }

        let status = match deadline {
            None => child.wait()?,
            Some(limit) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if started.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AdapterError::Timeout {
                            engine,
                            limit_secs: limit.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(20));
                }
            }
        };

        let stdout = stdout_reader
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_reader
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();

        Ok(CapturedProcess {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

/// Engines whose CLI takes filesystem and environment grants as repeated
/// flags: `--env KEY=VALUE`, `--mapdir guest::host`, then the program path,
/// then `--` and the guest arguments (separator only when arguments exist).
pub struct NativeCliAdapter {
    name: &'static str,
    binary: String,
}

impl NativeCliAdapter {
    pub fn new(name: &'static str, binary: impl Into<String>) -> Self {
        Self {
            name,
            binary: binary.into(),
        }
    }

    pub fn wasmtime() -> Self {
        Self::new("wasmtime", "wasmtime")
    }

    pub fn wasmer() -> Self {
        Self::new("wasmer", "wasmer")
    }
}

impl RuntimeAdapter for NativeCliAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn prepare(
        &self,
        spec: &TestSpec,
        program: &Path,
        sandbox: &Sandbox,
    ) -> Result<Invocation, AdapterError> {
        let mut args = vec!["run".to_string()];
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for (guest, host) in &spec.preopens {
            args.push("--mapdir".to_string());
            args.push(format!("{}::{}", guest, sandbox.resolve(host).display()));
        }
        args.push(program.display().to_string());
        if !spec.args.is_empty() {
            args.push("--".to_string());
            args.extend(spec.args.iter().cloned());
        }
        Ok(Invocation {
            program: self.binary.clone(),
            args,
        })
    }
}

/// The node bootstrap: loads the module, wires node's WASI implementation,
/// and presents `args[0] = program path` followed by the spec's arguments,
/// the same convention a native launcher gives the guest.
const NODE_BOOTSTRAP: &str = r#"const fs = require("fs");
const { WASI } = require("wasi");

const options = JSON.parse(process.argv[2]);
const pathname = process.argv[3];
const buffer = fs.readFileSync(pathname);

const wasi = new WASI({
  env: options.env,
  args: [pathname].concat(options.args),
  preopens: options.preopens,
});

WebAssembly.instantiate(buffer, {
  wasi_snapshot_preview1: wasi.wasiImport,
}).then(function ({ instance }) {
  wasi.start(instance);
});
"#;

const DENO_BOOTSTRAP: &str = r#"import Context from "https://deno.land/std/wasi/snapshot_preview1.ts";

const options = JSON.parse(Deno.args[0]);
const pathname = Deno.args[1];
const buffer = Deno.readFileSync(pathname);

const context = new Context({
  env: options.env,
  args: [pathname].concat(options.args),
  preopens: options.preopens,
});

WebAssembly.instantiate(buffer, {
  wasi_snapshot_preview1: context.exports,
}).then(function ({ instance }) {
  context.memory = instance.exports.memory;
  instance.exports._start();
});
"#;

/// Engines that execute inside a managed scripting runtime. The adapter
/// materializes a bootstrap program into the sandbox; the bootstrap
/// receives the serialized spec as its first external argument and the
/// guest program path as its second. Relative preopen host paths resolve
/// against the bootstrap's working directory, which is the sandbox root.
pub struct BridgeAdapter {
    name: &'static str,
    binary: String,
    runtime_flags: &'static [&'static str],
    bootstrap: &'static str,
    bootstrap_ext: &'static str,
}

impl BridgeAdapter {
    pub fn node() -> Self {
        Self {
            name: "node",
            binary: "node".to_string(),
            runtime_flags: &[
                "--no-warnings",
                "--experimental-wasi-unstable-preview1",
                "--experimental-wasm-bigint",
            ],
            bootstrap: NODE_BOOTSTRAP,
            bootstrap_ext: "js",
        }
    }

    pub fn deno() -> Self {
        Self {
            name: "deno",
            binary: "deno".to_string(),
            runtime_flags: &["run", "--quiet", "--allow-all", "--unstable"],
            bootstrap: DENO_BOOTSTRAP,
            bootstrap_ext: "ts",
        }
    }

    /// Write the bootstrap into the sandbox under a content-addressed name.
    /// Unique per sandbox, so concurrent cells never race on a shared
    /// generated file, and rewrites of identical content are idempotent.
    fn write_bootstrap(&self, sandbox: &Sandbox) -> Result<PathBuf, AdapterError> {
        let digest = Sha256::digest(self.bootstrap.as_bytes());
        let path = sandbox.root().join(format!(
            ".wasi-matrix-bootstrap-{}.{}",
            hex::encode(&digest[..8]),
            self.bootstrap_ext
        ));
        if !path.exists() {
            fs::write(&path, self.bootstrap)?;
        }
        Ok(path)
    }
}

impl RuntimeAdapter for BridgeAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn prepare(
        &self,
        spec: &TestSpec,
        program: &Path,
        sandbox: &Sandbox,
    ) -> Result<Invocation, AdapterError> {
        let bootstrap = self.write_bootstrap(sandbox)?;
        let mut args: Vec<String> = self.runtime_flags.iter().map(|f| f.to_string()).collect();
        args.push(bootstrap.display().to_string());
        args.push(spec.bridge_payload());
        args.push(program.display().to_string());
        Ok(Invocation {
            program: self.binary.clone(),
            args,
        })
    }
}

/// The configured engine set, in report column order.
pub fn default_adapters() -> Vec<Box<dyn RuntimeAdapter>> {
    vec![
        Box::new(NativeCliAdapter::wasmtime()),
        Box::new(NativeCliAdapter::wasmer()),
        Box::new(BridgeAdapter::node()),
        Box::new(BridgeAdapter::deno()),
    ]
}
