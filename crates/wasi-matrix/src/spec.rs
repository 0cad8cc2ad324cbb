//! Test corpus discovery and the per-test specification model.
//!
//! Each test is a pair of files sharing a base name: the compiled guest
//! program (`foo.wasm`) and its execution contract (`foo.json`).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SpecError;

/// One test's execution contract. Immutable once loaded.
///
/// Absent expectation fields mean "do not check", except `exit_code`: when
/// it is absent the run must still terminate cleanly with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    /// Environment variables injected into the guest.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Arguments presented to the guest after its own path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Filesystem grants: guest-visible path -> host path. Relative host
    /// paths resolve against the sandbox root.
    #[serde(default)]
    pub preopens: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Expected exact stdout, byte for byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Expected exact stderr, byte for byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl TestSpec {
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                let test = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                return Err(SpecError::NotFound {
                    test,
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(SpecError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| SpecError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The wire form handed to bridge bootstraps as their first external
    /// argument. Serialization of this plain string/map struct cannot
    /// fail; a panic here is a harness bug, not a runnable contract.
    pub fn bridge_payload(&self) -> String {
        serde_json::to_string(self).expect("TestSpec always serializes")
    }
}

/// One discovered corpus entry: the compiled program plus the location of
/// its specification document.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub id: String,
    pub program: PathBuf,
    pub spec_path: PathBuf,
}

impl TestCase {
    pub fn load_spec(&self) -> Result<TestSpec, SpecError> {
        TestSpec::load(&self.spec_path)
    }
}

/// Scan `tests_dir` for `*.wasm` programs, pairing each with its sibling
/// spec document. Returned cases are sorted lexicographically by id so the
/// matrix row order is stable across runs.
pub fn discover(tests_dir: &Path) -> anyhow::Result<Vec<TestCase>> {
    let entries = fs::read_dir(tests_dir)
        .with_context(|| format!("cannot read test corpus dir {}", tests_dir.display()))?;
    let mut cases = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("wasm") {
            continue;
        }
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        // Engines run with the sandbox as cwd; the program path must stay
        // valid from there.
        let program = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        let spec_path = path.with_extension("json");
        cases.push(TestCase {
            id,
            program,
            spec_path,
        });
    }
    cases.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(cases)
}
