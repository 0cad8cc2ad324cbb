use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures loading a test's specification document. Fatal for that test's
/// row only; every cell in the row is recorded as an `error` verdict.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("no specification found for test '{test}' (expected {path})")]
    NotFound { test: String, path: PathBuf },

    #[error("malformed specification {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read specification {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sandbox setup failure. Fatal for one cell, recorded as `error`.
#[derive(Debug, Error)]
#[error("sandbox provision failed: {0}")]
pub struct ProvisionError(#[from] pub io::Error);

/// Failures launching or supervising an engine process. Always classified
/// as an `error` verdict, never `fail`: the guest program's correctness was
/// not observed.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("engine '{engine}' could not be launched: {source}")]
    Invocation {
        engine: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("engine '{engine}' exceeded the {limit_secs}s run deadline")]
    Timeout { engine: &'static str, limit_secs: u64 },

    #[error("adapter i/o failure: {0}")]
    Io(#[from] io::Error),
}
