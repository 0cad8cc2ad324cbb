pub mod adapter;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod report;
pub mod sandbox;
pub mod spec;

pub use adapter::{
    default_adapters, BridgeAdapter, Invocation, NativeCliAdapter, RuntimeAdapter,
};
pub use engine::{execute_cell, run_matrix, ExecutionOutcome, RunConfig, Verdict};
pub use error::{AdapterError, ProvisionError, SpecError};
pub use matrix::Matrix;
pub use report::{render_report, write_report};
pub use sandbox::Sandbox;
pub use spec::{discover, TestCase, TestSpec};
