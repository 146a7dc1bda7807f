//! Sandboxed execution of submitted code.
//!
//! # Components
//!
//! - [`SandboxInvocation`]: builds the container runtime command line
//! - [`ProcessLauncher`]: per-platform spawn and kill primitives
//! - [`SandboxExecutor`]: runs one job under a deadline and records the result
//!
//! # Execution Flow
//!
//! 1. Job moves to `running`
//! 2. Host paths are normalized and mounted at fixed locations under `/data`
//! 3. The runtime is spawned with stdout/stderr captured separately
//! 4. On exit the job becomes `completed` or `failed`; past the deadline the
//!    container and launcher are killed and the job becomes `timeout`

pub mod executor;
pub mod invocation;
pub mod launcher;

pub use executor::SandboxExecutor;
pub use invocation::{ExecutionRequest, PathStyle, SandboxInvocation};
pub use launcher::{host_launcher, ProcessLauncher};
