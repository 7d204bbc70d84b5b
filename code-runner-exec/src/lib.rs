//! Sandboxed execution of untrusted snippets of code.
//!
//! The [`CodeExecutor`](struct.CodeExecutor.html) receives an
//! [`ExecutionRequest`](struct.ExecutionRequest.html), prepares a fresh
//! [`Sandbox`](sandbox/struct.Sandbox.html) directory for it and asks a
//! [`SandboxRunner`](trait.SandboxRunner.html) to run the interpreter of the language inside a
//! sandbox provided by [`tabox`](https://crates.io/crates/tabox). The outcome is always an
//! [`ExecutionResult`](struct.ExecutionResult.html), failures included.
//!
//! ## Implementation details
//!
//! The sandbox needs to be created by a single-threaded process, so the actual runner lives in a
//! separate helper executable that receives a [`SandboxJob`](sandbox/struct.SandboxJob.html) and
//! replies with a [`RawSandboxResult`](sandbox/enum.RawSandboxResult.html). The helper is the
//! leader of a new process group: when an execution times out, is cancelled or its future is
//! dropped, the whole group is killed.
//!
//! The number of executions running at the same time is bounded by
//! [`RunnerConfig::max_concurrent`](struct.RunnerConfig.html#structfield.max_concurrent), the
//! exceeding ones wait in a bounded queue and are rejected when it's full.

#![deny(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use(defer)]
extern crate scopeguard;

pub use config::{
    ConfigError, ExecutionLimits, RunnerConfig, DEFAULT_MAX_QUEUED, DEFAULT_MEMORY_LIMIT,
    DEFAULT_OUTPUT_LIMIT, DEFAULT_TIMEOUT, FILE_SIZE_LIMIT,
};
pub use executor::CodeExecutor;
pub use result::{
    CapturedOutput, ExecutionRequest, ExecutionResult, ExecutionStatus, ResourcesUsage,
    CANCELLED_MESSAGE, EMPTY_CODE_MESSAGE, REJECTED_MESSAGE, TIMEOUT_MESSAGE, TRUNCATED_MARKER,
};
pub use sandbox::{RawSandboxResult, SandboxJob};
pub use sandbox_runner::{
    kill_process_group, publish_pid, stop_process_group, ErrorSandboxRunner, SandboxRunner,
    SuccessSandboxRunner, STOPPED_PID,
};
pub use tokio_util::sync::CancellationToken;

mod config;
mod executor;
pub mod find_tools;
mod result;
pub mod sandbox;
mod sandbox_runner;
