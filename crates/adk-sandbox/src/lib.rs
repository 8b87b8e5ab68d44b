// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Container-sandboxed command execution.
//!
//! Mirrors the shape of a local command-execution environment (timeout
//! handling, structured result, env-var filtering) but runs the command
//! inside a throwaway Docker container instead of a local process, so a
//! tool invocation can be isolated from the host filesystem and network.
//!
//! Only images on an explicit allow-list may be run, credentials are
//! stripped from captured output before it reaches the caller, and the
//! container is removed on every exit path — success, error, or timeout.

mod executor;
mod redact;

pub use executor::{DockerSandboxExecutor, PullPolicy, SandboxConfig, SandboxExecutor, SandboxLimits};
pub use redact::redact_secrets;

use thiserror::Error;

/// The closed set of ways a sandboxed execution can fail.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("image '{0}' is not on the sandbox allow-list")]
    ImageNotAllowed(String),
    #[error("image '{0}' not found and pull policy forbids fetching it")]
    ImageNotFound(String),
    #[error("could not reach the Docker daemon: {0}")]
    DaemonUnavailable(String),
    #[error("container exceeded its resource limits: {0}")]
    ResourceExhausted(String),
    #[error("container creation failed: {0}")]
    CreateFailed(String),
    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// The outcome of one sandboxed command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}
