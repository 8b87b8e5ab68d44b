// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::redact::redact_secrets;
use crate::{ExecOutcome, SandboxError};

/// Whether to pull an image before running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull only if the image is not already present locally.
    #[default]
    IfMissing,
    /// Never pull — fail with [`SandboxError::ImageNotFound`] if absent.
    Never,
    /// Always pull before running, even if present locally.
    Always,
}

/// Resource and time caps applied to every sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout_ms: u64,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            memory_bytes: Some(512 * 1024 * 1024),
            nano_cpus: Some(1_000_000_000), // 1 vCPU
        }
    }
}

/// Sandbox-wide configuration: which images may run and under what caps.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub allowed_images: Vec<String>,
    pub pull_policy: PullPolicy,
    pub limits: SandboxLimits,
}

impl SandboxConfig {
    pub fn is_allowed(&self, image: &str) -> bool {
        self.allowed_images.iter().any(|a| a == image)
    }
}

/// Runs a command inside an isolated environment and returns its structured
/// outcome. The Docker-backed implementation is [`DockerSandboxExecutor`];
/// other backends (gVisor, Firecracker, a remote build farm) can implement
/// the same trait.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn run(
        &self,
        image: &str,
        command: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&str>,
    ) -> Result<ExecOutcome, SandboxError>;
}

/// Docker-backed [`SandboxExecutor`], built on `bollard`.
pub struct DockerSandboxExecutor {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerSandboxExecutor {
    /// Connect to the local Docker daemon using its default socket/pipe.
    pub fn connect(config: SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DaemonUnavailable(e.to_string()))?;
        Ok(Self { docker, config })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        let present = self.docker.inspect_image(image).await.is_ok();

        match self.config.pull_policy {
            PullPolicy::Never if !present => {
                return Err(SandboxError::ImageNotFound(image.to_string()));
            }
            PullPolicy::Never => return Ok(()),
            PullPolicy::IfMissing if present => return Ok(()),
            _ => {}
        }

        debug!(image, "pulling sandbox image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(SandboxError::ImageNotFound(format!("{image}: {e}")));
            }
        }
        Ok(())
    }

    async fn cleanup(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(container_id, Some(options)).await {
            warn!(container_id, error = %e, "failed to remove sandbox container");
        }
    }
}

#[async_trait]
impl SandboxExecutor for DockerSandboxExecutor {
    async fn run(
        &self,
        image: &str,
        command: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&str>,
    ) -> Result<ExecOutcome, SandboxError> {
        if !self.config.is_allowed(image) {
            return Err(SandboxError::ImageNotAllowed(image.to_string()));
        }

        self.ensure_image(image).await?;

        let env_pairs: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let limits = &self.config.limits;

        let host_config = HostConfig {
            memory: limits.memory_bytes,
            nano_cpus: limits.nano_cpus,
            network_mode: Some("none".to_string()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(image.to_string()),
            cmd: Some(command.to_vec()),
            env: Some(env_pairs),
            working_dir: working_dir.map(str::to_string),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: format!("adk-sandbox-{}", uuid_suffix()),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;
        let container_id = container.id;

        // The container is removed on every exit path below, including the
        // error branches, so no early return skips cleanup.
        let result = self.run_started(&container_id).await;
        self.cleanup(&container_id).await;

        let mut outcome = result?;
        outcome.stdout = redact_secrets(&outcome.stdout, env);
        outcome.stderr = redact_secrets(&outcome.stderr, env);
        Ok(outcome)
    }
}

impl DockerSandboxExecutor {
    async fn run_started(&self, container_id: &str) -> Result<ExecOutcome, SandboxError> {
        self.docker
            .start_container::<String>(container_id, None)
            .await
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.limits.timeout_ms);

        let wait_fut = self.collect_wait(container_id);
        let timed_out = tokio::time::timeout(timeout, wait_fut).await.is_err();

        if timed_out {
            if let Err(e) = self.docker.stop_container(container_id, None).await {
                warn!(container_id, error = %e, "failed to stop timed-out sandbox container");
            }
        }

        let (stdout, stderr) = self.collect_logs(container_id).await;
        let exit_code = if timed_out {
            -1
        } else {
            self.inspect_exit_code(container_id).await
        };

        Ok(ExecOutcome {
            exit_code,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out,
        })
    }

    async fn collect_wait(&self, container_id: &str) {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_id, Some(options));
        while stream.next().await.is_some() {}
    }

    async fn collect_logs(&self, container_id: &str) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bollard::container::LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(bollard::container::LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }
        (stdout, stderr)
    }

    async fn inspect_exit_code(&self, container_id: &str) -> i64 {
        self.docker
            .inspect_container(container_id, None)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.exit_code)
            .unwrap_or(-1)
    }
}

fn uuid_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SandboxConfig {
        SandboxConfig {
            allowed_images: vec!["alpine:3.19".to_string()],
            pull_policy: PullPolicy::IfMissing,
            limits: SandboxLimits::default(),
        }
    }

    #[test]
    fn allow_list_accepts_listed_image() {
        assert!(cfg().is_allowed("alpine:3.19"));
    }

    #[test]
    fn allow_list_rejects_unlisted_image() {
        assert!(!cfg().is_allowed("debian:bookworm"));
    }

    #[test]
    fn default_limits_cap_memory_and_cpu() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.memory_bytes, Some(512 * 1024 * 1024));
        assert_eq!(limits.nano_cpus, Some(1_000_000_000));
        assert_eq!(limits.timeout_ms, 30_000);
    }
}
