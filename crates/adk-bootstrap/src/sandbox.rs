// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Builds a live [`adk_sandbox::SandboxExecutor`] from config, when enabled.

use std::sync::Arc;

use tracing::warn;

use adk_config::ToolsConfig;
use adk_sandbox::{DockerSandboxExecutor, PullPolicy, SandboxExecutor, SandboxLimits};

fn parse_pull_policy(s: &str) -> PullPolicy {
    match s {
        "never" => PullPolicy::Never,
        "always" => PullPolicy::Always,
        _ => PullPolicy::IfMissing,
    }
}

/// Connect a [`DockerSandboxExecutor`] per `cfg.sandbox` if `cfg.use_docker`
/// is set. Returns `(sandbox, docker_image)` for `RunTerminalCommandTool` /
/// `ShellTool`; both are `None` when sandboxing is disabled.
///
/// A daemon that can't be reached is logged and treated the same as
/// sandboxing being disabled — tools fall back to host execution rather
/// than failing bootstrap outright.
pub fn build_sandbox_executor(
    cfg: &ToolsConfig,
) -> (Option<Arc<dyn SandboxExecutor>>, Option<String>) {
    if !cfg.use_docker {
        return (None, None);
    }
    let Some(image) = cfg.docker_image.clone() else {
        warn!("tools.use_docker is set but tools.docker_image is empty; skipping sandbox");
        return (None, None);
    };

    let sandbox_cfg = adk_sandbox::SandboxConfig {
        allowed_images: cfg.sandbox.allowed_images.clone(),
        pull_policy: parse_pull_policy(&cfg.sandbox.pull_policy),
        limits: SandboxLimits {
            timeout_ms: cfg.sandbox.timeout_ms,
            memory_bytes: Some(cfg.sandbox.memory_mb as i64 * 1024 * 1024),
            nano_cpus: None,
        },
    };

    match DockerSandboxExecutor::connect(sandbox_cfg) {
        Ok(executor) => (Some(Arc::new(executor) as Arc<dyn SandboxExecutor>), Some(image)),
        Err(e) => {
            warn!(error = %e, "could not connect to Docker daemon; falling back to host shell");
            (None, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        let cfg = ToolsConfig::default();
        let (sandbox, image) = build_sandbox_executor(&cfg);
        assert!(sandbox.is_none());
        assert!(image.is_none());
    }

    #[test]
    fn missing_image_is_skipped_even_when_enabled() {
        let mut cfg = ToolsConfig::default();
        cfg.use_docker = true;
        cfg.docker_image = None;
        let (sandbox, image) = build_sandbox_executor(&cfg);
        assert!(sandbox.is_none());
        assert!(image.is_none());
    }

    #[test]
    fn pull_policy_parsing() {
        assert_eq!(parse_pull_policy("never"), PullPolicy::Never);
        assert_eq!(parse_pull_policy("always"), PullPolicy::Always);
        assert_eq!(parse_pull_policy("if_missing"), PullPolicy::IfMissing);
        assert_eq!(parse_pull_policy("garbage"), PullPolicy::IfMissing);
    }
}
