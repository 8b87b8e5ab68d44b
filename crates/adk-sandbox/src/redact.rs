// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Credential masking for captured container output.
//!
//! Secret env var *values* passed into a container can end up echoed back
//! in stdout/stderr (a misbehaving script, a verbose build tool). Before
//! returning captured output to the caller, every literal occurrence of a
//! secret value is replaced with `[REDACTED]`.

/// Suffixes that mark an env var's value as a secret worth masking.
pub const SECRET_ENV_SUFFIXES: &[&str] = &["_API_KEY", "_SECRET", "_TOKEN", "_PASSWORD", "_CREDENTIAL"];

/// Replace every occurrence of a secret value in `text` with `[REDACTED]`.
///
/// `env` is the full set of env vars passed to the container; only values
/// whose key matches [`SECRET_ENV_SUFFIXES`] (case-insensitive) are treated
/// as secrets. Values shorter than 4 characters are skipped to avoid
/// mass-redacting incidental short substrings.
pub fn redact_secrets(text: &str, env: &std::collections::HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in env {
        if value.len() < 4 {
            continue;
        }
        let upper = key.to_uppercase();
        if SECRET_ENV_SUFFIXES.iter().any(|s| upper.ends_with(s)) {
            out = out.replace(value.as_str(), "[REDACTED]");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn redacts_matching_secret_value() {
        let mut env = HashMap::new();
        env.insert("GITHUB_TOKEN".to_string(), "ghp_supersecretvalue".to_string());
        let out = redact_secrets("Authenticating with ghp_supersecretvalue now", &env);
        assert_eq!(out, "Authenticating with [REDACTED] now");
    }

    #[test]
    fn leaves_non_secret_values_untouched() {
        let mut env = HashMap::new();
        env.insert("BUILD_DIR".to_string(), "/tmp/build".to_string());
        let out = redact_secrets("writing to /tmp/build/output", &env);
        assert_eq!(out, "writing to /tmp/build/output");
    }

    #[test]
    fn skips_short_values_to_avoid_overmasking() {
        let mut env = HashMap::new();
        env.insert("X_TOKEN".to_string(), "abc".to_string());
        let out = redact_secrets("abc is short", &env);
        assert_eq!(out, "abc is short");
    }

    #[test]
    fn redacts_multiple_occurrences() {
        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "sekrit1234".to_string());
        let out = redact_secrets("sekrit1234 and again sekrit1234", &env);
        assert_eq!(out, "[REDACTED] and again [REDACTED]");
    }
}
