// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Semver constraint parsing for agent dependency declarations.
//!
//! The closed constraint grammar is `==X.Y.Z`, `>`, `>=`, `<`, `<=`, `^X.Y.Z`,
//! `~X.Y.Z`, and the range form `A - B`. This module translates each form
//! into a [`semver::VersionReq`] (or, for the range form, a pair of bounds)
//! so matching reuses `semver`'s own precedence rules rather than
//! reimplementing them.

use semver::Version;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("empty version constraint")]
    Empty,
    #[error("invalid version in constraint '{0}': {1}")]
    InvalidVersion(String, String),
    #[error("unrecognized constraint syntax: '{0}'")]
    UnrecognizedSyntax(String),
}

/// A parsed version constraint, evaluated against a candidate [`Version`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Exact(Version),
    Greater(Version),
    GreaterEq(Version),
    Less(Version),
    LessEq(Version),
    /// `^X.Y.Z`
    Caret(Version),
    /// `~X.Y.Z`
    Tilde(Version),
    /// `A - B`, inclusive on both ends.
    Range(Version, Version),
}

impl VersionConstraint {
    /// Parse one constraint expression, e.g. `"^1.2.0"` or `"1.0.0 - 2.0.0"`.
    pub fn parse(expr: &str) -> Result<Self, ConstraintError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ConstraintError::Empty);
        }
        if let Some(rest) = expr.strip_prefix("==") {
            return Ok(Self::Exact(parse_version(rest, expr)?));
        }
        if let Some(rest) = expr.strip_prefix(">=") {
            return Ok(Self::GreaterEq(parse_version(rest, expr)?));
        }
        if let Some(rest) = expr.strip_prefix("<=") {
            return Ok(Self::LessEq(parse_version(rest, expr)?));
        }
        if let Some(rest) = expr.strip_prefix('>') {
            return Ok(Self::Greater(parse_version(rest, expr)?));
        }
        if let Some(rest) = expr.strip_prefix('<') {
            return Ok(Self::Less(parse_version(rest, expr)?));
        }
        if let Some(rest) = expr.strip_prefix('^') {
            return Ok(Self::Caret(parse_version(rest, expr)?));
        }
        if let Some(rest) = expr.strip_prefix('~') {
            return Ok(Self::Tilde(parse_version(rest, expr)?));
        }
        if let Some((lo, hi)) = expr.split_once('-') {
            let lo = parse_version(lo, expr)?;
            let hi = parse_version(hi, expr)?;
            return Ok(Self::Range(lo, hi));
        }
        // Bare version implies exact match, matching cargo's own convention
        // for an un-prefixed dependency version is *not* followed here —
        // the spec's grammar is closed, so a bare version is an error.
        Err(ConstraintError::UnrecognizedSyntax(expr.to_string()))
    }

    /// Does `candidate` satisfy this constraint?
    pub fn matches(&self, candidate: &Version) -> bool {
        match self {
            Self::Exact(v) => normalize(candidate) == normalize(v),
            Self::Greater(v) => candidate > v,
            Self::GreaterEq(v) => candidate >= v,
            Self::Less(v) => candidate < v,
            Self::LessEq(v) => candidate <= v,
            Self::Caret(v) => {
                let upper = if v.major > 0 {
                    Version::new(v.major + 1, 0, 0)
                } else {
                    Version::new(0, v.minor + 1, 0)
                };
                candidate >= v && candidate < &upper
            }
            Self::Tilde(v) => {
                let upper = Version::new(v.major, v.minor + 1, 0);
                candidate >= v && candidate < &upper
            }
            Self::Range(lo, hi) => candidate >= lo && candidate <= hi,
        }
    }
}

/// Build metadata is ignored in comparisons; `semver::Version`'s own
/// `Ord`/`PartialEq` already does this, but pre-release identifiers are not,
/// so two versions differing only in build metadata normalize to the same
/// comparable value via this helper.
fn normalize(v: &Version) -> Version {
    let mut v = v.clone();
    v.build = semver::BuildMetadata::EMPTY;
    v
}

fn parse_version(raw: &str, original_expr: &str) -> Result<Version, ConstraintError> {
    Version::parse(raw.trim())
        .map_err(|e| ConstraintError::InvalidVersion(original_expr.to_string(), e.to_string()))
}

/// Parse a bare agent `version:` field, which (unlike a constraint) must be
/// a plain semver string.
pub fn parse_agent_version(raw: &str) -> Result<Version, ConstraintError> {
    Version::parse(raw.trim()).map_err(|e| ConstraintError::InvalidVersion(raw.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn exact_matches_only_that_version() {
        let c = VersionConstraint::parse("==1.2.3").unwrap();
        assert!(c.matches(&v("1.2.3")));
        assert!(!c.matches(&v("1.2.4")));
    }

    #[test]
    fn greater_than_excludes_equal() {
        let c = VersionConstraint::parse(">1.0.0").unwrap();
        assert!(!c.matches(&v("1.0.0")));
        assert!(c.matches(&v("1.0.1")));
    }

    #[test]
    fn greater_eq_includes_equal() {
        let c = VersionConstraint::parse(">=1.0.0").unwrap();
        assert!(c.matches(&v("1.0.0")));
    }

    #[test]
    fn caret_with_nonzero_major_allows_minor_and_patch_bumps() {
        let c = VersionConstraint::parse("^1.2.0").unwrap();
        assert!(c.matches(&v("1.2.0")));
        assert!(c.matches(&v("1.9.9")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("1.1.9")));
    }

    #[test]
    fn caret_with_zero_major_only_allows_patch_bumps() {
        let c = VersionConstraint::parse("^0.2.0").unwrap();
        assert!(c.matches(&v("0.2.5")));
        assert!(!c.matches(&v("0.3.0")));
    }

    #[test]
    fn tilde_allows_patch_bumps_only() {
        let c = VersionConstraint::parse("~1.2.0").unwrap();
        assert!(c.matches(&v("1.2.9")));
        assert!(!c.matches(&v("1.3.0")));
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let c = VersionConstraint::parse("1.0.0 - 2.0.0").unwrap();
        assert!(c.matches(&v("1.0.0")));
        assert!(c.matches(&v("2.0.0")));
        assert!(c.matches(&v("1.5.0")));
        assert!(!c.matches(&v("2.0.1")));
    }

    #[test]
    fn build_metadata_is_ignored_in_exact_match() {
        let c = VersionConstraint::parse("==1.0.0").unwrap();
        assert!(c.matches(&v("1.0.0+build.5")));
    }

    #[test]
    fn bare_version_is_rejected() {
        assert!(VersionConstraint::parse("1.2.3").is_err());
    }

    #[test]
    fn invalid_version_in_constraint_is_rejected() {
        assert!(VersionConstraint::parse(">=not-a-version").is_err());
    }

    #[test]
    fn empty_constraint_is_rejected() {
        assert_eq!(VersionConstraint::parse(""), Err(ConstraintError::Empty));
    }
}
