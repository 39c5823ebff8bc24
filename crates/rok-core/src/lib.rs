// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! rok-core
//!
//! The stable contract for the release-orchestration kernel: identifiers,
//! the impact ordering, RBAC roles, and the canonical principal type shared
//! by every other `rok-*` crate. If you only take one dependency, take this
//! one.

/// Opaque, strongly-typed identifiers (package, manifest, upgrade, ...).
pub mod ids;
/// Role-based access control primitives.
pub mod rbac;

pub use ids::{
    ApprovalId, EventId, ManifestId, PackageId, PublishTaskId, SignatureId, TaskId, UpgradeId,
};
pub use rbac::{Principal, Role};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Current contract version string embedded in audit payloads and API envelopes.
pub const CONTRACT_VERSION: &str = "rok/v1";

/// Risk classification of a manifest.
///
/// Totally ordered: `Low < Medium < High < Critical`. The ordering drives
/// whether a manifest must pass through the multisig workflow before it may
/// be applied (`High` and `Critical` require it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Impact {
    /// No multisig required; safe to auto-apply once signed.
    Low,
    /// No multisig required; safe to auto-apply once signed.
    Medium,
    /// Requires multisig quorum before it may be applied.
    High,
    /// Requires multisig quorum before it may be applied.
    Critical,
}

impl Impact {
    /// Returns `true` if this impact level requires the multisig workflow
    /// (`pending_multisig` → `multisig_applied`) before a manifest may apply.
    #[must_use]
    pub fn requires_multisig(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Parse an impact level from its wire string, rejecting unknown values.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownImpact`] if `s` is not one of the four fixed levels.
    pub fn parse(s: &str) -> Result<Self, UnknownImpact> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(UnknownImpact(other.to_string())),
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl PartialOrd for Impact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Impact {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A manifest's `impact` field did not match one of the four fixed levels.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown impact level: {0}")]
pub struct UnknownImpact(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_ordering_is_total() {
        assert!(Impact::Low < Impact::Medium);
        assert!(Impact::Medium < Impact::High);
        assert!(Impact::High < Impact::Critical);
    }

    #[test]
    fn only_high_and_critical_require_multisig() {
        assert!(!Impact::Low.requires_multisig());
        assert!(!Impact::Medium.requires_multisig());
        assert!(Impact::High.requires_multisig());
        assert!(Impact::Critical.requires_multisig());
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(Impact::parse("LOW").is_ok());
        assert!(Impact::parse("low").is_ok());
        assert!(Impact::parse("EXTREME").is_err());
    }
}
