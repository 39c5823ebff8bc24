// SPDX-License-Identifier: MIT OR Apache-2.0
use chrono::{DateTime, Utc};
use rok_core::{Impact, ManifestId, PackageId, SignatureId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A product package submitted for release, moving through validation
/// before a manifest may be drafted against it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Identifies this package.
    pub package_id: PackageId,
    /// Package name, e.g. `"checkout-service"`.
    pub name: String,
    /// Semver or build identifier.
    pub version: String,
    /// Opaque pointer to the built artifact (registry URI, object key, ...).
    pub artifact_ref: String,
    /// Hex-encoded SHA-256 of the artifact content.
    pub sha256: String,
    /// Principal id of the submitter.
    pub submitter: String,
    /// Submitter-supplied metadata, opaque to the kernel.
    pub metadata: serde_json::Value,
    /// Current lifecycle status.
    pub status: PackageStatus,
    /// Pointer to the validation job's report, once validation has run.
    pub validation_report_ref: Option<String>,
}

/// Package lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Submitted, awaiting a validation job to start.
    Submitted,
    /// A validation job is in flight.
    Validating,
    /// Validation passed; a manifest may now be drafted.
    Validated,
    /// Validation failed.
    Failed,
}

impl PackageStatus {
    /// Stable wire/storage string for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Validating => "validating",
            Self::Validated => "validated",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "submitted" => Self::Submitted,
            "validating" => Self::Validating,
            "validated" => Self::Validated,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// A proposed change to a target, with the impact classification gating
/// whether it requires multisig approval before it may apply.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Identifies this manifest.
    pub manifest_id: ManifestId,
    /// The package this manifest releases.
    pub package_id: PackageId,
    /// Opaque description of what is being changed (fleet, region, service).
    pub target: serde_json::Value,
    /// Risk classification; `High`/`Critical` require multisig.
    pub impact: Impact,
    /// Human-readable justification, surfaced to approvers and in audit.
    pub rationale: String,
    /// Named preconditions that must be resolved before apply (e.g. a
    /// canary bake window, an external change-freeze check).
    pub preconditions: Vec<String>,
    /// Opaque strategy the publisher uses to roll the change out.
    pub apply_strategy: serde_json::Value,
    /// Current lifecycle status.
    pub status: ManifestStatus,
    /// The detached signature covering this manifest, once signed.
    pub signature_id: Option<SignatureId>,
    /// The multisig upgrade proposal gating this manifest, once one exists.
    pub upgrade_id: Option<Uuid>,
}

/// Manifest lifecycle status. Every transition between these is a
/// conditional `UPDATE ... WHERE status = $expected`, so exactly one
/// concurrent caller ever wins a given transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    /// Drafted against a validated package; not yet signed.
    Draft,
    /// Signed by the signing gateway; local verification passed.
    Signed,
    /// High/critical impact: waiting on multisig quorum.
    PendingMultisig,
    /// Multisig quorum reached (or emergency-applied and later ratified).
    MultisigApplied,
    /// `ApplyManifest` accepted; the publisher is rolling it out.
    Applying,
    /// Publish tasks created for every target; rollout in progress.
    Publishing,
    /// Every publish task for every target succeeded.
    Published,
    /// Validation, policy, or publish failed terminally.
    Failed,
    /// An emergency-applied upgrade was not ratified before its deadline;
    /// the manifest is rolled back to compensate.
    RolledBack,
}

impl ManifestStatus {
    /// Stable wire/storage string for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Signed => "signed",
            Self::PendingMultisig => "pending_multisig",
            Self::MultisigApplied => "multisig_applied",
            Self::Applying => "applying",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => Self::Draft,
            "signed" => Self::Signed,
            "pending_multisig" => Self::PendingMultisig,
            "multisig_applied" => Self::MultisigApplied,
            "applying" => Self::Applying,
            "publishing" => Self::Publishing,
            "published" => Self::Published,
            "failed" => Self::Failed,
            "rolled_back" => Self::RolledBack,
            _ => return None,
        })
    }
}

/// A detached signature over a manifest's canonical hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSignature {
    /// Identifies this signature record.
    pub signature_id: SignatureId,
    /// The manifest this signature covers.
    pub manifest_id: ManifestId,
    /// Which signer key produced this signature.
    pub signer_kid: String,
    /// Raw detached signature bytes.
    pub signature_bytes: Vec<u8>,
    /// Hex-encoded content hash that was signed.
    pub canonical_hash: String,
    /// When the signature was produced.
    pub signed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PackageRow {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub artifact_ref: String,
    pub sha256: String,
    pub submitter: String,
    pub metadata: serde_json::Value,
    pub status: String,
    pub validation_report_ref: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ManifestRow {
    pub id: Uuid,
    pub package_id: Uuid,
    pub target: serde_json::Value,
    pub impact: String,
    pub rationale: String,
    pub preconditions: serde_json::Value,
    pub apply_strategy: serde_json::Value,
    pub status: String,
    pub signature_id: Option<Uuid>,
    pub upgrade_id: Option<Uuid>,
}

impl TryFrom<ManifestRow> for Manifest {
    type Error = ();

    fn try_from(row: ManifestRow) -> Result<Self, Self::Error> {
        let impact = Impact::parse(&row.impact).map_err(|_| ())?;
        let status = ManifestStatus::parse(&row.status).ok_or(())?;
        let preconditions: Vec<String> = serde_json::from_value(row.preconditions).unwrap_or_default();
        Ok(Self {
            manifest_id: ManifestId::from_uuid(row.id),
            package_id: PackageId::from_uuid(row.package_id),
            target: row.target,
            impact,
            rationale: row.rationale,
            preconditions,
            apply_strategy: row.apply_strategy,
            status,
            signature_id: row.signature_id.map(SignatureId::from_uuid),
            upgrade_id: row.upgrade_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_status_round_trips_through_as_str_and_parse() {
        for status in [
            ManifestStatus::Draft,
            ManifestStatus::Signed,
            ManifestStatus::PendingMultisig,
            ManifestStatus::MultisigApplied,
            ManifestStatus::Applying,
            ManifestStatus::Publishing,
            ManifestStatus::Published,
            ManifestStatus::Failed,
            ManifestStatus::RolledBack,
        ] {
            assert_eq!(ManifestStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn package_status_wire_strings_are_snake_case() {
        assert_eq!(PackageStatus::Submitted.as_str(), "submitted");
        assert_eq!(PackageStatus::Failed.as_str(), "failed");
    }
}
