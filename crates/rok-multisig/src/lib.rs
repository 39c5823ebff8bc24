// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "m-of-n multisig upgrade workflow: quorum tracking, approvals, and emergency apply."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod quorum;

pub use quorum::{Quorum, QuorumConfig};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rok_audit::AuditChain;
use rok_core::{ApprovalId, ManifestId, Principal, Role, UpgradeId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// An approver's signed vote for an upgrade proposal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// Identifies this approval record.
    pub approval_id: ApprovalId,
    /// The proposal this approval is for.
    pub upgrade_id: UpgradeId,
    /// Identity of the approving principal.
    pub approver_id: String,
    /// Raw detached signature bytes over the proposal.
    pub signature: Vec<u8>,
    /// Optional free-text rationale.
    pub notes: Option<String>,
    /// When the approval was recorded.
    pub approved_at: DateTime<Utc>,
}

/// The coordinated wrapper around a high-impact manifest: aggregates
/// approvals and gates apply.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProposal {
    /// Identifies this proposal.
    pub upgrade_id: UpgradeId,
    /// The manifest this proposal gates.
    pub manifest_id: ManifestId,
    /// Identity of the submitter.
    pub submitted_by: String,
    /// When the proposal was submitted.
    pub submitted_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: UpgradeStatus,
    /// Identity of the principal who applied or emergency-applied it.
    pub applied_by: Option<String>,
    /// When `Apply`/`EmergencyApply` ran.
    pub applied_at: Option<DateTime<Utc>>,
    /// Set only on `emergency_applied`; the deadline `Ratify` must beat.
    pub emergency_ratification_deadline: Option<DateTime<Utc>>,
}

/// Upgrade proposal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    /// Submitted, collecting approvals.
    Pending,
    /// Quorum reached via normal `Apply`.
    Applied,
    /// Denied by policy before reaching quorum.
    Rejected,
    /// Break-glass applied before reaching quorum; awaiting ratification.
    EmergencyApplied,
    /// Quorum reached after an emergency apply, before the deadline lapsed.
    Ratified,
    /// Emergency apply was not ratified before its deadline.
    RolledBack,
}

impl UpgradeStatus {
    /// Stable wire/storage string for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::EmergencyApplied => "emergency_applied",
            Self::Ratified => "ratified",
            Self::RolledBack => "rolled_back",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "applied" => Self::Applied,
            "rejected" => Self::Rejected,
            "emergency_applied" => Self::EmergencyApplied,
            "ratified" => Self::Ratified,
            "rolled_back" => Self::RolledBack,
            _ => return None,
        })
    }
}

/// Default window an emergency-applied upgrade has to collect quorum before
/// the background watcher rolls it back, used when a coordinator is built
/// without an explicit override.
pub const EMERGENCY_RATIFICATION_WINDOW_HOURS: i64 = 48;

/// Errors from multisig coordination.
#[derive(Debug, Error)]
pub enum MultisigError {
    /// No proposal exists with the given id.
    #[error("no such upgrade proposal")]
    NotFound,
    /// The proposal is not in `pending`.
    #[error("upgrade proposal is not pending")]
    NotPending,
    /// The approver is not in the authorized approver set.
    #[error("approver is not authorized for this upgrade")]
    UnauthorizedApprover,
    /// Approvals below quorum.
    #[error("insufficient quorum: have {have}, required {required}")]
    InsufficientQuorum {
        /// Distinct approvals collected so far.
        have: usize,
        /// Quorum size required.
        required: usize,
    },
    /// `EmergencyApply` attempted by a principal without `SuperAdmin`.
    #[error("emergency apply requires the super-admin role")]
    EmergencyApplyNotAuthorized,
    /// The proposal has already been applied (idempotent conflict).
    #[error("upgrade proposal has already been applied")]
    AlreadyApplied,
    /// The underlying store failed.
    #[error("multisig store error: {0}")]
    Store(#[from] sqlx::Error),
    /// An audit event could not be appended.
    #[error("audit append failed: {0}")]
    Audit(#[from] rok_audit::AuditError),
}

impl From<MultisigError> for rok_error::RokError {
    fn from(err: MultisigError) -> Self {
        use rok_error::ErrorCode;
        let code = match &err {
            MultisigError::NotFound => ErrorCode::UpgradeNotFound,
            MultisigError::NotPending | MultisigError::AlreadyApplied => {
                ErrorCode::UpgradeAlreadyApplied
            }
            MultisigError::UnauthorizedApprover => ErrorCode::UnauthorizedApprover,
            MultisigError::InsufficientQuorum { .. } => ErrorCode::InsufficientQuorum,
            MultisigError::EmergencyApplyNotAuthorized => ErrorCode::RoleRequired,
            MultisigError::Store(_) | MultisigError::Audit(_) => ErrorCode::Internal,
        };
        let mut rok_err = rok_error::RokError::new(code, err.to_string());
        if let MultisigError::InsufficientQuorum { have, required } = err {
            rok_err = rok_err
                .with_context("have", serde_json::json!(have))
                .with_context("required", serde_json::json!(required))
                .with_context("missing", serde_json::json!(required.saturating_sub(have)));
        }
        rok_err
    }
}

/// Coordinates upgrade proposals: submission, approval collection, quorum
/// gating, and the emergency break-glass path.
pub struct MultisigCoordinator {
    store: rok_store::Store,
    audit: Arc<AuditChain>,
    config: QuorumConfig,
    ratification_window: ChronoDuration,
}

impl MultisigCoordinator {
    /// Construct a coordinator with a fixed authorized-approver set and
    /// quorum size, and the ratification window emergency-applied upgrades
    /// get before the rollback watcher reclaims them.
    #[must_use]
    pub fn new(
        store: rok_store::Store,
        audit: Arc<AuditChain>,
        config: QuorumConfig,
        ratification_window: ChronoDuration,
    ) -> Self {
        Self {
            store,
            audit,
            config,
            ratification_window,
        }
    }

    /// `Submit`: persist a new proposal in `pending`, emit `upgrade.submitted`.
    ///
    /// # Errors
    ///
    /// Returns [`MultisigError::Store`] on a driver error, including a
    /// primary-key violation if `upgrade_id` was already submitted.
    pub async fn submit(
        &self,
        upgrade_id: UpgradeId,
        manifest_id: ManifestId,
        submitted_by: &str,
    ) -> Result<UpgradeProposal, MultisigError> {
        let proposal = UpgradeProposal {
            upgrade_id,
            manifest_id,
            submitted_by: submitted_by.to_string(),
            submitted_at: Utc::now(),
            status: UpgradeStatus::Pending,
            applied_by: None,
            applied_at: None,
            emergency_ratification_deadline: None,
        };

        sqlx::query(
            "INSERT INTO upgrade_proposals (id, manifest_id, submitted_by, status) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(proposal.upgrade_id.as_uuid())
        .bind(proposal.manifest_id.as_uuid())
        .bind(&proposal.submitted_by)
        .bind(proposal.status.as_str())
        .execute(self.store.pool())
        .await?;

        self.audit
            .append(
                "upgrade.submitted",
                serde_json::json!({"upgradeId": upgrade_id, "manifestId": manifest_id, "submittedBy": submitted_by}),
                serde_json::json!({}),
            )
            .await?;

        Ok(proposal)
    }

    /// `Approve`: record an approval, tolerating client retries by
    /// returning the existing approval on a duplicate `(upgradeId, approverId)`.
    ///
    /// # Errors
    ///
    /// - [`MultisigError::UnauthorizedApprover`] if `approver_id` is not in
    ///   the authorized set.
    /// - [`MultisigError::NotPending`] if the proposal is not `pending`.
    /// - [`MultisigError::NotFound`] if no such proposal exists.
    pub async fn approve(
        &self,
        upgrade_id: UpgradeId,
        approver_id: &str,
        signature: Vec<u8>,
        notes: Option<String>,
    ) -> Result<Approval, MultisigError> {
        if !self.config.is_authorized(approver_id) {
            self.audit
                .append(
                    "upgrade.approval_rejected",
                    serde_json::json!({"upgradeId": upgrade_id, "approverId": approver_id}),
                    serde_json::json!({}),
                )
                .await?;
            return Err(MultisigError::UnauthorizedApprover);
        }

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM upgrade_proposals WHERE id = $1")
                .bind(upgrade_id.as_uuid())
                .fetch_optional(self.store.pool())
                .await?;
        match status {
            Some((s,)) if s == UpgradeStatus::Pending.as_str() => {}
            Some(_) => return Err(MultisigError::NotPending),
            None => return Err(MultisigError::NotFound),
        }

        let approval_id = ApprovalId::new();
        let result = sqlx::query(
            "INSERT INTO approvals (upgrade_id, approver_id, signature, notes) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (upgrade_id, approver_id) DO NOTHING",
        )
        .bind(upgrade_id.as_uuid())
        .bind(approver_id)
        .bind(&signature)
        .bind(&notes)
        .execute(self.store.pool())
        .await?;

        let row: ApprovalRow = sqlx::query_as(
            "SELECT upgrade_id, approver_id, signature, notes, approved_at \
             FROM approvals WHERE upgrade_id = $1 AND approver_id = $2",
        )
        .bind(upgrade_id.as_uuid())
        .bind(approver_id)
        .fetch_one(self.store.pool())
        .await?;

        if result.rows_affected() == 1 {
            self.audit
                .append(
                    "upgrade.approval",
                    serde_json::json!({"upgradeId": upgrade_id, "approverId": approver_id}),
                    serde_json::json!({}),
                )
                .await?;
        }

        Ok(Approval {
            approval_id,
            upgrade_id,
            approver_id: row.approver_id,
            signature: row.signature,
            notes: row.notes,
            approved_at: row.approved_at,
        })
    }

    /// `Apply`: if distinct approvals meet quorum, atomically transition
    /// the proposal to `applied` and emit `upgrade.applied`. The caller
    /// (the orchestration layer) is responsible for then calling the
    /// manifest engine's `record_multisig_applied`.
    ///
    /// # Errors
    ///
    /// Returns [`MultisigError::InsufficientQuorum`] if quorum has not been
    /// met, or [`MultisigError::AlreadyApplied`] if another caller already
    /// applied it.
    pub async fn apply(&self, upgrade_id: UpgradeId, applied_by: &str) -> Result<UpgradeProposal, MultisigError> {
        let approvers = self.approver_ids(upgrade_id).await?;
        let quorum = Quorum::evaluate(&approvers, self.config.required);
        if !quorum.met {
            return Err(MultisigError::InsufficientQuorum {
                have: quorum.have,
                required: quorum.required,
            });
        }

        let result = sqlx::query(
            "UPDATE upgrade_proposals SET status = $1, applied_by = $2, applied_at = now() \
             WHERE id = $3 AND status = $4",
        )
        .bind(UpgradeStatus::Applied.as_str())
        .bind(applied_by)
        .bind(upgrade_id.as_uuid())
        .bind(UpgradeStatus::Pending.as_str())
        .execute(self.store.pool())
        .await?;
        if result.rows_affected() != 1 {
            return Err(MultisigError::AlreadyApplied);
        }

        self.audit
            .append(
                "upgrade.applied",
                serde_json::json!({"upgradeId": upgrade_id, "appliedBy": applied_by, "approvers": approvers}),
                serde_json::json!({}),
            )
            .await?;

        self.load(upgrade_id).await
    }

    /// `EmergencyApply`: break-glass path restricted to `SuperAdmin`
    /// principals. Sets a ratification deadline `self.ratification_window`
    /// out from now.
    ///
    /// # Errors
    ///
    /// - [`MultisigError::EmergencyApplyNotAuthorized`] if `actor` lacks
    ///   `SuperAdmin`.
    /// - [`MultisigError::AlreadyApplied`] if the proposal is not `pending`.
    pub async fn emergency_apply(
        &self,
        upgrade_id: UpgradeId,
        actor: &Principal,
        justification: &str,
    ) -> Result<UpgradeProposal, MultisigError> {
        if !actor.has_role(Role::SuperAdmin) {
            return Err(MultisigError::EmergencyApplyNotAuthorized);
        }

        let deadline = Utc::now() + self.ratification_window;
        let result = sqlx::query(
            "UPDATE upgrade_proposals SET status = $1, applied_by = $2, applied_at = now(), \
             emergency_ratification_deadline = $3 WHERE id = $4 AND status = $5",
        )
        .bind(UpgradeStatus::EmergencyApplied.as_str())
        .bind(&actor.id)
        .bind(deadline)
        .bind(upgrade_id.as_uuid())
        .bind(UpgradeStatus::Pending.as_str())
        .execute(self.store.pool())
        .await?;
        if result.rows_affected() != 1 {
            return Err(MultisigError::AlreadyApplied);
        }

        self.audit
            .append(
                "upgrade.emergency_applied",
                serde_json::json!({"upgradeId": upgrade_id, "appliedBy": actor.id, "justification": justification, "ratificationDeadline": deadline}),
                serde_json::json!({}),
            )
            .await?;

        self.load(upgrade_id).await
    }

    /// `Ratify`: re-run the same quorum arithmetic as `Apply` against an
    /// `emergency_applied` proposal. Races the rollback watcher via the
    /// same conditional-update-on-expected-status pattern; the loser is a
    /// no-op, not an error, from the watcher's perspective.
    ///
    /// # Errors
    ///
    /// Returns [`MultisigError::InsufficientQuorum`] if quorum has not been
    /// met yet, or [`MultisigError::NotFound`]/[`MultisigError::AlreadyApplied`]
    /// if the proposal already left `emergency_applied` (ratified or
    /// rolled back by a concurrent caller).
    pub async fn ratify(&self, upgrade_id: UpgradeId) -> Result<UpgradeProposal, MultisigError> {
        let approvers = self.approver_ids(upgrade_id).await?;
        let quorum = Quorum::evaluate(&approvers, self.config.required);
        if !quorum.met {
            return Err(MultisigError::InsufficientQuorum {
                have: quorum.have,
                required: quorum.required,
            });
        }

        let result = sqlx::query("UPDATE upgrade_proposals SET status = $1 WHERE id = $2 AND status = $3")
            .bind(UpgradeStatus::Ratified.as_str())
            .bind(upgrade_id.as_uuid())
            .bind(UpgradeStatus::EmergencyApplied.as_str())
            .execute(self.store.pool())
            .await?;
        if result.rows_affected() != 1 {
            return Err(MultisigError::AlreadyApplied);
        }

        self.audit
            .append(
                "upgrade.ratified",
                serde_json::json!({"upgradeId": upgrade_id, "approvers": approvers}),
                serde_json::json!({}),
            )
            .await?;

        self.load(upgrade_id).await
    }

    /// Roll back every `emergency_applied` proposal whose
    /// `emergencyRatificationDeadline` has passed. Returns the ids rolled
    /// back so the caller can drive the compensating manifest transition.
    /// Run periodically by the emergency-ratification watcher.
    ///
    /// # Errors
    ///
    /// Returns [`MultisigError::Store`] on a driver error.
    pub async fn rollback_expired(&self) -> Result<Vec<(UpgradeId, ManifestId)>, MultisigError> {
        let rows: Vec<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
            "UPDATE upgrade_proposals SET status = $1 \
             WHERE status = $2 AND emergency_ratification_deadline < now() \
             RETURNING id, manifest_id",
        )
        .bind(UpgradeStatus::RolledBack.as_str())
        .bind(UpgradeStatus::EmergencyApplied.as_str())
        .fetch_all(self.store.pool())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (upgrade_id, manifest_id) in rows {
            let upgrade_id = UpgradeId::from_uuid(upgrade_id);
            let manifest_id = ManifestId::from_uuid(manifest_id);
            self.audit
                .append(
                    "upgrade.rolled_back",
                    serde_json::json!({"upgradeId": upgrade_id, "manifestId": manifest_id}),
                    serde_json::json!({}),
                )
                .await?;
            out.push((upgrade_id, manifest_id));
        }
        Ok(out)
    }

    /// Report the distinct approval count and required quorum size for a
    /// proposal, for surfacing in `POST /upgrades/{id}/apply`'s response.
    ///
    /// # Errors
    ///
    /// Returns [`MultisigError::Store`] on a driver error.
    pub async fn quorum_snapshot(&self, upgrade_id: UpgradeId) -> Result<(usize, usize), MultisigError> {
        let approvers = self.approver_ids(upgrade_id).await?;
        let quorum = Quorum::evaluate(&approvers, self.config.required);
        Ok((quorum.have, quorum.required))
    }

    async fn approver_ids(&self, upgrade_id: UpgradeId) -> Result<Vec<String>, MultisigError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT approver_id FROM approvals WHERE upgrade_id = $1")
                .bind(upgrade_id.as_uuid())
                .fetch_all(self.store.pool())
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn load(&self, upgrade_id: UpgradeId) -> Result<UpgradeProposal, MultisigError> {
        let row: UpgradeProposalRow = sqlx::query_as(
            "SELECT id, manifest_id, submitted_by, submitted_at, status, applied_by, applied_at, \
             emergency_ratification_deadline FROM upgrade_proposals WHERE id = $1",
        )
        .bind(upgrade_id.as_uuid())
        .fetch_optional(self.store.pool())
        .await?
        .ok_or(MultisigError::NotFound)?;
        Ok(UpgradeProposal {
            upgrade_id: UpgradeId::from_uuid(row.id),
            manifest_id: ManifestId::from_uuid(row.manifest_id),
            submitted_by: row.submitted_by,
            submitted_at: row.submitted_at,
            status: UpgradeStatus::parse(&row.status).ok_or(MultisigError::NotFound)?,
            applied_by: row.applied_by,
            applied_at: row.applied_at,
            emergency_ratification_deadline: row.emergency_ratification_deadline,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    #[allow(dead_code)]
    upgrade_id: uuid::Uuid,
    approver_id: String,
    signature: Vec<u8>,
    notes: Option<String>,
    approved_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UpgradeProposalRow {
    id: uuid::Uuid,
    manifest_id: uuid::Uuid,
    submitted_by: String,
    submitted_at: DateTime<Utc>,
    status: String,
    applied_by: Option<String>,
    applied_at: Option<DateTime<Utc>>,
    emergency_ratification_deadline: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_status_round_trips_through_as_str_and_parse() {
        for status in [
            UpgradeStatus::Pending,
            UpgradeStatus::Applied,
            UpgradeStatus::Rejected,
            UpgradeStatus::EmergencyApplied,
            UpgradeStatus::Ratified,
            UpgradeStatus::RolledBack,
        ] {
            assert_eq!(UpgradeStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn emergency_window_is_forty_eight_hours() {
        assert_eq!(EMERGENCY_RATIFICATION_WINDOW_HOURS, 48);
    }
}
