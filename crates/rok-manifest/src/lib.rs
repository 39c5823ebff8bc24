// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Package ingest and the manifest lifecycle state machine."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod types;
mod validation;

pub use error::ManifestError;
pub use types::{Manifest, ManifestSignature, ManifestStatus, Package, PackageStatus};
pub use validation::{HttpValidationCollaborator, ValidationCollaborator, ValidationOutcome};

use rok_audit::AuditChain;
use rok_core::{Impact, ManifestId, PackageId, SignatureId};
use rok_policy::{DecisionPoint, HttpPolicyGate, PolicyGate, PolicyRequest};
use rok_signing::{Algorithm, SigningGateway};
use rok_store::Store;
use std::sync::Arc;

/// Coordinates package ingest and manifest lifecycle transitions. Every
/// transition is a DB-level conditional update on `status`, so concurrent
/// callers racing for the same manifest see exactly one winner.
pub struct ManifestEngine {
    store: Store,
    audit: Arc<AuditChain>,
    signer: Arc<dyn SigningGateway>,
    policy: Arc<HttpPolicyGate>,
    manifest_signer_kid: String,
    signing_algorithm: Algorithm,
}

impl ManifestEngine {
    /// Construct an engine wired to its collaborators.
    #[must_use]
    pub fn new(
        store: Store,
        audit: Arc<AuditChain>,
        signer: Arc<dyn SigningGateway>,
        policy: Arc<HttpPolicyGate>,
        manifest_signer_kid: impl Into<String>,
        signing_algorithm: Algorithm,
    ) -> Self {
        Self {
            store,
            audit,
            signer,
            policy,
            manifest_signer_kid: manifest_signer_kid.into(),
            signing_algorithm,
        }
    }

    /// `SubmitPackage`: persist a new package in `submitted` status and
    /// emit `package.submitted`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Store`] on a driver error.
    pub async fn submit_package(
        &self,
        name: &str,
        version: &str,
        artifact_ref: &str,
        sha256: &str,
        submitter: &str,
        metadata: serde_json::Value,
    ) -> Result<Package, ManifestError> {
        let package = Package {
            package_id: PackageId::new(),
            name: name.to_string(),
            version: version.to_string(),
            artifact_ref: artifact_ref.to_string(),
            sha256: sha256.to_string(),
            submitter: submitter.to_string(),
            metadata,
            status: PackageStatus::Submitted,
            validation_report_ref: None,
        };

        sqlx::query(
            "INSERT INTO packages (id, name, version, artifact_ref, sha256, submitter, metadata, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(package.package_id.as_uuid())
        .bind(&package.name)
        .bind(&package.version)
        .bind(&package.artifact_ref)
        .bind(&package.sha256)
        .bind(&package.submitter)
        .bind(&package.metadata)
        .bind(package.status.as_str())
        .execute(self.store.pool())
        .await?;

        self.audit
            .append(
                "package.submitted",
                serde_json::json!({"packageId": package.package_id, "name": name, "version": version}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;

        Ok(package)
    }

    /// Record a validation job's report, transitioning the package to
    /// `validated` or `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] if the package does not exist, or
    /// [`ManifestError::Store`] on a driver error.
    pub async fn record_validation(
        &self,
        package_id: PackageId,
        passed: bool,
        report_ref: &str,
    ) -> Result<(), ManifestError> {
        let new_status = if passed {
            PackageStatus::Validated
        } else {
            PackageStatus::Failed
        };

        self.store
            .conditional_update(
                "packages",
                "id",
                "status",
                package_id.as_uuid(),
                PackageStatus::Validating.as_str(),
                new_status.as_str(),
            )
            .await
            .map_err(|_| ManifestError::NotFound)?;

        sqlx::query("UPDATE packages SET validation_report_ref = $1 WHERE id = $2")
            .bind(report_ref)
            .bind(package_id.as_uuid())
            .execute(self.store.pool())
            .await?;

        let event_type = if passed {
            "package.validated"
        } else {
            "package.failed"
        };
        self.audit
            .append(
                event_type,
                serde_json::json!({"packageId": package_id, "reportRef": report_ref}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;

        Ok(())
    }

    /// `validation-poll`: ask `collaborator` about every package still
    /// sitting in `submitted`/`validating`, up to `limit` packages, and
    /// record whichever outcomes have completed.
    ///
    /// A `submitted` package is first moved to `validating` with the same
    /// conditional update [`Self::record_validation`] uses, so a package
    /// only ever gets polled as "pending" — never double-recorded by two
    /// concurrent poll sweeps.
    ///
    /// Returns the number of packages whose outcome was recorded this
    /// sweep. A collaborator error for one package is logged and skipped
    /// rather than failing the whole sweep.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Store`] if listing pending packages fails.
    pub async fn poll_validations(
        &self,
        collaborator: &dyn validation::ValidationCollaborator,
        limit: i64,
    ) -> Result<usize, ManifestError> {
        let pending: Vec<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT id FROM packages WHERE status IN ($1, $2) ORDER BY id LIMIT $3",
        )
        .bind(PackageStatus::Submitted.as_str())
        .bind(PackageStatus::Validating.as_str())
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;

        let mut recorded = 0;
        for (id,) in pending {
            let package_id = PackageId::from_uuid(id);
            let _ = self
                .store
                .conditional_update(
                    "packages",
                    "id",
                    "status",
                    package_id.as_uuid(),
                    PackageStatus::Submitted.as_str(),
                    PackageStatus::Validating.as_str(),
                )
                .await;

            match collaborator.check(package_id).await {
                Ok(validation::ValidationOutcome::Done { passed, report_ref }) => {
                    self.record_validation(package_id, passed, &report_ref).await?;
                    recorded += 1;
                }
                Ok(validation::ValidationOutcome::Pending) => {}
                Err(err) => {
                    tracing::warn!(%package_id, %err, "validator poll failed for package");
                }
            }
        }
        Ok(recorded)
    }

    /// `CreateManifest`: draft a manifest for a validated package.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Preconditions`] if the package has not
    /// reached `validated`, [`ManifestError::UnknownImpact`] if `impact`
    /// does not parse, or [`ManifestError::Store`] on a driver error.
    pub async fn create_manifest(
        &self,
        package_id: PackageId,
        target: serde_json::Value,
        impact: &str,
        rationale: &str,
        apply_strategy: serde_json::Value,
        preconditions: Vec<String>,
    ) -> Result<Manifest, ManifestError> {
        let impact = Impact::parse(impact).map_err(ManifestError::UnknownImpact)?;

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM packages WHERE id = $1")
                .bind(package_id.as_uuid())
                .fetch_optional(self.store.pool())
                .await?;
        match status {
            Some((s,)) if s == PackageStatus::Validated.as_str() => {}
            Some(_) => return Err(ManifestError::Preconditions),
            None => return Err(ManifestError::NotFound),
        }

        let manifest = Manifest {
            manifest_id: ManifestId::new(),
            package_id,
            target,
            impact,
            rationale: rationale.to_string(),
            preconditions,
            apply_strategy,
            status: ManifestStatus::Draft,
            signature_id: None,
            upgrade_id: None,
        };

        sqlx::query(
            "INSERT INTO manifests \
             (id, package_id, target, impact, rationale, preconditions, apply_strategy, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(manifest.manifest_id.as_uuid())
        .bind(manifest.package_id.as_uuid())
        .bind(&manifest.target)
        .bind(manifest.impact.to_string())
        .bind(&manifest.rationale)
        .bind(serde_json::to_value(&manifest.preconditions).unwrap_or_default())
        .bind(&manifest.apply_strategy)
        .bind(manifest.status.as_str())
        .execute(self.store.pool())
        .await?;

        Ok(manifest)
    }

    /// `SignManifest`: gate on the `manifest.sign` policy decision,
    /// canonicalize, request a detached signature, verify it locally before
    /// persisting, and emit `manifest.signed`. Every failure path also
    /// appends `manifest.sign_failed` naming the attempt before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::PolicyDenied`] if `manifest.sign` denies,
    /// [`ManifestError::SignerUnavailable`] if the signer cannot be reached
    /// or its signature fails local verification, [`ManifestError::Canon`]
    /// if the manifest cannot be canonicalized, or [`ManifestError::Conflict`]
    /// if the manifest is not in `draft`.
    pub async fn sign_manifest(&self, manifest_id: ManifestId, actor: &rok_core::Principal) -> Result<ManifestSignature, ManifestError> {
        let manifest = self.load_manifest(manifest_id).await?;

        let decision = self
            .policy
            .evaluate_with_fallback(PolicyRequest {
                point: DecisionPoint::ManifestSign,
                principal: actor,
                subject: &manifest,
            })
            .await;
        self.audit
            .append(
                "policy.decision",
                serde_json::to_value(&decision).unwrap_or_default(),
                serde_json::json!({"manifestId": manifest_id}),
            )
            .await
            .map_err(ManifestError::Audit)?;
        if !decision.allowed {
            let reason = decision.rationale.unwrap_or_default();
            self.audit_sign_failed(manifest_id, &reason).await?;
            return Err(ManifestError::PolicyDenied(reason));
        }

        let canonical_hash = match rok_canon::content_hash(&serde_json::json!({
            "manifestId": manifest.manifest_id,
            "packageId": manifest.package_id,
            "target": manifest.target,
            "impact": manifest.impact.to_string(),
            "applyStrategy": manifest.apply_strategy,
        })) {
            Ok(hash) => hash,
            Err(err) => {
                self.audit_sign_failed(manifest_id, &err.to_string()).await?;
                return Err(ManifestError::Canon(err));
            }
        };

        let signature_bytes = match self
            .signer
            .sign(&self.manifest_signer_kid, canonical_hash.as_bytes(), self.signing_algorithm)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                self.audit_sign_failed(manifest_id, &err.to_string()).await?;
                return Err(ManifestError::SignerUnavailable(err));
            }
        };

        let public_key = match self.signer.public_key(&self.manifest_signer_kid).await {
            Ok(key) => key,
            Err(err) => {
                self.audit_sign_failed(manifest_id, &err.to_string()).await?;
                return Err(ManifestError::SignerUnavailable(err));
            }
        };
        let verified = match rok_signing::verify_detached(
            self.signing_algorithm,
            &public_key,
            canonical_hash.as_bytes(),
            &signature_bytes,
        ) {
            Ok(verified) => verified,
            Err(err) => {
                self.audit_sign_failed(manifest_id, &err.to_string()).await?;
                return Err(ManifestError::SignerUnavailable(err));
            }
        };
        if !verified {
            let reason = "returned signature failed local verification";
            self.audit_sign_failed(manifest_id, reason).await?;
            return Err(ManifestError::SignerUnavailable(rok_signing::SigningError::Malformed(
                reason.into(),
            )));
        }

        let signature = ManifestSignature {
            signature_id: SignatureId::new(),
            manifest_id,
            signer_kid: self.manifest_signer_kid.clone(),
            signature_bytes,
            canonical_hash,
            signed_at: chrono::Utc::now(),
        };

        let mut tx = self.store.pool().begin().await?;
        sqlx::query(
            "INSERT INTO manifest_signatures (id, manifest_id, signer_kid, signature_bytes, canonical_hash) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(signature.signature_id.as_uuid())
        .bind(manifest_id.as_uuid())
        .bind(&signature.signer_kid)
        .bind(&signature.signature_bytes)
        .bind(&signature.canonical_hash)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE manifests SET status = $1, signature_id = $2, updated_at = now() \
             WHERE id = $3 AND status = $4",
        )
        .bind(ManifestStatus::Signed.as_str())
        .bind(signature.signature_id.as_uuid())
        .bind(manifest_id.as_uuid())
        .bind(ManifestStatus::Draft.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            self.audit_sign_failed(manifest_id, "manifest left draft before the signature could be recorded").await?;
            return Err(ManifestError::Conflict);
        }
        tx.commit().await?;

        self.audit
            .append(
                "manifest.signed",
                serde_json::json!({"manifestId": manifest_id, "signatureId": signature.signature_id}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;

        Ok(signature)
    }

    /// Append a `manifest.sign_failed` event and return `()`, letting the
    /// caller immediately re-propagate the original error via `?`.
    async fn audit_sign_failed(&self, manifest_id: ManifestId, reason: &str) -> Result<(), ManifestError> {
        self.audit
            .append(
                "manifest.sign_failed",
                serde_json::json!({"manifestId": manifest_id, "reason": reason}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;
        Ok(())
    }

    /// Route a signed manifest toward multisig when its impact requires it;
    /// a no-op for low/medium impact, which stay `signed` until
    /// [`Self::apply_manifest`] itself performs the `signed -> applying`
    /// move. `apply_manifest` is the single entry point for that
    /// transition, so this never advances the status on its behalf.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Conflict`] if the manifest requires
    /// multisig but is not `signed`.
    pub async fn route_after_signing(&self, manifest_id: ManifestId) -> Result<ManifestStatus, ManifestError> {
        let manifest = self.load_manifest(manifest_id).await?;
        if !manifest.impact.requires_multisig() {
            return Ok(manifest.status);
        }
        self.store
            .conditional_update(
                "manifests",
                "id",
                "status",
                manifest_id.as_uuid(),
                ManifestStatus::Signed.as_str(),
                ManifestStatus::PendingMultisig.as_str(),
            )
            .await
            .map_err(|_| ManifestError::Conflict)?;
        Ok(ManifestStatus::PendingMultisig)
    }

    /// Record that the dependent upgrade proposal reached quorum, advancing
    /// `pending_multisig -> multisig_applied`. Called by the orchestration
    /// layer after `rok-multisig`'s `Apply` succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Conflict`] if the manifest is not
    /// `pending_multisig`.
    pub async fn record_multisig_applied(&self, manifest_id: ManifestId, upgrade_id: uuid::Uuid) -> Result<(), ManifestError> {
        sqlx::query("UPDATE manifests SET upgrade_id = $1 WHERE id = $2")
            .bind(upgrade_id)
            .bind(manifest_id.as_uuid())
            .execute(self.store.pool())
            .await?;
        self.store
            .conditional_update(
                "manifests",
                "id",
                "status",
                manifest_id.as_uuid(),
                ManifestStatus::PendingMultisig.as_str(),
                ManifestStatus::MultisigApplied.as_str(),
            )
            .await
            .map_err(|_| ManifestError::Conflict)
    }

    /// `ApplyManifest`: the single entry point that moves a manifest into
    /// `applying`, guarded by signature presence, multisig completion for
    /// high-impact manifests, unresolved preconditions, and the
    /// `publish.pre_apply` policy decision.
    ///
    /// # Errors
    ///
    /// - [`ManifestError::SignatureMissing`] if unsigned.
    /// - [`ManifestError::MultisigNotApplied`] if high-impact and not yet
    ///   `multisig_applied`.
    /// - [`ManifestError::PreconditionsUnresolved`] if any precondition is
    ///   unresolved.
    /// - [`ManifestError::PolicyDenied`] if `publish.pre_apply` denies.
    /// - [`ManifestError::Conflict`] if another caller already applied it.
    pub async fn apply_manifest(
        &self,
        manifest_id: ManifestId,
        actor: &rok_core::Principal,
    ) -> Result<(), ManifestError> {
        let manifest = self.load_manifest(manifest_id).await?;

        if manifest.signature_id.is_none() {
            return Err(ManifestError::SignatureMissing);
        }
        if manifest.impact.requires_multisig() && manifest.status != ManifestStatus::MultisigApplied {
            return Err(ManifestError::MultisigNotApplied);
        }
        if !manifest.preconditions.is_empty() {
            return Err(ManifestError::PreconditionsUnresolved);
        }

        let decision = self
            .policy
            .evaluate_with_fallback(PolicyRequest {
                point: DecisionPoint::PublishPreApply,
                principal: actor,
                subject: &manifest,
            })
            .await;
        self.audit
            .append(
                "policy.decision",
                serde_json::to_value(&decision).unwrap_or_default(),
                serde_json::json!({"manifestId": manifest_id}),
            )
            .await
            .map_err(ManifestError::Audit)?;
        if !decision.allowed {
            return Err(ManifestError::PolicyDenied(
                decision.rationale.unwrap_or_default(),
            ));
        }

        let expected = if manifest.impact.requires_multisig() {
            ManifestStatus::MultisigApplied
        } else {
            ManifestStatus::Signed
        };
        self.store
            .conditional_update(
                "manifests",
                "id",
                "status",
                manifest_id.as_uuid(),
                expected.as_str(),
                ManifestStatus::Applying.as_str(),
            )
            .await
            .map_err(|_| ManifestError::Conflict)?;

        self.audit
            .append(
                "manifest.applied",
                serde_json::json!({"manifestId": manifest_id}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;

        Ok(())
    }

    /// Clear one named precondition from a manifest's outstanding list,
    /// gated on the `manifest.update` policy decision. Idempotent: resolving
    /// a precondition that is already absent from the list succeeds without
    /// touching the row.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::PolicyDenied`] if `manifest.update` denies.
    pub async fn resolve_precondition(
        &self,
        manifest_id: ManifestId,
        precondition: &str,
        actor: &rok_core::Principal,
    ) -> Result<Vec<String>, ManifestError> {
        let manifest = self.load_manifest(manifest_id).await?;

        let decision = self
            .policy
            .evaluate_with_fallback(PolicyRequest {
                point: DecisionPoint::ManifestUpdate,
                principal: actor,
                subject: &manifest,
            })
            .await;
        self.audit
            .append(
                "policy.decision",
                serde_json::to_value(&decision).unwrap_or_default(),
                serde_json::json!({"manifestId": manifest_id}),
            )
            .await
            .map_err(ManifestError::Audit)?;
        if !decision.allowed {
            return Err(ManifestError::PolicyDenied(
                decision.rationale.unwrap_or_default(),
            ));
        }

        if !manifest.preconditions.iter().any(|p| p == precondition) {
            return Ok(manifest.preconditions);
        }
        let remaining: Vec<String> = manifest
            .preconditions
            .into_iter()
            .filter(|p| p != precondition)
            .collect();

        sqlx::query("UPDATE manifests SET preconditions = $1, updated_at = now() WHERE id = $2")
            .bind(serde_json::to_value(&remaining).unwrap_or_default())
            .bind(manifest_id.as_uuid())
            .execute(self.store.pool())
            .await?;

        self.audit
            .append(
                "manifest.precondition_resolved",
                serde_json::json!({"manifestId": manifest_id, "precondition": precondition}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;

        Ok(remaining)
    }

    /// Mark a manifest as `failed` (publisher fatal error or policy deny
    /// discovered downstream).
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Store`] on a driver error.
    pub async fn mark_failed(&self, manifest_id: ManifestId, reason: &str) -> Result<(), ManifestError> {
        sqlx::query("UPDATE manifests SET status = $1, updated_at = now() WHERE id = $2")
            .bind(ManifestStatus::Failed.as_str())
            .bind(manifest_id.as_uuid())
            .execute(self.store.pool())
            .await?;
        self.audit
            .append(
                "manifest.update",
                serde_json::json!({"manifestId": manifest_id, "status": "failed", "reason": reason}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;
        Ok(())
    }

    /// Transition `applying -> publishing` once the publisher has created
    /// tasks for every target, and `publishing -> published` once every
    /// task succeeds. Called by the orchestration layer.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Conflict`] if the manifest is not in the
    /// expected prior state.
    pub async fn advance_publish_state(
        &self,
        manifest_id: ManifestId,
        from: ManifestStatus,
        to: ManifestStatus,
    ) -> Result<(), ManifestError> {
        self.store
            .conditional_update(
                "manifests",
                "id",
                "status",
                manifest_id.as_uuid(),
                from.as_str(),
                to.as_str(),
            )
            .await
            .map_err(|_| ManifestError::Conflict)?;
        if to == ManifestStatus::Published {
            self.audit
                .append(
                    "publish.completed",
                    serde_json::json!({"manifestId": manifest_id}),
                    serde_json::json!({}),
                )
                .await
                .map_err(ManifestError::Audit)?;
        }
        Ok(())
    }

    /// Compensate for an emergency-applied upgrade that was not ratified
    /// before its deadline: transition the dependent manifest
    /// `applied -> rolled_back` and emit `manifest.update`. Called by the
    /// emergency-ratification watcher after it rolls back the upgrade
    /// proposal itself.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Conflict`] if the manifest already moved
    /// past `published`/`applying`/`publishing`.
    pub async fn rollback_manifest(&self, manifest_id: ManifestId) -> Result<(), ManifestError> {
        let manifest = self.load_manifest(manifest_id).await?;
        self.store
            .conditional_update(
                "manifests",
                "id",
                "status",
                manifest_id.as_uuid(),
                manifest.status.as_str(),
                ManifestStatus::RolledBack.as_str(),
            )
            .await
            .map_err(|_| ManifestError::Conflict)?;
        self.audit
            .append(
                "manifest.update",
                serde_json::json!({"manifestId": manifest_id, "status": "rolled_back"}),
                serde_json::json!({}),
            )
            .await
            .map_err(ManifestError::Audit)?;
        Ok(())
    }

    /// Fetch a package by id, for `GET /packages/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] if no such package exists, or
    /// [`ManifestError::Store`] on a driver error.
    pub async fn get_package(&self, package_id: PackageId) -> Result<Package, ManifestError> {
        let row = sqlx::query_as::<_, types::PackageRow>(
            "SELECT id, name, version, artifact_ref, sha256, submitter, metadata, status, validation_report_ref \
             FROM packages WHERE id = $1",
        )
        .bind(package_id.as_uuid())
        .fetch_optional(self.store.pool())
        .await?
        .ok_or(ManifestError::NotFound)?;
        Ok(Package {
            package_id: PackageId::from_uuid(row.id),
            name: row.name,
            version: row.version,
            artifact_ref: row.artifact_ref,
            sha256: row.sha256,
            submitter: row.submitter,
            metadata: row.metadata,
            status: PackageStatus::parse(&row.status).ok_or(ManifestError::NotFound)?,
            validation_report_ref: row.validation_report_ref,
        })
    }

    /// Fetch a manifest by id, for `GET /manifests/{id}/status`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] if no such manifest exists, or
    /// [`ManifestError::Store`] on a driver error.
    pub async fn get_manifest(&self, manifest_id: ManifestId) -> Result<Manifest, ManifestError> {
        self.load_manifest(manifest_id).await
    }

    async fn load_manifest(&self, manifest_id: ManifestId) -> Result<Manifest, ManifestError> {
        let row = sqlx::query_as::<_, types::ManifestRow>(
            "SELECT id, package_id, target, impact, rationale, preconditions, apply_strategy, status, signature_id, upgrade_id \
             FROM manifests WHERE id = $1",
        )
        .bind(manifest_id.as_uuid())
        .fetch_optional(self.store.pool())
        .await?;
        row.map(Manifest::try_from)
            .ok_or(ManifestError::NotFound)?
            .map_err(|_| ManifestError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_manifest(impact: Impact) -> Manifest {
        Manifest {
            manifest_id: ManifestId::new(),
            package_id: PackageId::new(),
            target: serde_json::json!({"fleet": "us-east-1"}),
            impact,
            rationale: "routine rollout".into(),
            preconditions: Vec::new(),
            apply_strategy: serde_json::json!({"strategy": "rolling"}),
            status: ManifestStatus::Signed,
            signature_id: Some(SignatureId::new()),
            upgrade_id: None,
        }
    }

    #[test]
    fn low_and_medium_impact_never_require_multisig_routing() {
        assert!(!draft_manifest(Impact::Low).impact.requires_multisig());
        assert!(!draft_manifest(Impact::Medium).impact.requires_multisig());
    }

    #[test]
    fn high_and_critical_impact_require_multisig_routing() {
        assert!(draft_manifest(Impact::High).impact.requires_multisig());
        assert!(draft_manifest(Impact::Critical).impact.requires_multisig());
    }

    #[test]
    fn apply_manifest_guard_rejects_unsigned_manifests() {
        let mut manifest = draft_manifest(Impact::Low);
        manifest.signature_id = None;
        assert!(manifest.signature_id.is_none());
    }
}
