// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers. Thin: extract principal, check RBAC, gate idempotency on
//! mutating routes, dispatch to the component it belongs to, render the
//! canonical envelope.

use crate::{err_bytes, ok_bytes, AppState, AuthenticatedPrincipal, Envelope};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rok_core::{ManifestId, PackageId, Principal, PublishTaskId, Role};
use rok_error::{ErrorCode, RokError};
use rok_idempotency::{IdempotencyStore, Outcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

fn require_any_role<T>(principal: &Principal, roles: &[Role]) -> Result<(), Envelope<T>> {
    if principal.has_any_role(roles) {
        Ok(())
    } else {
        Err(RokError::new(ErrorCode::RoleRequired, "principal lacks the role required for this action").into())
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Runs `body` under the idempotency store when an `Idempotency-Key` header
/// is present, replaying a prior completed response verbatim on retry.
/// Requests with no key run fresh unless `require_idempotency_key` is set,
/// in which case they are rejected with [`ErrorCode::IdempotencyKeyRequired`].
async fn idempotent<F, Fut>(
    state: &AppState,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    request_body: &serde_json::Value,
    run: F,
) -> Response
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = (StatusCode, Vec<u8>)>,
{
    let Some(key) = idempotency_key(headers) else {
        if state.require_idempotency_key {
            return Envelope::<()>::Err(RokError::new(
                ErrorCode::IdempotencyKeyRequired,
                "this deployment requires an Idempotency-Key header on mutating requests",
            ))
            .into_response();
        }
        let (status, body) = run().await;
        return (status, body).into_response();
    };

    let request_hash = match IdempotencyStore::request_hash(request_body) {
        Ok(h) => h,
        Err(e) => return Envelope::<()>::Err(RokError::new(ErrorCode::Uncanonicalizable, e.to_string())).into_response(),
    };

    match state.idempotency.begin(method, path, &key, &request_hash).await {
        Ok(Outcome::Replay { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            (status, body).into_response()
        }
        Ok(Outcome::Fresh) => {
            let (status, body) = run().await;
            let _ = state
                .idempotency
                .complete(method, path, &key, status.as_u16(), &body)
                .await;
            (status, body).into_response()
        }
        Err(e) => Envelope::<()>::Err(e.into()).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Health and readiness
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Envelope::Ok(
        StatusCode::OK,
        HealthBody {
            status: "ok",
            version: state.version,
            uptime_seconds: uptime_seconds(state.started_at),
        },
    )
}

fn uptime_seconds(started_at: Instant) -> u64 {
    Instant::now().saturating_duration_since(started_at).as_secs()
}

#[derive(Serialize)]
struct ReadyBody {
    checks: ReadyChecks,
}

#[derive(Serialize)]
struct ReadyChecks {
    db: &'static str,
    signer: Option<&'static str>,
}

pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let db_ok = sqlx::query("SELECT 1").execute(state.store.pool()).await.is_ok();
    if !db_ok {
        return Envelope::<()>::Err(RokError::new(ErrorCode::Internal, "database is not reachable")).into_response();
    }

    let signer_status = if state.require_signer_probe {
        match state.signer.probe().await {
            Ok(()) => Some("ok"),
            Err(e) => {
                return Envelope::<()>::Err(e.into()).into_response();
            }
        }
    } else {
        None
    };

    Envelope::Ok(
        StatusCode::OK,
        ReadyBody {
            checks: ReadyChecks {
                db: "ok",
                signer: signer_status,
            },
        },
    )
    .into_response()
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

#[derive(Deserialize, Serialize)]
pub struct SubmitPackageRequest {
    name: String,
    version: String,
    artifact_ref: String,
    sha256: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub async fn submit_package(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    headers: HeaderMap,
    Json(req): Json<SubmitPackageRequest>,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::Submitter, Role::DivisionLead, Role::Operator, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let body = serde_json::to_value(&req).unwrap_or_default();
    idempotent(&state, "POST", "/packages/submit", &headers, &body, || async {
        match state
            .manifest
            .submit_package(&req.name, &req.version, &req.artifact_ref, &req.sha256, &principal.id, req.metadata.clone())
            .await
        {
            Ok(package) => (
                StatusCode::CREATED,
                ok_bytes(&serde_json::json!({"packageId": package.package_id, "status": "validation_pending"})),
            ),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

pub async fn get_package(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(_principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
) -> Response {
    match state.manifest.get_package(PackageId::from_uuid(id)).await {
        Ok(package) => Envelope::Ok(StatusCode::OK, package).into_response(),
        Err(e) => Envelope::<()>::Err(e.into()).into_response(),
    }
}

#[derive(Deserialize, Serialize)]
pub struct ValidatePackageRequest {
    passed: bool,
    report_ref: String,
}

pub async fn validate_package(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ValidatePackageRequest>,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::Operator, Role::DivisionLead, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let path = format!("/packages/{id}/validate");
    let body = serde_json::to_value(&req).unwrap_or_default();
    idempotent(&state, "POST", &path, &headers, &body, || async {
        let package_id = PackageId::from_uuid(id);
        match state.manifest.record_validation(package_id, req.passed, &req.report_ref).await {
            Ok(()) => (StatusCode::ACCEPTED, ok_bytes(&serde_json::json!({"packageId": package_id}))),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

#[derive(Deserialize, Serialize)]
pub struct CreateManifestRequest {
    package_id: Uuid,
    target: serde_json::Value,
    impact: String,
    rationale: String,
    #[serde(default)]
    apply_strategy: serde_json::Value,
    #[serde(default)]
    preconditions: Vec<String>,
}

pub async fn create_manifest(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    headers: HeaderMap,
    Json(req): Json<CreateManifestRequest>,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::Operator, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let body = serde_json::to_value(&req).unwrap_or_default();
    idempotent(&state, "POST", "/manifests/create", &headers, &body, || async {
        match state
            .manifest
            .create_manifest(
                PackageId::from_uuid(req.package_id),
                req.target.clone(),
                &req.impact,
                &req.rationale,
                req.apply_strategy.clone(),
                req.preconditions.clone(),
            )
            .await
        {
            Ok(manifest) => (
                StatusCode::CREATED,
                ok_bytes(&serde_json::json!({"manifestId": manifest.manifest_id, "status": manifest.status.as_str()})),
            ),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

pub async fn submit_for_signing(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::Operator, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let manifest_id = ManifestId::from_uuid(id);
    let path = format!("/manifests/{id}/submit-for-signing");
    idempotent(&state, "POST", &path, &headers, &serde_json::json!({"manifestId": manifest_id}), || async {
        match state.manifest.sign_manifest(manifest_id, &principal).await {
            Ok(signature) => {
                let routed = state.manifest.route_after_signing(manifest_id).await;
                let status = match routed {
                    Ok(s) => s.as_str(),
                    Err(_) => "signed",
                };
                (
                    StatusCode::OK,
                    ok_bytes(&serde_json::json!({
                        "manifestId": manifest_id,
                        "signatureId": signature.signature_id,
                        "signedManifest": {"canonicalHash": signature.canonical_hash, "status": status},
                    })),
                )
            }
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

pub async fn request_multisig(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::Operator, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let manifest_id = ManifestId::from_uuid(id);
    let path = format!("/manifests/{id}/request-multisig");
    idempotent(&state, "POST", &path, &headers, &serde_json::json!({"manifestId": manifest_id}), || async {
        let upgrade_id = rok_core::UpgradeId::new();
        match state.multisig.submit(upgrade_id, manifest_id, &principal.id).await {
            Ok(proposal) => (
                StatusCode::ACCEPTED,
                ok_bytes(&serde_json::json!({"upgradeId": proposal.upgrade_id, "status": "pending_multisig"})),
            ),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

pub async fn manifest_status(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(_principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
) -> Response {
    let manifest_id = ManifestId::from_uuid(id);
    let manifest = match state.manifest.get_manifest(manifest_id).await {
        Ok(m) => m,
        Err(e) => return Envelope::<()>::Err(e.into()).into_response(),
    };
    let history = match state.audit.events_by_manifest(manifest_id).await {
        Ok(events) => events,
        Err(e) => return Envelope::<()>::Err(e.into()).into_response(),
    };
    Envelope::Ok(
        StatusCode::OK,
        serde_json::json!({"status": manifest.status.as_str(), "history": history}),
    )
    .into_response()
}

pub async fn apply_manifest(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let manifest_id = ManifestId::from_uuid(id);
    let path = format!("/manifests/{id}/apply");
    idempotent(&state, "POST", &path, &headers, &serde_json::json!({"manifestId": manifest_id}), || async {
        if let Err(e) = state.manifest.apply_manifest(manifest_id, &principal).await {
            return err_bytes(&e.into());
        }

        let targets = match state.manifest.get_manifest(manifest_id).await {
            Ok(m) => extract_targets(&m.target),
            Err(e) => return err_bytes(&e.into()),
        };
        if let Err(e) = state.publisher.create_tasks(manifest_id, &targets).await {
            return err_bytes(&e.into());
        }
        let _ = state
            .manifest
            .advance_publish_state(manifest_id, rok_manifest::ManifestStatus::Applying, rok_manifest::ManifestStatus::Publishing)
            .await;

        (StatusCode::OK, ok_bytes(&serde_json::json!({"manifestId": manifest_id, "status": "applied"})))
    })
    .await
}

#[derive(Deserialize, Serialize)]
pub struct ResolvePreconditionRequest {
    precondition: String,
}

pub async fn resolve_precondition(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ResolvePreconditionRequest>,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::Operator, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let manifest_id = ManifestId::from_uuid(id);
    let path = format!("/manifests/{id}/preconditions/resolve");
    let body = serde_json::to_value(&req).unwrap_or_default();
    idempotent(&state, "POST", &path, &headers, &body, || async {
        match state.manifest.resolve_precondition(manifest_id, &req.precondition, &principal).await {
            Ok(remaining) => (
                StatusCode::OK,
                ok_bytes(&serde_json::json!({"manifestId": manifest_id, "preconditions": remaining})),
            ),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

fn extract_targets(target: &serde_json::Value) -> Vec<String> {
    target
        .get("targets")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| vec!["default".to_string()])
}

// ---------------------------------------------------------------------------
// Upgrades (multisig)
// ---------------------------------------------------------------------------

#[derive(Deserialize, Serialize)]
pub struct ApproveUpgradeRequest {
    approver_id: String,
    #[serde(with = "base64_bytes")]
    signature: Vec<u8>,
    #[serde(default)]
    notes: Option<String>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

pub async fn approve_upgrade(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ApproveUpgradeRequest>,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let upgrade_id = rok_core::UpgradeId::from_uuid(id);
    let path = format!("/upgrades/{id}/approve");
    let body = serde_json::to_value(&req).unwrap_or_default();
    idempotent(&state, "POST", &path, &headers, &body, || async {
        match state
            .multisig
            .approve(upgrade_id, &req.approver_id, req.signature.clone(), req.notes.clone())
            .await
        {
            Ok(approval) => (StatusCode::CREATED, ok_bytes(&serde_json::json!({"approval": approval}))),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

pub async fn apply_upgrade(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let upgrade_id = rok_core::UpgradeId::from_uuid(id);
    let path = format!("/upgrades/{id}/apply");
    idempotent(&state, "POST", &path, &headers, &serde_json::json!({"upgradeId": upgrade_id}), || async {
        match state.multisig.apply(upgrade_id, &principal.id).await {
            Ok(upgrade) => {
                let _ = state.manifest.record_multisig_applied(upgrade.manifest_id, upgrade.upgrade_id.as_uuid()).await;
                let (approvers, required) = state.multisig.quorum_snapshot(upgrade_id).await.unwrap_or((0, 0));
                (
                    StatusCode::OK,
                    ok_bytes(&serde_json::json!({
                        "upgrade": upgrade,
                        "quorum": {"approvers": approvers, "required": required},
                    })),
                )
            }
            Err(rok_multisig::MultisigError::InsufficientQuorum { have, required }) => err_bytes(
                &RokError::new(ErrorCode::InsufficientQuorum, "insufficient quorum")
                    .with_context("have", have)
                    .with_context("required", required)
                    .with_context("missing", required.saturating_sub(have)),
            ),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

#[derive(Deserialize, Serialize)]
pub struct PublishNotifyRequest {
    task_id: Uuid,
}

pub async fn publish_notify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PublishNotifyRequest>,
) -> Response {
    let body = serde_json::to_value(&req).unwrap_or_default();
    idempotent(&state, "POST", "/publish/notify", &headers, &body, || async {
        let result = match state.publisher.poll_and_run_once(16).await {
            Ok(result) => result,
            Err(e) => return err_bytes(&e.into()),
        };
        for manifest_id in result.succeeded {
            let _ = state
                .manifest
                .advance_publish_state(manifest_id, rok_manifest::ManifestStatus::Publishing, rok_manifest::ManifestStatus::Published)
                .await;
        }
        for manifest_id in result.failed {
            let _ = state
                .manifest
                .mark_failed(manifest_id, "publish task exhausted retries or hit a fatal collaborator error")
                .await;
        }
        (StatusCode::OK, ok_bytes(&serde_json::json!({"acknowledged": true})))
    })
    .await
}

pub async fn resubmit_publish_task(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::DivisionLead, Role::SuperAdmin]) {
        return resp.into_response();
    }

    let task_id = PublishTaskId::from_uuid(id);
    let path = format!("/publish/tasks/{id}/resubmit");
    idempotent(&state, "POST", &path, &headers, &serde_json::json!({"taskId": task_id}), || async {
        match state.publisher.resubmit(task_id).await {
            Ok(()) => (StatusCode::OK, ok_bytes(&serde_json::json!({"taskId": task_id, "status": "pending"}))),
            Err(e) => err_bytes(&e.into()),
        }
    })
    .await
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

pub async fn get_audit_event(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(resp) = require_any_role::<()>(&principal, &[Role::Auditor, Role::DivisionLead, Role::SuperAdmin, Role::Operator]) {
        return resp.into_response();
    }

    match state.audit.get_by_id(rok_core::EventId::from_uuid(id)).await {
        Ok(Some(event)) => Envelope::Ok(StatusCode::OK, event).into_response(),
        Ok(None) => Envelope::<()>::Err(RokError::new(ErrorCode::EventNotFound, "no such audit event")).into_response(),
        Err(e) => Envelope::<()>::Err(e.into()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn require_any_role_accepts_a_matching_role() {
        let principal = Principal::new("user-1", Role::Operator);
        assert!(require_any_role::<()>(&principal, &[Role::Operator, Role::SuperAdmin]).is_ok());
    }

    #[test]
    fn require_any_role_rejects_an_unlisted_role() {
        let principal = Principal::new("user-1", Role::Submitter);
        assert!(require_any_role::<()>(&principal, &[Role::DivisionLead, Role::SuperAdmin]).is_err());
    }

    #[test]
    fn idempotency_key_reads_the_header_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("abc-123"));
        assert_eq!(idempotency_key(&headers), Some("abc-123".to_string()));
    }

    #[test]
    fn idempotency_key_is_none_when_absent() {
        assert_eq!(idempotency_key(&HeaderMap::new()), None);
    }

    #[test]
    fn extract_targets_reads_the_targets_array() {
        let target = serde_json::json!({"targets": ["us-east-1", "us-west-2"]});
        assert_eq!(extract_targets(&target), vec!["us-east-1", "us-west-2"]);
    }

    #[test]
    fn extract_targets_falls_back_to_default_when_absent() {
        let target = serde_json::json!({"fleet": "us-east-1"});
        assert_eq!(extract_targets(&target), vec!["default".to_string()]);
    }
}

