// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Drives a manifest's publish tasks to completion against external targets."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod classify;

pub use backoff::{next_delay, DEFAULT_MAX_ATTEMPTS};
pub use classify::{classify_http_status, classify_transport_error, Classification};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rok_audit::AuditChain;
use rok_core::{ManifestId, PublishTaskId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A single target rollout for a manifest (`repo`, `marketplace`, `delivery`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishTask {
    /// Identifies this task.
    pub task_id: PublishTaskId,
    /// The manifest being rolled out.
    pub manifest_id: ManifestId,
    /// Which external collaborator this task targets.
    pub target: String,
    /// Current lifecycle status.
    pub status: PublishTaskStatus,
    /// Number of attempts made so far.
    pub attempts: u32,
    /// Earliest time the worker loop should pick this task up again.
    pub next_attempt_at: DateTime<Utc>,
    /// The most recent error, if any attempt failed.
    pub last_error: Option<String>,
    /// Opaque proof of completion (commit SHA, listing id, delivery id).
    pub proof_ref: Option<String>,
}

/// Publish task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PublishTaskStatus {
    /// Ready for the worker loop to pick up once `next_attempt_at` passes.
    Pending,
    /// Claimed by a worker; an attempt is in flight.
    InFlight,
    /// The target accepted the rollout.
    Succeeded,
    /// Retries exhausted, or the target rejected the rollout terminally.
    FailedFatal,
}

impl PublishTaskStatus {
    /// Stable wire/storage string for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::FailedFatal => "failed_fatal",
        }
    }
}

/// Outcome of one [`PublishDriver::poll_and_run_once`] sweep.
#[derive(Debug, Clone, Default)]
pub struct PublishSweepResult {
    /// Manifests whose every task reached `succeeded` this sweep.
    pub succeeded: Vec<ManifestId>,
    /// Manifests with a task that just exhausted retries or hit a fatal
    /// collaborator error this sweep.
    pub failed: Vec<ManifestId>,
}

/// Errors from publish task operations.
#[derive(Debug, Error)]
pub enum PublisherError {
    /// No task exists with the given id.
    #[error("no such publish task")]
    NotFound,
    /// An admin resubmit was attempted on a task that is not `failed_fatal`.
    #[error("publish task is not resubmittable from its current status")]
    NotResubmittable,
    /// No collaborator is registered for the task's target.
    #[error("no collaborator registered for target {0}")]
    UnknownTarget(String),
    /// The underlying store failed.
    #[error("publisher store error: {0}")]
    Store(#[from] sqlx::Error),
    /// An audit event could not be appended.
    #[error("audit append failed: {0}")]
    Audit(#[from] rok_audit::AuditError),
}

impl From<PublisherError> for rok_error::RokError {
    fn from(err: PublisherError) -> Self {
        use rok_error::ErrorCode;
        let code = match &err {
            PublisherError::NotFound => ErrorCode::PublishTaskNotFound,
            PublisherError::NotResubmittable => ErrorCode::PublishTaskNotResubmittable,
            PublisherError::UnknownTarget(_)
            | PublisherError::Store(_)
            | PublisherError::Audit(_) => ErrorCode::Internal,
        };
        rok_error::RokError::new(code, err.to_string())
    }
}

/// A publish target's external collaborator (repository writer, marketplace
/// lister, encrypted-delivery service). One implementation per `target`
/// string, registered with the driver.
#[async_trait]
pub trait PublishCollaborator: Send + Sync {
    /// Attempt to roll the manifest out to this target, returning a
    /// classification of the result rather than a `Result` — every
    /// response, including failures, is a meaningful outcome here.
    async fn publish(&self, manifest_id: ManifestId, task_id: PublishTaskId) -> Classification;
}

/// HTTP adapter over a remote publish target. `POST {base_url}/publish`
/// with the manifest id; the response body, if present, is surfaced as the
/// proof reference on success.
pub struct HttpPublishCollaborator {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl HttpPublishCollaborator {
    /// Construct a collaborator pointed at `base_url`, applying `deadline`
    /// per request.
    #[must_use]
    pub fn new(base_url: impl Into<String>, deadline: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            deadline,
        }
    }
}

#[async_trait]
impl PublishCollaborator for HttpPublishCollaborator {
    async fn publish(&self, manifest_id: ManifestId, task_id: PublishTaskId) -> Classification {
        let resp = match self
            .client
            .post(format!("{}/publish", self.base_url))
            .timeout(self.deadline)
            .json(&serde_json::json!({"manifestId": manifest_id, "taskId": task_id}))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => return classify_transport_error(err.to_string()),
        };
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let proof_ref = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("proofRef").and_then(|p| p.as_str()).map(str::to_string));
        classify_http_status(status, proof_ref, &body)
    }
}

/// Drives every target's publish task for a manifest to completion,
/// classifying each attempt and scheduling retries with exponential
/// backoff and jitter up to a configured cap.
pub struct PublishDriver {
    store: rok_store::Store,
    audit: Arc<AuditChain>,
    collaborators: HashMap<String, Arc<dyn PublishCollaborator>>,
}

impl PublishDriver {
    /// Construct a driver with one collaborator per target name.
    #[must_use]
    pub fn new(
        store: rok_store::Store,
        audit: Arc<AuditChain>,
        collaborators: HashMap<String, Arc<dyn PublishCollaborator>>,
    ) -> Self {
        Self {
            store,
            audit,
            collaborators,
        }
    }

    /// Create one pending task per target for a manifest that just entered
    /// `applying`. Called by the orchestration layer.
    ///
    /// # Errors
    ///
    /// Returns [`PublisherError::Store`] on a driver error.
    pub async fn create_tasks(
        &self,
        manifest_id: ManifestId,
        targets: &[String],
    ) -> Result<Vec<PublishTask>, PublisherError> {
        let mut tasks = Vec::with_capacity(targets.len());
        for target in targets {
            let task = PublishTask {
                task_id: PublishTaskId::new(),
                manifest_id,
                target: target.clone(),
                status: PublishTaskStatus::Pending,
                attempts: 0,
                next_attempt_at: Utc::now(),
                last_error: None,
                proof_ref: None,
            };
            sqlx::query(
                "INSERT INTO publish_tasks (id, manifest_id, target, status, attempts, next_attempt_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(task.task_id.as_uuid())
            .bind(manifest_id.as_uuid())
            .bind(&task.target)
            .bind(task.status.as_str())
            .bind(task.attempts as i32)
            .bind(task.next_attempt_at)
            .execute(self.store.pool())
            .await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Claim and run every task currently eligible (`pending` with
    /// `next_attempt_at <= now`), classifying each attempt's result and
    /// updating the task accordingly. `succeeded` lists manifests whose
    /// every task just reached `succeeded` — the caller should transition
    /// these `publishing -> published`. `failed` lists manifests with a
    /// task that just exhausted retries or hit a fatal collaborator error —
    /// the caller should transition these to `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`PublisherError::Store`] on a driver error.
    pub async fn poll_and_run_once(&self, batch_size: i64) -> Result<PublishSweepResult, PublisherError> {
        let rows: Vec<PublishTaskRow> = sqlx::query_as(
            "UPDATE publish_tasks SET status = $1 WHERE id IN ( \
               SELECT id FROM publish_tasks \
               WHERE status = $2 AND next_attempt_at <= now() \
               ORDER BY next_attempt_at ASC LIMIT $3 FOR UPDATE SKIP LOCKED \
             ) RETURNING id, manifest_id, target, status, attempts, next_attempt_at, last_error, proof_ref",
        )
        .bind(PublishTaskStatus::InFlight.as_str())
        .bind(PublishTaskStatus::Pending.as_str())
        .bind(batch_size)
        .fetch_all(self.store.pool())
        .await?;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for row in rows {
            let task_id = PublishTaskId::from_uuid(row.id);
            let manifest_id = ManifestId::from_uuid(row.manifest_id);

            let Some(collaborator) = self.collaborators.get(&row.target) else {
                self.fail_fatal(task_id, manifest_id, &format!("no collaborator registered for target {}", row.target))
                    .await?;
                failed.push(manifest_id);
                continue;
            };

            let classification = collaborator.publish(manifest_id, task_id).await;
            match classification {
                Classification::Success(proof_ref) => {
                    self.succeed(task_id, &proof_ref).await?;
                    self.audit
                        .append(
                            "publish.target.completed",
                            serde_json::json!({"manifestId": manifest_id, "taskId": task_id, "target": row.target, "proofRef": proof_ref}),
                            serde_json::json!({}),
                        )
                        .await?;
                    if self.all_tasks_succeeded(manifest_id).await? {
                        succeeded.push(manifest_id);
                    }
                }
                Classification::Fatal(reason) => {
                    self.fail_fatal(task_id, manifest_id, &reason).await?;
                    failed.push(manifest_id);
                }
                Classification::Retryable(reason) => {
                    let next_attempt = row.attempts as u32 + 1;
                    match next_delay(row.attempts as u32) {
                        Some(delay) => self.reschedule(task_id, next_attempt, &reason, delay).await?,
                        None => {
                            self.fail_fatal(task_id, manifest_id, &format!("retry cap exhausted: {reason}"))
                                .await?;
                            failed.push(manifest_id);
                        }
                    }
                }
            }
        }
        Ok(PublishSweepResult { succeeded, failed })
    }

    /// Admin resubmit: reset a `failed_fatal` task to `pending` with a
    /// fresh attempt counter, for an operator who has addressed the root
    /// cause out of band.
    ///
    /// # Errors
    ///
    /// Returns [`PublisherError::NotResubmittable`] if the task is not
    /// `failed_fatal`, or [`PublisherError::NotFound`] if it does not exist.
    pub async fn resubmit(&self, task_id: PublishTaskId) -> Result<(), PublisherError> {
        self.store
            .conditional_update(
                "publish_tasks",
                "id",
                "status",
                task_id.as_uuid(),
                PublishTaskStatus::FailedFatal.as_str(),
                PublishTaskStatus::Pending.as_str(),
            )
            .await
            .map_err(|_| PublisherError::NotResubmittable)?;

        sqlx::query(
            "UPDATE publish_tasks SET attempts = 0, next_attempt_at = now(), last_error = NULL \
             WHERE id = $1",
        )
        .bind(task_id.as_uuid())
        .execute(self.store.pool())
        .await?;

        self.audit
            .append(
                "publish.task.resubmitted",
                serde_json::json!({"taskId": task_id}),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn succeed(&self, task_id: PublishTaskId, proof_ref: &str) -> Result<(), PublisherError> {
        sqlx::query(
            "UPDATE publish_tasks SET status = $1, proof_ref = $2, updated_at = now() WHERE id = $3",
        )
        .bind(PublishTaskStatus::Succeeded.as_str())
        .bind(proof_ref)
        .bind(task_id.as_uuid())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn fail_fatal(&self, task_id: PublishTaskId, manifest_id: ManifestId, reason: &str) -> Result<(), PublisherError> {
        sqlx::query(
            "UPDATE publish_tasks SET status = $1, last_error = $2, updated_at = now() WHERE id = $3",
        )
        .bind(PublishTaskStatus::FailedFatal.as_str())
        .bind(reason)
        .bind(task_id.as_uuid())
        .execute(self.store.pool())
        .await?;
        self.audit
            .append(
                "publish.failed",
                serde_json::json!({"manifestId": manifest_id, "taskId": task_id, "reason": reason}),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        task_id: PublishTaskId,
        attempts: u32,
        reason: &str,
        delay: Duration,
    ) -> Result<(), PublisherError> {
        let next_attempt_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
        sqlx::query(
            "UPDATE publish_tasks SET status = $1, attempts = $2, last_error = $3, \
             next_attempt_at = $4, updated_at = now() WHERE id = $5",
        )
        .bind(PublishTaskStatus::Pending.as_str())
        .bind(attempts as i32)
        .bind(reason)
        .bind(next_attempt_at)
        .bind(task_id.as_uuid())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn all_tasks_succeeded(&self, manifest_id: ManifestId) -> Result<bool, PublisherError> {
        let (total, succeeded): (i64, i64) = sqlx::query_as(
            "SELECT count(*), count(*) FILTER (WHERE status = $1) \
             FROM publish_tasks WHERE manifest_id = $2",
        )
        .bind(PublishTaskStatus::Succeeded.as_str())
        .bind(manifest_id.as_uuid())
        .fetch_one(self.store.pool())
        .await?;
        Ok(total > 0 && total == succeeded)
    }
}

#[derive(sqlx::FromRow)]
struct PublishTaskRow {
    id: uuid::Uuid,
    manifest_id: uuid::Uuid,
    target: String,
    #[allow(dead_code)]
    status: String,
    attempts: i32,
    #[allow(dead_code)]
    next_attempt_at: DateTime<Utc>,
    #[allow(dead_code)]
    last_error: Option<String>,
    #[allow(dead_code)]
    proof_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_task_status_wire_strings() {
        assert_eq!(PublishTaskStatus::Pending.as_str(), "pending");
        assert_eq!(PublishTaskStatus::InFlight.as_str(), "in_flight");
        assert_eq!(PublishTaskStatus::Succeeded.as_str(), "succeeded");
        assert_eq!(PublishTaskStatus::FailedFatal.as_str(), "failed_fatal");
    }
}
