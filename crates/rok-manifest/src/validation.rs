// SPDX-License-Identifier: MIT OR Apache-2.0
//! External validator collaborator, polled by the `validation-poll` driver
//! to advance packages sitting in `submitted`/`validating`.

use async_trait::async_trait;
use rok_core::PackageId;
use std::time::Duration;
use thiserror::Error;

/// What an external validator reported for one package.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// The validation job has not finished yet; poll again later.
    Pending,
    /// Validation completed; `report_ref` points at the full report.
    Done {
        /// Whether validation passed.
        passed: bool,
        /// Opaque pointer to the validation job's report.
        report_ref: String,
    },
}

/// Errors from querying an external validator.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The validator could not be reached or returned an unexpected body.
    #[error("validator unreachable or returned an invalid response: {0}")]
    Transport(String),
}

/// A source of validation decisions for submitted packages. One
/// implementation per external validator deployment.
#[async_trait]
pub trait ValidationCollaborator: Send + Sync {
    /// Ask whether `package_id`'s validation job has completed.
    async fn check(&self, package_id: PackageId) -> Result<ValidationOutcome, ValidationError>;
}

/// HTTP adapter over a remote validator. `GET {base_url}/validations/{id}`;
/// a `200` body of `{done: true, passed, reportRef}` is a completed
/// outcome, anything else (including `404`) is treated as still pending.
pub struct HttpValidationCollaborator {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl HttpValidationCollaborator {
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
impl ValidationCollaborator for HttpValidationCollaborator {
    async fn check(&self, package_id: PackageId) -> Result<ValidationOutcome, ValidationError> {
        let resp = self
            .client
            .get(format!("{}/validations/{package_id}", self.base_url))
            .timeout(self.deadline)
            .send()
            .await
            .map_err(|e| ValidationError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Ok(ValidationOutcome::Pending);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ValidationError::Transport(e.to_string()))?;

        if body.get("done").and_then(serde_json::Value::as_bool) != Some(true) {
            return Ok(ValidationOutcome::Pending);
        }

        let passed = body
            .get("passed")
            .and_then(serde_json::Value::as_bool)
            .ok_or_else(|| ValidationError::Transport("completed validation missing passed".into()))?;
        let report_ref = body
            .get("reportRef")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ValidationError::Transport("completed validation missing reportRef".into()))?
            .to_string();

        Ok(ValidationOutcome::Done { passed, report_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysPending;

    #[async_trait]
    impl ValidationCollaborator for AlwaysPending {
        async fn check(&self, _package_id: PackageId) -> Result<ValidationOutcome, ValidationError> {
            Ok(ValidationOutcome::Pending)
        }
    }

    #[tokio::test]
    async fn pending_collaborator_reports_pending() {
        let collaborator = AlwaysPending;
        let outcome = collaborator.check(PackageId::new()).await.unwrap();
        assert!(matches!(outcome, ValidationOutcome::Pending));
    }
}
