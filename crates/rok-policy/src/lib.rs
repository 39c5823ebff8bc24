// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Policy gate: a synchronous decision evaluator invoked at fixed decision points."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use rok_core::Principal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// The fixed set of points in the manifest/upgrade lifecycle where a policy
/// decision is required before the triggering action may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPoint {
    /// Before a manifest is signed.
    ManifestSign,
    /// Before a manifest's mutable fields are updated.
    ManifestUpdate,
    /// Before a resource allocation is granted.
    AllocationRequest,
    /// Cross-cutting check immediately before `ApplyManifest` takes effect.
    PublishPreApply,
}

impl DecisionPoint {
    fn as_str(self) -> &'static str {
        match self {
            Self::ManifestSign => "manifest.sign",
            Self::ManifestUpdate => "manifest.update",
            Self::AllocationRequest => "allocation.request",
            Self::PublishPreApply => "publish.pre_apply",
        }
    }
}

/// The result of evaluating a policy at a [`DecisionPoint`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// Unique id for this decision, referenced by the `policy.decision`
    /// audit event.
    pub decision_id: Uuid,
    /// Whether the action is permitted.
    pub allowed: bool,
    /// The rule that produced this decision, if the evaluator names one.
    pub rule_id: Option<String>,
    /// Human-readable rationale, surfaced in the audit event and, on denial,
    /// in the error response.
    pub rationale: Option<String>,
}

impl Decision {
    /// Construct an allow decision.
    #[must_use]
    pub fn allow(rule_id: impl Into<Option<String>>) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            allowed: true,
            rule_id: rule_id.into(),
            rationale: None,
        }
    }

    /// Construct a deny decision with a rationale.
    #[must_use]
    pub fn deny(rule_id: impl Into<Option<String>>, rationale: impl Into<String>) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            allowed: false,
            rule_id: rule_id.into(),
            rationale: Some(rationale.into()),
        }
    }
}

/// Whether a transient evaluator error is treated as an allow (with a
/// logged warning) or a deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Allow the action through on evaluator error, logging a warning.
    /// Intended for non-production environments.
    FailOpen,
    /// Deny the action on evaluator error. The only safe choice in
    /// production.
    FailClosed,
}

/// Errors surfaced while contacting the policy evaluator.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The remote evaluator could not be reached or returned a malformed
    /// response.
    #[error("policy evaluator unavailable: {0}")]
    EvaluatorUnavailable(String),
}

/// Input to a policy evaluation, carrying the decision point, the caller,
/// and an opaque canonicalizable subject (a manifest, an allocation
/// request, ...).
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRequest<'a, T: Serialize> {
    /// Which decision point this evaluation is for.
    pub point: DecisionPoint,
    /// The authenticated caller.
    pub principal: &'a Principal,
    /// The subject of the decision (serialized into the request body).
    pub subject: &'a T,
}

/// Synchronous evaluator invoked at the fixed decision points in §4.4.
/// "Synchronous" describes the calling convention from the handler's point
/// of view (no queued/async approval step) — the trait itself is async
/// because the evaluator may be a remote RPC.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// Evaluate a policy decision for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EvaluatorUnavailable`] if the evaluator could
    /// not be reached; callers apply the configured [`FailMode`] to decide
    /// what to do with that error.
    async fn evaluate<T: Serialize + Sync>(
        &self,
        request: PolicyRequest<'_, T>,
    ) -> Result<Decision, PolicyError>;
}

/// HTTP adapter over a remote policy evaluator, with a configurable
/// request deadline and fail-open/fail-closed behavior on transient errors.
pub struct HttpPolicyGate {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
    fail_mode: FailMode,
}

impl HttpPolicyGate {
    /// Construct a gate pointed at `base_url`, applying `deadline` per
    /// request and `fail_mode` when the evaluator errors.
    #[must_use]
    pub fn new(base_url: impl Into<String>, deadline: Duration, fail_mode: FailMode) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            deadline,
            fail_mode,
        }
    }

    /// Evaluate, applying this gate's configured [`FailMode`] instead of
    /// propagating a transient evaluator error.
    pub async fn evaluate_with_fallback<T: Serialize + Sync>(
        &self,
        request: PolicyRequest<'_, T>,
    ) -> Decision {
        let point = request.point;
        match self.evaluate(request).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(point = point.as_str(), error = %err, "policy evaluator error");
                match self.fail_mode {
                    FailMode::FailOpen => {
                        Decision::allow(None).with_rationale(format!("fail-open: {err}"))
                    }
                    FailMode::FailClosed => Decision::deny(None, format!("fail-closed: {err}")),
                }
            }
        }
    }
}

impl Decision {
    fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

#[async_trait]
impl PolicyGate for HttpPolicyGate {
    async fn evaluate<T: Serialize + Sync>(
        &self,
        request: PolicyRequest<'_, T>,
    ) -> Result<Decision, PolicyError> {
        #[derive(Serialize)]
        struct Body<'a, U: Serialize> {
            point: &'static str,
            principal_id: &'a str,
            subject: &'a U,
        }

        let resp = self
            .client
            .post(format!("{}/evaluate", self.base_url))
            .timeout(self.deadline)
            .json(&Body {
                point: request.point.as_str(),
                principal_id: &request.principal.id,
                subject: request.subject,
            })
            .send()
            .await
            .map_err(|e| PolicyError::EvaluatorUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PolicyError::EvaluatorUnavailable(format!(
                "evaluator returned {}",
                resp.status()
            )));
        }

        resp.json::<Decision>()
            .await
            .map_err(|e| PolicyError::EvaluatorUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rok_core::Role;

    #[test]
    fn allow_and_deny_constructors() {
        let allow = Decision::allow(Some("rule-1".to_string()));
        assert!(allow.allowed);
        assert!(allow.rationale.is_none());

        let deny = Decision::deny(None, "insufficient role");
        assert!(!deny.allowed);
        assert_eq!(deny.rationale.as_deref(), Some("insufficient role"));
    }

    #[test]
    fn decision_point_wire_names_are_stable() {
        assert_eq!(DecisionPoint::ManifestSign.as_str(), "manifest.sign");
        assert_eq!(DecisionPoint::PublishPreApply.as_str(), "publish.pre_apply");
    }

    #[tokio::test]
    async fn fail_open_allows_on_evaluator_error() {
        let gate = HttpPolicyGate::new("http://127.0.0.1:1", Duration::from_millis(50), FailMode::FailOpen);
        let principal = Principal::new("alice", Role::DivisionLead);
        let decision = gate
            .evaluate_with_fallback(PolicyRequest {
                point: DecisionPoint::ManifestSign,
                principal: &principal,
                subject: &serde_json::json!({"manifestId": "m1"}),
            })
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn fail_closed_denies_on_evaluator_error() {
        let gate = HttpPolicyGate::new("http://127.0.0.1:1", Duration::from_millis(50), FailMode::FailClosed);
        let principal = Principal::new("alice", Role::DivisionLead);
        let decision = gate
            .evaluate_with_fallback(PolicyRequest {
                point: DecisionPoint::ManifestSign,
                principal: &principal,
                subject: &serde_json::json!({"manifestId": "m1"}),
            })
            .await;
        assert!(!decision.allowed);
    }
}
