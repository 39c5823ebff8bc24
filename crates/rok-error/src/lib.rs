//! Unified error taxonomy with stable error codes for the release-orchestration kernel.
//!
//! Every kernel error carries an [`ErrorCode`] (a machine-readable, stable string
//! tag), a human-readable message, an optional cause chain, and arbitrary
//! key-value context. Use the builder returned by [`RokError::new`] to
//! construct errors fluently. The request surface maps [`ErrorCategory`] to
//! an HTTP status and serializes `code`/`message`/`context` into the
//! canonical error envelope.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to. Mirrors the error-kind
/// table in the kernel's error-handling design: each category maps to
/// exactly one caller action and, at the request surface, one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request shape/constraints failed.
    Validation,
    /// Missing or invalid principal.
    Unauthenticated,
    /// Principal lacks role, or a policy decision denied the action.
    Forbidden,
    /// Referenced entity does not exist.
    NotFound,
    /// State mismatch: already applied, idempotency conflict, double approve.
    Conflict,
    /// Required prior state has not yet been reached.
    Preconditions,
    /// Approvals below the required quorum.
    InsufficientQuorum,
    /// The signing service is unreachable or unauthorized.
    SignerUnavailable,
    /// The policy gate denied the action.
    PolicyDenied,
    /// Deadline exceeded or caller canceled.
    Canceled,
    /// Unexpected internal failure.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Preconditions => "preconditions",
            Self::InsufficientQuorum => "insufficient_quorum",
            Self::SignerUnavailable => "signer_unavailable",
            Self::PolicyDenied => "policy_denied",
            Self::Canceled => "canceled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases, and is embedded verbatim
/// in the `code` field of the canonical error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// Request body failed shape or field validation.
    InvalidRequest,
    /// Manifest `impact` is not one of the four fixed levels.
    UnknownImpact,
    /// Canonicalization failed (cycle, unsupported type, non-finite number).
    Uncanonicalizable,

    // -- Unauthenticated / Forbidden --
    /// No principal could be resolved from the request.
    MissingPrincipal,
    /// Principal lacks the role required for this action.
    RoleRequired,
    /// Approver id is not present in the authorized approver set.
    UnauthorizedApprover,

    // -- Not found --
    /// Referenced package does not exist.
    PackageNotFound,
    /// Referenced manifest does not exist.
    ManifestNotFound,
    /// Referenced upgrade proposal does not exist.
    UpgradeNotFound,
    /// Referenced audit event does not exist.
    EventNotFound,
    /// Referenced publish task does not exist.
    PublishTaskNotFound,

    // -- Conflict --
    /// Manifest has already reached the requested (or a later) status.
    ManifestAlreadyApplied,
    /// Upgrade proposal has already been applied.
    UpgradeAlreadyApplied,
    /// Approver already signed this proposal (idempotent duplicate).
    ApproverAlreadySigned,
    /// Idempotency key reused with a different request body.
    IdempotencyKeyConflict,
    /// Publish task is not in a state that accepts this transition.
    PublishTaskNotResubmittable,
    /// Duplicate upgrade id on submit.
    DuplicateUpgrade,

    // -- Preconditions --
    /// Package has not finished validation.
    PackageNotValidated,
    /// Manifest preconditions are not all resolved.
    PreconditionsUnresolved,
    /// Manifest signature is missing.
    SignatureMissing,
    /// High/critical impact manifest has not reached `multisig_applied`.
    MultisigNotApplied,

    // -- Quorum --
    /// Distinct approver count is below the configured quorum.
    InsufficientQuorum,

    // -- Signer --
    /// The signing gateway could not be reached or rejected the request.
    SignerUnavailable,

    // -- Policy --
    /// The policy gate denied the action.
    PolicyDenied,

    // -- Idempotency body limits --
    /// Stored response body would exceed the configured size cap.
    IdempotencyBodyTooLarge,
    /// A mutating request arrived with no `Idempotency-Key` while the
    /// deployment requires one.
    IdempotencyKeyRequired,

    // -- Cancellation --
    /// The operation was canceled or exceeded its deadline.
    Canceled,

    // -- Audit chain --
    /// Recomputed event hash does not match the stored hash.
    AuditHashMismatch,
    /// Event's `prevHash` does not match the predecessor's `hash`.
    AuditChainBroken,
    /// Detached signature failed to verify against the signer's public key.
    AuditSignatureInvalid,

    // -- Config --
    /// Configuration file or merged value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        use ErrorCategory as C;
        match self {
            Self::InvalidRequest | Self::UnknownImpact | Self::Uncanonicalizable => C::Validation,

            Self::MissingPrincipal => C::Unauthenticated,

            Self::RoleRequired | Self::UnauthorizedApprover => C::Forbidden,

            Self::PackageNotFound
            | Self::ManifestNotFound
            | Self::UpgradeNotFound
            | Self::EventNotFound
            | Self::PublishTaskNotFound => C::NotFound,

            Self::ManifestAlreadyApplied
            | Self::UpgradeAlreadyApplied
            | Self::ApproverAlreadySigned
            | Self::IdempotencyKeyConflict
            | Self::PublishTaskNotResubmittable
            | Self::DuplicateUpgrade => C::Conflict,

            Self::PackageNotValidated
            | Self::PreconditionsUnresolved
            | Self::SignatureMissing
            | Self::MultisigNotApplied => C::Preconditions,

            Self::InsufficientQuorum => C::InsufficientQuorum,

            Self::SignerUnavailable => C::SignerUnavailable,

            Self::PolicyDenied => C::PolicyDenied,

            Self::IdempotencyBodyTooLarge | Self::IdempotencyKeyRequired => C::Validation,

            Self::Canceled => C::Canceled,

            Self::AuditHashMismatch | Self::AuditChainBroken | Self::AuditSignatureInvalid => {
                C::Internal
            }

            Self::ConfigInvalid => C::Internal,

            Self::Internal => C::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"INSUFFICIENT_QUORUM"`), matching the `code` field of the canonical
    /// error envelope.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UnknownImpact => "UNKNOWN_IMPACT",
            Self::Uncanonicalizable => "UNCANONICALIZABLE",
            Self::MissingPrincipal => "MISSING_PRINCIPAL",
            Self::RoleRequired => "ROLE_REQUIRED",
            Self::UnauthorizedApprover => "UNAUTHORIZED_APPROVER",
            Self::PackageNotFound => "PACKAGE_NOT_FOUND",
            Self::ManifestNotFound => "MANIFEST_NOT_FOUND",
            Self::UpgradeNotFound => "UPGRADE_NOT_FOUND",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::PublishTaskNotFound => "PUBLISH_TASK_NOT_FOUND",
            Self::ManifestAlreadyApplied => "MANIFEST_ALREADY_APPLIED",
            Self::UpgradeAlreadyApplied => "UPGRADE_ALREADY_APPLIED",
            Self::ApproverAlreadySigned => "APPROVER_ALREADY_SIGNED",
            Self::IdempotencyKeyConflict => "IDEMPOTENCY_KEY_CONFLICT",
            Self::PublishTaskNotResubmittable => "PUBLISH_TASK_NOT_RESUBMITTABLE",
            Self::DuplicateUpgrade => "DUPLICATE_UPGRADE",
            Self::PackageNotValidated => "PACKAGE_NOT_VALIDATED",
            Self::PreconditionsUnresolved => "PRECONDITIONS_UNRESOLVED",
            Self::SignatureMissing => "SIGNATURE_MISSING",
            Self::MultisigNotApplied => "MULTISIG_NOT_APPLIED",
            Self::InsufficientQuorum => "INSUFFICIENT_QUORUM",
            Self::SignerUnavailable => "SIGNER_UNAVAILABLE",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::IdempotencyBodyTooLarge => "IDEMPOTENCY_BODY_TOO_LARGE",
            Self::IdempotencyKeyRequired => "IDEMPOTENCY_KEY_REQUIRED",
            Self::Canceled => "CANCELED",
            Self::AuditHashMismatch => "AUDIT_HASH_MISMATCH",
            Self::AuditChainBroken => "AUDIT_CHAIN_BROKEN",
            Self::AuditSignatureInvalid => "AUDIT_SIGNATURE_INVALID",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RokError
// ---------------------------------------------------------------------------

/// Unified kernel error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context (the
/// `{have, required, missing}` shape for quorum errors, for example).
///
/// # Examples
///
/// ```
/// use rok_error::{RokError, ErrorCode};
///
/// let err = RokError::new(ErrorCode::InsufficientQuorum, "quorum not met")
///     .with_context("have", 2)
///     .with_context("required", 3)
///     .with_context("missing", 1);
/// ```
pub struct RokError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics and the error envelope.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl RokError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for RokError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RokError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for RokError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RokError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Envelope DTO
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`RokError`] (without the opaque source),
/// matching the canonical `{code, message, details}` error envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ErrorEnvelope {
    /// Machine-stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context (`details` in the HTTP envelope).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl From<&RokError> for ErrorEnvelope {
    fn from(err: &RokError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            details: err.context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn basic_construction() {
        let err = RokError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_with_context() {
        let err = RokError::new(ErrorCode::InsufficientQuorum, "quorum not met")
            .with_context("have", 2)
            .with_context("required", 3);
        let s = err.to_string();
        assert!(s.starts_with("[INSUFFICIENT_QUORUM] quorum not met"));
        assert!(s.contains("\"have\":2"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = RokError::new(ErrorCode::Internal, "init failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn category_mapping_matches_error_handling_design() {
        assert_eq!(
            ErrorCode::InsufficientQuorum.category(),
            ErrorCategory::InsufficientQuorum
        );
        assert_eq!(
            ErrorCode::SignerUnavailable.category(),
            ErrorCategory::SignerUnavailable
        );
        assert_eq!(ErrorCode::PolicyDenied.category(), ErrorCategory::PolicyDenied);
        assert_eq!(
            ErrorCode::IdempotencyKeyConflict.category(),
            ErrorCategory::Conflict
        );
    }

    #[test]
    fn envelope_omits_empty_details() {
        let err = RokError::new(ErrorCode::PackageNotFound, "no such package");
        let env = ErrorEnvelope::from(&err);
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("details"));
    }

    #[test]
    fn envelope_round_trips_details() {
        let err = RokError::new(ErrorCode::InsufficientQuorum, "quorum not met")
            .with_context("have", 2)
            .with_context("required", 3)
            .with_context("missing", 1);
        let env = ErrorEnvelope::from(&err);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["details"]["have"], 2);
        assert_eq!(json["details"]["missing"], 1);
    }
}
