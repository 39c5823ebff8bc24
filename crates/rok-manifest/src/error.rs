// SPDX-License-Identifier: MIT OR Apache-2.0
use rok_audit::AuditError;
use rok_canon::CanonError;
use rok_core::UnknownImpact;
use rok_signing::SigningError;
use thiserror::Error;

/// Errors from package ingest and manifest lifecycle operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// No package or manifest exists with the given id.
    #[error("no such package or manifest")]
    NotFound,
    /// The manifest is not in the status a transition requires.
    #[error("manifest is not in the expected status for this transition")]
    Conflict,
    /// The package has not reached `validated`.
    #[error("package has not passed validation")]
    Preconditions,
    /// `impact` did not parse to one of the four fixed levels.
    #[error("unknown impact level: {0}")]
    UnknownImpact(#[from] UnknownImpact),
    /// `ApplyManifest` was attempted before the manifest was signed.
    #[error("manifest has not been signed")]
    SignatureMissing,
    /// A high-impact manifest was applied before its upgrade reached quorum.
    #[error("manifest requires multisig approval before it may apply")]
    MultisigNotApplied,
    /// One or more preconditions are still unresolved.
    #[error("manifest preconditions are not all resolved")]
    PreconditionsUnresolved,
    /// The `publish.pre_apply` policy gate denied the apply.
    #[error("policy denied apply: {0}")]
    PolicyDenied(String),
    /// The signer could not be reached or returned an unverifiable signature.
    #[error("signer unavailable: {0}")]
    SignerUnavailable(#[from] SigningError),
    /// A payload could not be canonicalized for signing.
    #[error("cannot canonicalize manifest for signing: {0}")]
    Canon(#[from] CanonError),
    /// An audit event could not be appended.
    #[error("audit append failed: {0}")]
    Audit(#[from] AuditError),
    /// The underlying store failed.
    #[error("manifest store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<ManifestError> for rok_error::RokError {
    fn from(err: ManifestError) -> Self {
        use rok_error::ErrorCode;
        let code = match &err {
            ManifestError::NotFound => ErrorCode::ManifestNotFound,
            ManifestError::Conflict => ErrorCode::ManifestAlreadyApplied,
            ManifestError::Preconditions => ErrorCode::PackageNotValidated,
            ManifestError::PreconditionsUnresolved => ErrorCode::PreconditionsUnresolved,
            ManifestError::UnknownImpact(_) => ErrorCode::UnknownImpact,
            ManifestError::SignatureMissing => ErrorCode::SignatureMissing,
            ManifestError::MultisigNotApplied => ErrorCode::MultisigNotApplied,
            ManifestError::PolicyDenied(_) => ErrorCode::PolicyDenied,
            ManifestError::SignerUnavailable(_) => ErrorCode::SignerUnavailable,
            ManifestError::Canon(_) | ManifestError::Audit(_) | ManifestError::Store(_) => {
                ErrorCode::Internal
            }
        };
        rok_error::RokError::new(code, err.to_string())
    }
}
