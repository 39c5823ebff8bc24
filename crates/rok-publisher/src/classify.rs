// SPDX-License-Identifier: MIT OR Apache-2.0
//! Classifies a publish attempt's result as success, retryable, or fatal.

/// How a single publish attempt's result should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The target accepted the manifest; carries an opaque proof reference.
    Success(String),
    /// A transient failure (5xx, network error, timeout) — reschedule.
    Retryable(String),
    /// A terminal failure (4xx other than 401/403, signed manifest
    /// rejected) — no amount of retrying will help.
    Fatal(String),
}

/// Classify an HTTP response from a publish target collaborator.
#[must_use]
pub fn classify_http_status(status: u16, proof_ref: Option<String>, body_excerpt: &str) -> Classification {
    match status {
        200..=299 => Classification::Success(proof_ref.unwrap_or_default()),
        401 | 403 => Classification::Retryable(format!("auth rejected ({status}): {body_excerpt}")),
        400..=499 => Classification::Fatal(format!("rejected ({status}): {body_excerpt}")),
        500..=599 => Classification::Retryable(format!("server error ({status}): {body_excerpt}")),
        other => Classification::Retryable(format!("unexpected status {other}: {body_excerpt}")),
    }
}

/// Classify a transport-level failure (connection refused, timeout, DNS).
/// Always retryable — the target may simply be unreachable right now.
#[must_use]
pub fn classify_transport_error(message: impl Into<String>) -> Classification {
    Classification::Retryable(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_carries_proof_ref() {
        let c = classify_http_status(201, Some("commit-abc123".into()), "");
        assert_eq!(c, Classification::Success("commit-abc123".into()));
    }

    #[test]
    fn client_errors_other_than_auth_are_fatal() {
        assert!(matches!(
            classify_http_status(422, None, "invalid manifest"),
            Classification::Fatal(_)
        ));
    }

    #[test]
    fn auth_errors_are_retryable_not_fatal() {
        assert!(matches!(
            classify_http_status(401, None, "token expired"),
            Classification::Retryable(_)
        ));
        assert!(matches!(
            classify_http_status(403, None, "forbidden"),
            Classification::Retryable(_)
        ));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(matches!(
            classify_http_status(503, None, "unavailable"),
            Classification::Retryable(_)
        ));
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(matches!(
            classify_transport_error("connection refused"),
            Classification::Retryable(_)
        ));
    }
}
