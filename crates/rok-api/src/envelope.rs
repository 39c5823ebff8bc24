// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical `{ok: true, ...}` / `{ok: false, error: {...}}` response
//! envelope shared by every route.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rok_error::{ErrorCategory, ErrorEnvelope, RokError};
use serde::Serialize;
use serde_json::json;

/// A successful or failed API response, rendered as the canonical envelope.
pub enum Envelope<T> {
    /// `{ok: true, ...}` merged with the serialized `T`.
    Ok(StatusCode, T),
    /// `{ok: false, error: {...}}`.
    Err(RokError),
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(status, body) => {
                let mut value = serde_json::to_value(&body).unwrap_or_else(|_| json!({}));
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("ok".into(), json!(true));
                } else {
                    value = json!({"ok": true, "value": value});
                }
                (status, Json(value)).into_response()
            }
            Self::Err(err) => {
                let status = category_to_status(err.category());
                let body = json!({"ok": false, "error": ErrorEnvelope::from(&err)});
                (status, Json(body)).into_response()
            }
        }
    }
}

impl<T> From<RokError> for Envelope<T> {
    fn from(err: RokError) -> Self {
        Self::Err(err)
    }
}

/// Render `{ok: true, ...}` to raw bytes, for routes that must persist the
/// exact response an idempotency replay will later serve.
pub fn ok_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let mut body = serde_json::to_value(value).unwrap_or_else(|_| json!({}));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("ok".into(), json!(true));
    } else {
        body = json!({"ok": true, "value": body});
    }
    serde_json::to_vec(&body).unwrap_or_default()
}

/// Render `{ok: false, error: {...}}` to a status and raw bytes, for routes
/// that must persist the exact response an idempotency replay will later
/// serve.
pub fn err_bytes(err: &RokError) -> (StatusCode, Vec<u8>) {
    let status = category_to_status(err.category());
    let body = json!({"ok": false, "error": ErrorEnvelope::from(err)});
    (status, serde_json::to_vec(&body).unwrap_or_default())
}

fn category_to_status(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCategory::Forbidden | ErrorCategory::PolicyDenied => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Preconditions => StatusCode::PRECONDITION_FAILED,
        ErrorCategory::InsufficientQuorum => StatusCode::BAD_REQUEST,
        ErrorCategory::SignerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Canceled => StatusCode::REQUEST_TIMEOUT,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rok_error::ErrorCode;

    #[test]
    fn insufficient_quorum_maps_to_bad_request() {
        let err = RokError::new(ErrorCode::InsufficientQuorum, "not enough approvals");
        assert_eq!(category_to_status(err.category()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn signer_unavailable_maps_to_service_unavailable() {
        let err = RokError::new(ErrorCode::SignerUnavailable, "unreachable");
        assert_eq!(
            category_to_status(err.category()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
