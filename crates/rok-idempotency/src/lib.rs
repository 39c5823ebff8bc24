// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Idempotency key store: request deduplication for state-changing routes."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rok_store::Store;
use serde::Serialize;
use thiserror::Error;

/// Errors from an idempotency check.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The same key was reused with a different request body.
    #[error("idempotency key reused with a different request body")]
    Conflict,
    /// The response to be stored exceeds the configured size cap.
    #[error("response body exceeds the configured idempotency size cap")]
    BodyTooLarge,
    /// A concurrent caller is still processing this key (reservation not
    /// yet completed and not stale).
    #[error("a request with this idempotency key is already in flight")]
    InFlight,
    /// The underlying store failed.
    #[error("idempotency store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<IdempotencyError> for rok_error::RokError {
    fn from(err: IdempotencyError) -> Self {
        use rok_error::ErrorCode;
        let code = match err {
            IdempotencyError::Conflict | IdempotencyError::InFlight => {
                ErrorCode::IdempotencyKeyConflict
            }
            IdempotencyError::BodyTooLarge => ErrorCode::IdempotencyBodyTooLarge,
            IdempotencyError::Store(_) => ErrorCode::Internal,
        };
        rok_error::RokError::new(code, err.to_string())
    }
}

/// What the caller should do after calling [`IdempotencyStore::begin`].
#[derive(Debug)]
pub enum Outcome {
    /// No prior record existed (or the prior reservation went stale); the
    /// caller should run the handler and call
    /// [`IdempotencyStore::complete`].
    Fresh,
    /// A completed response exists for this key with a matching request
    /// hash; replay it verbatim instead of running the handler.
    Replay {
        /// The stored HTTP status.
        status: u16,
        /// The stored response body.
        body: Vec<u8>,
    },
}

/// Row-locked `(method, path, key)` idempotency store with TTL and a
/// response-size cap, backed by [`rok_store::Store`].
pub struct IdempotencyStore {
    store: Store,
    ttl: ChronoDuration,
    body_size_cap: usize,
    reservation_lease: ChronoDuration,
}

impl IdempotencyStore {
    /// Construct a store with the given TTL (how long a completed record is
    /// retained), response body size cap, and in-flight reservation lease
    /// (how long before a reservation with no completion is considered
    /// abandoned and reclaimable).
    #[must_use]
    pub fn new(
        store: Store,
        ttl: ChronoDuration,
        body_size_cap: usize,
        reservation_lease: ChronoDuration,
    ) -> Self {
        Self {
            store,
            ttl,
            body_size_cap,
            reservation_lease,
        }
    }

    /// Compute the canonical request hash for `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be canonicalized (see
    /// [`rok_canon::content_hash`]).
    pub fn request_hash<T: Serialize>(body: &T) -> Result<String, rok_canon::CanonError> {
        rok_canon::content_hash(body)
    }

    /// Begin processing a request under `(method, path, key)` whose body
    /// hashes to `request_hash`.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::Conflict`] if the key was already used with a
    ///   different request hash.
    /// - [`IdempotencyError::InFlight`] if another caller's reservation for
    ///   this key has not yet completed or gone stale.
    /// - [`IdempotencyError::Store`] on a driver error.
    pub async fn begin(
        &self,
        method: &str,
        path: &str,
        key: &str,
        request_hash: &str,
    ) -> Result<Outcome, IdempotencyError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let inserted = sqlx::query(
            "INSERT INTO idempotency_records (method, path, key, request_hash, reserved_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (method, path, key) DO NOTHING",
        )
        .bind(method)
        .bind(path)
        .bind(key)
        .bind(request_hash)
        .bind(now)
        .bind(expires_at)
        .execute(self.store.pool())
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Outcome::Fresh);
        }

        let row: (String, Option<i16>, Option<Vec<u8>>, DateTime<Utc>) = sqlx::query_as(
            "SELECT request_hash, response_status, response_body, reserved_at \
             FROM idempotency_records WHERE method = $1 AND path = $2 AND key = $3",
        )
        .bind(method)
        .bind(path)
        .bind(key)
        .fetch_one(self.store.pool())
        .await?;

        let (stored_hash, status, body, reserved_at) = row;
        if stored_hash != request_hash {
            return Err(IdempotencyError::Conflict);
        }

        match (status, body) {
            (Some(status), Some(body)) => Ok(Outcome::Replay {
                status: status as u16,
                body,
            }),
            _ if now - reserved_at > self.reservation_lease => {
                sqlx::query(
                    "UPDATE idempotency_records SET reserved_at = $1 \
                     WHERE method = $2 AND path = $3 AND key = $4",
                )
                .bind(now)
                .bind(method)
                .bind(path)
                .bind(key)
                .execute(self.store.pool())
                .await?;
                Ok(Outcome::Fresh)
            }
            _ => Err(IdempotencyError::InFlight),
        }
    }

    /// Complete a reservation with the handler's response, subject to the
    /// configured body size cap.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::BodyTooLarge`] if `body` exceeds the cap.
    /// - [`IdempotencyError::Store`] on a driver error.
    pub async fn complete(
        &self,
        method: &str,
        path: &str,
        key: &str,
        status: u16,
        body: &[u8],
    ) -> Result<(), IdempotencyError> {
        if body.len() > self.body_size_cap {
            return Err(IdempotencyError::BodyTooLarge);
        }
        sqlx::query(
            "UPDATE idempotency_records SET response_status = $1, response_body = $2, completed_at = now() \
             WHERE method = $3 AND path = $4 AND key = $5",
        )
        .bind(status as i16)
        .bind(body)
        .bind(method)
        .bind(path)
        .bind(key)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Delete idempotency records past their `expires_at`. Called by the
    /// idempotency-sweep background driver.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Store`] on a driver error.
    pub async fn sweep_expired(&self) -> Result<u64, IdempotencyError> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at < now()")
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_hash_is_stable_for_equal_bodies() {
        let a = IdempotencyStore::request_hash(&serde_json::json!({"x": 1})).unwrap();
        let b = IdempotencyStore::request_hash(&serde_json::json!({"x": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn request_hash_differs_for_different_bodies() {
        let a = IdempotencyStore::request_hash(&serde_json::json!({"x": 1})).unwrap();
        let b = IdempotencyStore::request_hash(&serde_json::json!({"x": 2})).unwrap();
        assert_ne!(a, b);
    }
}
