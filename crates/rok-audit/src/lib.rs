// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Hash-chained, signed audit trail: the kernel's single source of truth for history."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod export;
mod sampling;

pub use export::{export_range, ExportSummary};
pub use sampling::SamplingPolicy;

use chrono::{DateTime, Utc};
use rok_canon::CanonError;
use rok_core::EventId;
use rok_signing::{Algorithm, SigningError, SigningGateway};
use rok_store::Store;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// An appended, hash-chained, signed record of something the kernel did.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique id for this event.
    pub event_id: EventId,
    /// Enumerated event type, e.g. `"manifest.signed"`.
    pub event_type: String,
    /// The canonicalizable payload (hashed and signed, but not itself the
    /// hash input encoding — `canonical(payload)` is).
    pub payload: serde_json::Value,
    /// Hex-encoded hash of the predecessor event (64 zero chars for head).
    pub prev_hash: String,
    /// Hex-encoded `H(canonical(payload) || prevHashBytes)`.
    pub hash: String,
    /// Detached signature over `hash`, verifiable under `signer_kid`.
    pub signature: Vec<u8>,
    /// Which signer key produced `signature`.
    pub signer_kid: String,
    /// When this event was appended.
    pub ts: DateTime<Utc>,
    /// Opaque additional metadata.
    pub metadata: serde_json::Value,
}

/// Errors from audit chain operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The payload could not be canonicalized.
    #[error("cannot canonicalize audit payload: {0}")]
    Canon(#[from] CanonError),
    /// The signer could not be reached.
    #[error("signer unavailable: {0}")]
    SignerUnavailable(#[from] SigningError),
    /// A stored event's hash does not match its recomputed hash.
    #[error("hash mismatch at event {event_id}")]
    HashMismatch {
        /// The event whose stored hash did not verify.
        event_id: EventId,
    },
    /// A stored event's `prevHash` does not match its predecessor's `hash`.
    #[error("broken link at event {event_id}")]
    ChainBroken {
        /// The event whose `prevHash` does not match the predecessor.
        event_id: EventId,
    },
    /// The underlying store failed.
    #[error("audit store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<AuditError> for rok_error::RokError {
    fn from(err: AuditError) -> Self {
        use rok_error::ErrorCode;
        let code = match err {
            AuditError::SignerUnavailable(_) => ErrorCode::SignerUnavailable,
            AuditError::HashMismatch { .. } => ErrorCode::AuditHashMismatch,
            AuditError::ChainBroken { .. } => ErrorCode::AuditChainBroken,
            AuditError::Canon(_) | AuditError::Store(_) => ErrorCode::Internal,
        };
        rok_error::RokError::new(code, err.to_string())
    }
}

/// Result of [`AuditChain::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    /// Whether every event in the slice verified.
    pub ok: bool,
    /// The id of the first event that failed verification, if any.
    pub broken_at: Option<EventId>,
}

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A Postgres-backed, totally-ordered, hash-chained audit trail.
///
/// Concurrent [`AuditChain::append`] calls are serialized under a Postgres
/// advisory lock scoped to the chain, so no two callers ever read the same
/// head hash.
pub struct AuditChain {
    store: Store,
    signer: Arc<dyn SigningGateway>,
    signer_kid: String,
    algorithm: Algorithm,
    sampling: SamplingPolicy,
    advisory_lock_key: i64,
}

impl AuditChain {
    /// Construct a chain backed by `store`, signing new events with
    /// `signer_kid` under `algorithm` via `signer`.
    #[must_use]
    pub fn new(
        store: Store,
        signer: Arc<dyn SigningGateway>,
        signer_kid: impl Into<String>,
        algorithm: Algorithm,
        sampling: SamplingPolicy,
    ) -> Self {
        Self {
            store,
            signer,
            signer_kid: signer_kid.into(),
            algorithm,
            sampling,
            // Stable, arbitrary key identifying "the audit chain head" lock
            // domain; there is exactly one chain per deployment.
            advisory_lock_key: 0x726352,
        }
    }

    /// Append a new event to the chain, unless `event_type` is subject to
    /// sampling and this occurrence is sampled out, in which case `Ok(None)`
    /// is returned and nothing is persisted.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Canon`] if `payload` cannot be canonicalized.
    /// - [`AuditError::SignerUnavailable`] if the signer cannot be reached —
    ///   the caller fails closed; no row is written.
    /// - [`AuditError::Store`] on a driver error.
    pub async fn append(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Result<Option<AuditEvent>, AuditError> {
        if self.sampling.is_sampled_out(event_type) {
            return Ok(None);
        }

        let canonical = rok_canon::canonical_bytes(&payload)?;

        let mut conn = self.store.pool().acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(self.advisory_lock_key)
            .execute(&mut *conn)
            .await?;

        let result: Result<AuditEvent, AuditError> = async {
            let (prev_hash,): (String,) =
                sqlx::query_as("SELECT hash FROM audit_chain_head")
                    .fetch_one(&mut *conn)
                    .await?;

            let mut hasher = Sha256::new();
            hasher.update(&canonical);
            hasher.update(prev_hash.as_bytes());
            let hash = hex::encode(hasher.finalize());

            let signature = self
                .signer
                .sign(&self.signer_kid, hash.as_bytes(), self.algorithm)
                .await?;

            let event = AuditEvent {
                event_id: EventId::new(),
                event_type: event_type.to_string(),
                payload,
                prev_hash: prev_hash.clone(),
                hash: hash.clone(),
                signature,
                signer_kid: self.signer_kid.clone(),
                ts: Utc::now(),
                metadata,
            };

            sqlx::query(
                "INSERT INTO audit_events \
                 (id, event_type, payload, prev_hash, hash, signature, signer_kid, ts, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&event.prev_hash)
            .bind(&event.hash)
            .bind(&event.signature)
            .bind(&event.signer_kid)
            .bind(event.ts)
            .bind(&event.metadata)
            .execute(&mut *conn)
            .await?;

            sqlx::query("UPDATE audit_chain_head SET hash = $1")
                .bind(&event.hash)
                .execute(&mut *conn)
                .await?;

            Ok(event)
        }
        .await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.advisory_lock_key)
            .execute(&mut *conn)
            .await
            .ok();

        result.map(Some)
    }

    /// Fetch a single event by id.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Store`] on a driver error.
    pub async fn get_by_id(&self, event_id: EventId) -> Result<Option<AuditEvent>, AuditError> {
        let row = sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, event_type, payload, prev_hash, hash, signature, signer_kid, ts, metadata \
             FROM audit_events WHERE id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    /// Fetch every event with `ts` in `[from_ts, to_ts)`, ordered by
    /// insertion (`seq`).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Store`] on a driver error.
    pub async fn range(
        &self,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, event_type, payload, prev_hash, hash, signature, signer_kid, ts, metadata \
             FROM audit_events WHERE ts >= $1 AND ts < $2 ORDER BY seq ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Fetch every event whose payload carries `manifestId == manifest_id`,
    /// ordered by insertion. Backs `GET /manifests/{id}/status`'s `history`
    /// field.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Store`] on a driver error.
    pub async fn events_by_manifest(
        &self,
        manifest_id: rok_core::ManifestId,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            "SELECT id, event_type, payload, prev_hash, hash, signature, signer_kid, ts, metadata \
             FROM audit_events WHERE payload->>'manifestId' = $1 ORDER BY seq ASC",
        )
        .bind(manifest_id.to_string())
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Verify hash integrity, chain linkage, and signatures for `events`,
    /// which MUST already be in insertion order (as returned by
    /// [`AuditChain::range`]).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::SignerUnavailable`] if a `signerKid`'s public
    /// key cannot be resolved.
    pub async fn verify(&self, events: &[AuditEvent]) -> Result<VerifyResult, AuditError> {
        for (i, event) in events.iter().enumerate() {
            let mut hasher = Sha256::new();
            let canonical = rok_canon::canonical_bytes(&event.payload)?;
            hasher.update(&canonical);
            hasher.update(event.prev_hash.as_bytes());
            let recomputed = hex::encode(hasher.finalize());
            if recomputed != event.hash {
                return Ok(VerifyResult {
                    ok: false,
                    broken_at: Some(event.event_id),
                });
            }

            if i == 0 {
                if event.prev_hash != GENESIS_HASH {
                    return Ok(VerifyResult {
                        ok: false,
                        broken_at: Some(event.event_id),
                    });
                }
            } else if event.prev_hash != events[i - 1].hash {
                return Ok(VerifyResult {
                    ok: false,
                    broken_at: Some(event.event_id),
                });
            }

            let public_key = self.signer.public_key(&event.signer_kid).await?;
            let verified = rok_signing::verify_detached(
                self.algorithm,
                &public_key,
                event.hash.as_bytes(),
                &event.signature,
            )
            .map_err(SigningError::from)?;
            if !verified {
                return Ok(VerifyResult {
                    ok: false,
                    broken_at: Some(event.event_id),
                });
            }
        }
        Ok(VerifyResult {
            ok: true,
            broken_at: None,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: uuid::Uuid,
    event_type: String,
    payload: serde_json::Value,
    prev_hash: String,
    hash: String,
    signature: Vec<u8>,
    signer_kid: String,
    ts: DateTime<Utc>,
    metadata: serde_json::Value,
}

impl From<AuditEventRow> for AuditEvent {
    fn from(row: AuditEventRow) -> Self {
        Self {
            event_id: EventId::from_uuid(row.id),
            event_type: row.event_type,
            payload: row.payload,
            prev_hash: row.prev_hash,
            hash: row.hash,
            signature: row.signature,
            signer_kid: row.signer_kid,
            ts: row.ts,
            metadata: row.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_result_equality() {
        let a = VerifyResult {
            ok: true,
            broken_at: None,
        };
        let b = VerifyResult {
            ok: true,
            broken_at: None,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn genesis_hash_is_all_zero_hex_of_sha256_length() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }
}
