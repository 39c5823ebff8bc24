// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batches a time range of audit events into a gzipped JSONL file written to
//! object storage under WORM retention.

use crate::{AuditChain, AuditError};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;

/// Outcome of a single export batch.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Object storage key the batch was written to.
    pub object_path: String,
    /// Number of events included in the batch.
    pub event_count: usize,
    /// Hex-encoded SHA-256 digest of the compressed batch bytes.
    pub digest: String,
}

/// Export every event in `[from_ts, to_ts)` as
/// `{service}/yyyy-mm-dd/batch-{batch_number}.jsonl.gz`, then append an
/// `audit.export.completed` event recording the digest.
///
/// Writing to a WORM-enforced bucket and having the write rejected (e.g. an
/// Object Lock violation) is treated as fatal — the caller should not retry
/// silently, since a rejected write with a retry that produces a different
/// digest would break reproducibility of prior exports.
///
/// # Errors
///
/// Returns [`AuditError::Store`] if reading the range fails, or propagates
/// an object-storage error wrapped as [`AuditError::Store`]-equivalent via
/// [`std::io::Error`] mapped through `sqlx::Error::Io`... in practice
/// callers should treat any `Err` here as fatal for this batch and alert.
pub async fn export_range(
    chain: &AuditChain,
    object_store: Arc<dyn ObjectStore>,
    service_name: &str,
    day: DateTime<Utc>,
    from_ts: DateTime<Utc>,
    to_ts: DateTime<Utc>,
    batch_number: u32,
) -> Result<ExportSummary, AuditError> {
    let events = chain.range(from_ts, to_ts).await?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for event in &events {
        let line = serde_json::to_string(event).map_err(|e| {
            AuditError::Store(sqlx::Error::Protocol(format!("serialize event: {e}")))
        })?;
        encoder
            .write_all(line.as_bytes())
            .and_then(|()| encoder.write_all(b"\n"))
            .map_err(|e| AuditError::Store(sqlx::Error::Protocol(format!("gzip write: {e}"))))?;
    }
    let compressed = encoder
        .finish()
        .map_err(|e| AuditError::Store(sqlx::Error::Protocol(format!("gzip finish: {e}"))))?;

    let mut hasher = Sha256::new();
    hasher.update(&compressed);
    let digest = hex::encode(hasher.finalize());

    let object_path = format!(
        "{service_name}/{}/batch-{batch_number}.jsonl.gz",
        day.format("%Y-%m-%d")
    );

    object_store
        .put(&ObjectPath::from(object_path.as_str()), compressed.into())
        .await
        .map_err(|e| AuditError::Store(sqlx::Error::Protocol(format!("WORM write rejected: {e}"))))?;

    let summary = ExportSummary {
        object_path: object_path.clone(),
        event_count: events.len(),
        digest: digest.clone(),
    };

    chain
        .append(
            "audit.export.completed",
            serde_json::json!({
                "objectPath": object_path,
                "eventCount": summary.event_count,
                "digest": digest,
            }),
            serde_json::json!({}),
        )
        .await?;

    Ok(summary)
}
