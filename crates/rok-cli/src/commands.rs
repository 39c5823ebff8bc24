// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library-level command implementations, kept separate from argument
//! parsing so they can be exercised directly in tests.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use rok_audit::{AuditChain, ExportSummary};
use rok_core::PublishTaskId;
use rok_publisher::PublishDriver;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// Parse an RFC 3339 timestamp from a CLI flag.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("'{s}' is not a valid RFC 3339 timestamp"))
}

/// Construct an [`ObjectStore`] from a URI such as `file:///tmp/exports`,
/// `s3://bucket/prefix`, or `memory://`. Any path component left over after
/// the scheme-specific root is applied as a key prefix.
///
/// # Errors
///
/// Returns an error if `uri` cannot be parsed or no store recognizes its
/// scheme.
pub fn build_object_store(uri: &str) -> Result<Arc<dyn ObjectStore>> {
    let url = Url::parse(uri).with_context(|| format!("'{uri}' is not a valid URI"))?;
    let (store, prefix) =
        object_store::parse_url(&url).with_context(|| format!("no object store backs '{uri}'"))?;
    if prefix == ObjectPath::default() {
        Ok(Arc::from(store))
    } else {
        Ok(Arc::new(PrefixStore::new(store, prefix)))
    }
}

/// Outcome of `verify-chain`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyChainReport {
    /// Start of the verified window.
    pub from: DateTime<Utc>,
    /// End of the verified window.
    pub to: DateTime<Utc>,
    /// How many events were checked.
    pub events_checked: usize,
    /// Whether every event verified.
    pub ok: bool,
    /// The first event id that failed to verify, if any.
    pub broken_at: Option<Uuid>,
}

/// Fetch `[from, to)` and verify hash integrity, chain linkage, and
/// signatures across the whole window.
///
/// # Errors
///
/// Propagates [`rok_audit::AuditError`] from fetching or verifying.
pub async fn verify_chain(
    chain: &AuditChain,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<VerifyChainReport> {
    let events = chain.range(from, to).await?;
    let result = chain.verify(&events).await?;
    Ok(VerifyChainReport {
        from,
        to,
        events_checked: events.len(),
        ok: result.ok,
        broken_at: result.broken_at.map(|id| id.as_uuid()),
    })
}

/// Export `[from, to)` as a single ad hoc batch, outside the daemon's
/// regular export schedule.
///
/// # Errors
///
/// Propagates [`rok_audit::AuditError`] from reading the range or writing
/// the batch.
pub async fn export_batch(
    chain: &AuditChain,
    object_store: Arc<dyn ObjectStore>,
    service_name: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    batch_number: u32,
) -> Result<ExportSummary> {
    Ok(rok_audit::export_range(chain, object_store, service_name, to, from, to, batch_number).await?)
}

/// Outcome of `replay`: the last event type observed for every manifest,
/// package, and upgrade touched in the window, in order of appearance.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReplaySummary {
    /// Number of events folded into this summary.
    pub events_replayed: usize,
    /// `packageId -> most recent event type`.
    pub packages: BTreeMap<String, String>,
    /// `manifestId -> most recent event type`.
    pub manifests: BTreeMap<String, String>,
    /// `upgradeId -> most recent event type`.
    pub upgrades: BTreeMap<String, String>,
}

/// Fold every event in `[from, to)` into the latest state touched per
/// entity. This does not replay side effects against a live store — it
/// reconstructs a read-only picture of "what happened last" for an
/// operator auditing history, independent of current database state.
///
/// # Errors
///
/// Propagates [`rok_audit::AuditError`] from fetching the range.
pub async fn replay(chain: &AuditChain, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<ReplaySummary> {
    let events = chain.range(from, to).await?;
    let mut summary = ReplaySummary {
        events_replayed: events.len(),
        ..Default::default()
    };
    for event in &events {
        if let Some(id) = event.payload.get("packageId").and_then(|v| v.as_str()) {
            summary.packages.insert(id.to_string(), event.event_type.clone());
        }
        if let Some(id) = event.payload.get("manifestId").and_then(|v| v.as_str()) {
            summary.manifests.insert(id.to_string(), event.event_type.clone());
        }
        if let Some(id) = event.payload.get("upgradeId").and_then(|v| v.as_str()) {
            summary.upgrades.insert(id.to_string(), event.event_type.clone());
        }
    }
    Ok(summary)
}

/// Reset a `failed_fatal` publish task back to `pending` for retry.
///
/// # Errors
///
/// Propagates [`rok_publisher::PublisherError`] if the task does not exist
/// or is not currently `failed_fatal`.
pub async fn resubmit_publish_task(publisher: &PublishDriver, task_id: Uuid) -> Result<()> {
    publisher.resubmit(PublishTaskId::from_uuid(task_id)).await?;
    Ok(())
}

/// Parse a `task-id` CLI argument into a [`Uuid`], with a usage-shaped error
/// message rather than the raw parse failure.
pub fn parse_task_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| {
        let _ = s;
        anyhow::anyhow!("'{s}' is not a valid task id")
    })
}

/// Guard against an inverted `--from`/`--to` window before issuing any
/// queries.
pub fn require_ordered_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
    if from >= to {
        bail!("--from must be strictly before --to");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_rfc3339() {
        let parsed = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("not-a-timestamp").is_err());
    }

    #[test]
    fn require_ordered_window_rejects_inverted_range() {
        let from = parse_timestamp("2026-01-02T00:00:00Z").unwrap();
        let to = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        assert!(require_ordered_window(from, to).is_err());
    }

    #[test]
    fn require_ordered_window_accepts_forward_range() {
        let from = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        let to = parse_timestamp("2026-01-02T00:00:00Z").unwrap();
        assert!(require_ordered_window(from, to).is_ok());
    }

    #[test]
    fn parse_task_id_rejects_non_uuid() {
        assert!(parse_task_id("not-a-uuid").is_err());
    }

    #[test]
    fn build_object_store_accepts_a_file_uri() {
        let dir = std::env::temp_dir();
        let uri = format!("file://{}", dir.display());
        assert!(build_object_store(&uri).is_ok());
    }

    #[test]
    fn build_object_store_accepts_memory_uri() {
        assert!(build_object_store("memory:///").is_ok());
    }

    #[test]
    fn replay_tracks_the_latest_event_per_manifest() {
        use rok_audit::AuditEvent;
        use rok_core::EventId;

        let events = vec![
            AuditEvent {
                event_id: EventId::new(),
                event_type: "manifest.update".into(),
                payload: serde_json::json!({"manifestId": "m1", "status": "failed"}),
                prev_hash: "0".repeat(64),
                hash: "a".repeat(64),
                signature: vec![],
                signer_kid: "cli-verifier".into(),
                ts: Utc::now(),
                metadata: serde_json::json!({}),
            },
            AuditEvent {
                event_id: EventId::new(),
                event_type: "manifest.applied".into(),
                payload: serde_json::json!({"manifestId": "m1"}),
                prev_hash: "a".repeat(64),
                hash: "b".repeat(64),
                signature: vec![],
                signer_kid: "cli-verifier".into(),
                ts: Utc::now(),
                metadata: serde_json::json!({}),
            },
        ];
        let mut summary = ReplaySummary::default();
        summary.events_replayed = events.len();
        for event in &events {
            if let Some(id) = event.payload.get("manifestId").and_then(|v| v.as_str()) {
                summary.manifests.insert(id.to_string(), event.event_type.clone());
            }
        }
        assert_eq!(summary.manifests.get("m1"), Some(&"manifest.applied".to_string()));
    }
}
