// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background drivers that tie the manifest, multisig, and publisher
//! components together.
//!
//! None of `rok-manifest`, `rok-multisig`, or `rok-publisher` depend on one
//! another, so the cross-component notifications the workflow requires
//! (publish completion advancing a manifest, an expired emergency apply
//! rolling one back) are wired up here instead.

use chrono::Utc;
use object_store::ObjectStore;
use rok_audit::AuditChain;
use rok_manifest::{ManifestEngine, ValidationCollaborator};
use rok_multisig::MultisigCoordinator;
use rok_publisher::PublishDriver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often each driver loop wakes to check for work.
#[derive(Debug, Clone)]
pub struct SchedulerIntervals {
    /// Interval between publish-retry poll sweeps.
    pub publish_poll: Duration,
    /// Interval between validation-poll sweeps.
    pub validation_poll: Duration,
    /// Interval between audit-export batch windows.
    pub audit_export: Duration,
    /// Interval between emergency-ratification expiry sweeps.
    pub emergency_sweep: Duration,
    /// Interval between idempotency-record expiry sweeps.
    pub idempotency_sweep: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            publish_poll: Duration::from_secs(5),
            validation_poll: Duration::from_secs(15),
            audit_export: Duration::from_secs(3600),
            emergency_sweep: Duration::from_secs(60),
            idempotency_sweep: Duration::from_secs(300),
        }
    }
}

/// Owns the set of background drivers and their shutdown signal.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn every driver task. Call [`Scheduler::shutdown`] to stop them.
    ///
    /// `validator` backs the validation-poll driver; `audit`/`object_store`/
    /// `export_service_name` back the audit-export driver.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        manifest: Arc<ManifestEngine>,
        multisig: Arc<MultisigCoordinator>,
        publisher: Arc<PublishDriver>,
        idempotency: Arc<rok_idempotency::IdempotencyStore>,
        validator: Arc<dyn ValidationCollaborator>,
        audit: Arc<AuditChain>,
        object_store: Arc<dyn ObjectStore>,
        export_service_name: String,
        intervals: SchedulerIntervals,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        handles.push(tokio::spawn(publish_retry_loop(
            publisher,
            manifest.clone(),
            intervals.publish_poll,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(validation_poll_loop(
            manifest.clone(),
            validator,
            intervals.validation_poll,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(audit_export_loop(
            audit,
            object_store,
            export_service_name,
            intervals.audit_export,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(emergency_ratification_loop(
            multisig,
            manifest,
            intervals.emergency_sweep,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(idempotency_sweep_loop(
            idempotency,
            intervals.idempotency_sweep,
            shutdown_rx,
        )));

        Self { shutdown_tx, handles }
    }

    /// Signal every driver to stop and wait for them to finish their
    /// current iteration.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(%err, "scheduler task panicked during shutdown");
            }
        }
    }
}

async fn publish_retry_loop(
    publisher: Arc<PublishDriver>,
    manifest: Arc<ManifestEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("publish-retry driver stopping");
                    return;
                }
            }
        }

        match publisher.poll_and_run_once(50).await {
            Ok(result) => {
                for manifest_id in result.succeeded {
                    if let Err(err) = manifest
                        .advance_publish_state(
                            manifest_id,
                            rok_manifest::ManifestStatus::Publishing,
                            rok_manifest::ManifestStatus::Published,
                        )
                        .await
                    {
                        warn!(%manifest_id, %err, "failed to advance manifest to published");
                    }
                }
                for manifest_id in result.failed {
                    if let Err(err) = manifest
                        .mark_failed(manifest_id, "publish task exhausted retries or hit a fatal collaborator error")
                        .await
                    {
                        warn!(%manifest_id, %err, "failed to mark manifest failed after publish exhaustion");
                    }
                }
            }
            Err(err) => error!(%err, "publish-retry poll failed"),
        }
    }
}

async fn validation_poll_loop(
    manifest: Arc<ManifestEngine>,
    validator: Arc<dyn ValidationCollaborator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("validation-poll driver stopping");
                    return;
                }
            }
        }

        match manifest.poll_validations(validator.as_ref(), 50).await {
            Ok(recorded) if recorded > 0 => info!(recorded, "recorded validation outcomes"),
            Ok(_) => {}
            Err(err) => error!(%err, "validation-poll sweep failed"),
        }
    }
}

/// Exports every audit event appended since the previous sweep into a new
/// gzipped batch. `next_from` advances only on a successful write, so a
/// transient object-storage failure retries the same window next tick
/// instead of silently dropping events from the export history.
async fn audit_export_loop(
    audit: Arc<AuditChain>,
    object_store: Arc<dyn ObjectStore>,
    service_name: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut next_from = Utc::now();
    let mut batch_number: u32 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("audit-export driver stopping");
                    return;
                }
            }
        }

        let to = Utc::now();
        match rok_audit::export_range(
            &audit,
            object_store.clone(),
            &service_name,
            to,
            next_from,
            to,
            batch_number,
        )
        .await
        {
            Ok(summary) => {
                info!(
                    object_path = %summary.object_path,
                    event_count = summary.event_count,
                    "exported audit batch"
                );
                next_from = to;
                batch_number += 1;
            }
            Err(err) => error!(%err, "audit-export batch failed"),
        }
    }
}

async fn emergency_ratification_loop(
    multisig: Arc<MultisigCoordinator>,
    manifest: Arc<ManifestEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("emergency-ratification driver stopping");
                    return;
                }
            }
        }

        match multisig.rollback_expired().await {
            Ok(expired) => {
                for (upgrade_id, manifest_id) in expired {
                    warn!(%upgrade_id, %manifest_id, "emergency apply expired without ratification");
                    if let Err(err) = manifest.rollback_manifest(manifest_id).await {
                        error!(%manifest_id, %err, "failed to roll back manifest after expired emergency apply");
                    }
                }
            }
            Err(err) => error!(%err, "emergency-ratification sweep failed"),
        }
    }
}

async fn idempotency_sweep_loop(
    idempotency: Arc<rok_idempotency::IdempotencyStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("idempotency-sweep driver stopping");
                    return;
                }
            }
        }

        match idempotency.sweep_expired().await {
            Ok(removed) if removed > 0 => info!(removed, "swept expired idempotency records"),
            Ok(_) => {}
            Err(err) => error!(%err, "idempotency sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intervals_are_sane() {
        let intervals = SchedulerIntervals::default();
        assert!(intervals.publish_poll < intervals.emergency_sweep);
        assert!(intervals.emergency_sweep < intervals.idempotency_sweep);
    }
}
