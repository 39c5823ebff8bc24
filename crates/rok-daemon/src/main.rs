// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
mod startup;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rok_api::{build_router, AppState};
use rok_audit::{AuditChain, SamplingPolicy};
use rok_config::KernelConfig;
use rok_idempotency::IdempotencyStore;
use rok_manifest::{HttpValidationCollaborator, ManifestEngine, ValidationCollaborator};
use rok_multisig::MultisigCoordinator;
use rok_policy::{FailMode, HttpPolicyGate};
use rok_publisher::PublishDriver;
use rok_scheduler::{Scheduler, SchedulerIntervals};
use rok_signing::{Algorithm, HttpSigningGateway, SigningGateway};
use rok_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Request deadline applied to every outbound collaborator call that has
/// no more specific override (§5's default 30s, overridable per call).
const DEFAULT_COLLABORATOR_DEADLINE: Duration = Duration::from_secs(30);

/// How long the signing gateway's resolved public keys are cached before a
/// fresh `GetPublicKey` call is made.
const SIGNER_PUBLIC_KEY_CACHE_TTL: Duration = Duration::from_secs(300);

/// How long an idempotency reservation with no completion is considered
/// abandoned and reclaimable by a later retry of the same key.
const IDEMPOTENCY_RESERVATION_LEASE: Duration = Duration::from_secs(30);

const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "rok-daemon", version, about = "Release-orchestration kernel daemon")]
struct Args {
    /// Bind address for the HTTP control plane.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path to a kernel TOML config file. Falls back to defaults plus
    /// environment overrides when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("rok=debug")
    } else {
        EnvFilter::new("rok=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = rok_config::load_config(args.config.as_deref()).context("loading config")?;
    let warnings = rok_config::validate_config(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    for warning in &warnings {
        tracing::warn!(%warning, "config warning");
    }

    let algorithm = parse_algorithm(&config.signing_algorithm)?;

    let store = Store::connect(&config.database_url, config.max_connections)
        .await
        .context("connecting to store")?;

    let signer: Arc<dyn SigningGateway> =
        Arc::new(HttpSigningGateway::new(config.signing_gateway_url.clone(), SIGNER_PUBLIC_KEY_CACHE_TTL));

    run_startup_guards(&config, signer.as_ref()).await?;

    let require_signer_probe = config.require_kms || config.require_signing_proxy;

    let audit = Arc::new(AuditChain::new(
        store.clone(),
        signer.clone(),
        config.audit_signer_kid.clone(),
        algorithm,
        SamplingPolicy::from_rules(config.audit_sampling_policy.clone()),
    ));

    let policy = Arc::new(HttpPolicyGate::new(
        config.policy_gate_url.clone(),
        DEFAULT_COLLABORATOR_DEADLINE,
        FailMode::FailClosed,
    ));

    let manifest = Arc::new(ManifestEngine::new(
        store.clone(),
        audit.clone(),
        signer.clone(),
        policy,
        config.manifest_signer_kid.clone(),
        algorithm,
    ));

    let quorum_config = startup::build_quorum_config(&config);
    let multisig = Arc::new(MultisigCoordinator::new(
        store.clone(),
        audit.clone(),
        quorum_config,
        chrono::Duration::seconds(i64::try_from(config.emergency_ratification_window_seconds).unwrap_or(i64::MAX)),
    ));

    let collaborators = startup::build_publish_collaborators(&config, DEFAULT_COLLABORATOR_DEADLINE);
    let publisher = Arc::new(PublishDriver::new(store.clone(), audit.clone(), collaborators));

    let idempotency = Arc::new(IdempotencyStore::new(
        store.clone(),
        chrono::Duration::seconds(i64::try_from(config.idempotency_ttl_seconds).unwrap_or(i64::MAX)),
        config.idempotency_response_body_limit,
        chrono::Duration::from_std(IDEMPOTENCY_RESERVATION_LEASE).expect("constant duration fits"),
    ));

    let validator: Arc<dyn ValidationCollaborator> = Arc::new(HttpValidationCollaborator::new(
        config.validation_collaborator_url.clone(),
        DEFAULT_COLLABORATOR_DEADLINE,
    ));
    let export_object_store = startup::build_object_store(&config.audit_export_uri)
        .context("building the audit export object store")?;

    let scheduler = Scheduler::spawn(
        manifest.clone(),
        multisig.clone(),
        publisher.clone(),
        idempotency.clone(),
        validator,
        audit.clone(),
        export_object_store,
        "rok".to_string(),
        SchedulerIntervals::default(),
    );

    let state = Arc::new(AppState {
        manifest,
        multisig,
        publisher,
        idempotency,
        audit,
        store,
        signer,
        started_at: Instant::now(),
        require_signer_probe,
        require_idempotency_key: config.require_idempotency_key,
        version: CONTRACT_VERSION,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(bind = %args.bind, "rok-daemon listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve");

    scheduler.shutdown().await;
    serve_result
}

/// Fail fast if a `REQUIRE_*` guard is set but its dependency is unreachable.
///
/// # Errors
///
/// Returns an error naming the failing guard.
async fn run_startup_guards(config: &KernelConfig, signer: &dyn SigningGateway) -> Result<()> {
    if config.require_kms || config.require_signing_proxy {
        signer
            .probe()
            .await
            .map_err(|e| anyhow::anyhow!("signer startup probe failed: {e}"))?;
    }
    if config.require_mtls {
        info!("REQUIRE_MTLS is set; mTLS termination is expected at the ingress/sidecar layer");
    }
    Ok(())
}

fn parse_algorithm(wire_name: &str) -> Result<Algorithm> {
    match wire_name {
        "ed25519" => Ok(Algorithm::Ed25519),
        "rsa-sha256" => Ok(Algorithm::RsaSha256),
        other => bail!("unrecognized signing_algorithm '{other}'"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_algorithm_accepts_recognized_wire_names() {
        assert!(matches!(parse_algorithm("ed25519").unwrap(), Algorithm::Ed25519));
        assert!(matches!(parse_algorithm("rsa-sha256").unwrap(), Algorithm::RsaSha256));
    }

    #[test]
    fn parse_algorithm_rejects_unknown_names() {
        assert!(parse_algorithm("rot13").is_err());
    }
}
