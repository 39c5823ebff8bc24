// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "HTTP control-plane: principal extraction, RBAC, canonical envelope, idempotency."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod extract;
mod middleware;
mod routes;

pub use envelope::{err_bytes, ok_bytes, Envelope};
pub use extract::AuthenticatedPrincipal;
pub use middleware::{request_id_middleware, RequestId, RequestLogger};

use axum::routing::{get, post};
use axum::Router;
use rok_audit::AuditChain;
use rok_idempotency::IdempotencyStore;
use rok_manifest::ManifestEngine;
use rok_multisig::MultisigCoordinator;
use rok_publisher::PublishDriver;
use rok_signing::SigningGateway;
use rok_store::Store;
use std::sync::Arc;
use std::time::Instant;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    /// Package/manifest lifecycle engine.
    pub manifest: Arc<ManifestEngine>,
    /// Multisig upgrade coordinator.
    pub multisig: Arc<MultisigCoordinator>,
    /// Publish task driver.
    pub publisher: Arc<PublishDriver>,
    /// Request deduplication store.
    pub idempotency: Arc<IdempotencyStore>,
    /// Audit trail, read directly by `GET /audit/{id}` and
    /// `GET /manifests/{id}/status`.
    pub audit: Arc<AuditChain>,
    /// Raw pool, used only by `GET /ready`'s liveness probe.
    pub store: Store,
    /// Probed by `GET /ready` when `require_signer_probe` is set.
    pub signer: Arc<dyn SigningGateway>,
    /// When the process finished startup, for `GET /health`'s uptime field.
    pub started_at: Instant,
    /// Whether `GET /ready` must also probe the signing gateway.
    pub require_signer_probe: bool,
    /// Whether mutating routes must be called with an `Idempotency-Key`
    /// header, rejecting unkeyed writes instead of running them fresh.
    pub require_idempotency_key: bool,
    /// Contract version string reported by `/health`.
    pub version: &'static str,
}

/// Build the Axum router for every route named in the external interface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/packages/submit", post(routes::submit_package))
        .route("/packages/{id}", get(routes::get_package))
        .route("/packages/{id}/validate", post(routes::validate_package))
        .route("/manifests/create", post(routes::create_manifest))
        .route(
            "/manifests/{id}/submit-for-signing",
            post(routes::submit_for_signing),
        )
        .route(
            "/manifests/{id}/request-multisig",
            post(routes::request_multisig),
        )
        .route("/upgrades/{id}/approve", post(routes::approve_upgrade))
        .route("/upgrades/{id}/apply", post(routes::apply_upgrade))
        .route("/manifests/{id}/apply", post(routes::apply_manifest))
        .route(
            "/manifests/{id}/preconditions/resolve",
            post(routes::resolve_precondition),
        )
        .route("/publish/notify", post(routes::publish_notify))
        .route(
            "/publish/tasks/{id}/resubmit",
            post(routes::resubmit_publish_task),
        )
        .route("/manifests/{id}/status", get(routes::manifest_status))
        .route("/audit/{id}", get(routes::get_audit_event))
        .layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .with_state(state)
}
