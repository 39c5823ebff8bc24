// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end lifecycle scenarios, exercised against a real Postgres
//! database and wiremock-backed collaborators (signer, policy gate,
//! validator, publish targets).
//!
//! Requires `DATABASE_URL` to point at an empty-or-migrated Postgres
//! instance; skipped with a message when it is not set, since these tests
//! cannot run without a live database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rok_audit::{AuditChain, SamplingPolicy};
use rok_core::{Impact, ManifestId, PackageId, Principal, Role, UpgradeId};
use rok_manifest::ManifestEngine;
use rok_multisig::{MultisigCoordinator, QuorumConfig};
use rok_policy::{FailMode, HttpPolicyGate};
use rok_publisher::{HttpPublishCollaborator, PublishCollaborator, PublishDriver};
use rok_signing::{Algorithm, HttpSigningGateway, SigningGateway};
use rok_store::Store;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Returns `None` (and prints a skip notice) if no test database is
/// configured, so the suite degrades gracefully in environments with no
/// Postgres reachable rather than failing every test.
macro_rules! require_database {
    () => {
        match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("skipping: DATABASE_URL is not set, no database to test against");
                return;
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Shared fixtures
// ---------------------------------------------------------------------------

/// Dynamic `POST /sign` responder: actually signs whatever digest it's
/// asked to, under the keypair registered for the requested `kid`.
struct SignResponder {
    keys: HashMap<String, SigningKey>,
}

impl Respond for SignResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        #[derive(serde::Deserialize)]
        struct SignBody {
            kid: String,
            digest: String,
        }
        let body: SignBody = serde_json::from_slice(&request.body).expect("valid sign request body");
        let key = self.keys.get(&body.kid).expect("responder has a key for this kid");
        let digest = base64::engine::general_purpose::STANDARD
            .decode(&body.digest)
            .expect("base64 digest");
        let signature = key.sign(&digest);
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "signature": base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        }))
    }
}

/// Dynamic `GET /keys/{kid}` responder, returning each key's public half.
struct PublicKeyResponder {
    keys: HashMap<String, SigningKey>,
}

impl Respond for PublicKeyResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let kid = request.url.path().rsplit('/').next().unwrap_or_default();
        let key = self.keys.get(kid).expect("responder has a key for this kid");
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "public_key": encode_verifying_key_pem(&key.verifying_key()),
        }))
    }
}

fn encode_verifying_key_pem(key: &VerifyingKey) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(key.to_bytes());
    format!("-----BEGIN PUBLIC KEY-----\n{encoded}\n-----END PUBLIC KEY-----\n")
}

/// Stand up a mock signing gateway serving the given `kid -> keypair` set.
async fn mock_signing_gateway(keys: HashMap<String, SigningKey>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign"))
        .respond_with(SignResponder { keys: keys.clone() })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/keys/.+$"))
        .respond_with(PublicKeyResponder { keys })
        .mount(&server)
        .await;
    server
}

/// A policy gate mock that allows every decision point.
async fn mock_allow_all_policy_gate() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "decisionId": uuid::Uuid::new_v4(),
            "allowed": true,
            "ruleId": null,
            "rationale": null,
        })))
        .mount(&server)
        .await;
    server
}

/// A publish target mock that always accepts the rollout with a proof ref.
async fn mock_publish_target(proof_ref: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/publish"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "proofRef": proof_ref,
        })))
        .mount(&server)
        .await;
    server
}

async fn connect_store(database_url: &str) -> Store {
    Store::connect(database_url, 5)
        .await
        .expect("connect to test database")
}

// ---------------------------------------------------------------------------
// Scenario: low-impact release, no multisig required
// ---------------------------------------------------------------------------

/// Walks the documented demo scenario end to end: submit a package, record
/// its validation, draft a low-impact manifest, sign it, apply it, drive its
/// single publish target to completion, and confirm both the manifest's
/// status history and the audit chain's hash linkage.
#[tokio::test]
async fn low_impact_manifest_reaches_published_without_multisig() {
    let database_url = require_database!();
    let store = connect_store(&database_url).await;

    let mut keys = HashMap::new();
    keys.insert("audit-kid-low".to_string(), SigningKey::generate(&mut rand_core::OsRng));
    keys.insert("manifest-kid-low".to_string(), SigningKey::generate(&mut rand_core::OsRng));
    let signer_server = mock_signing_gateway(keys).await;
    let policy_server = mock_allow_all_policy_gate().await;
    let publish_server = mock_publish_target("marketplace-listing-42").await;

    let deadline = Duration::from_secs(5);
    let signer: Arc<dyn SigningGateway> =
        Arc::new(HttpSigningGateway::new(signer_server.uri(), Duration::from_secs(60)));
    let audit = Arc::new(AuditChain::new(
        store.clone(),
        signer.clone(),
        "audit-kid-low",
        Algorithm::Ed25519,
        SamplingPolicy::append_all(),
    ));
    let policy = Arc::new(HttpPolicyGate::new(policy_server.uri(), deadline, FailMode::FailClosed));
    let manifest_engine = ManifestEngine::new(
        store.clone(),
        audit.clone(),
        signer.clone(),
        policy,
        "manifest-kid-low",
        Algorithm::Ed25519,
    );

    let mut collaborators: HashMap<String, Arc<dyn PublishCollaborator>> = HashMap::new();
    collaborators.insert(
        "marketplace".to_string(),
        Arc::new(HttpPublishCollaborator::new(publish_server.uri(), deadline)),
    );
    let publisher = PublishDriver::new(store.clone(), audit.clone(), collaborators);

    let package = manifest_engine
        .submit_package("demo", "0.1.0", "oci://registry/demo@sha256:abc", "a".repeat(64).as_str(), "alice", serde_json::json!({}))
        .await
        .expect("submit package");
    assert_eq!(package.status, rok_manifest::PackageStatus::Submitted);

    manifest_engine
        .record_validation(package.package_id, true, "report-ref-1")
        .await
        .expect("record validation");
    let validated = manifest_engine.get_package(package.package_id).await.expect("fetch package");
    assert_eq!(validated.status, rok_manifest::PackageStatus::Validated);

    let manifest = manifest_engine
        .create_manifest(
            package.package_id,
            serde_json::json!({"targets": ["marketplace"]}),
            "low",
            "routine patch release",
            serde_json::json!({"strategy": "rolling"}),
            Vec::new(),
        )
        .await
        .expect("create manifest");
    assert_eq!(manifest.impact, Impact::Low);
    assert_eq!(manifest.status, rok_manifest::ManifestStatus::Draft);

    let actor = Principal::new("alice", Role::DivisionLead);
    let signature = manifest_engine.sign_manifest(manifest.manifest_id, &actor).await.expect("sign manifest");
    assert_eq!(signature.manifest_id, manifest.manifest_id);
    let signed = manifest_engine.get_manifest(manifest.manifest_id).await.expect("fetch manifest");
    assert_eq!(signed.status, rok_manifest::ManifestStatus::Signed);
    let routed = manifest_engine.route_after_signing(manifest.manifest_id).await.expect("route after signing");
    assert_eq!(routed, rok_manifest::ManifestStatus::Signed);

    manifest_engine.apply_manifest(manifest.manifest_id, &actor).await.expect("apply manifest");
    let applying = manifest_engine.get_manifest(manifest.manifest_id).await.expect("fetch manifest");
    assert_eq!(applying.status, rok_manifest::ManifestStatus::Applying);

    let tasks = publisher
        .create_tasks(manifest.manifest_id, &["marketplace".to_string()])
        .await
        .expect("create publish tasks");
    assert_eq!(tasks.len(), 1);
    manifest_engine
        .advance_publish_state(manifest.manifest_id, rok_manifest::ManifestStatus::Applying, rok_manifest::ManifestStatus::Publishing)
        .await
        .expect("advance to publishing");

    let sweep = publisher.poll_and_run_once(50).await.expect("drive publish tasks");
    assert!(sweep.succeeded.contains(&manifest.manifest_id));
    assert!(sweep.failed.is_empty());
    manifest_engine
        .advance_publish_state(manifest.manifest_id, rok_manifest::ManifestStatus::Publishing, rok_manifest::ManifestStatus::Published)
        .await
        .expect("advance to published");

    let published = manifest_engine.get_manifest(manifest.manifest_id).await.expect("fetch manifest");
    assert_eq!(published.status, rok_manifest::ManifestStatus::Published);

    let history = audit.events_by_manifest(manifest.manifest_id).await.expect("fetch audit history");
    let event_types: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
    assert!(event_types.contains(&"manifest.applied"));
    assert!(event_types.contains(&"policy.decision"));
    assert!(event_types.contains(&"publish.target.completed"));
    assert!(event_types.contains(&"publish.completed"));

    for pair in history.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash, "audit events for this manifest must chain in insertion order");
    }
    for event in &history {
        let public_key = signer.public_key(&event.signer_kid).await.expect("resolve signer public key");
        let verified = rok_signing::verify_detached(Algorithm::Ed25519, &public_key, event.hash.as_bytes(), &event.signature)
            .expect("verify signature");
        assert!(verified, "event {} failed signature verification", event.event_id);
    }
}

// ---------------------------------------------------------------------------
// Scenario: high-impact manifest gated on multisig quorum
// ---------------------------------------------------------------------------

/// A `high` impact manifest cannot apply until its dependent upgrade
/// proposal clears quorum; `ApplyManifest` rejects it beforehand and
/// succeeds once `record_multisig_applied` has run.
#[tokio::test]
async fn high_impact_manifest_requires_multisig_quorum_before_apply() {
    let database_url = require_database!();
    let store = connect_store(&database_url).await;

    let mut keys = HashMap::new();
    keys.insert("audit-kid-high".to_string(), SigningKey::generate(&mut rand_core::OsRng));
    keys.insert("manifest-kid-high".to_string(), SigningKey::generate(&mut rand_core::OsRng));
    let signer_server = mock_signing_gateway(keys).await;
    let policy_server = mock_allow_all_policy_gate().await;

    let deadline = Duration::from_secs(5);
    let signer: Arc<dyn SigningGateway> =
        Arc::new(HttpSigningGateway::new(signer_server.uri(), Duration::from_secs(60)));
    let audit = Arc::new(AuditChain::new(
        store.clone(),
        signer.clone(),
        "audit-kid-high",
        Algorithm::Ed25519,
        SamplingPolicy::append_all(),
    ));
    let policy = Arc::new(HttpPolicyGate::new(policy_server.uri(), deadline, FailMode::FailClosed));
    let manifest_engine = ManifestEngine::new(
        store.clone(),
        audit.clone(),
        signer.clone(),
        policy,
        "manifest-kid-high",
        Algorithm::Ed25519,
    );

    let quorum_config = QuorumConfig::new(vec!["approver-1".to_string(), "approver-2".to_string(), "approver-3".to_string()], 2);
    let multisig = MultisigCoordinator::new(store.clone(), audit.clone(), quorum_config, chrono::Duration::hours(48));

    let package = manifest_engine
        .submit_package("fleet-upgrade", "2.0.0", "oci://registry/fleet@sha256:def", "b".repeat(64).as_str(), "bob", serde_json::json!({}))
        .await
        .expect("submit package");
    manifest_engine
        .record_validation(package.package_id, true, "report-ref-2")
        .await
        .expect("record validation");
    let manifest = manifest_engine
        .create_manifest(
            package.package_id,
            serde_json::json!({"targets": ["repo"]}),
            "high",
            "breaking schema migration",
            serde_json::json!({"strategy": "blue-green"}),
            Vec::new(),
        )
        .await
        .expect("create manifest");
    assert!(manifest.impact.requires_multisig());

    let actor = Principal::new("bob", Role::DivisionLead);
    manifest_engine.sign_manifest(manifest.manifest_id, &actor).await.expect("sign manifest");
    let routed = manifest_engine.route_after_signing(manifest.manifest_id).await.expect("route after signing");
    assert_eq!(routed, rok_manifest::ManifestStatus::PendingMultisig);

    let too_early = manifest_engine.apply_manifest(manifest.manifest_id, &actor).await;
    assert!(matches!(too_early, Err(rok_manifest::ManifestError::MultisigNotApplied)));

    let upgrade_id = UpgradeId::new();
    multisig.submit(upgrade_id, manifest.manifest_id, "bob").await.expect("submit upgrade proposal");
    multisig.approve(upgrade_id, "approver-1", b"sig-1".to_vec(), None).await.expect("first approval");
    multisig
        .approve(upgrade_id, "approver-2", b"sig-2".to_vec(), Some("looks good".to_string()))
        .await
        .expect("second approval");
    let applied = multisig.apply(upgrade_id, "bob").await.expect("apply upgrade proposal");
    assert_eq!(applied.status, rok_multisig::UpgradeStatus::Applied);

    manifest_engine
        .record_multisig_applied(manifest.manifest_id, upgrade_id.as_uuid())
        .await
        .expect("record multisig applied");

    manifest_engine.apply_manifest(manifest.manifest_id, &actor).await.expect("apply manifest after quorum");
    let applied_manifest = manifest_engine.get_manifest(manifest.manifest_id).await.expect("fetch manifest");
    assert_eq!(applied_manifest.status, rok_manifest::ManifestStatus::Applying);
    assert_eq!(applied_manifest.upgrade_id, Some(upgrade_id.as_uuid()));
}

// ---------------------------------------------------------------------------
// Scenario: idempotency replay
// ---------------------------------------------------------------------------

/// A repeated request under the same idempotency key and body replays the
/// stored response instead of running the handler twice; a key reused with
/// a different body is a conflict.
#[tokio::test]
async fn idempotency_store_replays_completed_responses_and_flags_body_mismatches() {
    let database_url = require_database!();
    let store = connect_store(&database_url).await;
    let idempotency = rok_idempotency::IdempotencyStore::new(
        store,
        chrono::Duration::hours(24),
        64 * 1024,
        chrono::Duration::seconds(30),
    );

    let key = format!("idem-{}", uuid::Uuid::new_v4());
    let body = serde_json::json!({"packageId": "demo", "version": "0.1.0"});
    let request_hash = rok_idempotency::IdempotencyStore::request_hash(&body).expect("hash request body");

    let first = idempotency.begin("POST", "/packages/submit", &key, &request_hash).await.expect("begin first attempt");
    assert!(matches!(first, rok_idempotency::Outcome::Fresh));

    idempotency
        .complete("POST", "/packages/submit", &key, 201, br#"{"packageId":"demo"}"#)
        .await
        .expect("complete first attempt");

    let replay = idempotency.begin("POST", "/packages/submit", &key, &request_hash).await.expect("begin replay");
    match replay {
        rok_idempotency::Outcome::Replay { status, body } => {
            assert_eq!(status, 201);
            assert_eq!(body, br#"{"packageId":"demo"}"#.to_vec());
        }
        rok_idempotency::Outcome::Fresh => panic!("expected a replay, got a fresh reservation"),
    }

    let different_body_hash =
        rok_idempotency::IdempotencyStore::request_hash(&serde_json::json!({"packageId": "other"})).expect("hash");
    let conflict = idempotency.begin("POST", "/packages/submit", &key, &different_body_hash).await;
    assert!(matches!(conflict, Err(rok_idempotency::IdempotencyError::Conflict)));
}
