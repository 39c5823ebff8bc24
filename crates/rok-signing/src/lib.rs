// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Signing gateway adapter, signature verification, and the signer registry."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A thin adapter over an external signing service (KMS or signing proxy).
//! Never holds a private key itself: [`SigningGateway`] asks the remote
//! service to produce signatures and caches only public keys. Verification
//! ([`verify_detached`]) runs locally against a cached or registry-resolved
//! public key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Signature algorithm supported by the signing gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256, over the raw digest.
    RsaSha256,
    /// Ed25519 over the raw message bytes (not a pre-hashed digest).
    Ed25519,
}

/// Errors from the signing gateway or local verification.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The signer could not be reached, rejected the request, or is not
    /// configured for a kid this caller asked about.
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    /// A public key or signature was malformed.
    #[error("malformed key or signature: {0}")]
    Malformed(String),
}

impl From<SigningError> for rok_error::RokError {
    fn from(err: SigningError) -> Self {
        rok_error::RokError::new(rok_error::ErrorCode::SignerUnavailable, err.to_string())
    }
}

/// One entry in the signer registry document consumed by the chain
/// verifier: the public key and algorithm live behind a `signerKid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerRegistryEntry {
    /// Signature algorithm this key is used with.
    pub algorithm: Algorithm,
    /// PEM-encoded public key.
    pub public_key: String,
    /// When this key was deployed (for audit/rotation history).
    pub deployed_at: chrono::DateTime<chrono::Utc>,
}

/// `signerKid -> SignerRegistryEntry` document, as exported for the
/// external chain-verification tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerRegistry(HashMap<String, SignerRegistryEntry>);

impl SignerRegistry {
    /// Parse a signer registry document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Malformed`] if the document is not valid JSON
    /// or does not match the expected shape.
    pub fn from_json(json: &str) -> Result<Self, SigningError> {
        serde_json::from_str(json).map_err(|e| SigningError::Malformed(e.to_string()))
    }

    /// Serialize this registry to its JSON document form.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Malformed`] if serialization fails.
    pub fn to_json(&self) -> Result<String, SigningError> {
        serde_json::to_string_pretty(&self.0).map_err(|e| SigningError::Malformed(e.to_string()))
    }

    /// Insert or replace the entry for `kid`.
    pub fn insert(&mut self, kid: impl Into<String>, entry: SignerRegistryEntry) {
        self.0.insert(kid.into(), entry);
    }

    /// Look up the entry for `kid`.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&SignerRegistryEntry> {
        self.0.get(kid)
    }
}

/// Verify a detached signature over `message` under the given algorithm and
/// PEM-encoded public key.
///
/// # Errors
///
/// Returns [`SigningError::Malformed`] if the key or signature cannot be
/// parsed. Returns `Ok(false)` (not an error) for a well-formed signature
/// that simply does not verify.
pub fn verify_detached(
    alg: Algorithm,
    public_key_pem: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, SigningError> {
    match alg {
        Algorithm::Ed25519 => {
            use ed25519_dalek::{Signature, Verifier, VerifyingKey};
            let der = pem_body(public_key_pem)?;
            let bytes: [u8; 32] = der
                .get(der.len().saturating_sub(32)..)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| SigningError::Malformed("ed25519 key length".into()))?;
            let vk = VerifyingKey::from_bytes(&bytes)
                .map_err(|e| SigningError::Malformed(e.to_string()))?;
            let sig = Signature::from_slice(signature)
                .map_err(|e| SigningError::Malformed(e.to_string()))?;
            Ok(vk.verify(message, &sig).is_ok())
        }
        Algorithm::RsaSha256 => {
            use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
            use rsa::pkcs8::DecodePublicKey;
            use rsa::signature::Verifier as _;
            use rsa::RsaPublicKey;
            use sha2::Sha256;

            let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
                .map_err(|e| SigningError::Malformed(e.to_string()))?;
            let verifying_key = RsaVerifyingKey::<Sha256>::new(public_key);
            let sig = RsaSignature::try_from(signature)
                .map_err(|e| SigningError::Malformed(e.to_string()))?;
            Ok(verifying_key.verify(message, &sig).is_ok())
        }
    }
}

fn pem_body(pem: &str) -> Result<Vec<u8>, SigningError> {
    let stripped: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, stripped)
        .map_err(|e| SigningError::Malformed(e.to_string()))
}

/// Adapter over an external signing service. Implementors must never retain
/// private key material; they forward to a remote signer and cache public
/// keys only.
#[async_trait]
pub trait SigningGateway: Send + Sync {
    /// Request a detached signature over `digest` under `kid` using `alg`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Unavailable`] if the remote signer cannot be
    /// reached or rejects the request.
    async fn sign(&self, kid: &str, digest: &[u8], alg: Algorithm) -> Result<Vec<u8>, SigningError>;

    /// Resolve the PEM-encoded public key for `kid`, using a cached value
    /// when available.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Unavailable`] if the key cannot be resolved.
    async fn public_key(&self, kid: &str) -> Result<String, SigningError>;

    /// Probe reachability at startup. Implementations backing
    /// `REQUIRE_KMS`/`REQUIRE_SIGNING_PROXY` gates should make this a real
    /// round trip so the daemon can fail fast rather than fail on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Unavailable`] if the signer is not reachable.
    async fn probe(&self) -> Result<(), SigningError>;
}

#[derive(Serialize)]
struct SignRequest<'a> {
    kid: &'a str,
    #[serde(with = "base64_bytes")]
    digest: &'a [u8],
    algorithm: Algorithm,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(with = "base64_bytes_owned")]
    signature: Vec<u8>,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    public_key: String,
}

mod base64_bytes {
    use base64::Engine;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &&[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

mod base64_bytes_owned {
    use base64::Engine;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// HTTP adapter over a signing gateway reachable at `base_url`, with a
/// read-mostly, TTL-refreshed public key cache safe for concurrent readers.
pub struct HttpSigningGateway {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<RwLock<HashMap<String, (String, Instant)>>>,
    cache_ttl: Duration,
}

impl HttpSigningGateway {
    /// Construct a gateway pointed at `base_url` (e.g.
    /// `https://kms.internal:8443`), with public keys cached for `cache_ttl`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
        }
    }
}

#[async_trait]
impl SigningGateway for HttpSigningGateway {
    async fn sign(&self, kid: &str, digest: &[u8], alg: Algorithm) -> Result<Vec<u8>, SigningError> {
        let resp = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&SignRequest {
                kid,
                digest,
                algorithm: alg,
            })
            .send()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SigningError::Unavailable(format!(
                "signer returned {}",
                resp.status()
            )));
        }
        let body: SignResponse = resp
            .json()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        Ok(body.signature)
    }

    async fn public_key(&self, kid: &str) -> Result<String, SigningError> {
        {
            let cache = self.cache.read().await;
            if let Some((pem, fetched_at)) = cache.get(kid) {
                if fetched_at.elapsed() < self.cache_ttl {
                    return Ok(pem.clone());
                }
            }
        }
        let resp = self
            .client
            .get(format!("{}/keys/{kid}", self.base_url))
            .send()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SigningError::Unavailable(format!(
                "signer returned {}",
                resp.status()
            )));
        }
        let body: PublicKeyResponse = resp
            .json()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        self.cache
            .write()
            .await
            .insert(kid.to_string(), (body.public_key.clone(), Instant::now()));
        Ok(body.public_key)
    }

    async fn probe(&self) -> Result<(), SigningError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SigningError::Unavailable(format!(
                "signer health check returned {}",
                resp.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn ed25519_round_trips_through_verify_detached() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----",
            base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                verifying_key.to_bytes()
            )
        );
        let message = b"hash-chain-head";
        let sig = signing_key.sign(message);
        let ok = verify_detached(Algorithm::Ed25519, &pem, message, &sig.to_bytes()).unwrap();
        assert!(ok);
    }

    #[test]
    fn ed25519_rejects_tampered_message() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----",
            base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                verifying_key.to_bytes()
            )
        );
        let sig = signing_key.sign(b"original");
        let ok = verify_detached(Algorithm::Ed25519, &pem, b"tampered", &sig.to_bytes()).unwrap();
        assert!(!ok);
    }

    #[test]
    fn signer_registry_round_trips_through_json() {
        let mut registry = SignerRegistry::default();
        registry.insert(
            "manifest-signer-1",
            SignerRegistryEntry {
                algorithm: Algorithm::Ed25519,
                public_key: "pem-placeholder".into(),
                deployed_at: chrono::Utc::now(),
            },
        );
        let json = registry.to_json().unwrap();
        let back = SignerRegistry::from_json(&json).unwrap();
        assert!(back.get("manifest-signer-1").is_some());
        assert!(back.get("unknown-kid").is_none());
    }

    #[tokio::test]
    async fn http_gateway_probe_fails_closed_when_unreachable() {
        let gateway = HttpSigningGateway::new("http://127.0.0.1:1", Duration::from_secs(60));
        let result = gateway.probe().await;
        assert!(matches!(result, Err(SigningError::Unavailable(_))));
    }
}
