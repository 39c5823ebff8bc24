// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the release-orchestration kernel.
//!
//! This crate provides [`KernelConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, applying environment
//! overlays, and producing advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A `REQUIRE_*` startup guard is disabled in a configuration that
    /// otherwise looks production-shaped (a non-default database host).
    GuardDisabled {
        /// Which guard is off.
        guard: String,
    },
    /// A timeout or window is unusually large.
    LargeDuration {
        /// Field name.
        field: String,
        /// Value in seconds.
        secs: u64,
    },
    /// A recommended field was left at its default.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GuardDisabled { guard } => write!(f, "startup guard '{guard}' is disabled"),
            Self::LargeDuration { field, secs } => {
                write!(f, "'{field}' is unusually large ({secs}s)")
            }
            Self::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
        }
    }
}

const LARGE_DURATION_THRESHOLD_SECS: u64 = 7 * 24 * 3600;

/// Top-level runtime configuration for the kernel daemon.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct KernelConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Max connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Base URL of the signing gateway.
    pub signing_gateway_url: String,
    /// Base URL of the policy gate.
    pub policy_gate_url: String,
    /// Bucket/prefix URI the audit exporter writes to.
    pub audit_export_uri: String,
    /// Base URL of the external validation collaborator the
    /// validation-poll driver calls.
    #[serde(default)]
    pub validation_collaborator_url: String,
    /// Base URL per publish target (`repo`, `marketplace`, `delivery`, ...);
    /// one `HttpPublishCollaborator` is built per entry.
    #[serde(default)]
    pub publish_target_urls: Vec<(String, String)>,
    /// Fail the process at startup if the signer cannot be reached.
    #[serde(default)]
    pub require_kms: bool,
    /// Fail the process at startup if the signing proxy cannot be reached.
    #[serde(default)]
    pub require_signing_proxy: bool,
    /// Fail the process at startup unless mTLS is configured.
    #[serde(default)]
    pub require_mtls: bool,
    /// Reject mutating writes that arrive with no `Idempotency-Key` header
    /// instead of running them fresh. Non-production deployments typically
    /// leave this off so e2e suites can omit the header.
    #[serde(default)]
    pub require_idempotency_key: bool,
    /// Idempotency record time-to-live, in seconds.
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    /// Maximum stored idempotent response body size, in bytes.
    #[serde(default = "default_idempotency_body_limit")]
    pub idempotency_response_body_limit: usize,
    /// Multisig quorum size.
    #[serde(default = "default_multisig_required")]
    pub multisig_required: usize,
    /// Authorized multisig approver identities.
    #[serde(default)]
    pub authorized_approver_set: Vec<String>,
    /// Emergency-apply ratification window, in seconds.
    #[serde(default = "default_emergency_window_seconds")]
    pub emergency_ratification_window_seconds: u64,
    /// Publish task retry cap.
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    /// Declarative audit-event sampling rules: `(prefix, keep_rate)`.
    #[serde(default)]
    pub audit_sampling_policy: Vec<(String, f64)>,
    /// `signerKid` the audit chain signs new events under.
    #[serde(default = "default_audit_signer_kid")]
    pub audit_signer_kid: String,
    /// `signerKid` manifest signatures are requested under.
    #[serde(default = "default_manifest_signer_kid")]
    pub manifest_signer_kid: String,
    /// Wire name of the signature algorithm in use (`"ed25519"` or
    /// `"rsa-sha256"`), shared by the audit chain and manifest signing.
    #[serde(default = "default_signing_algorithm")]
    pub signing_algorithm: String,
    /// `tracing-subscriber` `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_connections() -> u32 {
    10
}
fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}
fn default_idempotency_body_limit() -> usize {
    64 * 1024
}
fn default_multisig_required() -> usize {
    3
}
fn default_emergency_window_seconds() -> u64 {
    172_800
}
fn default_publish_max_attempts() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".into()
}
fn default_audit_signer_kid() -> String {
    "audit-chain".into()
}
fn default_manifest_signer_kid() -> String {
    "manifest-signer".into()
}
fn default_signing_algorithm() -> String {
    "ed25519".into()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
            signing_gateway_url: String::new(),
            policy_gate_url: String::new(),
            audit_export_uri: String::new(),
            validation_collaborator_url: String::new(),
            publish_target_urls: Vec::new(),
            require_kms: false,
            require_signing_proxy: false,
            require_mtls: false,
            require_idempotency_key: false,
            idempotency_ttl_seconds: default_idempotency_ttl_seconds(),
            idempotency_response_body_limit: default_idempotency_body_limit(),
            multisig_required: default_multisig_required(),
            authorized_approver_set: Vec::new(),
            emergency_ratification_window_seconds: default_emergency_window_seconds(),
            publish_max_attempts: default_publish_max_attempts(),
            audit_sampling_policy: Vec::new(),
            audit_signer_kid: default_audit_signer_kid(),
            manifest_signer_kid: default_manifest_signer_kid(),
            signing_algorithm: default_signing_algorithm(),
            log_level: default_log_level(),
        }
    }
}

/// Load a [`KernelConfig`] from an optional TOML file path, then apply
/// environment-variable overrides on top.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if `path` is `Some` and does not
/// exist, or [`ConfigError::ParseError`] if its contents are not valid TOML.
pub fn load_config(path: Option<&Path>) -> Result<KernelConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => KernelConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`KernelConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML or
/// does not match the expected schema.
pub fn parse_toml(content: &str) -> Result<KernelConfig, ConfigError> {
    toml::from_str::<KernelConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply the kernel's recognized environment overrides in place.
///
/// Recognized variables: `DATABASE_URL`, `SIGNING_GATEWAY_URL`,
/// `POLICY_GATE_URL`, `AUDIT_EXPORT_URI`, `REQUIRE_KMS`,
/// `REQUIRE_SIGNING_PROXY`, `REQUIRE_MTLS`, `REQUIRE_IDEMPOTENCY_KEY`,
/// `IDEMPOTENCY_TTL_SECONDS`,
/// `IDEMPOTENCY_RESPONSE_BODY_LIMIT`, `MULTISIG_REQUIRED`,
/// `EMERGENCY_RATIFICATION_WINDOW_SECONDS`, `PUBLISH_MAX_ATTEMPTS`,
/// `ROK_LOG_LEVEL`, `AUDIT_SIGNER_KID`, `MANIFEST_SIGNER_KID`,
/// `SIGNING_ALGORITHM`, `VALIDATION_COLLABORATOR_URL`.
///
/// `publish_target_urls` has no single-value env override — it is a list of
/// `(target, url)` pairs and is only ever set from the TOML file.
pub fn apply_env_overrides(config: &mut KernelConfig) {
    if let Ok(val) = std::env::var("DATABASE_URL") {
        config.database_url = val;
    }
    if let Ok(val) = std::env::var("SIGNING_GATEWAY_URL") {
        config.signing_gateway_url = val;
    }
    if let Ok(val) = std::env::var("POLICY_GATE_URL") {
        config.policy_gate_url = val;
    }
    if let Ok(val) = std::env::var("AUDIT_EXPORT_URI") {
        config.audit_export_uri = val;
    }
    if let Ok(val) = std::env::var("VALIDATION_COLLABORATOR_URL") {
        config.validation_collaborator_url = val;
    }
    if let Ok(val) = std::env::var("REQUIRE_KMS") {
        config.require_kms = parse_bool_env(&val);
    }
    if let Ok(val) = std::env::var("REQUIRE_SIGNING_PROXY") {
        config.require_signing_proxy = parse_bool_env(&val);
    }
    if let Ok(val) = std::env::var("REQUIRE_MTLS") {
        config.require_mtls = parse_bool_env(&val);
    }
    if let Ok(val) = std::env::var("REQUIRE_IDEMPOTENCY_KEY") {
        config.require_idempotency_key = parse_bool_env(&val);
    }
    if let Ok(Ok(val)) = std::env::var("IDEMPOTENCY_TTL_SECONDS").map(|v| v.parse()) {
        config.idempotency_ttl_seconds = val;
    }
    if let Ok(Ok(val)) = std::env::var("IDEMPOTENCY_RESPONSE_BODY_LIMIT").map(|v| v.parse()) {
        config.idempotency_response_body_limit = val;
    }
    if let Ok(Ok(val)) = std::env::var("MULTISIG_REQUIRED").map(|v| v.parse()) {
        config.multisig_required = val;
    }
    if let Ok(Ok(val)) = std::env::var("EMERGENCY_RATIFICATION_WINDOW_SECONDS").map(|v| v.parse()) {
        config.emergency_ratification_window_seconds = val;
    }
    if let Ok(Ok(val)) = std::env::var("PUBLISH_MAX_ATTEMPTS").map(|v| v.parse()) {
        config.publish_max_attempts = val;
    }
    if let Ok(val) = std::env::var("ROK_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Ok(val) = std::env::var("AUDIT_SIGNER_KID") {
        config.audit_signer_kid = val;
    }
    if let Ok(val) = std::env::var("MANIFEST_SIGNER_KID") {
        config.manifest_signer_kid = val;
    }
    if let Ok(val) = std::env::var("SIGNING_ALGORITHM") {
        config.signing_algorithm = val;
    }
}

fn parse_bool_env(val: &str) -> bool {
    matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (empty required URLs, out-of-range quorum) are returned as
/// a [`ConfigError::ValidationError`]; soft issues come back as warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if any hard constraint fails.
pub fn validate_config(config: &KernelConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.database_url.trim().is_empty() {
        errors.push("database_url must not be empty".into());
    }
    if config.signing_gateway_url.trim().is_empty() {
        errors.push("signing_gateway_url must not be empty".into());
    }
    if config.policy_gate_url.trim().is_empty() {
        errors.push("policy_gate_url must not be empty".into());
    }
    if config.multisig_required == 0 {
        errors.push("multisig_required must be at least 1".into());
    }
    if config.authorized_approver_set.len() < config.multisig_required {
        errors.push(format!(
            "authorized_approver_set has {} members, fewer than multisig_required {}",
            config.authorized_approver_set.len(),
            config.multisig_required
        ));
    }
    if !matches!(config.signing_algorithm.as_str(), "ed25519" | "rsa-sha256") {
        errors.push(format!(
            "signing_algorithm must be 'ed25519' or 'rsa-sha256', got '{}'",
            config.signing_algorithm
        ));
    }

    if !config.require_kms && !config.require_signing_proxy {
        warnings.push(ConfigWarning::GuardDisabled {
            guard: "REQUIRE_KMS/REQUIRE_SIGNING_PROXY".into(),
        });
    }
    if !config.require_mtls {
        warnings.push(ConfigWarning::GuardDisabled {
            guard: "REQUIRE_MTLS".into(),
        });
    }
    if !config.require_idempotency_key {
        warnings.push(ConfigWarning::GuardDisabled {
            guard: "REQUIRE_IDEMPOTENCY_KEY".into(),
        });
    }
    if config.emergency_ratification_window_seconds > LARGE_DURATION_THRESHOLD_SECS {
        warnings.push(ConfigWarning::LargeDuration {
            field: "emergency_ratification_window_seconds".into(),
            secs: config.emergency_ratification_window_seconds,
        });
    }
    if config.audit_export_uri.trim().is_empty() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "audit_export_uri".into(),
            hint: "audit export batches will have nowhere to write".into(),
        });
    }
    if config.validation_collaborator_url.trim().is_empty() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "validation_collaborator_url".into(),
            hint: "the validation-poll driver has nothing to poll".into(),
        });
    }
    if config.publish_target_urls.is_empty() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "publish_target_urls".into(),
            hint: "no publish collaborators configured; every publish task will have no target to run against".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_on_empty_urls() {
        let cfg = KernelConfig::default();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn fully_populated_config_validates_with_warnings() {
        let mut cfg = KernelConfig {
            database_url: "postgres://localhost/rok".into(),
            signing_gateway_url: "https://signer.internal".into(),
            policy_gate_url: "https://policy.internal".into(),
            authorized_approver_set: vec!["a1".into(), "a2".into(), "a3".into()],
            ..KernelConfig::default()
        };
        cfg.require_kms = true;
        cfg.require_mtls = true;
        let warnings = validate_config(&cfg).expect("should validate");
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::MissingOptionalField { .. })));
    }

    #[test]
    fn quorum_exceeding_approver_set_is_a_hard_error() {
        let cfg = KernelConfig {
            database_url: "postgres://localhost/rok".into(),
            signing_gateway_url: "https://signer.internal".into(),
            policy_gate_url: "https://policy.internal".into(),
            multisig_required: 3,
            authorized_approver_set: vec!["a1".into()],
            ..KernelConfig::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn parse_valid_toml_round_trips_required_fields() {
        let toml = r#"
            database_url = "postgres://localhost/rok"
            signing_gateway_url = "https://signer.internal"
            policy_gate_url = "https://policy.internal"
            audit_export_uri = "s3://rok-audit"
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.database_url, "postgres://localhost/rok");
        assert_eq!(cfg.multisig_required, 3);
    }

    #[test]
    fn unknown_signing_algorithm_is_a_hard_error() {
        let cfg = KernelConfig {
            database_url: "postgres://localhost/rok".into(),
            signing_gateway_url: "https://signer.internal".into(),
            policy_gate_url: "https://policy.internal".into(),
            authorized_approver_set: vec!["a1".into(), "a2".into(), "a3".into()],
            signing_algorithm: "rot13".into(),
            ..KernelConfig::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn env_overrides_take_precedence_over_file_values() {
        std::env::set_var("MULTISIG_REQUIRED", "5");
        let mut cfg = KernelConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.multisig_required, 5);
        std::env::remove_var("MULTISIG_REQUIRED");
    }
}
