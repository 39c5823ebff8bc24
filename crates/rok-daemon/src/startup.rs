// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pure construction helpers, kept separate from `main.rs` so they can be
//! unit-tested without a live database or signer.

use anyhow::{Context, Result};
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use rok_multisig::{Quorum, QuorumConfig};
use rok_publisher::{HttpPublishCollaborator, PublishCollaborator};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Build the multisig quorum configuration from the kernel config's
/// approver set and required count.
#[must_use]
pub fn build_quorum_config(config: &rok_config::KernelConfig) -> QuorumConfig {
    QuorumConfig::new(config.authorized_approver_set.clone(), config.multisig_required)
}

/// Build one [`HttpPublishCollaborator`] per configured publish target.
#[must_use]
pub fn build_publish_collaborators(
    config: &rok_config::KernelConfig,
    deadline: std::time::Duration,
) -> HashMap<String, Arc<dyn PublishCollaborator>> {
    config
        .publish_target_urls
        .iter()
        .map(|(target, url)| {
            let collaborator: Arc<dyn PublishCollaborator> =
                Arc::new(HttpPublishCollaborator::new(url.clone(), deadline));
            (target.clone(), collaborator)
        })
        .collect()
}

/// Parse an object-store URI (`file://`, `s3://`, `memory://`, ...) into a
/// store handle, scoped to the leftover path component if the scheme's
/// root doesn't cover the whole URI.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_config_carries_the_configured_approver_set() {
        let mut config = rok_config::KernelConfig::default();
        config.authorized_approver_set = vec!["a1".into(), "a2".into(), "a3".into()];
        config.multisig_required = 2;
        let quorum_config = build_quorum_config(&config);
        assert!(quorum_config.is_authorized("a1"));
        let evaluated = Quorum::evaluate(&["a1".into(), "a2".into()], quorum_config.required);
        assert!(evaluated.met);
    }

    #[test]
    fn publish_collaborators_has_one_entry_per_target() {
        let mut config = rok_config::KernelConfig::default();
        config.publish_target_urls = vec![
            ("repo".into(), "https://repo.internal".into()),
            ("marketplace".into(), "https://marketplace.internal".into()),
        ];
        let collaborators = build_publish_collaborators(&config, std::time::Duration::from_secs(30));
        assert_eq!(collaborators.len(), 2);
        assert!(collaborators.contains_key("repo"));
        assert!(collaborators.contains_key("marketplace"));
    }

    #[test]
    fn build_object_store_accepts_a_memory_uri() {
        assert!(build_object_store("memory://").is_ok());
    }

    #[test]
    fn build_object_store_rejects_an_unparseable_uri() {
        assert!(build_object_store("not a url").is_err());
    }
}
