// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pure quorum arithmetic — no I/O, no suspension, just set counting. Kept
//! isolated so `criterion` can bench it in isolation from the database.

use std::collections::HashSet;

/// The authorized approver set and required quorum size for a deployment.
/// Changing either is itself a `HIGH`-impact manifest, gated by the same
/// multisig mechanism it configures.
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    authorized_approver_set: HashSet<String>,
    /// Distinct approvals required before `Apply`/`Ratify` succeeds.
    pub required: usize,
}

impl QuorumConfig {
    /// Construct a config from an explicit approver list and quorum size.
    #[must_use]
    pub fn new(authorized_approver_set: impl IntoIterator<Item = String>, required: usize) -> Self {
        Self {
            authorized_approver_set: authorized_approver_set.into_iter().collect(),
            required,
        }
    }

    /// Returns `true` if `approver_id` is in the authorized set.
    #[must_use]
    pub fn is_authorized(&self, approver_id: &str) -> bool {
        self.authorized_approver_set.contains(approver_id)
    }
}

/// Result of evaluating distinct approvals against a required quorum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    /// Whether `have >= required`.
    pub met: bool,
    /// Distinct approver count observed.
    pub have: usize,
    /// Quorum size required.
    pub required: usize,
}

impl Quorum {
    /// Evaluate `approver_ids` (already deduplicated by the caller's query,
    /// but deduplicated again here defensively) against `required`.
    #[must_use]
    pub fn evaluate(approver_ids: &[String], required: usize) -> Self {
        let distinct: HashSet<&str> = approver_ids.iter().map(String::as_str).collect();
        let have = distinct.len();
        Self {
            met: have >= required,
            have,
            required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_not_met_below_required() {
        let approvers = vec!["a1".to_string(), "a2".to_string()];
        let quorum = Quorum::evaluate(&approvers, 3);
        assert!(!quorum.met);
        assert_eq!(quorum.have, 2);
    }

    #[test]
    fn quorum_met_at_required() {
        let approvers = vec!["a1".to_string(), "a2".to_string(), "a3".to_string()];
        let quorum = Quorum::evaluate(&approvers, 3);
        assert!(quorum.met);
    }

    #[test]
    fn duplicate_approver_ids_count_once() {
        let approvers = vec!["a1".to_string(), "a1".to_string(), "a2".to_string()];
        let quorum = Quorum::evaluate(&approvers, 2);
        assert_eq!(quorum.have, 2);
        assert!(quorum.met);
    }

    #[test]
    fn authorized_set_membership() {
        let config = QuorumConfig::new(["a1".to_string(), "a2".to_string()], 2);
        assert!(config.is_authorized("a1"));
        assert!(!config.is_authorized("a3"));
    }
}
