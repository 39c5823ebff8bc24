// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declarative sampling: which event types are always appended, and at what
//! rate the rest are thinned.

use rand::Rng;
use std::collections::HashSet;

/// Event types the chain must never drop, per the kernel's audit policy —
/// anything load-bearing for manifest, upgrade, allocation, or publish
/// history.
const ALWAYS_APPENDED: &[&str] = &[
    "manifest.signed",
    "manifest.update",
    "manifest.applied",
    "upgrade.submitted",
    "upgrade.approval",
    "upgrade.applied",
    "allocation.requested",
    "policy.decision",
    "publish.completed",
];

/// Decides whether a given event type is appended unconditionally or
/// subject to a sampling rate. High-volume, low-value event types
/// (heartbeats, reason traces) may be thinned; everything else is kept.
#[derive(Debug, Clone)]
pub struct SamplingPolicy {
    always_appended: HashSet<String>,
    sampled_rates: Vec<(String, f64)>,
}

impl SamplingPolicy {
    /// A policy that appends every event unconditionally.
    #[must_use]
    pub fn append_all() -> Self {
        Self {
            always_appended: ALWAYS_APPENDED.iter().map(|s| s.to_string()).collect(),
            sampled_rates: Vec::new(),
        }
    }

    /// Build a policy from `AUDIT_SAMPLING_POLICY`-style rules: event type
    /// prefix paired with a keep-rate in `[0.0, 1.0]`. Event types in the
    /// always-appended set are never affected by these rules.
    #[must_use]
    pub fn from_rules(rules: Vec<(String, f64)>) -> Self {
        Self {
            always_appended: ALWAYS_APPENDED.iter().map(|s| s.to_string()).collect(),
            sampled_rates: rules,
        }
    }

    /// Returns `true` if an event of `event_type` should be skipped this
    /// time, per a random draw against the configured keep-rate.
    #[must_use]
    pub fn is_sampled_out(&self, event_type: &str) -> bool {
        if self.always_appended.contains(event_type) {
            return false;
        }
        for (prefix, rate) in &self.sampled_rates {
            if event_type.starts_with(prefix.as_str()) {
                let keep = rate.clamp(0.0, 1.0);
                return rand::thread_rng().gen::<f64>() >= keep;
            }
        }
        false
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::append_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_event_types_are_never_sampled_out() {
        let policy = SamplingPolicy::from_rules(vec![("heartbeat".into(), 0.0)]);
        assert!(!policy.is_sampled_out("manifest.signed"));
        assert!(!policy.is_sampled_out("upgrade.applied"));
    }

    #[test]
    fn zero_rate_always_samples_out_non_critical_types() {
        let policy = SamplingPolicy::from_rules(vec![("heartbeat".into(), 0.0)]);
        for _ in 0..20 {
            assert!(policy.is_sampled_out("heartbeat.tick"));
        }
    }

    #[test]
    fn full_rate_never_samples_out() {
        let policy = SamplingPolicy::from_rules(vec![("heartbeat".into(), 1.0)]);
        for _ in 0..20 {
            assert!(!policy.is_sampled_out("heartbeat.tick"));
        }
    }

    #[test]
    fn unmatched_event_type_defaults_to_kept() {
        let policy = SamplingPolicy::from_rules(vec![("heartbeat".into(), 0.0)]);
        assert!(!policy.is_sampled_out("some.other.event"));
    }
}
