// SPDX-License-Identifier: MIT OR Apache-2.0
//! Roles and the authenticated principal extracted from a request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A role a principal may hold. Roles are not hierarchical beyond the
/// explicit checks each route performs; `SuperAdmin` is simply the role
/// required for break-glass operations (emergency apply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Break-glass operations: emergency apply, approver-set changes.
    SuperAdmin,
    /// Day-to-day release management: create/apply manifests, resubmit publishes.
    DivisionLead,
    /// Operational actions short of release decisions (retries, inspection).
    Operator,
    /// Read-only access to audit trails and manifest history.
    Auditor,
    /// Package submission only; cannot sign, approve, or apply.
    Submitter,
}

impl Role {
    /// Returns `true` if this role may perform submitter-level actions
    /// (create manifests and above). Matches the `submitter+` guard in the
    /// manifest lifecycle table.
    #[must_use]
    pub fn at_least_submitter(self) -> bool {
        !matches!(self, Self::Auditor)
    }
}

/// The authenticated caller of a request, resolved from mTLS peer identity
/// or bearer-token claims by the request surface before any handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Principal {
    /// Stable identifier for the caller (subject claim, or mTLS CN).
    pub id: String,
    /// Roles held by this principal. A principal may hold more than one.
    pub roles: Vec<Role>,
}

impl Principal {
    /// Construct a principal with a single role.
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            roles: vec![role],
        }
    }

    /// Returns `true` if this principal holds the given role.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Returns `true` if this principal holds any of the given roles.
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auditor_is_not_submitter_eligible() {
        assert!(!Role::Auditor.at_least_submitter());
        assert!(Role::DivisionLead.at_least_submitter());
    }

    #[test]
    fn principal_role_checks() {
        let p = Principal::new("alice", Role::SuperAdmin);
        assert!(p.has_role(Role::SuperAdmin));
        assert!(!p.has_role(Role::Auditor));
        assert!(p.has_any_role(&[Role::Auditor, Role::SuperAdmin]));
    }
}
