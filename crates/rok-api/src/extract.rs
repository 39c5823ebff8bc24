// SPDX-License-Identifier: MIT OR Apache-2.0
//! Principal extraction.
//!
//! Terminating mTLS and verifying bearer-token claims both happen upstream
//! of this process (at the ingress/service mesh layer); by the time a
//! request reaches here, the resolved identity and roles are forwarded as
//! `X-Principal-Id` / `X-Principal-Roles` headers. This extractor trusts
//! those headers unconditionally, so the daemon must only ever be reachable
//! through that trusted ingress.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use rok_core::{Principal, Role};

/// An extractor that resolves the caller's [`Principal`] from trusted
/// forwarded-identity headers, or rejects the request as unauthenticated.
pub struct AuthenticatedPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-principal-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .ok_or((StatusCode::UNAUTHORIZED, "missing principal"))?;

        let roles: Vec<Role> = parts
            .headers
            .get("x-principal-roles")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .split(',')
            .filter_map(parse_role)
            .collect();

        Ok(Self(Principal {
            id: id.to_string(),
            roles,
        }))
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s.trim() {
        "super_admin" => Some(Role::SuperAdmin),
        "division_lead" => Some(Role::DivisionLead),
        "operator" => Some(Role::Operator),
        "auditor" => Some(Role::Auditor),
        "submitter" => Some(Role::Submitter),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_roles_and_skips_unknown() {
        assert_eq!(parse_role("super_admin"), Some(Role::SuperAdmin));
        assert_eq!(parse_role("bogus"), None);
    }
}
