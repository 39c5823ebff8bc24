// SPDX-License-Identifier: MIT OR Apache-2.0
//! Strongly-typed UUID wrappers so a `PackageId` can never be passed where a
//! `ManifestId` is expected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(PackageId, "Identifies a submitted product package.");
uuid_id!(ManifestId, "Identifies a manifest draft/signed/applied record.");
uuid_id!(SignatureId, "Identifies a detached manifest signature.");
uuid_id!(UpgradeId, "Identifies a multisig upgrade proposal.");
uuid_id!(ApprovalId, "Identifies a single approver's approval record.");
uuid_id!(EventId, "Identifies an audit chain event.");
uuid_id!(TaskId, "Identifies a validation job.");
uuid_id!(PublishTaskId, "Identifies a publish task for one target.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_json() {
        let id = PackageId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: PackageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn distinct_id_types_do_not_compare_equal_by_accident() {
        let uuid = Uuid::new_v4();
        let package = PackageId::from_uuid(uuid);
        let manifest = ManifestId::from_uuid(uuid);
        assert_eq!(package.as_uuid(), manifest.as_uuid());
        // Different wrapper types, so they are simply not comparable -
        // the point is that the compiler would reject `package == manifest`.
    }
}
