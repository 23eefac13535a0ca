//! Opaque identifier newtypes shared across the coordination core.
//!
//! Each id wraps a `String` rather than aliasing it directly so the
//! compiler catches a `NodeId` handed where an `EnvelopeId` is expected,
//! matching the `InterfaceId`/`EventId` newtype convention the rest of this
//! stack was grounded on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel id for a namespace's root folder. Cannot be removed or moved.
pub const ROOT_NODE_ID: &str = "root";

/// Prefix applied to client-generated ids whose server-assigned replacement
/// has not yet been learned via a sync batch's `mappings`.
pub const TEMP_ID_PREFIX: &str = "temp_";

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a random id suitable for client-side creation.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(NodeId, "Opaque stable identifier for a tree node.");
string_id!(EnvelopeId, "Opaque unique identifier for an operation envelope.");
string_id!(Namespace, "Tenant-like scope partitioning one tree.");
string_id!(PortId, "Identifier for one client-side tab port.");
string_id!(SubscriptionId, "Identifier for one server-side SSE subscription.");

impl NodeId {
    /// The sentinel id for a namespace's root folder.
    pub fn root() -> Self {
        Self(ROOT_NODE_ID.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_NODE_ID
    }
}

impl EnvelopeId {
    /// A client-generated temp id, destined for server ID remapping.
    pub fn generate_temp() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_node_id_is_sentinel() {
        assert!(NodeId::root().is_root());
        assert!(!NodeId::generate().is_root());
    }

    #[test]
    fn temp_envelope_ids_are_recognized() {
        let temp = EnvelopeId::generate_temp();
        assert!(temp.is_temp());
        let real = EnvelopeId::from("R1");
        assert!(!real.is_temp());
    }
}
