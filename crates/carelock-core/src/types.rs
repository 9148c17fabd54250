//! Strong type definitions for Carelock.
//!
//! All identifiers are newtypes to prevent misuse at compile time: a
//! `RoleName` can never be passed where a `PrincipalId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a string-backed identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Declares a 32-byte content-derived identifier newtype.
macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// The zero identifier (sentinel).
            pub const ZERO: Self = Self([0u8; 32]);
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 32] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

string_id!(
    /// The authenticated actor requesting access.
    PrincipalId
);

string_id!(
    /// Name of a role in the policy's inheritance graph.
    RoleName
);

string_id!(
    /// Kind of protected resource, e.g. `patients` or `invoices`.
    ResourceType
);

string_id!(
    /// Identifier of one resource instance within its type.
    ResourceId
);

string_id!(
    /// An operation on a resource, e.g. `read` or `billing.write`.
    Action
);

string_id!(
    /// Physical location (practice site, ward, terminal group).
    LocationId
);

digest_id!(
    /// Identifier of a grant, derived from its holder, kind and creation sequence.
    GrantId
);

digest_id!(
    /// Content address of an audit record: Blake3 of its canonical bytes.
    RecordId
);

digest_id!(
    /// Random per-decision nonce, so identical decisions stay distinct records.
    DecisionId
);

impl GrantId {
    /// Derive a grant id for the `seq`-th history entry of `holder`.
    pub fn derive(holder: &PrincipalId, kind: &str, seq: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"carelock-grant-v0:");
        hasher.update(holder.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(&seq.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

impl DecisionId {
    /// Generate a fresh random decision id.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_id_hex_roundtrip() {
        let id = GrantId::derive(&PrincipalId::new("alice"), "custom", 3);
        let recovered = GrantId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_grant_id_depends_on_sequence() {
        let holder = PrincipalId::new("alice");
        assert_ne!(
            GrantId::derive(&holder, "custom", 1),
            GrantId::derive(&holder, "custom", 2)
        );
    }

    #[test]
    fn test_string_id_display_and_debug() {
        let role = RoleName::new("ASSISTENT");
        assert_eq!(role.to_string(), "ASSISTENT");
        assert_eq!(format!("{:?}", role), "RoleName(ASSISTENT)");
    }

    #[test]
    fn test_decision_ids_are_distinct() {
        assert_ne!(DecisionId::random(), DecisionId::random());
    }

    #[test]
    fn test_record_id_display() {
        let id = RecordId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
    }
}
