//! Identity keys for persisted facts
//!
//! Every entity, relationship and repository receives a fresh UUID v4 when it
//! is ingested. Ids are unique across ingestion runs but are not stable: the
//! same source construct ingested twice gets two different ids.
//!
//! The textual form is the hyphenated UUID, e.g.
//! `0b6a35c4-6d0c-4e0a-9a55-34c3c5a1f0de`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! identity_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, process-unique identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Access the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse the hyphenated textual form
            pub fn parse(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId(format!("{}: {}", s, e)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }
    };
}

identity_key!(
    /// Identity of a [`CodeEntity`](crate::entity::CodeEntity)
    EntityId
);

identity_key!(
    /// Identity of a [`Relationship`](crate::relationship::Relationship)
    RelationshipId
);

identity_key!(
    /// Identity of an ingestion session ([`Repository`](crate::repository::Repository))
    RepositoryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = EntityId::new();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_fresh_ids_differ() {
        assert_ne!(EntityId::new(), EntityId::new());
        assert_ne!(RelationshipId::new(), RelationshipId::new());
    }

    #[test]
    fn test_invalid_id() {
        assert!(EntityId::parse("not-a-uuid").is_err());
        assert!(RepositoryId::parse("").is_err());
    }

    #[test]
    fn test_serde_is_plain_string() {
        let id = RelationshipId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
