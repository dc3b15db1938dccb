//! Typed identifiers.
//!
//! Internally generated identifiers (orders, artifacts, grants, audit records) wrap a canonical
//! [`ShardableUuid`]. References supplied by external collaborators (authenticated actors,
//! patients, test catalogue codes) are opaque non-empty strings.

use crate::error::ClinicalResult;
use securemed_types::NonEmptyText;
use securemed_uuid::ShardableUuid;
use std::fmt;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(ShardableUuid);

        impl $name {
            pub fn new() -> Self {
                Self(ShardableUuid::new())
            }

            /// Parses a canonical 32-character identifier.
            pub fn parse(input: &str) -> ClinicalResult<Self> {
                Ok(Self(ShardableUuid::parse(input)?))
            }

            pub fn as_shardable(&self) -> &ShardableUuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! text_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(NonEmptyText);

        impl $name {
            pub fn new(input: impl AsRef<str>) -> ClinicalResult<Self> {
                Ok(Self(NonEmptyText::new(input)?))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifies a [`crate::orders::ClinicalOrder`].
    OrderId
);
uuid_id!(
    /// Identifies a [`crate::artifacts::ResultArtifact`] and its sealed blob directory.
    ArtifactId
);
uuid_id!(
    /// Identifies an [`crate::grants::AccessGrant`].
    GrantId
);
uuid_id!(AuditRecordId);

text_ref!(
    /// Identity of an authenticated actor, as issued by the external identity provider.
    ActorId
);
text_ref!(
    /// Reference to a patient record owned by the wider platform.
    PatientRef
);
text_ref!(
    /// Laboratory catalogue code of a single test (for example `CBC` or `K`).
    TestCode
);

impl From<ArtifactId> for ShardableUuid {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}
