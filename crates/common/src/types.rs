use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Every entity in the ledger gets its own id type so a user id can never be
/// passed where a course id is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an id from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a billing customer.
    UserId
);

uuid_id!(
    /// Unique identifier for a catalog course.
    CourseId
);

uuid_id!(
    /// Unique identifier for a ledger transaction.
    TransactionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(CourseId::new(), CourseId::new());
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(UserId::from_uuid(uuid).as_uuid(), uuid);
        assert_eq!(Uuid::from(CourseId::from(uuid)), uuid);
    }

    #[test]
    fn ids_serialize_as_bare_uuid() {
        let id = TransactionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let back: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
