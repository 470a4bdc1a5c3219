//! Identity types for Skillmesh
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
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
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

// Party identity types
define_id!(UserId, "user", "Unique identifier for a marketplace user");
define_id!(SkillId, "skill", "Unique identifier for a listed skill");

// Settlement identity types
define_id!(BookingId, "booking", "Unique identifier for a booked session");
define_id!(EscrowId, "escrow", "Unique identifier for an escrow record");
define_id!(TransactionId, "tx", "Unique identifier for a ledger transaction");

// Read-model identity types
define_id!(ReviewId, "review", "Unique identifier for a session review");
define_id!(NotificationId, "notif", "Unique identifier for a notification record");

/// The two marketplace roles a user can hold on a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The party who books and pays for the session
    Student,
    /// The party who lists the skill and delivers the session
    Provider,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student => write!(f, "student"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// Who is performing a state-changing operation
///
/// Permission checks compare the actor against the booking's parties; the
/// operator variant covers scheduled jobs and dispute resolution, which act
/// on behalf of the platform rather than either party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// A user acting in their student role
    Student(UserId),
    /// A user acting in their provider role
    Provider(UserId),
    /// The platform itself (sweeper, dispute operator)
    Operator,
}

impl Actor {
    /// The user behind this actor, if any
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Student(id) | Self::Provider(id) => Some(*id),
            Self::Operator => None,
        }
    }

    /// The role this actor claims, if any
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Student(_) => Some(Role::Student),
            Self::Provider(_) => Some(Role::Provider),
            Self::Operator => None,
        }
    }

    /// Check whether this actor is the platform operator
    pub fn is_operator(&self) -> bool {
        matches!(self, Self::Operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_id_display() {
        let id = BookingId::new();
        let s = id.to_string();
        assert!(s.starts_with("booking_"));
    }

    #[test]
    fn test_id_parsing_roundtrip() {
        let id = UserId::new();
        let parsed = UserId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parsing_without_prefix() {
        let id = EscrowId::new();
        let parsed = EscrowId::parse(&id.0.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_actor_roles() {
        let user = UserId::new();
        assert_eq!(Actor::Student(user).role(), Some(Role::Student));
        assert_eq!(Actor::Provider(user).role(), Some(Role::Provider));
        assert_eq!(Actor::Operator.role(), None);
        assert!(Actor::Operator.is_operator());
        assert_eq!(Actor::Student(user).user_id(), Some(user));
    }
}
