//! Booking types for Skillmesh
//!
//! A booking is one requested tutoring session. Its status is exclusively
//! mutated by the booking state machine; session telemetry is mutated only
//! by authenticated attendance calls from the respective party.

use crate::{Amount, BookingId, Role, SkillId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A skill listed by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Unique skill ID
    pub id: SkillId,
    /// The provider who listed it
    pub provider: UserId,
    /// Listing title
    pub title: String,
    /// Listing description
    pub description: String,
    /// Session price
    pub price: Amount,
    /// Session length in minutes
    pub duration_minutes: u32,
    /// Whether the listing accepts new bookings
    pub active: bool,
    /// When the skill was listed
    pub created_at: DateTime<Utc>,
}

impl Skill {
    /// Copy the fields a booking must keep immutable
    pub fn snapshot(&self) -> SkillSnapshot {
        SkillSnapshot {
            skill_id: self.id,
            title: self.title.clone(),
            price: self.price,
            duration_minutes: self.duration_minutes,
        }
    }
}

/// Immutable copy of a skill taken at booking time
///
/// Later edits to the live skill never retroactively change an in-flight
/// booking; price and duration are read from here only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSnapshot {
    pub skill_id: SkillId,
    pub title: String,
    pub price: Amount,
    pub duration_minutes: u32,
}

/// Lifecycle status of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, awaiting payment confirmation
    PendingPayment,
    /// Paid and escrowed, awaiting provider decision
    Requested,
    /// Provider accepted; session may run
    Approved,
    /// Provider declined (terminal)
    Rejected,
    /// Session settled in the provider's favour (terminal)
    Completed,
    /// Cancelled by a party or the expiry sweep (terminal)
    Cancelled,
}

impl BookingStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Cancelled)
    }

    /// Check whether `target` is a legal edge from this status
    ///
    /// This is the complete transition graph; anything else is rejected.
    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, target),
            (PendingPayment, Requested)
                | (Requested, Approved)
                | (Requested, Rejected)
                | (Requested, Cancelled)
                | (Approved, Completed)
                | (Approved, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingPayment => "pending_payment",
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Payment status of a booking, tracked alongside the lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// No confirmed payment yet
    Pending,
    /// Funds held in escrow
    Paid,
    /// Escrow released to the provider
    Released,
    /// Escrow refunded to the student
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Released => "released",
            Self::Refunded => "refunded",
        };
        write!(f, "{s}")
    }
}

/// One requested tutoring session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique booking ID
    pub id: BookingId,
    /// The student who booked
    pub student: UserId,
    /// The provider who will deliver the session
    pub provider: UserId,
    /// Immutable skill snapshot taken at creation
    pub skill: SkillSnapshot,
    /// Scheduled session start
    pub start_at: DateTime<Utc>,
    /// Optional note from the student
    pub note: Option<String>,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Meeting reference, minted on approval
    pub meeting_ref: Option<String>,
    /// Whether the provider has joined the session
    pub provider_joined: bool,
    /// Whether the student has joined the session
    pub student_joined: bool,
    /// First join by either party
    pub joined_at: Option<DateTime<Utc>>,
    /// Minutes the provider has been online (monotonic)
    pub provider_online_minutes: u32,
    /// Minutes the student has been online (monotonic)
    pub student_online_minutes: u32,
    /// When the booking was created
    pub created_at: DateTime<Utc>,
    /// When the booking was last updated
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// When the scheduled session window closes
    pub fn session_end(&self) -> DateTime<Utc> {
        self.start_at + Duration::minutes(self.skill.duration_minutes as i64)
    }

    /// The role `user` holds on this booking, if any
    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if *user == self.student {
            Some(Role::Student)
        } else if *user == self.provider {
            Some(Role::Provider)
        } else {
            None
        }
    }

    /// Online minutes recorded for one role
    pub fn online_minutes(&self, role: Role) -> u32 {
        match role {
            Role::Student => self.student_online_minutes,
            Role::Provider => self.provider_online_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_graph() {
        use BookingStatus::*;
        assert!(PendingPayment.can_transition_to(Requested));
        assert!(Requested.can_transition_to(Approved));
        assert!(Requested.can_transition_to(Rejected));
        assert!(Requested.can_transition_to(Cancelled));
        assert!(Approved.can_transition_to(Completed));
        assert!(Approved.can_transition_to(Cancelled));

        // No edges out of terminals, no skipping payment
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Requested));
        assert!(!PendingPayment.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Requested));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!BookingStatus::Requested.is_terminal());
        assert!(!BookingStatus::Approved.is_terminal());
    }

    #[test]
    fn test_skill_snapshot_is_a_copy() {
        let mut skill = Skill {
            id: SkillId::new(),
            provider: UserId::new(),
            title: "Rust mentoring".to_string(),
            description: "Ownership and async".to_string(),
            price: Amount::usd(5_000),
            duration_minutes: 60,
            active: true,
            created_at: Utc::now(),
        };
        let snap = skill.snapshot();
        skill.price = Amount::usd(9_999);
        skill.duration_minutes = 30;

        assert_eq!(snap.price, Amount::usd(5_000));
        assert_eq!(snap.duration_minutes, 60);
    }
}
