//! Notification types for Skillmesh
//!
//! The core emits notification records as a fire-and-forget side channel;
//! delivery and rendering live outside the settlement core.

use crate::{BookingId, NotificationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A paid booking awaits the provider's decision
    BookingRequested,
    /// The provider accepted; carries the meeting reference
    BookingApproved { meeting_ref: String },
    /// The provider declined
    BookingRejected,
    /// The booking was cancelled
    BookingCancelled,
    /// Escrow released to the provider
    PaymentReleased,
    /// Escrow refunded to the student
    PaymentRefunded { reason: String },
    /// The booking expired unapproved and was auto-refunded
    BookingExpired,
}

/// A notification record for one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification ID
    pub id: NotificationId,
    /// The recipient
    pub user_id: UserId,
    /// What happened
    pub kind: NotificationKind,
    /// The booking concerned
    pub booking_id: BookingId,
    /// When the record was emitted
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification for `user_id` about `booking_id`
    pub fn new(user_id: UserId, booking_id: BookingId, kind: NotificationKind) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            kind,
            booking_id,
            created_at: Utc::now(),
        }
    }
}
