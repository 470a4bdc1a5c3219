//! Review types for Skillmesh

use crate::{BookingId, ReviewId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A session review, unique per booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Unique review ID
    pub id: ReviewId,
    /// The completed booking being reviewed
    pub booking_id: BookingId,
    /// The provider being rated
    pub provider: UserId,
    /// The student who filed the review
    pub student: UserId,
    /// Rating, 1 to 5
    pub rating: u8,
    /// Free-text comment
    pub comment: String,
    /// When the review was filed
    pub created_at: DateTime<Utc>,
}

/// Aggregate trust figures for a provider, recomputed on every review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTrust {
    /// The provider
    pub provider: UserId,
    /// Mean rating across all reviews
    pub avg_rating: f32,
    /// Number of reviews filed
    pub review_count: u32,
    /// Number of completed sessions observed
    pub completed_sessions: u32,
    /// Trust score, 0-100
    pub trust_score: u32,
    /// When the aggregates were last recomputed
    pub updated_at: DateTime<Utc>,
}
