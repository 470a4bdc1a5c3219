//! Skillmesh Trust - Reviews and provider trust scores
//!
//! A read model over the booking state machine's `completed` signal. One
//! review per booking, filed by the booking's student; each filing
//! recomputes the provider's aggregate rating and trust score. Nothing here
//! touches settlement state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use skillmesh_booking::BookingEngine;
use skillmesh_types::{
    Actor, BookingId, BookingStatus, MarketError, ProviderTrust, Result, Review, ReviewId, UserId,
};

/// Weight of the rating component in the trust score (out of 100)
const RATING_WEIGHT: f32 = 70.0;
/// Completed sessions at which the volume component saturates
const VOLUME_CAP: u32 = 30;

struct TrustInner {
    reviews: HashMap<ReviewId, Review>,
    by_booking: HashMap<BookingId, ReviewId>,
    trust: HashMap<UserId, ProviderTrust>,
}

/// The review book and trust recomputation engine
#[derive(Clone)]
pub struct TrustEngine {
    bookings: BookingEngine,
    inner: Arc<RwLock<TrustInner>>,
}

impl TrustEngine {
    pub fn new(bookings: BookingEngine) -> Self {
        Self {
            bookings,
            inner: Arc::new(RwLock::new(TrustInner {
                reviews: HashMap::new(),
                by_booking: HashMap::new(),
                trust: HashMap::new(),
            })),
        }
    }

    /// File a review for a completed booking
    ///
    /// Only the booking's student may file, at most once per booking. On
    /// success the provider's aggregates are recomputed from all reviews
    /// and completed sessions.
    pub async fn file_review(
        &self,
        booking_id: BookingId,
        actor: Actor,
        rating: u8,
        comment: &str,
    ) -> Result<Review> {
        if !(1..=5).contains(&rating) {
            return Err(MarketError::InvalidRating { rating });
        }

        let booking = self.bookings.get(&booking_id).await?;
        if booking.status != BookingStatus::Completed {
            return Err(MarketError::BookingNotCompleted {
                booking_id: booking_id.to_string(),
            });
        }
        match actor {
            Actor::Student(user) if user == booking.student => {}
            _ => {
                return Err(MarketError::unauthorized(
                    "only the booking's student may review it",
                ))
            }
        }

        let completed_sessions = self.completed_sessions(&booking.provider).await;

        let mut inner = self.inner.write().await;
        if inner.by_booking.contains_key(&booking_id) {
            return Err(MarketError::ReviewAlreadyFiled {
                booking_id: booking_id.to_string(),
            });
        }

        let review = Review {
            id: ReviewId::new(),
            booking_id,
            provider: booking.provider,
            student: booking.student,
            rating,
            comment: comment.to_string(),
            created_at: Utc::now(),
        };
        inner.by_booking.insert(booking_id, review.id);
        inner.reviews.insert(review.id, review.clone());

        let trust = recompute(&inner.reviews, booking.provider, completed_sessions);
        info!(
            provider = %booking.provider,
            avg_rating = trust.avg_rating,
            trust_score = trust.trust_score,
            "provider trust recomputed"
        );
        inner.trust.insert(booking.provider, trust);

        Ok(review)
    }

    /// Current trust aggregates for a provider, if any reviews exist
    pub async fn trust_of(&self, provider: &UserId) -> Option<ProviderTrust> {
        self.inner.read().await.trust.get(provider).cloned()
    }

    /// All reviews for a provider, newest first
    pub async fn reviews_for(&self, provider: &UserId) -> Vec<Review> {
        let inner = self.inner.read().await;
        let mut reviews: Vec<Review> = inner
            .reviews
            .values()
            .filter(|r| r.provider == *provider)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reviews
    }

    async fn completed_sessions(&self, provider: &UserId) -> u32 {
        self.bookings
            .for_user(provider)
            .await
            .iter()
            .filter(|b| b.provider == *provider && b.status == BookingStatus::Completed)
            .count() as u32
    }
}

// Mean rating scaled to 70 points plus a volume bonus capped at 30, so a
// long-standing 5-star provider converges on 100.
fn recompute(
    reviews: &HashMap<ReviewId, Review>,
    provider: UserId,
    completed_sessions: u32,
) -> ProviderTrust {
    let ratings: Vec<u8> = reviews
        .values()
        .filter(|r| r.provider == provider)
        .map(|r| r.rating)
        .collect();
    let review_count = ratings.len() as u32;
    let avg_rating = if ratings.is_empty() {
        0.0
    } else {
        ratings.iter().map(|r| *r as f32).sum::<f32>() / ratings.len() as f32
    };

    let rating_component = avg_rating / 5.0 * RATING_WEIGHT;
    let volume_component = completed_sessions.min(VOLUME_CAP) as f32;
    let trust_score = (rating_component + volume_component).round().clamp(0.0, 100.0) as u32;

    ProviderTrust {
        provider,
        avg_rating,
        review_count,
        completed_sessions,
        trust_score,
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skillmesh_booking::{InMemoryNotifier, SkillCatalog};
    use skillmesh_escrow::{EscrowEngine, StaticVerifier};
    use skillmesh_ledger::Ledger;
    use skillmesh_types::{Amount, Currency};

    struct Fixture {
        bookings: BookingEngine,
        trust: TrustEngine,
        verifier: StaticVerifier,
        catalog: SkillCatalog,
        student: UserId,
        provider: UserId,
    }

    async fn fixture() -> Fixture {
        let escrow = EscrowEngine::new(Ledger::new(Currency::Usd));
        let catalog = SkillCatalog::new();
        let verifier = StaticVerifier::new();
        let bookings = BookingEngine::new(
            catalog.clone(),
            escrow,
            Arc::new(verifier.clone()),
            Arc::new(InMemoryNotifier::new()),
        );
        let trust = TrustEngine::new(bookings.clone());
        Fixture {
            bookings,
            trust,
            verifier,
            catalog,
            student: UserId::new(),
            provider: UserId::new(),
        }
    }

    // Drive one booking through payment, session, and release. The session
    // window is created already in the past so settlement opens immediately.
    async fn completed_booking(f: &Fixture, order: &str) -> BookingId {
        let skill = f
            .catalog
            .publish(f.provider, "Rust mentoring", "traits", Amount::usd(5_000), 60)
            .await
            .unwrap();
        let booking = f
            .bookings
            .create(f.student, skill.id, Utc::now() - Duration::minutes(65), None)
            .await
            .unwrap();
        f.verifier.register_order(order, skill.price, "sig").await;
        f.bookings
            .confirm_payment(booking.id, order, "sig")
            .await
            .unwrap();
        f.bookings
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.bookings
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.bookings
            .heartbeat(booking.id, Actor::Provider(f.provider), 60)
            .await
            .unwrap();
        f.bookings
            .claim_payment(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        booking.id
    }

    #[tokio::test]
    async fn test_review_requires_completed_booking() {
        let f = fixture().await;
        let skill = f
            .catalog
            .publish(f.provider, "Chess", "openings", Amount::usd(2_000), 30)
            .await
            .unwrap();
        let booking = f
            .bookings
            .create(f.student, skill.id, Utc::now() + Duration::hours(1), None)
            .await
            .unwrap();

        let result = f
            .trust
            .file_review(booking.id, Actor::Student(f.student), 5, "great")
            .await;
        assert!(matches!(result, Err(MarketError::BookingNotCompleted { .. })));
    }

    #[tokio::test]
    async fn test_review_unique_per_booking() {
        let f = fixture().await;
        let booking_id = completed_booking(&f, "o1").await;

        f.trust
            .file_review(booking_id, Actor::Student(f.student), 5, "great")
            .await
            .unwrap();
        let second = f
            .trust
            .file_review(booking_id, Actor::Student(f.student), 4, "again")
            .await;
        assert!(matches!(second, Err(MarketError::ReviewAlreadyFiled { .. })));
    }

    #[tokio::test]
    async fn test_only_student_reviews() {
        let f = fixture().await;
        let booking_id = completed_booking(&f, "o1").await;

        let as_provider = f
            .trust
            .file_review(booking_id, Actor::Provider(f.provider), 5, "self-praise")
            .await;
        assert!(matches!(as_provider, Err(MarketError::Unauthorized { .. })));

        let stranger = f
            .trust
            .file_review(booking_id, Actor::Student(UserId::new()), 5, "drive-by")
            .await;
        assert!(matches!(stranger, Err(MarketError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_rating_bounds() {
        let f = fixture().await;
        let booking_id = completed_booking(&f, "o1").await;

        for rating in [0u8, 6] {
            let result = f
                .trust
                .file_review(booking_id, Actor::Student(f.student), rating, "x")
                .await;
            assert!(matches!(result, Err(MarketError::InvalidRating { .. })));
        }
    }

    #[tokio::test]
    async fn test_trust_recomputed_on_review() {
        let f = fixture().await;
        let first = completed_booking(&f, "o1").await;
        let second = completed_booking(&f, "o2").await;

        f.trust
            .file_review(first, Actor::Student(f.student), 5, "excellent")
            .await
            .unwrap();
        let trust = f.trust.trust_of(&f.provider).await.unwrap();
        assert_eq!(trust.review_count, 1);
        assert_eq!(trust.avg_rating, 5.0);
        assert_eq!(trust.completed_sessions, 2);
        // 70 rating points + 2 volume points
        assert_eq!(trust.trust_score, 72);

        f.trust
            .file_review(second, Actor::Student(f.student), 3, "fine")
            .await
            .unwrap();
        let trust = f.trust.trust_of(&f.provider).await.unwrap();
        assert_eq!(trust.review_count, 2);
        assert!((trust.avg_rating - 4.0).abs() < f32::EPSILON);
        assert_eq!(trust.trust_score, 58); // 4/5 * 70 + 2
    }
}
