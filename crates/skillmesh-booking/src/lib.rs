//! Skillmesh Booking - The booking state machine
//!
//! Owns the booking lifecycle from creation to terminal settlement:
//!
//! ```text
//! pending_payment → requested → approved → completed
//!                       |            \
//!                       |             → cancelled
//!                       → rejected / cancelled
//! ```
//!
//! Terminal statuses are absorbing. Every transition is a conditional write
//! under the booking store's write lock: the status precondition and the
//! escrow side effect are checked and applied as one unit, so a lost race
//! surfaces as a benign `InvalidTransition` and never as a partial write.

mod catalog;
mod notify;

pub use catalog::SkillCatalog;
pub use notify::{InMemoryNotifier, Notifier};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use skillmesh_escrow::{DisputeResolution, EscrowEngine, PaymentVerifier};
use skillmesh_settlement::{required_minutes, resolve, SettlementDecision};
use skillmesh_types::{
    Actor, Booking, BookingId, BookingStatus, MarketError, Notification, NotificationKind,
    PaymentStatus, Result, Role, SkillId, UserId,
};

/// The booking state machine
///
/// Engines are cheap-to-clone handles; the booking store, catalog, escrow
/// engine, gateway verifier and notifier are shared behind `Arc`s.
#[derive(Clone)]
pub struct BookingEngine {
    bookings: Arc<RwLock<HashMap<BookingId, Booking>>>,
    catalog: SkillCatalog,
    escrow: EscrowEngine,
    verifier: Arc<dyn PaymentVerifier>,
    notifier: Arc<dyn Notifier>,
}

impl BookingEngine {
    pub fn new(
        catalog: SkillCatalog,
        escrow: EscrowEngine,
        verifier: Arc<dyn PaymentVerifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            bookings: Arc::new(RwLock::new(HashMap::new())),
            catalog,
            escrow,
            verifier,
            notifier,
        }
    }

    /// The escrow engine this state machine settles through
    pub fn escrow(&self) -> &EscrowEngine {
        &self.escrow
    }

    /// The skill catalog bookings are created against
    pub fn catalog(&self) -> &SkillCatalog {
        &self.catalog
    }

    // ========================================================================
    // Creation & payment
    // ========================================================================

    /// Create a booking in `pending_payment`
    ///
    /// Copies the skill snapshot immutably; later catalog edits never touch
    /// this booking.
    pub async fn create(
        &self,
        student: UserId,
        skill_id: SkillId,
        start_at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<Booking> {
        let skill = self.catalog.bookable(&skill_id).await?;
        if student == skill.provider {
            return Err(MarketError::invalid_input(
                "student",
                "providers cannot book their own skill",
            ));
        }

        let now = Utc::now();
        let booking = Booking {
            id: BookingId::new(),
            student,
            provider: skill.provider,
            skill: skill.snapshot(),
            start_at,
            note,
            status: BookingStatus::PendingPayment,
            payment_status: PaymentStatus::Pending,
            meeting_ref: None,
            provider_joined: false,
            student_joined: false,
            joined_at: None,
            provider_online_minutes: 0,
            student_online_minutes: 0,
            created_at: now,
            updated_at: now,
        };
        self.bookings.write().await.insert(booking.id, booking.clone());
        info!(booking = %booking.id, student = %student, provider = %booking.provider, "booking created");
        Ok(booking)
    }

    /// Confirm a gateway payment and move the booking to `requested`
    ///
    /// Verifies the gateway callback, checks the captured amount against the
    /// snapshot price, creates the escrow hold and transitions the booking,
    /// all under the booking write lock. A second attempt finds the booking
    /// out of `pending_payment` and fails; a duplicate hold is impossible.
    pub async fn confirm_payment(
        &self,
        booking_id: BookingId,
        order_ref: &str,
        signature: &str,
    ) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_edge(booking, BookingStatus::Requested)?;

            let payment = self.verifier.verify(order_ref, signature).await?;
            if payment.amount != booking.skill.price {
                return Err(MarketError::invalid_input(
                    "amount",
                    "captured amount does not match the booked price",
                ));
            }

            self.escrow
                .hold_verified(booking_id, booking.student, booking.provider, payment)
                .await?;

            booking.status = BookingStatus::Requested;
            booking.payment_status = PaymentStatus::Paid;
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![Notification::new(
                snapshot.provider,
                booking_id,
                NotificationKind::BookingRequested,
            )];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "payment confirmed, booking requested");
        Ok(snapshot)
    }

    /// Pay for a booking from the student's wallet balance
    ///
    /// Same exactly-once transition as `confirm_payment`, funded from the
    /// wallet instead of the gateway.
    pub async fn pay_from_wallet(&self, booking_id: BookingId) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_edge(booking, BookingStatus::Requested)?;

            self.escrow
                .hold(
                    booking_id,
                    booking.student,
                    booking.provider,
                    booking.skill.price,
                )
                .await?;

            booking.status = BookingStatus::Requested;
            booking.payment_status = PaymentStatus::Paid;
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![Notification::new(
                snapshot.provider,
                booking_id,
                NotificationKind::BookingRequested,
            )];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "wallet payment held, booking requested");
        Ok(snapshot)
    }

    // ========================================================================
    // Provider decision
    // ========================================================================

    /// Provider accepts the booking; mints the meeting reference
    pub async fn approve(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_provider(booking, actor)?;
            require_edge(booking, BookingStatus::Approved)?;

            let meeting_ref = format!("meet_{}", Uuid::new_v4());
            booking.status = BookingStatus::Approved;
            booking.meeting_ref = Some(meeting_ref.clone());
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![
                Notification::new(
                    snapshot.student,
                    booking_id,
                    NotificationKind::BookingApproved {
                        meeting_ref: meeting_ref.clone(),
                    },
                ),
                Notification::new(
                    snapshot.provider,
                    booking_id,
                    NotificationKind::BookingApproved { meeting_ref },
                ),
            ];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "booking approved");
        Ok(snapshot)
    }

    /// Provider declines the booking; the escrow is refunded in full
    pub async fn reject(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_provider(booking, actor)?;
            require_edge(booking, BookingStatus::Rejected)?;

            let reason = "declined by provider";
            if booking.payment_status == PaymentStatus::Paid {
                self.escrow.refund(booking_id, reason).await?;
                booking.payment_status = PaymentStatus::Refunded;
            }
            booking.status = BookingStatus::Rejected;
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![
                Notification::new(snapshot.student, booking_id, NotificationKind::BookingRejected),
                Notification::new(
                    snapshot.student,
                    booking_id,
                    NotificationKind::PaymentRefunded {
                        reason: reason.to_string(),
                    },
                ),
            ];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "booking rejected, escrow refunded");
        Ok(snapshot)
    }

    /// Cancel a booking
    ///
    /// Before approval only the student may cancel, and any held escrow is
    /// refunded in full. After approval either party may cancel, but the
    /// disposition is delegated to the attendance rule: the call is only
    /// valid once the session window has closed and the provider did not
    /// qualify, which makes it equivalent to `claim_refund`.
    pub async fn cancel(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let status = self.get(&booking_id).await?.status;
        match status {
            BookingStatus::Requested => self.cancel_requested(booking_id, actor).await,
            BookingStatus::Approved => self.claim_refund(booking_id, actor).await,
            other => Err(MarketError::InvalidTransition {
                booking_id: booking_id.to_string(),
                from: other.to_string(),
                to: BookingStatus::Cancelled.to_string(),
            }),
        }
    }

    async fn cancel_requested(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_student(booking, actor)?;
            require_edge(booking, BookingStatus::Cancelled)?;

            let reason = "cancelled by student";
            if booking.payment_status == PaymentStatus::Paid {
                self.escrow.refund(booking_id, reason).await?;
                booking.payment_status = PaymentStatus::Refunded;
            }
            booking.status = BookingStatus::Cancelled;
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![
                Notification::new(snapshot.provider, booking_id, NotificationKind::BookingCancelled),
                Notification::new(
                    snapshot.student,
                    booking_id,
                    NotificationKind::PaymentRefunded {
                        reason: reason.to_string(),
                    },
                ),
            ];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "booking cancelled by student");
        Ok(snapshot)
    }

    // ========================================================================
    // Session telemetry
    // ========================================================================

    /// Mark a party as joined; idempotent
    ///
    /// The joined flag latches on first call and `joined_at` is stamped on
    /// the first join by either party. Repeat calls change nothing.
    pub async fn record_attendance(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let mut bookings = self.bookings.write().await;
        let booking = get_mut(&mut bookings, &booking_id)?;
        let role = require_party(booking, actor)?;
        require_active_session(booking)?;

        let flag = match role {
            Role::Student => &mut booking.student_joined,
            Role::Provider => &mut booking.provider_joined,
        };
        if !*flag {
            *flag = true;
            if booking.joined_at.is_none() {
                booking.joined_at = Some(Utc::now());
            }
            booking.updated_at = Utc::now();
            info!(booking = %booking_id, %role, "party joined session");
        }
        Ok(booking.clone())
    }

    /// Add online minutes for a party; returns the new counter
    ///
    /// Counters only ever increase. Concurrent heartbeats are additive and
    /// commutative; only one authenticated caller exists per role.
    pub async fn heartbeat(
        &self,
        booking_id: BookingId,
        actor: Actor,
        increment_minutes: u32,
    ) -> Result<u32> {
        if increment_minutes == 0 {
            return Err(MarketError::invalid_input(
                "increment_minutes",
                "must be greater than zero",
            ));
        }
        let mut bookings = self.bookings.write().await;
        let booking = get_mut(&mut bookings, &booking_id)?;
        let role = require_party(booking, actor)?;
        require_active_session(booking)?;

        let (joined, counter) = match role {
            Role::Student => (booking.student_joined, &mut booking.student_online_minutes),
            Role::Provider => (booking.provider_joined, &mut booking.provider_online_minutes),
        };
        if !joined {
            return Err(MarketError::invalid_input(
                "role",
                "join the session before sending heartbeats",
            ));
        }
        *counter = counter.saturating_add(increment_minutes);
        let minutes = *counter;
        booking.updated_at = Utc::now();
        Ok(minutes)
    }

    // ========================================================================
    // Settlement claims
    // ========================================================================

    /// Provider-side settlement: release the escrow and complete the booking
    ///
    /// Only after the session window closes, and only if the provider was
    /// online for at least 70% of the scheduled duration. Either party (or
    /// the operator) may trigger it; the funds can only go one way.
    pub async fn claim_payment(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_party_or_operator(booking, actor)?;
            require_edge(booking, BookingStatus::Completed)?;

            match resolve(booking, Utc::now())? {
                SettlementDecision::ReleaseToProvider => {}
                SettlementDecision::RefundToStudent => {
                    return Err(MarketError::ProviderBelowThreshold {
                        online_minutes: booking.provider_online_minutes,
                        required_minutes: required_minutes(booking.skill.duration_minutes),
                    });
                }
            }

            self.escrow.release(booking_id).await?;

            booking.status = BookingStatus::Completed;
            booking.payment_status = PaymentStatus::Released;
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![
                Notification::new(snapshot.provider, booking_id, NotificationKind::PaymentReleased),
                Notification::new(snapshot.student, booking_id, NotificationKind::PaymentReleased),
            ];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "session completed, escrow released");
        Ok(snapshot)
    }

    /// Explicit "complete session" entry point
    ///
    /// Historically this released the full amount unconditionally; it now
    /// takes the same attendance-gated road as `claim_payment`.
    pub async fn complete(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        self.claim_payment(booking_id, actor).await
    }

    /// Student-side settlement: refund the escrow and cancel the booking
    ///
    /// Only after the session window closes, and only if the provider fell
    /// short of the attendance threshold.
    pub async fn claim_refund(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            require_party_or_operator(booking, actor)?;
            require_edge(booking, BookingStatus::Cancelled)?;

            match resolve(booking, Utc::now())? {
                SettlementDecision::RefundToStudent => {}
                SettlementDecision::ReleaseToProvider => {
                    return Err(MarketError::ProviderMetThreshold {
                        online_minutes: booking.provider_online_minutes,
                        required_minutes: required_minutes(booking.skill.duration_minutes),
                    });
                }
            }

            let reason = "attendance below threshold";
            self.escrow.refund(booking_id, reason).await?;

            booking.status = BookingStatus::Cancelled;
            booking.payment_status = PaymentStatus::Refunded;
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = vec![
                Notification::new(
                    snapshot.student,
                    booking_id,
                    NotificationKind::PaymentRefunded {
                        reason: reason.to_string(),
                    },
                ),
                Notification::new(snapshot.provider, booking_id, NotificationKind::BookingCancelled),
            ];
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "refund claimed, booking cancelled");
        Ok(snapshot)
    }

    // ========================================================================
    // Disputes
    // ========================================================================

    /// A party freezes settlement pending operator review
    pub async fn open_dispute(
        &self,
        booking_id: BookingId,
        actor: Actor,
        reason: &str,
    ) -> Result<Booking> {
        let mut bookings = self.bookings.write().await;
        let booking = get_mut(&mut bookings, &booking_id)?;
        require_party(booking, actor)?;
        require_active_session(booking)?;

        self.escrow.dispute(booking_id, reason).await?;
        booking.updated_at = Utc::now();
        warn!(booking = %booking_id, reason, "dispute opened");
        Ok(booking.clone())
    }

    /// Operator resolves a disputed escrow and finalises the booking
    pub async fn resolve_dispute(
        &self,
        booking_id: BookingId,
        actor: Actor,
        resolution: DisputeResolution,
        reason: &str,
    ) -> Result<Booking> {
        if !actor.is_operator() {
            return Err(MarketError::unauthorized(
                "only the operator may resolve disputes",
            ));
        }
        let (snapshot, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            let target = match resolution {
                DisputeResolution::Release => BookingStatus::Completed,
                DisputeResolution::Refund => BookingStatus::Cancelled,
            };
            require_edge(booking, target)?;

            self.escrow
                .resolve_dispute(booking_id, resolution, reason)
                .await?;

            booking.status = target;
            booking.payment_status = match resolution {
                DisputeResolution::Release => PaymentStatus::Released,
                DisputeResolution::Refund => PaymentStatus::Refunded,
            };
            booking.updated_at = Utc::now();
            let snapshot = booking.clone();
            let notices = match resolution {
                DisputeResolution::Release => vec![
                    Notification::new(snapshot.provider, booking_id, NotificationKind::PaymentReleased),
                    Notification::new(snapshot.student, booking_id, NotificationKind::PaymentReleased),
                ],
                DisputeResolution::Refund => vec![
                    Notification::new(
                        snapshot.student,
                        booking_id,
                        NotificationKind::PaymentRefunded {
                            reason: reason.to_string(),
                        },
                    ),
                    Notification::new(snapshot.provider, booking_id, NotificationKind::BookingCancelled),
                ],
            };
            (snapshot, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "dispute resolved");
        Ok(snapshot)
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Force-resolve a booking whose start passed without provider approval
    ///
    /// Conditional on the booking still being `requested` with a stale start
    /// time; anything else is a lost race and a no-op (`Ok(false)`).
    pub async fn expire(&self, booking_id: BookingId, now: DateTime<Utc>) -> Result<bool> {
        let (expired, notices) = {
            let mut bookings = self.bookings.write().await;
            let booking = get_mut(&mut bookings, &booking_id)?;
            if booking.status != BookingStatus::Requested || booking.start_at >= now {
                return Ok(false);
            }

            let reason = "provider failed to approve before start";
            if booking.payment_status == PaymentStatus::Paid {
                self.escrow.refund(booking_id, reason).await?;
                booking.payment_status = PaymentStatus::Refunded;
            }
            booking.status = BookingStatus::Cancelled;
            booking.updated_at = Utc::now();
            let notices = vec![
                Notification::new(booking.student, booking_id, NotificationKind::BookingExpired),
                Notification::new(booking.provider, booking_id, NotificationKind::BookingExpired),
            ];
            (true, notices)
        };
        self.emit(notices).await;
        info!(booking = %booking_id, "stale booking expired and refunded");
        Ok(expired)
    }

    /// Bookings still `requested` whose start time has passed
    pub async fn stale_requested(&self, now: DateTime<Utc>) -> Vec<BookingId> {
        let bookings = self.bookings.read().await;
        bookings
            .values()
            .filter(|b| b.status == BookingStatus::Requested && b.start_at < now)
            .map(|b| b.id)
            .collect()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Get a booking snapshot
    pub async fn get(&self, booking_id: &BookingId) -> Result<Booking> {
        let bookings = self.bookings.read().await;
        bookings
            .get(booking_id)
            .cloned()
            .ok_or_else(|| MarketError::BookingNotFound {
                booking_id: booking_id.to_string(),
            })
    }

    /// All bookings where `user` is a party
    pub async fn for_user(&self, user: &UserId) -> Vec<Booking> {
        let bookings = self.bookings.read().await;
        bookings
            .values()
            .filter(|b| b.student == *user || b.provider == *user)
            .cloned()
            .collect()
    }

    async fn emit(&self, notices: Vec<Notification>) {
        for notice in notices {
            self.notifier.notify(notice).await;
        }
    }
}

fn get_mut<'a>(
    bookings: &'a mut HashMap<BookingId, Booking>,
    booking_id: &BookingId,
) -> Result<&'a mut Booking> {
    bookings
        .get_mut(booking_id)
        .ok_or_else(|| MarketError::BookingNotFound {
            booking_id: booking_id.to_string(),
        })
}

fn require_edge(booking: &Booking, target: BookingStatus) -> Result<()> {
    if !booking.status.can_transition_to(target) {
        return Err(MarketError::InvalidTransition {
            booking_id: booking.id.to_string(),
            from: booking.status.to_string(),
            to: target.to_string(),
        });
    }
    Ok(())
}

fn require_active_session(booking: &Booking) -> Result<()> {
    if booking.status != BookingStatus::Approved {
        return Err(MarketError::SessionNotActive {
            booking_id: booking.id.to_string(),
            status: booking.status.to_string(),
        });
    }
    Ok(())
}

fn require_provider(booking: &Booking, actor: Actor) -> Result<()> {
    match actor {
        Actor::Provider(user) if user == booking.provider => Ok(()),
        _ => Err(MarketError::unauthorized(
            "only the provider may act on this booking",
        )),
    }
}

fn require_student(booking: &Booking, actor: Actor) -> Result<()> {
    match actor {
        Actor::Student(user) if user == booking.student => Ok(()),
        _ => Err(MarketError::unauthorized(
            "only the student may act on this booking",
        )),
    }
}

fn require_party(booking: &Booking, actor: Actor) -> Result<Role> {
    match actor {
        Actor::Student(user) if user == booking.student => Ok(Role::Student),
        Actor::Provider(user) if user == booking.provider => Ok(Role::Provider),
        _ => Err(MarketError::unauthorized(
            "actor is not a party to this booking",
        )),
    }
}

fn require_party_or_operator(booking: &Booking, actor: Actor) -> Result<()> {
    if actor.is_operator() {
        return Ok(());
    }
    require_party(booking, actor).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skillmesh_escrow::StaticVerifier;
    use skillmesh_ledger::Ledger;
    use skillmesh_types::{Amount, Currency, Skill};

    struct Fixture {
        engine: BookingEngine,
        notifier: InMemoryNotifier,
        verifier: StaticVerifier,
        student: UserId,
        provider: UserId,
        skill: Skill,
    }

    async fn fixture() -> Fixture {
        let ledger = Ledger::new(Currency::Usd);
        let escrow = EscrowEngine::new(ledger);
        let catalog = SkillCatalog::new();
        let verifier = StaticVerifier::new();
        let notifier = InMemoryNotifier::new();
        let engine = BookingEngine::new(
            catalog.clone(),
            escrow,
            Arc::new(verifier.clone()),
            Arc::new(notifier.clone()),
        );

        let student = UserId::new();
        let provider = UserId::new();
        let skill = catalog
            .publish(provider, "Rust mentoring", "ownership", Amount::usd(5_000), 60)
            .await
            .unwrap();

        Fixture {
            engine,
            notifier,
            verifier,
            student,
            provider,
            skill,
        }
    }

    async fn paid_booking(f: &Fixture, start_in_minutes: i64) -> Booking {
        let booking = f
            .engine
            .create(
                f.student,
                f.skill.id,
                Utc::now() + Duration::minutes(start_in_minutes),
                None,
            )
            .await
            .unwrap();
        f.verifier
            .register_order("order_1", f.skill.price, "sig_1")
            .await;
        f.engine
            .confirm_payment(booking.id, "order_1", "sig_1")
            .await
            .unwrap()
    }

    // Bookings whose scheduled window already closed are created directly
    // with a past start time; nothing forbids booking retroactively, and it
    // keeps settlement tests free of sleeps.

    #[tokio::test]
    async fn test_create_requires_known_skill() {
        let f = fixture().await;
        let result = f
            .engine
            .create(
                f.student,
                SkillId::new(),
                Utc::now() + Duration::hours(1),
                None,
            )
            .await;
        assert!(matches!(result, Err(MarketError::SkillNotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_snapshots_skill() {
        let f = fixture().await;
        let booking = f
            .engine
            .create(f.student, f.skill.id, Utc::now() + Duration::hours(1), None)
            .await
            .unwrap();

        f.engine
            .catalog()
            .update_price(&f.skill.id, Amount::usd(9_999))
            .await
            .unwrap();

        let booking = f.engine.get(&booking.id).await.unwrap();
        assert_eq!(booking.skill.price, Amount::usd(5_000));
        assert_eq!(booking.status, BookingStatus::PendingPayment);
    }

    #[tokio::test]
    async fn test_payment_is_exactly_once() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;
        assert_eq!(booking.status, BookingStatus::Requested);
        assert_eq!(booking.payment_status, PaymentStatus::Paid);

        // Second confirmation attempt is rejected before touching the gateway
        let second = f.engine.confirm_payment(booking.id, "order_1", "sig_1").await;
        assert!(matches!(second, Err(MarketError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_wrong_amount_rejected() {
        let f = fixture().await;
        let booking = f
            .engine
            .create(f.student, f.skill.id, Utc::now() + Duration::hours(1), None)
            .await
            .unwrap();
        f.verifier
            .register_order("order_2", Amount::usd(100), "sig_2")
            .await;

        let result = f.engine.confirm_payment(booking.id, "order_2", "sig_2").await;
        assert!(matches!(result, Err(MarketError::InvalidInput { .. })));
        // Booking untouched
        let booking = f.engine.get(&booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::PendingPayment);
        assert!(f.engine.escrow().for_booking(&booking.id).await.is_err());
    }

    #[tokio::test]
    async fn test_only_provider_approves() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;

        let as_student = f.engine.approve(booking.id, Actor::Student(f.student)).await;
        assert!(matches!(as_student, Err(MarketError::Unauthorized { .. })));

        let stranger = f
            .engine
            .approve(booking.id, Actor::Provider(UserId::new()))
            .await;
        assert!(matches!(stranger, Err(MarketError::Unauthorized { .. })));

        let approved = f
            .engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        assert_eq!(approved.status, BookingStatus::Approved);
        assert!(approved.meeting_ref.is_some());
    }

    #[tokio::test]
    async fn test_approve_after_reject_is_conflict() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;
        f.engine
            .reject(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();

        let result = f.engine.approve(booking.id, Actor::Provider(f.provider)).await;
        assert!(matches!(result, Err(MarketError::InvalidTransition { .. })));
        // No wallet/escrow side effects from the failed approve
        let escrow = f.engine.escrow().for_booking(&booking.id).await.unwrap();
        assert_eq!(escrow.status, skillmesh_types::EscrowStatus::Refunded);
    }

    #[tokio::test]
    async fn test_reject_refunds_student() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;

        let rejected = f
            .engine
            .reject(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        assert_eq!(rejected.status, BookingStatus::Rejected);
        assert_eq!(rejected.payment_status, PaymentStatus::Refunded);
        assert_eq!(
            f.engine.escrow().ledger().balance(&f.student).await,
            Amount::usd(5_000)
        );
    }

    #[tokio::test]
    async fn test_student_cancel_before_approval() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;

        let provider_cancel = f.engine.cancel(booking.id, Actor::Provider(f.provider)).await;
        assert!(matches!(provider_cancel, Err(MarketError::Unauthorized { .. })));

        let cancelled = f
            .engine
            .cancel(booking.id, Actor::Student(f.student))
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(
            f.engine.escrow().ledger().balance(&f.student).await,
            Amount::usd(5_000)
        );
    }

    #[tokio::test]
    async fn test_record_attendance_is_idempotent() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();

        let first = f
            .engine
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        assert!(first.provider_joined);
        let joined_at = first.joined_at.unwrap();

        let second = f
            .engine
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        assert_eq!(second.joined_at.unwrap(), joined_at);

        // First join by the other party keeps the original stamp
        let third = f
            .engine
            .record_attendance(booking.id, Actor::Student(f.student))
            .await
            .unwrap();
        assert!(third.student_joined);
        assert_eq!(third.joined_at.unwrap(), joined_at);
    }

    #[tokio::test]
    async fn test_heartbeat_is_monotonic_and_gated() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();

        // Must join first
        let early = f
            .engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 5)
            .await;
        assert!(matches!(early, Err(MarketError::InvalidInput { .. })));

        f.engine
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        let m1 = f
            .engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 5)
            .await
            .unwrap();
        let m2 = f
            .engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 7)
            .await
            .unwrap();
        assert_eq!(m1, 5);
        assert_eq!(m2, 12);

        let zero = f
            .engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 0)
            .await;
        assert!(matches!(zero, Err(MarketError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_claims_rejected_during_session_window() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();

        let claim = f
            .engine
            .claim_payment(booking.id, Actor::Provider(f.provider))
            .await;
        assert!(matches!(claim, Err(MarketError::SettlementTooEarly { .. })));

        let refund = f
            .engine
            .claim_refund(booking.id, Actor::Student(f.student))
            .await;
        assert!(matches!(refund, Err(MarketError::SettlementTooEarly { .. })));
    }

    #[tokio::test]
    async fn test_claim_payment_at_exact_threshold() {
        let f = fixture().await;
        // 60-minute session whose window closed five minutes ago
        let booking = paid_booking(&f, -65).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 42)
            .await
            .unwrap();

        let completed = f
            .engine
            .claim_payment(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        assert_eq!(completed.status, BookingStatus::Completed);
        assert_eq!(completed.payment_status, PaymentStatus::Released);
        assert_eq!(
            f.engine.escrow().ledger().balance(&f.provider).await,
            Amount::usd(5_000)
        );
    }

    #[tokio::test]
    async fn test_claim_payment_below_threshold_fails() {
        let f = fixture().await;
        let booking = paid_booking(&f, -65).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 41)
            .await
            .unwrap();

        let claim = f
            .engine
            .claim_payment(booking.id, Actor::Provider(f.provider))
            .await;
        assert!(matches!(
            claim,
            Err(MarketError::ProviderBelowThreshold {
                online_minutes: 41,
                required_minutes: 42,
            })
        ));

        // The student's refund claim succeeds instead
        let cancelled = f
            .engine
            .claim_refund(booking.id, Actor::Student(f.student))
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(
            f.engine.escrow().ledger().balance(&f.student).await,
            Amount::usd(5_000)
        );
    }

    #[tokio::test]
    async fn test_claim_refund_when_provider_qualified_fails() {
        let f = fixture().await;
        let booking = paid_booking(&f, -65).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .record_attendance(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .heartbeat(booking.id, Actor::Provider(f.provider), 60)
            .await
            .unwrap();

        let refund = f
            .engine
            .claim_refund(booking.id, Actor::Student(f.student))
            .await;
        assert!(matches!(refund, Err(MarketError::ProviderMetThreshold { .. })));
    }

    #[tokio::test]
    async fn test_dispute_freezes_then_operator_resolves() {
        let f = fixture().await;
        let booking = paid_booking(&f, -65).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        f.engine
            .open_dispute(booking.id, Actor::Student(f.student), "provider absent")
            .await
            .unwrap();

        // Claims lose to the dispute freeze
        let claim = f
            .engine
            .claim_refund(booking.id, Actor::Student(f.student))
            .await;
        assert!(matches!(claim, Err(MarketError::InvalidEscrowState { .. })));

        let party_resolve = f
            .engine
            .resolve_dispute(
                booking.id,
                Actor::Student(f.student),
                DisputeResolution::Refund,
                "x",
            )
            .await;
        assert!(matches!(party_resolve, Err(MarketError::Unauthorized { .. })));

        let resolved = f
            .engine
            .resolve_dispute(
                booking.id,
                Actor::Operator,
                DisputeResolution::Refund,
                "operator ruling",
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, BookingStatus::Cancelled);
        assert_eq!(
            f.engine.escrow().ledger().balance(&f.student).await,
            Amount::usd(5_000)
        );
    }

    #[tokio::test]
    async fn test_expire_is_conditional() {
        let f = fixture().await;
        let booking = paid_booking(&f, 1).await;

        // Start time not yet passed: no-op
        assert!(!f.engine.expire(booking.id, Utc::now()).await.unwrap());

        // Approved bookings are never expired
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();
        assert!(!f
            .engine
            .expire(booking.id, Utc::now() + Duration::hours(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expire_refunds_stale_requested() {
        let f = fixture().await;
        let booking = paid_booking(&f, 1).await;

        let expired = f
            .engine
            .expire(booking.id, Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert!(expired);

        let booking = f.engine.get(&booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.payment_status, PaymentStatus::Refunded);
        assert_eq!(
            f.engine.escrow().ledger().balance(&f.student).await,
            Amount::usd(5_000)
        );

        // Both parties were told
        assert!(!f.notifier.for_user(&f.student).await.is_empty());
        assert!(!f.notifier.for_user(&f.provider).await.is_empty());
    }

    #[tokio::test]
    async fn test_notifications_emitted_on_approval() {
        let f = fixture().await;
        let booking = paid_booking(&f, 60).await;
        f.engine
            .approve(booking.id, Actor::Provider(f.provider))
            .await
            .unwrap();

        let student_notices = f.notifier.for_user(&f.student).await;
        assert!(student_notices
            .iter()
            .any(|n| matches!(n.kind, NotificationKind::BookingApproved { .. })));
    }
}
