//! Skillmesh Settlement - The attendance rule, as a pure decision
//!
//! Given session timing and the recorded online minutes for each party,
//! decide who is entitled to the escrowed funds after the session window
//! closes. Nothing here mutates state, and nothing here is cached: callers
//! re-evaluate from live counters on every claim.
//!
//! The rule: the provider qualifies for payment when they were online for
//! at least 70% of the scheduled duration. The comparison is `>=` and is
//! done in integer arithmetic, so a 60-minute session with exactly 42
//! provider minutes qualifies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skillmesh_types::{Booking, MarketError, Result};

/// Numerator of the attendance threshold fraction (7/10 = 70%)
const THRESHOLD_NUM: u64 = 7;
/// Denominator of the attendance threshold fraction
const THRESHOLD_DEN: u64 = 10;

/// Final fund disposition for a booking's escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementDecision {
    /// The provider met the attendance threshold; funds go to them
    ReleaseToProvider,
    /// The provider fell short (no-show, left early); funds go back
    RefundToStudent,
}

/// Minutes the provider must be online to qualify for payment
///
/// Smallest whole number of minutes satisfying the 70% rule.
pub fn required_minutes(duration_minutes: u32) -> u32 {
    let exact = duration_minutes as u64 * THRESHOLD_NUM;
    exact.div_ceil(THRESHOLD_DEN) as u32
}

/// Whether `online_minutes` satisfies the 70% rule for `duration_minutes`
pub fn provider_qualifies(duration_minutes: u32, online_minutes: u32) -> bool {
    online_minutes as u64 * THRESHOLD_DEN >= duration_minutes as u64 * THRESHOLD_NUM
}

/// Reject any settlement action while the session window is still open
///
/// This is a strict gate: attendance counters are irrelevant until
/// `now > session_end`.
pub fn ensure_session_over(booking: &Booking, now: DateTime<Utc>) -> Result<()> {
    let session_end = booking.session_end();
    if now <= session_end {
        return Err(MarketError::SettlementTooEarly {
            session_end: session_end.to_rfc3339(),
        });
    }
    Ok(())
}

/// Decide the settlement for a booking whose session window has closed
///
/// Fails with `SettlementTooEarly` before the gate; afterwards the decision
/// follows the provider's live online-minutes counter.
pub fn resolve(booking: &Booking, now: DateTime<Utc>) -> Result<SettlementDecision> {
    ensure_session_over(booking, now)?;
    if provider_qualifies(booking.skill.duration_minutes, booking.provider_online_minutes) {
        Ok(SettlementDecision::ReleaseToProvider)
    } else {
        Ok(SettlementDecision::RefundToStudent)
    }
}
