//! Skillmesh Sweeper - Auto-refund of stale unapproved bookings
//!
//! A booking the provider never acted on before its scheduled start is dead
//! weight holding student money. The sweeper finds `requested` bookings with
//! a past start time and force-resolves each one: escrow refunded, booking
//! cancelled, both parties notified.
//!
//! The sweep is safe to run concurrently with live user actions. Each
//! expiry is a conditional update keyed on the booking still being
//! `requested`; losing that race is a counted no-op, not an error, and a
//! failure on one booking never aborts the rest of the run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use skillmesh_booking::BookingEngine;

/// Sweeper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweep runs
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 120 }
    }
}

impl SweeperConfig {
    /// Read settings from `SKILLMESH_SWEEP_INTERVAL_SECS`, with defaults
    pub fn from_env() -> Self {
        let interval_secs = std::env::var("SKILLMESH_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| Self::default().interval_secs);
        Self { interval_secs }
    }
}

/// Outcome of one sweep run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stale bookings found at scan time
    pub candidates: usize,
    /// Bookings expired and refunded by this run
    pub expired: usize,
    /// Bookings another process settled first (benign)
    pub lost_races: usize,
    /// Bookings that errored; logged and skipped
    pub failures: usize,
}

/// The expiry sweeper
#[derive(Clone)]
pub struct ExpirySweeper {
    engine: BookingEngine,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(engine: BookingEngine, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Run one sweep over all currently-stale bookings
    pub async fn sweep_once(&self) -> SweepReport {
        let now = Utc::now();
        let candidates = self.engine.stale_requested(now).await;
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for booking_id in candidates {
            match self.engine.expire(booking_id, now).await {
                Ok(true) => report.expired += 1,
                Ok(false) => report.lost_races += 1,
                Err(e) if e.is_benign_conflict() => report.lost_races += 1,
                Err(e) => {
                    error!(booking = %booking_id, error = %e, "expiry sweep failed for booking");
                    report.failures += 1;
                }
            }
        }

        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                expired = report.expired,
                lost_races = report.lost_races,
                failures = report.failures,
                "expiry sweep finished"
            );
        }
        report
    }

    /// Sweep on the configured interval until the task is dropped
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval_secs, "expiry sweeper started");
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }
}
