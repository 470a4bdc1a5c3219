//! Skillmesh Types - Canonical domain types for the session marketplace
//!
//! This crate contains all foundational types for Skillmesh with zero
//! dependencies on other skillmesh crates. It defines the complete type
//! system for:
//!
//! - Identity types (UserId, BookingId, EscrowId, etc.)
//! - Money types (minor-unit amounts, currency-aware arithmetic)
//! - Booking lifecycle and session telemetry types
//! - Escrow and transaction types
//! - Review and notification types
//!
//! # Architectural Invariants
//!
//! These types support the core settlement invariants:
//!
//! 1. A booking is paid at most once, and settles at most once
//! 2. Escrow leaves `held` exactly once (released, refunded, or disputed)
//! 3. Wallet balances never go negative
//! 4. Every balance change is mirrored by exactly one transaction record

pub mod booking;
pub mod error;
pub mod escrow;
pub mod identity;
pub mod money;
pub mod notification;
pub mod review;
pub mod transaction;

pub use booking::*;
pub use error::*;
pub use escrow::*;
pub use identity::*;
pub use money::*;
pub use notification::*;
pub use review::*;
pub use transaction::*;

/// Version of the skillmesh types schema
pub const TYPES_VERSION: &str = "0.1.0";
