//! Error types for Skillmesh
//!
//! All settlement failures are explicit. Lost races on conditional writes
//! are modelled as benign conflicts, not faults.

use thiserror::Error;

/// Result type for Skillmesh operations
pub type Result<T> = std::result::Result<T, MarketError>;

/// Skillmesh error types
#[derive(Debug, Clone, Error)]
pub enum MarketError {
    // ========================================================================
    // Validation Errors
    // ========================================================================

    /// Missing or malformed input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Review rating outside the 1-5 range
    #[error("Invalid rating {rating}: must be between 1 and 5")]
    InvalidRating { rating: u8 },

    // ========================================================================
    // Not-Found Errors
    // ========================================================================

    /// Skill not found or no longer listed
    #[error("Skill {skill_id} not found")]
    SkillNotFound { skill_id: String },

    /// Booking not found
    #[error("Booking {booking_id} not found")]
    BookingNotFound { booking_id: String },

    /// No escrow exists for the booking
    #[error("No escrow found for booking {booking_id}")]
    EscrowNotFound { booking_id: String },

    /// Wallet not found
    #[error("Wallet for user {user_id} not found")]
    WalletNotFound { user_id: String },

    // ========================================================================
    // Booking State Errors
    // ========================================================================

    /// Requested status change is not an edge of the booking state graph
    #[error("Booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        booking_id: String,
        from: String,
        to: String,
    },

    /// Actor lacks permission for the attempted edge
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Attendance or heartbeat call against a booking whose session is not running
    #[error("Booking {booking_id} is {status}; session actions require an approved booking")]
    SessionNotActive { booking_id: String, status: String },

    // ========================================================================
    // Escrow Errors
    // ========================================================================

    /// Second hold attempt on an already-escrowed booking
    #[error("Escrow already exists for booking {booking_id}")]
    DuplicateEscrow { booking_id: String },

    /// Release/refund/dispute attempted on an escrow that is not held
    #[error("Escrow {escrow_id} is {status}, expected held")]
    InvalidEscrowState { escrow_id: String, status: String },

    /// Wallet-funded hold against insufficient spendable balance
    #[error("Insufficient funds for user {user_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        user_id: String,
        requested: String,
        available: String,
    },

    // ========================================================================
    // Settlement Errors
    // ========================================================================

    /// Settlement claimed before the session window closed
    #[error("Settlement not available until session ends at {session_end}")]
    SettlementTooEarly { session_end: String },

    /// Payment claim while the provider is below the attendance threshold
    #[error("Provider online {online_minutes} of required {required_minutes} minutes")]
    ProviderBelowThreshold {
        online_minutes: u32,
        required_minutes: u32,
    },

    /// Refund claim after the provider met the attendance threshold
    #[error("Provider met the attendance threshold ({online_minutes} >= {required_minutes} minutes)")]
    ProviderMetThreshold {
        online_minutes: u32,
        required_minutes: u32,
    },

    // ========================================================================
    // Review Errors
    // ========================================================================

    /// A review was already filed for this booking
    #[error("Review already filed for booking {booking_id}")]
    ReviewAlreadyFiled { booking_id: String },

    /// Reviews are only accepted for completed bookings
    #[error("Booking {booking_id} is not completed")]
    BookingNotCompleted { booking_id: String },

    // ========================================================================
    // Money Errors
    // ========================================================================

    /// Amount overflow or a subtraction below zero
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Currency mismatch
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },
}

impl MarketError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Lost races on conditional writes surface as these errors; callers
    /// (and the sweeper in particular) treat them as "someone else already
    /// acted" rather than a system fault.
    pub fn is_benign_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::InvalidEscrowState { .. }
        )
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidRating { .. } => "INVALID_RATING",
            Self::SkillNotFound { .. } => "SKILL_NOT_FOUND",
            Self::BookingNotFound { .. } => "BOOKING_NOT_FOUND",
            Self::EscrowNotFound { .. } => "ESCROW_NOT_FOUND",
            Self::WalletNotFound { .. } => "WALLET_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::SessionNotActive { .. } => "SESSION_NOT_ACTIVE",
            Self::DuplicateEscrow { .. } => "DUPLICATE_ESCROW",
            Self::InvalidEscrowState { .. } => "INVALID_ESCROW_STATE",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::SettlementTooEarly { .. } => "SETTLEMENT_TOO_EARLY",
            Self::ProviderBelowThreshold { .. } => "PROVIDER_BELOW_THRESHOLD",
            Self::ProviderMetThreshold { .. } => "PROVIDER_MET_THRESHOLD",
            Self::ReviewAlreadyFiled { .. } => "REVIEW_ALREADY_FILED",
            Self::BookingNotCompleted { .. } => "BOOKING_NOT_COMPLETED",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
        }
    }
}
