//! Exchange error taxonomy.
//!
//! Adapters translate venue-specific failures (HTTP codes, error payloads)
//! into this closed enum; the engine matches on variants instead of probing
//! exception shapes.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// The venue does not know the referenced order. Idempotent success
    /// for cancels; falls through to placement for stop replacement.
    #[error("Unknown order")]
    UnknownOrder,

    /// Margin or balance too low to accept the order.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// Venue rate limit hit (HTTP 429 or equivalent).
    #[error("Rate limited")]
    RateLimit,

    /// Network / timeout / transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Order rejected by the venue with a reason.
    #[error("Order rejected: {0}")]
    Rejected(String),
}

impl ExchangeError {
    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::UnknownOrder)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit)
    }

    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::InsufficientBalance)
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
