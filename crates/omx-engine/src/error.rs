//! Engine error types.

use omx_core::Price;
use omx_exchange::ExchangeError;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::coordinator::Slot;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Slippage guard tripped: the order price strays too far from mark.
    #[error("Price guard: {price} vs reference {reference} (slippage {slippage})")]
    PriceGuard {
        price: Price,
        reference: Price,
        slippage: Decimal,
    },

    /// Nonsensical order price (zero, negative, or crossing the book).
    #[error("Invalid order price: {0}")]
    InvalidPrice(String),

    /// Another operation is in flight on this slot.
    #[error("Slot {0:?} busy")]
    SlotBusy(Slot),

    /// Internal invariant violation; aborts the tick without corrupting state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Exchange(ExchangeError::RateLimit))
    }

    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Self::Exchange(ExchangeError::InsufficientBalance))
    }

    pub fn is_price_guard(&self) -> bool {
        matches!(self, Self::PriceGuard { .. })
    }

    pub fn is_slot_busy(&self) -> bool {
        matches!(self, Self::SlotBusy(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
