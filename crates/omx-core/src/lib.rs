//! Core domain types for the omx market-making engine.
//!
//! This crate provides the fundamental types shared across the system:
//! - `Price`, `Size`: precision-safe numeric types
//! - `OrderSide`, `OrderType`, `OrderStatus`, `TimeInForce`: trading enums
//! - `OpenOrder`, `DesiredOrder`: order representations
//! - `PositionSnapshot`, `AccountSnapshot`, `DepthSnapshot`, `TickerSnapshot`:
//!   feed payloads

pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod position;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{AccountSnapshot, DepthSnapshot, TickerSnapshot};
pub use order::{
    ClientOrderId, DesiredOrder, OpenOrder, OrderSide, OrderStatus, OrderType, TimeInForce,
};
pub use position::{PositionSnapshot, POSITION_EPSILON};
