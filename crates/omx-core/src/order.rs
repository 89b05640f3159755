//! Order-related types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Price, Size};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    Stop,
    TrailingStopMarket,
}

impl OrderType {
    /// Whether this type belongs to the STOP family.
    pub fn is_stop_family(&self) -> bool {
        matches!(self, Self::StopMarket | Self::Stop | Self::TrailingStopMarket)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
            Self::StopMarket => write!(f, "STOP_MARKET"),
            Self::Stop => write!(f, "STOP"),
            Self::TrailingStopMarket => write!(f, "TRAILING_STOP_MARKET"),
        }
    }
}

/// Exchange-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses never come back to the book.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Expired | Self::Rejected
        )
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[default]
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    /// Immediate-or-cancel (used for strict-limit closes).
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "GTC"),
            Self::ImmediateOrCancel => write!(f, "IOC"),
        }
    }
}

/// Client order ID for idempotency.
///
/// Every order carries a unique cloid so retries never double-submit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new unique client order ID.
    ///
    /// Format: `omx_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("omx_{ts}_{uuid_short}"))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open order as reported by the exchange's orders feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub client_order_id: ClientOrderId,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Price,
    pub orig_qty: Size,
    pub executed_qty: Size,
    pub stop_price: Price,
    pub reduce_only: bool,
    pub close_position: bool,
    /// Last update time (ms epoch).
    pub update_time: u64,
    /// Creation time (ms epoch).
    pub time: u64,
}

impl OpenOrder {
    /// Stop-like ⇔ nonzero stop trigger OR a STOP-family type.
    pub fn is_stop_like(&self) -> bool {
        self.stop_price.is_positive() || self.order_type.is_stop_family()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this order protects a position on the given closing side.
    pub fn protects_close_side(&self, close_side: OrderSide) -> bool {
        self.side == close_side && (self.reduce_only || self.is_stop_like())
    }
}

/// A quote the engine wants resting on the book.
///
/// The price is pre-rounded to the instrument tick by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DesiredOrder {
    pub side: OrderSide,
    pub price: Price,
    pub amount: Size,
    pub reduce_only: bool,
}

impl DesiredOrder {
    pub fn entry(side: OrderSide, price: Price, amount: Size) -> Self {
        Self {
            side,
            price,
            amount,
            reduce_only: false,
        }
    }

    pub fn close(side: OrderSide, price: Price, amount: Size) -> Self {
        Self {
            side,
            price,
            amount,
            reduce_only: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit_order(stop_price: Price, order_type: OrderType) -> OpenOrder {
        OpenOrder {
            order_id: "1".into(),
            client_order_id: ClientOrderId::from_string("c1".into()),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Sell,
            order_type,
            status: OrderStatus::New,
            price: Price::new(dec!(100)),
            orig_qty: Size::new(dec!(1)),
            executed_qty: Size::ZERO,
            stop_price,
            reduce_only: false,
            close_position: false,
            update_time: 0,
            time: 0,
        }
    }

    #[test]
    fn test_side_opposite_and_sign() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
    }

    #[test]
    fn test_stop_like_by_trigger() {
        let order = limit_order(Price::new(dec!(99)), OrderType::Limit);
        assert!(order.is_stop_like());
    }

    #[test]
    fn test_stop_like_by_type() {
        let order = limit_order(Price::ZERO, OrderType::StopMarket);
        assert!(order.is_stop_like());
        let order = limit_order(Price::ZERO, OrderType::TrailingStopMarket);
        assert!(order.is_stop_like());
    }

    #[test]
    fn test_plain_limit_not_stop_like() {
        let order = limit_order(Price::ZERO, OrderType::Limit);
        assert!(!order.is_stop_like());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_protects_close_side() {
        let mut order = limit_order(Price::ZERO, OrderType::Limit);
        order.reduce_only = true;
        assert!(order.protects_close_side(OrderSide::Sell));
        assert!(!order.protects_close_side(OrderSide::Buy));
    }

    #[test]
    fn test_client_order_id_unique_and_prefixed() {
        let a = ClientOrderId::new();
        let b = ClientOrderId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("omx_"));
    }
}
