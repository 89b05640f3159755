//! Position snapshot and flatness judgement.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Size};
use crate::order::OrderSide;

/// Below this absolute amount a position is considered flat.
pub const POSITION_EPSILON: Decimal = dec!(0.00001);

/// Net position as reported by the account feed.
///
/// The sign of `position_amt` encodes direction: long > 0, short < 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Price,
    pub mark_price: Option<Price>,
    pub unrealized_profit: Decimal,
}

impl PositionSnapshot {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            position_amt: Decimal::ZERO,
            entry_price: Price::ZERO,
            mark_price: None,
            unrealized_profit: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position_amt.abs() < POSITION_EPSILON
    }

    pub fn is_long(&self) -> bool {
        self.position_amt >= POSITION_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.position_amt <= -POSITION_EPSILON
    }

    pub fn abs_amount(&self) -> Size {
        Size::new(self.position_amt.abs())
    }

    /// The side that reduces this position. `None` when flat.
    pub fn close_side(&self) -> Option<OrderSide> {
        if self.is_flat() {
            None
        } else if self.position_amt > Decimal::ZERO {
            Some(OrderSide::Sell)
        } else {
            Some(OrderSide::Buy)
        }
    }

    /// Side-aware unrealized pnl against the given quote prices:
    /// long marks at the bid, short at the ask.
    pub fn pnl_against(&self, bid: Price, ask: Price) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        let mark = if bid == ask {
            bid
        } else if self.position_amt > Decimal::ZERO {
            bid
        } else {
            ask
        };
        (mark.inner() - self.entry_price.inner()) * self.position_amt
    }
}
