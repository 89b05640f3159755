//! Feed payload types: account, depth, and ticker snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Size};
use crate::position::PositionSnapshot;

/// Full account snapshot from the account feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_unrealized_profit: Decimal,
    pub positions: Vec<PositionSnapshot>,
}

impl AccountSnapshot {
    pub fn position_for(&self, symbol: &str) -> Option<&PositionSnapshot> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Order book depth snapshot. Top-of-book is guaranteed valid by the port.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Bids sorted best-first: `(price, qty)`.
    pub bids: Vec<(Price, Size)>,
    /// Asks sorted best-first: `(price, qty)`.
    pub asks: Vec<(Price, Size)>,
}

impl DepthSnapshot {
    /// Best bid and best ask, when both sides exist.
    pub fn top_of_book(&self) -> Option<(Price, Price)> {
        match (self.bids.first(), self.asks.first()) {
            (Some((bid, _)), Some((ask, _))) => Some((*bid, *ask)),
            _ => None,
        }
    }

    /// Sum of bid sizes over the first `levels` levels.
    pub fn bid_sum(&self, levels: usize) -> Decimal {
        self.bids.iter().take(levels).map(|(_, q)| q.inner()).sum()
    }

    /// Sum of ask sizes over the first `levels` levels.
    pub fn ask_sum(&self, levels: usize) -> Decimal {
        self.asks.iter().take(levels).map(|(_, q)| q.inner()).sum()
    }
}

/// Last-trade ticker snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub last_price: Price,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn depth() -> DepthSnapshot {
        DepthSnapshot {
            bids: vec![
                (Price::new(dec!(99.9)), Size::new(dec!(1))),
                (Price::new(dec!(99.8)), Size::new(dec!(2))),
            ],
            asks: vec![
                (Price::new(dec!(100.1)), Size::new(dec!(3))),
                (Price::new(dec!(100.2)), Size::new(dec!(4))),
            ],
        }
    }

    #[test]
    fn test_top_of_book() {
        let (bid, ask) = depth().top_of_book().unwrap();
        assert_eq!(bid.inner(), dec!(99.9));
        assert_eq!(ask.inner(), dec!(100.1));
    }

    #[test]
    fn test_top_of_book_missing_side() {
        let d = DepthSnapshot {
            bids: vec![],
            asks: vec![(Price::new(dec!(100)), Size::new(dec!(1)))],
        };
        assert!(d.top_of_book().is_none());
    }

    #[test]
    fn test_sums_respect_level_cap() {
        let d = depth();
        assert_eq!(d.bid_sum(10), dec!(3));
        assert_eq!(d.ask_sum(1), dec!(3));
    }

    #[test]
    fn test_position_for() {
        let snap = AccountSnapshot {
            total_unrealized_profit: dec!(0),
            positions: vec![PositionSnapshot::flat("ETHUSDT")],
        };
        assert!(snap.position_for("ETHUSDT").is_some());
        assert!(snap.position_for("BTCUSDT").is_none());
    }
}
