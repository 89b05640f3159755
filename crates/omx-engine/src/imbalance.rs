//! Depth imbalance over the top of the book.

use omx_core::DepthSnapshot;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Levels per side included in the sums.
pub const IMBALANCE_LEVELS: usize = 10;
/// One side dominating by this factor labels the book.
pub const DOMINANCE_RATIO: Decimal = dec!(3);
/// Dominance against an open position that forces a market close.
pub const EXTREME_RATIO: Decimal = dec!(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImbalanceLabel {
    Balanced,
    BuyDominant,
    SellDominant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthImbalance {
    pub buy_sum: Decimal,
    pub sell_sum: Decimal,
    pub label: ImbalanceLabel,
}

impl DepthImbalance {
    /// Sum the top levels of each side and label the book.
    pub fn measure(depth: &DepthSnapshot) -> Self {
        let buy_sum = depth.bid_sum(IMBALANCE_LEVELS);
        let sell_sum = depth.ask_sum(IMBALANCE_LEVELS);
        let label = if buy_sum.is_zero() && sell_sum.is_zero() {
            ImbalanceLabel::Balanced
        } else if buy_sum >= DOMINANCE_RATIO * sell_sum {
            ImbalanceLabel::BuyDominant
        } else if sell_sum >= DOMINANCE_RATIO * buy_sum {
            ImbalanceLabel::SellDominant
        } else {
            ImbalanceLabel::Balanced
        };
        Self {
            buy_sum,
            sell_sum,
            label,
        }
    }

    /// Entry suppression: do not bid into a sell-dominated book.
    pub fn suppress_buy_entry(&self) -> bool {
        self.label == ImbalanceLabel::SellDominant
    }

    /// Entry suppression: do not offer into a buy-dominated book.
    pub fn suppress_sell_entry(&self) -> bool {
        self.label == ImbalanceLabel::BuyDominant
    }

    /// Whether the book is extremely stacked against an open position
    /// (`is_long` = direction of the position).
    pub fn extreme_against(&self, is_long: bool) -> bool {
        if is_long {
            self.sell_sum.is_sign_positive()
                && !self.sell_sum.is_zero()
                && self.sell_sum >= EXTREME_RATIO * self.buy_sum
        } else {
            self.buy_sum.is_sign_positive()
                && !self.buy_sum.is_zero()
                && self.buy_sum >= EXTREME_RATIO * self.sell_sum
        }
    }
}
