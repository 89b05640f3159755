//! Immutable engine snapshots delivered to subscribers.

use omx_core::{DesiredOrder, OpenOrder, PositionSnapshot, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::imbalance::DepthImbalance;
use crate::trade_log::TradeLogEntry;

/// Which feeds have delivered at least once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub account: bool,
    pub orders: bool,
    pub depth: bool,
    pub ticker: bool,
}

impl FeedStatus {
    pub fn all_live(&self) -> bool {
        self.account && self.orders && self.depth && self.ticker
    }
}

/// Point-in-time view of the engine, built at the end of each tick and on
/// every feed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub ready: bool,
    pub top_bid: Option<Price>,
    pub top_ask: Option<Price>,
    pub spread: Option<Price>,
    pub position: Option<PositionSnapshot>,
    pub pnl: Decimal,
    pub account_unrealized: Decimal,
    pub session_volume: Decimal,
    pub open_orders: Vec<OpenOrder>,
    pub desired_orders: Vec<DesiredOrder>,
    pub trade_log: Vec<TradeLogEntry>,
    pub feed_status: FeedStatus,
    pub depth_imbalance: Option<DepthImbalance>,
    pub skip_buy_side: bool,
    pub skip_sell_side: bool,
}
