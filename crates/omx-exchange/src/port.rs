//! The exchange capability trait.

use async_trait::async_trait;
use omx_core::{AccountSnapshot, DepthSnapshot, OpenOrder, TickerSnapshot};
use tokio::sync::mpsc;

use crate::error::ExchangeResult;
use crate::types::OrderRequest;

/// Channel bundle returned by `ExchangePort::subscribe`.
///
/// One receiver per feed; each delivers full snapshots (not deltas) in
/// arrival order. Dropping a receiver unsubscribes that feed.
pub struct FeedStreams {
    pub account: mpsc::UnboundedReceiver<AccountSnapshot>,
    pub orders: mpsc::UnboundedReceiver<Vec<OpenOrder>>,
    pub depth: mpsc::UnboundedReceiver<DepthSnapshot>,
    pub ticker: mpsc::UnboundedReceiver<TickerSnapshot>,
}

/// Venue adapter capability surface.
///
/// Adapters own the HTTP/WS transport, request signing, and the transport
/// timeout (default 5s); the engine only sees typed results. All feed
/// payloads are full snapshots so the engine can rebuild local state
/// without drift.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Open the four market/account feeds for a symbol.
    async fn subscribe(&self, symbol: &str) -> ExchangeResult<FeedStreams>;

    /// Submit an order. Returns the venue's view of the created order.
    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<OpenOrder>;

    /// Cancel a single order by venue id.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()>;

    /// Cancel every resting order on the symbol.
    async fn cancel_all_orders(&self, symbol: &str) -> ExchangeResult<()>;

    /// Whether the venue accepts trailing stop orders.
    fn supports_trailing_stops(&self) -> bool;
}
