//! Scriptable in-memory exchange for engine tests.
//!
//! Records every order operation, lets tests push feed snapshots, and can
//! be primed to fail the next N calls with specific `ExchangeError`s.

use std::collections::VecDeque;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use omx_core::{
    AccountSnapshot, DepthSnapshot, OpenOrder, OrderStatus, Price, Size, TickerSnapshot,
};

use crate::error::{ExchangeError, ExchangeResult};
use crate::port::{ExchangePort, FeedStreams};
use crate::types::OrderRequest;

struct FeedSenders {
    account: mpsc::UnboundedSender<AccountSnapshot>,
    orders: mpsc::UnboundedSender<Vec<OpenOrder>>,
    depth: mpsc::UnboundedSender<DepthSnapshot>,
    ticker: mpsc::UnboundedSender<TickerSnapshot>,
}

#[derive(Default)]
struct Recorded {
    next_order_id: u64,
    placed: Vec<OrderRequest>,
    canceled: Vec<String>,
    cancel_all_calls: u32,
    create_failures: VecDeque<ExchangeError>,
    cancel_failures: VecDeque<ExchangeError>,
    cancel_all_failures: VecDeque<ExchangeError>,
}

/// In-memory `ExchangePort` implementation.
pub struct MockExchange {
    senders: FeedSenders,
    streams: Mutex<Option<FeedStreams>>,
    recorded: Mutex<Recorded>,
    trailing_stops: bool,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::with_trailing_stops(false)
    }

    pub fn with_trailing_stops(trailing_stops: bool) -> Self {
        let (account_tx, account_rx) = mpsc::unbounded_channel();
        let (orders_tx, orders_rx) = mpsc::unbounded_channel();
        let (depth_tx, depth_rx) = mpsc::unbounded_channel();
        let (ticker_tx, ticker_rx) = mpsc::unbounded_channel();
        Self {
            senders: FeedSenders {
                account: account_tx,
                orders: orders_tx,
                depth: depth_tx,
                ticker: ticker_tx,
            },
            streams: Mutex::new(Some(FeedStreams {
                account: account_rx,
                orders: orders_rx,
                depth: depth_rx,
                ticker: ticker_rx,
            })),
            recorded: Mutex::new(Recorded::default()),
            trailing_stops,
        }
    }

    // === Feed injection ===

    pub fn push_account(&self, snapshot: AccountSnapshot) {
        let _ = self.senders.account.send(snapshot);
    }

    pub fn push_orders(&self, orders: Vec<OpenOrder>) {
        let _ = self.senders.orders.send(orders);
    }

    pub fn push_depth(&self, depth: DepthSnapshot) {
        let _ = self.senders.depth.send(depth);
    }

    pub fn push_ticker(&self, ticker: TickerSnapshot) {
        let _ = self.senders.ticker.send(ticker);
    }

    // === Failure scripting ===

    pub fn fail_next_create(&self, err: ExchangeError) {
        self.recorded.lock().create_failures.push_back(err);
    }

    pub fn fail_next_cancel(&self, err: ExchangeError) {
        self.recorded.lock().cancel_failures.push_back(err);
    }

    pub fn fail_next_cancel_all(&self, err: ExchangeError) {
        self.recorded.lock().cancel_all_failures.push_back(err);
    }

    // === Inspection ===

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.recorded.lock().placed.clone()
    }

    pub fn last_order(&self) -> Option<OrderRequest> {
        self.recorded.lock().placed.last().cloned()
    }

    pub fn canceled_ids(&self) -> Vec<String> {
        self.recorded.lock().canceled.clone()
    }

    pub fn cancel_all_count(&self) -> u32 {
        self.recorded.lock().cancel_all_calls
    }

    pub fn clear_recorded(&self) {
        let mut rec = self.recorded.lock();
        rec.placed.clear();
        rec.canceled.clear();
        rec.cancel_all_calls = 0;
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangePort for MockExchange {
    async fn subscribe(&self, _symbol: &str) -> ExchangeResult<FeedStreams> {
        self.streams
            .lock()
            .take()
            .ok_or_else(|| ExchangeError::Transport("already subscribed".into()))
    }

    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<OpenOrder> {
        let mut rec = self.recorded.lock();
        if let Some(err) = rec.create_failures.pop_front() {
            return Err(err);
        }
        rec.next_order_id += 1;
        let order_id = rec.next_order_id.to_string();
        let price = request
            .price
            .as_deref()
            .and_then(|p| Price::from_str(p).ok())
            .unwrap_or(Price::ZERO);
        let stop_price = request
            .stop_price
            .as_deref()
            .and_then(|p| Price::from_str(p).ok())
            .unwrap_or(Price::ZERO);
        let order = OpenOrder {
            order_id,
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::New,
            price,
            orig_qty: request.quantity.unwrap_or(Size::ZERO),
            executed_qty: Size::ZERO,
            stop_price,
            reduce_only: request.reduce_only,
            close_position: request.close_position,
            update_time: 0,
            time: 0,
        };
        rec.placed.push(request);
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let mut rec = self.recorded.lock();
        if let Some(err) = rec.cancel_failures.pop_front() {
            return Err(err);
        }
        rec.canceled.push(order_id.to_string());
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> ExchangeResult<()> {
        let mut rec = self.recorded.lock();
        if let Some(err) = rec.cancel_all_failures.pop_front() {
            return Err(err);
        }
        rec.cancel_all_calls += 1;
        Ok(())
    }

    fn supports_trailing_stops(&self) -> bool {
        self.trailing_stops
    }
}
