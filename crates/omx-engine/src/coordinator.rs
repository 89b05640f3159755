//! Order coordinator.
//!
//! Wraps every place/cancel with a per-slot lock, a slippage guard, and
//! tick/step precision. Slots are keyed by logical order type; each holds
//! at most one pending (unconfirmed) order id at a time. Locks carry a hard
//! deadline so a lost response can never wedge a slot; the next orders
//! snapshot reconciles any dangling remote order.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use omx_core::{OpenOrder, OrderSide, OrderType, Price, Size, TimeInForce};
use omx_exchange::{ExchangeError, ExchangePort, OrderRequest};

use crate::error::{EngineError, EngineResult};
use crate::stop::stop_price_valid;

/// Logical order slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Limit,
    Stop,
    Market,
}

impl Slot {
    fn index(self) -> usize {
        match self {
            Self::Limit => 0,
            Self::Stop => 1,
            Self::Market => 2,
        }
    }
}

const SLOT_COUNT: usize = 3;

#[derive(Debug, Default)]
struct SlotState {
    locked: bool,
    lock_deadline_ms: Option<u64>,
    pending_order_id: Option<String>,
    pending_deadline_ms: Option<u64>,
}

/// Price sanity inputs for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceGuard {
    pub mark_price: Option<Price>,
    pub top_bid: Option<Price>,
    pub top_ask: Option<Price>,
    /// Maximum `|price - mark| / mark` for reduce-only orders.
    pub max_close_slippage_pct: Decimal,
}

/// Instrument precision inputs.
#[derive(Debug, Clone, Copy)]
pub struct Precision {
    pub price_tick: Price,
    pub qty_step: Size,
    /// Stop-limit orders pin the limit price to the trigger.
    pub exact_limit_at_stop: bool,
}

pub struct OrderCoordinator {
    port: Arc<dyn ExchangePort>,
    symbol: String,
    lock_timeout_ms: u64,
    slots: [SlotState; SLOT_COUNT],
}

impl OrderCoordinator {
    pub fn new(port: Arc<dyn ExchangePort>, symbol: impl Into<String>, lock_timeout_ms: u64) -> Self {
        Self {
            port,
            symbol: symbol.into(),
            lock_timeout_ms,
            slots: Default::default(),
        }
    }

    // === Slot bookkeeping ===

    fn acquire(&mut self, slot: Slot, now_ms: u64) -> EngineResult<()> {
        let timeout = self.lock_timeout_ms;
        let state = &mut self.slots[slot.index()];
        if state.locked {
            match state.lock_deadline_ms {
                Some(deadline) if now_ms >= deadline => {
                    warn!(slot = ?slot, "Slot lock expired, reclaiming");
                }
                _ => return Err(EngineError::SlotBusy(slot)),
            }
        }
        state.locked = true;
        state.lock_deadline_ms = Some(now_ms + timeout);
        Ok(())
    }

    fn release(&mut self, slot: Slot) {
        let state = &mut self.slots[slot.index()];
        state.locked = false;
        state.lock_deadline_ms = None;
    }

    fn record_pending(&mut self, slot: Slot, order_id: String, now_ms: u64) {
        let timeout = self.lock_timeout_ms;
        let state = &mut self.slots[slot.index()];
        state.pending_order_id = Some(order_id);
        state.pending_deadline_ms = Some(now_ms + timeout);
    }

    /// Clear lock and pending state for a slot.
    pub fn unlock(&mut self, slot: Slot) {
        let state = &mut self.slots[slot.index()];
        state.locked = false;
        state.lock_deadline_ms = None;
        state.pending_order_id = None;
        state.pending_deadline_ms = None;
    }

    /// Release locks and pending ids whose deadline has passed.
    pub fn release_expired(&mut self, now_ms: u64) {
        for (idx, state) in self.slots.iter_mut().enumerate() {
            if state.locked && state.lock_deadline_ms.is_some_and(|d| now_ms >= d) {
                warn!(slot = idx, "Releasing expired slot lock");
                state.locked = false;
                state.lock_deadline_ms = None;
            }
            if state.pending_order_id.is_some()
                && state.pending_deadline_ms.is_some_and(|d| now_ms >= d)
            {
                debug!(slot = idx, "Pending order deadline passed, clearing");
                state.pending_order_id = None;
                state.pending_deadline_ms = None;
            }
        }
    }

    /// Reconcile pending ids against a fresh open-orders snapshot: an id
    /// observed live (or terminal) means the operation resolved.
    pub fn observe_orders(&mut self, orders: &[OpenOrder]) {
        for state in self.slots.iter_mut() {
            if let Some(pending) = &state.pending_order_id {
                if orders.iter().any(|o| &o.order_id == pending) {
                    state.pending_order_id = None;
                    state.pending_deadline_ms = None;
                }
            }
        }
    }

    /// Unconfirmed order id on a slot, if its deadline has not passed.
    pub fn pending_order_id(&self, slot: Slot, now_ms: u64) -> Option<&str> {
        let state = &self.slots[slot.index()];
        match (&state.pending_order_id, state.pending_deadline_ms) {
            (Some(id), Some(deadline)) if now_ms < deadline => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn has_pending(&self, slot: Slot, now_ms: u64) -> bool {
        self.pending_order_id(slot, now_ms).is_some()
    }

    // === Guards ===

    fn check_entry_price(&self, side: OrderSide, price: Price, guard: &PriceGuard) -> EngineResult<()> {
        if !price.is_positive() {
            return Err(EngineError::InvalidPrice(format!("non-positive price {price}")));
        }
        match side {
            OrderSide::Buy => {
                if let Some(ask) = guard.top_ask {
                    if price > ask {
                        return Err(EngineError::InvalidPrice(format!(
                            "buy {price} crosses ask {ask}"
                        )));
                    }
                }
            }
            OrderSide::Sell => {
                if let Some(bid) = guard.top_bid {
                    if price < bid {
                        return Err(EngineError::InvalidPrice(format!(
                            "sell {price} crosses bid {bid}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_close_slippage(&self, price: Price, guard: &PriceGuard) -> EngineResult<()> {
        let mark = match guard.mark_price {
            Some(mark) if mark.is_positive() => mark,
            _ => return Ok(()),
        };
        let slippage = match price.slippage_from(mark) {
            Some(s) => s,
            None => return Ok(()),
        };
        if slippage > guard.max_close_slippage_pct {
            return Err(EngineError::PriceGuard {
                price,
                reference: mark,
                slippage,
            });
        }
        Ok(())
    }

    fn rounded_qty(&self, qty: Size, precision: &Precision) -> EngineResult<Size> {
        let rounded = qty.round_to_step(precision.qty_step);
        if !rounded.is_positive() {
            return Err(EngineError::InvalidState(format!(
                "quantity {qty} rounds to zero at step {}",
                precision.qty_step
            )));
        }
        Ok(rounded)
    }

    // === Operations ===

    /// Place a limit order on the `Limit` slot.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &mut self,
        now_ms: u64,
        side: OrderSide,
        price: Price,
        qty: Size,
        reduce_only: bool,
        time_in_force: Option<TimeInForce>,
        guard: &PriceGuard,
        precision: &Precision,
    ) -> EngineResult<OpenOrder> {
        self.acquire(Slot::Limit, now_ms)?;
        let result = self
            .place_limit_inner(now_ms, side, price, qty, reduce_only, time_in_force, guard, precision)
            .await;
        self.release(Slot::Limit);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_limit_inner(
        &mut self,
        now_ms: u64,
        side: OrderSide,
        price: Price,
        qty: Size,
        reduce_only: bool,
        time_in_force: Option<TimeInForce>,
        guard: &PriceGuard,
        precision: &Precision,
    ) -> EngineResult<OpenOrder> {
        if reduce_only {
            self.check_close_slippage(price, guard)?;
            if !price.is_positive() {
                return Err(EngineError::InvalidPrice(format!("non-positive price {price}")));
            }
        } else {
            self.check_entry_price(side, price, guard)?;
        }

        let rounded_price = price.round_to_tick(precision.price_tick, side);
        let rounded_qty = self.rounded_qty(qty, precision)?;

        let mut request = OrderRequest::limit(
            self.symbol.clone(),
            side,
            rounded_price.to_string(),
            rounded_qty,
            reduce_only,
        );
        if let Some(tif) = time_in_force {
            request = request.with_time_in_force(tif);
        }

        let order = self.port.create_order(request).await?;
        debug!(
            side = %side,
            price = %rounded_price,
            qty = %rounded_qty,
            reduce_only = reduce_only,
            order_id = %order.order_id,
            "Limit order placed"
        );
        self.record_pending(Slot::Limit, order.order_id.clone(), now_ms);
        Ok(order)
    }

    /// Place the protective stop on the `Stop` slot.
    ///
    /// Uses a trailing stop when the venue supports it, otherwise a plain
    /// stop (stop-limit pinned to the trigger under `exact_limit_at_stop`).
    pub async fn place_stop_loss_order(
        &mut self,
        now_ms: u64,
        close_side: OrderSide,
        stop_price: Price,
        qty: Size,
        last_price: Price,
        precision: &Precision,
    ) -> EngineResult<OpenOrder> {
        self.acquire(Slot::Stop, now_ms)?;
        let result = self
            .place_stop_inner(now_ms, close_side, stop_price, qty, last_price, precision)
            .await;
        self.release(Slot::Stop);
        result
    }

    async fn place_stop_inner(
        &mut self,
        now_ms: u64,
        close_side: OrderSide,
        stop_price: Price,
        qty: Size,
        last_price: Price,
        precision: &Precision,
    ) -> EngineResult<OpenOrder> {
        // Round the trigger away from the market so it stays placeable.
        let trigger = match close_side {
            OrderSide::Sell => stop_price.floor_to_tick(precision.price_tick),
            OrderSide::Buy => stop_price.ceil_to_tick(precision.price_tick),
        };
        if !stop_price_valid(trigger, close_side, last_price, precision.price_tick) {
            return Err(EngineError::InvalidPrice(format!(
                "stop {trigger} on wrong side of last price {last_price}"
            )));
        }
        let rounded_qty = self.rounded_qty(qty, precision)?;

        let order_type = if self.port.supports_trailing_stops() {
            OrderType::TrailingStopMarket
        } else if precision.exact_limit_at_stop {
            OrderType::Stop
        } else {
            OrderType::StopMarket
        };
        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side: close_side,
            order_type,
            client_order_id: omx_core::ClientOrderId::new(),
            price: (order_type == OrderType::Stop).then(|| trigger.to_string()),
            quantity: Some(rounded_qty),
            stop_price: Some(trigger.to_string()),
            reduce_only: true,
            close_position: false,
            time_in_force: None,
        };

        let order = self.port.create_order(request).await?;
        info!(
            side = %close_side,
            trigger = %trigger,
            qty = %rounded_qty,
            order_type = %order_type,
            order_id = %order.order_id,
            "Protective stop placed"
        );
        self.record_pending(Slot::Stop, order.order_id.clone(), now_ms);
        Ok(order)
    }

    /// Pre-emptive stop-limit pinned at the current opposite quote,
    /// closing the fill-before-stop window for top-of-book entries.
    pub async fn place_preemptive_stop_limit(
        &mut self,
        now_ms: u64,
        close_side: OrderSide,
        trigger: Price,
        qty: Size,
        precision: &Precision,
    ) -> EngineResult<OpenOrder> {
        self.acquire(Slot::Stop, now_ms)?;
        let result = async {
            let trigger = trigger.snap_to_tick(precision.price_tick);
            if !trigger.is_positive() {
                return Err(EngineError::InvalidPrice(format!(
                    "non-positive trigger {trigger}"
                )));
            }
            let rounded_qty = self.rounded_qty(qty, precision)?;
            let request = OrderRequest {
                symbol: self.symbol.clone(),
                side: close_side,
                order_type: OrderType::Stop,
                client_order_id: omx_core::ClientOrderId::new(),
                price: Some(trigger.to_string()),
                quantity: Some(rounded_qty),
                stop_price: Some(trigger.to_string()),
                reduce_only: true,
                close_position: false,
                time_in_force: None,
            };
            let order = self.port.create_order(request).await?;
            info!(
                side = %close_side,
                trigger = %trigger,
                order_id = %order.order_id,
                "Pre-emptive stop-limit placed"
            );
            self.record_pending(Slot::Stop, order.order_id.clone(), now_ms);
            Ok(order)
        }
        .await;
        self.release(Slot::Stop);
        result
    }

    /// Market-close a position on the `Market` slot, guarded against
    /// excessive slippage between the expected fill and the mark price.
    pub async fn market_close(
        &mut self,
        now_ms: u64,
        side: OrderSide,
        qty: Size,
        guard: &PriceGuard,
        precision: &Precision,
    ) -> EngineResult<OpenOrder> {
        self.acquire(Slot::Market, now_ms)?;
        let result = async {
            let expected_fill = match side {
                OrderSide::Sell => guard.top_bid,
                OrderSide::Buy => guard.top_ask,
            };
            if let Some(fill) = expected_fill {
                self.check_close_slippage(fill, guard)?;
            }
            let rounded_qty = self.rounded_qty(qty, precision)?;
            let request = OrderRequest::market(self.symbol.clone(), side, rounded_qty);
            let order = self.port.create_order(request).await?;
            info!(
                side = %side,
                qty = %rounded_qty,
                order_id = %order.order_id,
                "Market close placed"
            );
            self.record_pending(Slot::Market, order.order_id.clone(), now_ms);
            Ok(order)
        }
        .await;
        self.release(Slot::Market);
        result
    }

    /// Cancel an order. Unknown-order is idempotent success.
    pub async fn cancel_order(&mut self, now_ms: u64, slot: Slot, order_id: &str) -> EngineResult<()> {
        self.acquire(slot, now_ms)?;
        let result = self.port.cancel_order(&self.symbol, order_id).await;
        self.release(slot);
        match result {
            Ok(()) => Ok(()),
            Err(ExchangeError::UnknownOrder) => {
                info!(order_id = order_id, "Cancel target already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel everything resting on the symbol. Unknown-order means the
    /// book was already clean.
    pub async fn cancel_all_orders(&mut self) -> EngineResult<()> {
        match self.port.cancel_all_orders(&self.symbol).await {
            Ok(()) | Err(ExchangeError::UnknownOrder) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
