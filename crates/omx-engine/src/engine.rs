//! The strategy engine control loop.
//!
//! Single cooperative task: feed handlers mutate state and emit snapshots,
//! `tick()` is the only path that mutates the exchange. Per tick:
//! derive desired quotes, suppress reprices, reconcile the plan, cancel and
//! place the diff, ensure the protective stop, run the risk check, emit a
//! snapshot.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use omx_core::{
    AccountSnapshot, DepthSnapshot, DesiredOrder, OpenOrder, OrderSide, PositionSnapshot, Price,
    Size, TickerSnapshot, TimeInForce, POSITION_EPSILON,
};
use omx_exchange::{ExchangePort, FeedStreams};

use crate::config::{EngineConfig, StrategyMode};
use crate::coordinator::{OrderCoordinator, Precision, PriceGuard, Slot};
use crate::error::{EngineError, EngineResult};
use crate::imbalance::DepthImbalance;
use crate::orphan::reconcile_orphaned_position;
use crate::plan::make_order_plan;
use crate::rate_limit::{CycleDecision, RateLimitController};
use crate::snapshot::{EngineSnapshot, FeedStatus};
use crate::stop::{
    assess, calc_stop_loss_price, find_protective_stop, should_stop_loss, stop_price_valid,
    wants_exact_refresh, StopAction,
};
use crate::trade_log::TradeLog;

/// Entry suppression window after an insufficient-balance rejection.
const INSUFFICIENT_BALANCE_COOLDOWN_MS: u64 = 15_000;
/// Entry suppression window after the position returns to flat.
const POST_CLOSE_COOLDOWN_MS: u64 = 10_000;
/// Snapshot fan-out buffer.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

pub struct StrategyEngine {
    config: EngineConfig,
    coordinator: OrderCoordinator,
    rate_limiter: RateLimitController,
    trade_log: TradeLog,
    snapshot_tx: broadcast::Sender<EngineSnapshot>,
    streams: Option<FeedStreams>,

    // Feed state, rebuilt from each delivery.
    feeds: FeedStatus,
    missing_logged: FeedStatus,
    account: Option<AccountSnapshot>,
    open_orders: Vec<OpenOrder>,
    depth: DepthSnapshot,
    ticker: Option<TickerSnapshot>,

    // Lifecycle state.
    startup_reset_done: bool,
    insufficient_balance_until_ms: Option<u64>,
    insufficient_balance_logged: bool,
    post_close_until_ms: Option<u64>,
    last_abs_position: Decimal,
    last_buy_entry_ms: Option<u64>,
    last_sell_entry_ms: Option<u64>,
    session_volume: Decimal,
    pending_cancels: HashSet<String>,
    /// Orders we placed that have not yet shown up in an orders snapshot,
    /// with an expiry deadline. Operations queued during a tick are not in
    /// that tick's read-snapshot; this mask bridges the gap.
    unconfirmed: Vec<(OpenOrder, u64)>,
    last_desired: Vec<DesiredOrder>,
    last_imbalance: Option<DepthImbalance>,
    skip_buy_side: bool,
    skip_sell_side: bool,
}

impl StrategyEngine {
    /// Validate the config, open the feeds, and build the engine.
    pub async fn connect(
        config: EngineConfig,
        port: Arc<dyn ExchangePort>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let streams = port.subscribe(&config.symbol).await?;
        let coordinator =
            OrderCoordinator::new(port, config.symbol.clone(), config.lock_timeout_ms());
        let rate_limiter = RateLimitController::new(config.refresh_interval_ms);
        let trade_log = TradeLog::new(config.max_log_entries);
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            coordinator,
            rate_limiter,
            trade_log,
            snapshot_tx,
            streams: Some(streams),
            feeds: FeedStatus::default(),
            missing_logged: FeedStatus::default(),
            account: None,
            open_orders: Vec::new(),
            depth: DepthSnapshot::default(),
            ticker: None,
            startup_reset_done: false,
            insufficient_balance_until_ms: None,
            insufficient_balance_logged: false,
            post_close_until_ms: None,
            last_abs_position: Decimal::ZERO,
            last_buy_entry_ms: None,
            last_sell_entry_ms: None,
            session_volume: Decimal::ZERO,
            pending_cancels: HashSet::new(),
            unconfirmed: Vec::new(),
            last_desired: Vec::new(),
            last_imbalance: None,
            skip_buy_side: false,
            skip_sell_side: false,
        })
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.feeds.all_live() && self.startup_reset_done
    }

    pub fn session_volume(&self) -> Decimal {
        self.session_volume
    }

    pub fn open_orders(&self) -> &[OpenOrder] {
        &self.open_orders
    }

    /// Drive the engine until shutdown. Feeds and the tick timer share one
    /// task; a timer firing that lands mid-tick is skipped, so ticks never
    /// overlap.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> EngineResult<()> {
        let mut streams = self
            .streams
            .take()
            .ok_or_else(|| EngineError::InvalidState("feed streams already taken".into()))?;
        let mut tick_timer =
            tokio::time::interval(Duration::from_millis(self.config.refresh_interval_ms));
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(symbol = %self.config.symbol, mode = ?self.config.mode, "Engine started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested");
                    break;
                }
                Some(snapshot) = streams.account.recv() => self.apply_account(snapshot, now_ms()),
                Some(orders) = streams.orders.recv() => self.apply_orders(orders, now_ms()).await,
                Some(depth) = streams.depth.recv() => self.apply_depth(depth, now_ms()),
                Some(ticker) = streams.ticker.recv() => self.apply_ticker(ticker, now_ms()),
                _ = tick_timer.tick() => self.tick(now_ms()).await,
            }
        }
        Ok(())
    }

    // === Feed handlers (never touch the exchange, except startup reset) ===

    pub fn apply_account(&mut self, snapshot: AccountSnapshot, now_ms: u64) {
        self.feeds.account = true;
        let abs = snapshot
            .position_for(&self.config.symbol)
            .map(|p| p.position_amt.abs())
            .unwrap_or(Decimal::ZERO);
        if self.last_abs_position >= POSITION_EPSILON && abs < POSITION_EPSILON {
            self.post_close_until_ms = Some(now_ms + POST_CLOSE_COOLDOWN_MS);
            info!(cooldown_ms = POST_CLOSE_COOLDOWN_MS, "Position flat, post-close cooldown armed");
            self.trade_log.info(now_ms, "Position closed, entries paused");
        }
        self.last_abs_position = abs;
        self.account = Some(snapshot);
        self.emit_snapshot();
    }

    pub async fn apply_orders(&mut self, orders: Vec<OpenOrder>, now_ms: u64) {
        self.feeds.orders = true;
        let orders: Vec<OpenOrder> = orders
            .into_iter()
            .filter(|o| o.symbol == self.config.symbol)
            .collect();
        self.coordinator.observe_orders(&orders);
        self.pending_cancels
            .retain(|id| orders.iter().any(|o| &o.order_id == id));
        self.unconfirmed
            .retain(|(o, _)| !orders.iter().any(|s| s.order_id == o.order_id));
        self.open_orders = orders;

        if !self.startup_reset_done {
            self.startup_reset(now_ms).await;
        }
        self.emit_snapshot();
    }

    pub fn apply_depth(&mut self, depth: DepthSnapshot, _now_ms: u64) {
        self.feeds.depth = true;
        self.depth = depth;
        self.emit_snapshot();
    }

    pub fn apply_ticker(&mut self, ticker: TickerSnapshot, _now_ms: u64) {
        self.feeds.ticker = true;
        self.ticker = Some(ticker);
        self.emit_snapshot();
    }

    /// Flush any resting orders found at startup so the engine begins from
    /// a clean book. Unknown-order means the book was already clean.
    async fn startup_reset(&mut self, now_ms: u64) {
        if self.open_orders.is_empty() {
            self.startup_reset_done = true;
            return;
        }
        match self.coordinator.cancel_all_orders().await {
            Ok(()) => {
                info!(count = self.open_orders.len(), "Startup reset: cancelled resting orders");
                self.trade_log.info(now_ms, "Startup reset: cancelled resting orders");
                self.pending_cancels
                    .extend(self.open_orders.iter().map(|o| o.order_id.clone()));
                self.startup_reset_done = true;
            }
            Err(e) if e.is_rate_limit() => {
                self.rate_limiter.register_rate_limit(now_ms, "startup-reset");
            }
            Err(e) => {
                error!(error = %e, "Startup reset failed, will retry on next orders snapshot");
                self.trade_log.error(now_ms, format!("Startup reset failed: {e}"));
            }
        }
    }

    // === The control cycle ===

    pub async fn tick(&mut self, now_ms: u64) {
        self.coordinator.release_expired(now_ms);

        if !self.gates_pass(now_ms) {
            return;
        }
        match self.rate_limiter.before_cycle(now_ms) {
            CycleDecision::Paused => {
                debug!("Tick paused by rate-limit backoff");
                return;
            }
            CycleDecision::Skip => {
                debug!("Tick skipped after rate-limited cycle");
                return;
            }
            CycleDecision::Run => {}
        }

        let mut had_rate_limit = false;
        if let Err(e) = self.tick_inner(now_ms).await {
            if e.is_rate_limit() {
                had_rate_limit = true;
                self.rate_limiter.register_rate_limit(now_ms, "tick");
                self.trade_log.warn(now_ms, "Rate limited, aborting cycle");
                self.enforce_rate_limit_stop(now_ms).await;
            } else {
                error!(error = %e, "Tick aborted");
                self.trade_log.error(now_ms, format!("Tick aborted: {e}"));
            }
        }
        self.rate_limiter.on_cycle_complete(now_ms, had_rate_limit);
        self.emit_snapshot();
    }

    async fn tick_inner(&mut self, now_ms: u64) -> EngineResult<()> {
        self.unconfirmed.retain(|(_, deadline)| now_ms < *deadline);
        let position = self.position();
        let (bid, ask) = match self.depth.top_of_book() {
            Some(tob) => tob,
            None => return Ok(()),
        };
        let last_price = self
            .ticker
            .map(|t| t.last_price)
            .unwrap_or_else(|| Price::new((bid.inner() + ask.inner()) / Decimal::TWO));
        let imbalance = DepthImbalance::measure(&self.depth);
        self.last_imbalance = Some(imbalance);

        let guard = self.price_guard(&position, bid, ask);
        let precision = self.precision();

        // Extreme one-sided depth against an open position: get out now.
        if !position.is_flat() && imbalance.extreme_against(position.is_long()) {
            warn!(
                buy_sum = %imbalance.buy_sum,
                sell_sum = %imbalance.sell_sum,
                "Extreme depth imbalance against position, forcing close"
            );
            self.trade_log
                .warn(now_ms, "Extreme depth imbalance, forcing market close");
            self.last_desired.clear();
            self.skip_buy_side = false;
            self.skip_sell_side = false;
            self.close_position(now_ms, &position, bid, ask, &guard, &precision, false)
                .await?;
            return Ok(());
        }

        let desired = self.derive_desired(now_ms, &position, bid, ask, &imbalance);
        let desired = self.suppress_reprices(now_ms, desired);
        self.last_desired = desired.clone();

        let open_for_plan: Vec<OpenOrder> = self
            .open_orders
            .iter()
            .chain(self.unconfirmed.iter().map(|(o, _)| o))
            .filter(|o| {
                !o.is_terminal()
                    && !o.is_stop_like()
                    && !self.pending_cancels.contains(&o.order_id)
            })
            .cloned()
            .collect();
        let plan = make_order_plan(
            &open_for_plan,
            &desired,
            Price::new(self.config.price_tick),
            Size::new(self.config.qty_step),
        );

        for order in &plan.to_cancel {
            match self
                .coordinator
                .cancel_order(now_ms, Slot::Limit, &order.order_id)
                .await
            {
                Ok(()) => {
                    self.pending_cancels.insert(order.order_id.clone());
                }
                Err(e) if e.is_rate_limit() => return Err(e),
                Err(EngineError::SlotBusy(_)) => {
                    debug!(order_id = %order.order_id, "Cancel deferred, slot busy");
                }
                Err(e) => {
                    error!(order_id = %order.order_id, error = %e, "Cancel failed");
                    self.trade_log
                        .error(now_ms, format!("Cancel {} failed: {e}", order.order_id));
                    self.open_orders.retain(|o| o.order_id != order.order_id);
                }
            }
        }

        for want in &plan.to_place {
            let tif = (want.reduce_only && self.config.strict_limit_only)
                .then_some(TimeInForce::ImmediateOrCancel);
            match self
                .coordinator
                .place_order(
                    now_ms,
                    want.side,
                    want.price,
                    want.amount,
                    want.reduce_only,
                    tif,
                    &guard,
                    &precision,
                )
                .await
            {
                Ok(order) => {
                    self.note_placed(&order, now_ms);
                    self.session_volume += order.price.inner() * order.orig_qty.inner();
                    self.trade_log.info(
                        now_ms,
                        format!(
                            "{} {} {} @ {}{}",
                            if want.reduce_only { "Close" } else { "Entry" },
                            want.side,
                            order.orig_qty,
                            order.price,
                            if want.reduce_only { " (reduce-only)" } else { "" }
                        ),
                    );
                    if !want.reduce_only {
                        self.note_entry_placed(want.side, now_ms);
                        if self.config.quotes_at_top() {
                            self.place_preemptive_stop(now_ms, want, bid, ask, &precision)
                                .await?;
                        }
                    }
                }
                Err(e) if e.is_rate_limit() => return Err(e),
                Err(e) if e.is_insufficient_balance() => {
                    self.arm_insufficient_balance(now_ms);
                    break;
                }
                Err(e) if e.is_price_guard() => {
                    warn!(side = %want.side, price = %want.price, error = %e, "Placement skipped by price guard");
                    self.trade_log
                        .warn(now_ms, format!("Price guard skipped {} @ {}", want.side, want.price));
                }
                Err(EngineError::SlotBusy(_)) => {
                    debug!(side = %want.side, "Placement deferred, slot busy");
                }
                Err(e @ EngineError::InvalidState(_)) => return Err(e),
                Err(e) => {
                    error!(side = %want.side, error = %e, "Placement failed");
                    self.trade_log
                        .error(now_ms, format!("Place {} @ {} failed: {e}", want.side, want.price));
                }
            }
        }

        self.ensure_protective_stop(now_ms, &position, bid, ask, last_price, &precision)
            .await?;

        if should_stop_loss(&position, bid, ask, self.config.loss_limit) {
            warn!(pnl = %position.pnl_against(bid, ask), "Loss limit breached, flushing and closing");
            self.trade_log.warn(now_ms, "Loss limit breached, closing position");
            self.flush_working_orders(now_ms).await?;
            self.close_position(
                now_ms,
                &position,
                bid,
                ask,
                &guard,
                &precision,
                self.config.strict_limit_only,
            )
            .await?;
        }

        // Last line of defence for the no-naked-position invariant: if the
        // position still has nothing working on its closing side, rest a
        // protective reduce-only close.
        if !position.is_flat() && !self.coordinator.has_pending(Slot::Stop, now_ms) {
            let known: Vec<OpenOrder> = self
                .open_orders
                .iter()
                .chain(self.unconfirmed.iter().map(|(o, _)| o))
                .filter(|o| !self.pending_cancels.contains(&o.order_id))
                .cloned()
                .collect();
            match reconcile_orphaned_position(
                &mut self.coordinator,
                now_ms,
                &position,
                &known,
                Some(bid),
                Some(ask),
                self.ticker.map(|t| t.last_price),
                false,
                self.config.strict_limit_only,
                &guard,
                &precision,
            )
            .await
            {
                Ok(Some(order)) => {
                    self.note_placed(&order, now_ms);
                    self.trade_log
                        .warn(now_ms, "Unprotected position, protective close placed");
                }
                Ok(None) => {}
                Err(e) if e.is_rate_limit() => return Err(e),
                Err(e) => {
                    error!(error = %e, "Orphan reconciliation failed");
                    self.trade_log
                        .error(now_ms, format!("Orphan reconciliation failed: {e}"));
                }
            }
        }

        Ok(())
    }

    // === Derivation and suppression ===

    fn derive_desired(
        &mut self,
        now_ms: u64,
        position: &PositionSnapshot,
        bid: Price,
        ask: Price,
        imbalance: &DepthImbalance,
    ) -> Vec<DesiredOrder> {
        let tick = Price::new(self.config.price_tick);
        self.skip_buy_side = false;
        self.skip_sell_side = false;

        if !position.is_flat() {
            // One reduce-only close resting at the top of the book.
            let side = match position.close_side() {
                Some(side) => side,
                None => return Vec::new(),
            };
            let price = match side {
                OrderSide::Sell => ask.round_to_tick(tick, OrderSide::Sell),
                OrderSide::Buy => bid.round_to_tick(tick, OrderSide::Buy),
            };
            return vec![DesiredOrder::close(side, price, position.abs_amount())];
        }

        if !self.entries_allowed(now_ms) {
            return Vec::new();
        }

        let amount = Size::new(self.config.entry_amount())
            .round_to_step(Size::new(self.config.qty_step));
        if !amount.is_positive() {
            return Vec::new();
        }
        let buy_price =
            (bid - Price::new(self.config.bid_offset)).round_to_tick(tick, OrderSide::Buy);
        let sell_price =
            (ask + Price::new(self.config.ask_offset)).round_to_tick(tick, OrderSide::Sell);

        if self.config.mode == StrategyMode::OffsetMaker {
            self.skip_buy_side = imbalance.suppress_buy_entry();
            self.skip_sell_side = imbalance.suppress_sell_entry();
        }

        let mut desired = Vec::with_capacity(2);
        if !self.skip_buy_side && buy_price.is_positive() {
            desired.push(DesiredOrder::entry(OrderSide::Buy, buy_price, amount));
        }
        if !self.skip_sell_side {
            desired.push(DesiredOrder::entry(OrderSide::Sell, sell_price, amount));
        }
        desired
    }

    /// Pin entry reprices to the resting price while the move is below
    /// `min_reprice_ticks` or inside the dwell window. Avoids cancel/place
    /// churn under a fast-ticking book.
    fn suppress_reprices(&self, now_ms: u64, desired: Vec<DesiredOrder>) -> Vec<DesiredOrder> {
        let tick = Price::new(self.config.price_tick);
        let dwell_ms = self.config.effective_reprice_dwell_ms();
        let min_ticks = Decimal::from(self.config.min_reprice_ticks);

        desired
            .into_iter()
            .map(|mut want| {
                if want.reduce_only {
                    return want;
                }
                let existing = self
                    .open_orders
                    .iter()
                    .chain(self.unconfirmed.iter().map(|(o, _)| o))
                    .find(|o| {
                        !o.is_terminal()
                            && !o.is_stop_like()
                            && !o.reduce_only
                            && o.side == want.side
                            && !self.pending_cancels.contains(&o.order_id)
                    });
                if let Some(open) = existing {
                    let moved_ticks = want.price.ticks_from(open.price, tick);
                    let within_dwell = self
                        .last_entry_ms(want.side)
                        .is_some_and(|t| now_ms.saturating_sub(t) < dwell_ms);
                    if moved_ticks < min_ticks || within_dwell {
                        want.price = open.price;
                    }
                }
                want
            })
            .collect()
    }

    fn entries_allowed(&mut self, now_ms: u64) -> bool {
        if let Some(until) = self.insufficient_balance_until_ms {
            if now_ms < until {
                return false;
            }
            self.insufficient_balance_until_ms = None;
            self.insufficient_balance_logged = false;
            info!("Insufficient-balance cooldown expired, entries resumed");
        }
        if let Some(until) = self.post_close_until_ms {
            if now_ms < until {
                return false;
            }
            self.post_close_until_ms = None;
        }
        !self.rate_limiter.should_block_entries()
    }

    // === Protective stop ===

    async fn ensure_protective_stop(
        &mut self,
        now_ms: u64,
        position: &PositionSnapshot,
        bid: Price,
        ask: Price,
        last_price: Price,
        precision: &Precision,
    ) -> EngineResult<()> {
        if position.is_flat() {
            return Ok(());
        }
        // A placement attempt still awaiting its snapshot counts as
        // protection; re-placing would double the stop.
        if self.coordinator.has_pending(Slot::Stop, now_ms) {
            return Ok(());
        }
        let close_side = match position.close_side() {
            Some(side) => side,
            None => return Ok(()),
        };
        let desired = match calc_stop_loss_price(
            position.entry_price,
            position.abs_amount(),
            close_side,
            self.config.loss_limit,
        ) {
            Some(price) => price,
            None => return Ok(()),
        };
        let tick = Price::new(self.config.price_tick);
        let current = find_protective_stop(&self.open_orders, close_side).cloned();

        match assess(current.as_ref(), desired, close_side, last_price, tick) {
            StopAction::Keep => {
                if self.config.mode == StrategyMode::OffsetMaker {
                    let current = current.expect("Keep implies a resting stop");
                    let trigger = if current.stop_price.is_positive() {
                        current.stop_price
                    } else {
                        current.price
                    };
                    let anchor = match close_side {
                        OrderSide::Sell => bid,
                        OrderSide::Buy => ask,
                    };
                    if wants_exact_refresh(trigger, anchor, close_side, last_price, tick) {
                        return self
                            .replace_stop(
                                now_ms,
                                &current,
                                anchor,
                                position.abs_amount(),
                                close_side,
                                last_price,
                                precision,
                            )
                            .await;
                    }
                }
                Ok(())
            }
            StopAction::Place => {
                match self
                    .coordinator
                    .place_stop_loss_order(
                        now_ms,
                        close_side,
                        desired,
                        position.abs_amount(),
                        last_price,
                        precision,
                    )
                    .await
                {
                    Ok(order) => {
                        self.note_placed(&order, now_ms);
                        self.trade_log
                            .info(now_ms, format!("Protective stop placed @ {}", order.stop_price));
                        Ok(())
                    }
                    Err(e) if e.is_rate_limit() => Err(e),
                    Err(EngineError::InvalidPrice(msg)) => {
                        debug!(reason = %msg, "Stop not placeable this tick");
                        Ok(())
                    }
                    Err(EngineError::SlotBusy(_)) => Ok(()),
                    Err(e) => {
                        error!(error = %e, "Protective stop placement failed");
                        self.trade_log
                            .error(now_ms, format!("Stop placement failed: {e}"));
                        Ok(())
                    }
                }
            }
            StopAction::Replace { cancel_order_id } => {
                let current = current.expect("Replace implies a resting stop");
                debug_assert_eq!(current.order_id, cancel_order_id);
                self.replace_stop(
                    now_ms,
                    &current,
                    desired,
                    position.abs_amount(),
                    close_side,
                    last_price,
                    precision,
                )
                .await
            }
        }
    }

    /// Cancel the resting stop and place a new one at `new_trigger`. If the
    /// new placement fails, restore the previous stop when still valid.
    #[allow(clippy::too_many_arguments)]
    async fn replace_stop(
        &mut self,
        now_ms: u64,
        previous: &OpenOrder,
        new_trigger: Price,
        qty: Size,
        close_side: OrderSide,
        last_price: Price,
        precision: &Precision,
    ) -> EngineResult<()> {
        // Unknown-order on the cancel falls through to placement.
        match self
            .coordinator
            .cancel_order(now_ms, Slot::Stop, &previous.order_id)
            .await
        {
            Ok(()) => {
                self.pending_cancels.insert(previous.order_id.clone());
            }
            Err(e) if e.is_rate_limit() => return Err(e),
            Err(e) => {
                error!(error = %e, "Stop cancel failed, keeping current stop");
                self.trade_log
                    .error(now_ms, format!("Stop cancel failed: {e}"));
                return Ok(());
            }
        }

        match self
            .coordinator
            .place_stop_loss_order(now_ms, close_side, new_trigger, qty, last_price, precision)
            .await
        {
            Ok(order) => {
                self.note_placed(&order, now_ms);
                self.trade_log
                    .info(now_ms, format!("Protective stop moved to {}", order.stop_price));
                Ok(())
            }
            Err(e) if e.is_rate_limit() => Err(e),
            Err(e) => {
                warn!(error = %e, "Stop replacement failed, restoring previous");
                let prev_trigger = if previous.stop_price.is_positive() {
                    previous.stop_price
                } else {
                    previous.price
                };
                let tick = Price::new(self.config.price_tick);
                if stop_price_valid(prev_trigger, close_side, last_price, tick) {
                    match self
                        .coordinator
                        .place_stop_loss_order(
                            now_ms,
                            close_side,
                            prev_trigger,
                            qty,
                            last_price,
                            precision,
                        )
                        .await
                    {
                        Ok(restored) => {
                            self.note_placed(&restored, now_ms);
                            self.trade_log.warn(now_ms, "Previous protective stop restored");
                        }
                        Err(e2) if e2.is_rate_limit() => return Err(e2),
                        Err(e2) => {
                            error!(error = %e2, "Failed to restore previous stop");
                            self.trade_log
                                .error(now_ms, format!("Stop restore failed: {e2}"));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    async fn place_preemptive_stop(
        &mut self,
        now_ms: u64,
        entry: &DesiredOrder,
        bid: Price,
        ask: Price,
        precision: &Precision,
    ) -> EngineResult<()> {
        let (close_side, trigger) = match entry.side {
            OrderSide::Buy => (OrderSide::Sell, ask),
            OrderSide::Sell => (OrderSide::Buy, bid),
        };
        match self
            .coordinator
            .place_preemptive_stop_limit(now_ms, close_side, trigger, entry.amount, precision)
            .await
        {
            Ok(order) => {
                self.note_placed(&order, now_ms);
                self.trade_log
                    .info(now_ms, format!("Pre-emptive stop {} @ {}", close_side, trigger));
                Ok(())
            }
            Err(e) if e.is_rate_limit() => Err(e),
            Err(e) => {
                warn!(error = %e, "Pre-emptive stop placement failed");
                self.trade_log
                    .warn(now_ms, format!("Pre-emptive stop failed: {e}"));
                Ok(())
            }
        }
    }

    // === Risk actions ===

    /// Cancel every working order ahead of a risk close.
    async fn flush_working_orders(&mut self, now_ms: u64) -> EngineResult<()> {
        match self.coordinator.cancel_all_orders().await {
            Ok(()) => {
                self.pending_cancels
                    .extend(self.open_orders.iter().map(|o| o.order_id.clone()));
                self.pending_cancels
                    .extend(self.unconfirmed.iter().map(|(o, _)| o.order_id.clone()));
                self.unconfirmed.clear();
                Ok(())
            }
            Err(e) if e.is_rate_limit() => Err(e),
            Err(e) => {
                error!(error = %e, "Order flush failed");
                self.trade_log.error(now_ms, format!("Order flush failed: {e}"));
                Ok(())
            }
        }
    }

    /// Close the position: IOC limit when `strict_limit`, otherwise a
    /// guarded market close with an IOC-limit fallback.
    #[allow(clippy::too_many_arguments)]
    async fn close_position(
        &mut self,
        now_ms: u64,
        position: &PositionSnapshot,
        bid: Price,
        ask: Price,
        guard: &PriceGuard,
        precision: &Precision,
        strict_limit: bool,
    ) -> EngineResult<()> {
        let side = match position.close_side() {
            Some(side) => side,
            None => return Ok(()),
        };
        let qty = position.abs_amount();
        // Marketable close price: cross to the opposite top so an IOC fills.
        let close_price = match side {
            OrderSide::Sell => bid,
            OrderSide::Buy => ask,
        };

        if strict_limit {
            match self
                .coordinator
                .place_order(
                    now_ms,
                    side,
                    close_price,
                    qty,
                    true,
                    Some(TimeInForce::ImmediateOrCancel),
                    guard,
                    precision,
                )
                .await
            {
                Ok(order) => {
                    self.note_placed(&order, now_ms);
                    self.session_volume += order.price.inner() * order.orig_qty.inner();
                    self.trade_log
                        .info(now_ms, format!("Risk close {} {} @ {}", side, qty, close_price));
                    return Ok(());
                }
                Err(e) if e.is_rate_limit() => return Err(e),
                Err(e) if e.is_price_guard() => {
                    warn!(error = %e, "Limit close guarded out, falling back to market");
                }
                Err(e) => {
                    error!(error = %e, "Limit close failed");
                    self.trade_log.error(now_ms, format!("Limit close failed: {e}"));
                    return Ok(());
                }
            }
        }

        match self
            .coordinator
            .market_close(now_ms, side, qty, guard, precision)
            .await
        {
            Ok(order) => {
                self.note_placed(&order, now_ms);
                self.trade_log
                    .info(now_ms, format!("Market close {side} {qty}"));
                Ok(())
            }
            Err(e) if e.is_rate_limit() => Err(e),
            Err(e) if e.is_price_guard() => {
                // Book too far from mark for a market order: rest a
                // marketable IOC limit instead, skipping the mark check.
                warn!(error = %e, "Market close guarded out, placing IOC limit close");
                let fallback_guard = PriceGuard {
                    mark_price: None,
                    ..*guard
                };
                match self
                    .coordinator
                    .place_order(
                        now_ms,
                        side,
                        close_price,
                        qty,
                        true,
                        Some(TimeInForce::ImmediateOrCancel),
                        &fallback_guard,
                        precision,
                    )
                    .await
                {
                    Ok(order) => {
                        self.note_placed(&order, now_ms);
                        self.trade_log
                            .info(now_ms, format!("Fallback close {side} {qty} @ {close_price}"));
                        Ok(())
                    }
                    Err(e2) if e2.is_rate_limit() => Err(e2),
                    Err(e2) => {
                        error!(error = %e2, "Fallback close failed");
                        self.trade_log.error(now_ms, format!("Fallback close failed: {e2}"));
                        Ok(())
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Market close failed");
                self.trade_log.error(now_ms, format!("Market close failed: {e}"));
                Ok(())
            }
        }
    }

    /// Rate-limit emergency: if a position is open, get protection on
    /// before the backoff window silences us.
    async fn enforce_rate_limit_stop(&mut self, now_ms: u64) {
        let position = self.position();
        if position.is_flat() {
            return;
        }
        let (bid, ask) = match self.depth.top_of_book() {
            Some(tob) => tob,
            None => return,
        };
        let guard = self.price_guard(&position, bid, ask);
        let precision = self.precision();
        if let Err(e) = self
            .close_position(now_ms, &position, bid, ask, &guard, &precision, false)
            .await
        {
            error!(error = %e, "Rate-limit stop failed");
            self.trade_log
                .error(now_ms, format!("Rate-limit stop failed: {e}"));
        }
    }

    // === Gates, cooldowns, helpers ===

    fn gates_pass(&mut self, _now_ms: u64) -> bool {
        if !self.feeds.all_live() {
            let checks = [
                (self.feeds.account, &mut self.missing_logged.account, "account"),
                (self.feeds.orders, &mut self.missing_logged.orders, "orders"),
                (self.feeds.depth, &mut self.missing_logged.depth, "depth"),
                (self.feeds.ticker, &mut self.missing_logged.ticker, "ticker"),
            ];
            for (arrived, logged, name) in checks {
                if !arrived && !*logged {
                    warn!(feed = name, "Waiting for first delivery");
                    *logged = true;
                }
            }
            return false;
        }
        if !self.startup_reset_done {
            debug!("Waiting for startup reset");
            return false;
        }
        true
    }

    fn arm_insufficient_balance(&mut self, now_ms: u64) {
        self.insufficient_balance_until_ms = Some(now_ms + INSUFFICIENT_BALANCE_COOLDOWN_MS);
        if !self.insufficient_balance_logged {
            warn!(
                cooldown_ms = INSUFFICIENT_BALANCE_COOLDOWN_MS,
                "Insufficient balance, entries paused"
            );
            self.trade_log
                .warn(now_ms, "Insufficient balance, entries paused");
            self.insufficient_balance_logged = true;
        }
    }

    /// Track a placement until the orders feed confirms it.
    fn note_placed(&mut self, order: &OpenOrder, now_ms: u64) {
        self.unconfirmed
            .push((order.clone(), now_ms + self.config.lock_timeout_ms()));
    }

    fn note_entry_placed(&mut self, side: OrderSide, now_ms: u64) {
        match side {
            OrderSide::Buy => self.last_buy_entry_ms = Some(now_ms),
            OrderSide::Sell => self.last_sell_entry_ms = Some(now_ms),
        }
    }

    fn last_entry_ms(&self, side: OrderSide) -> Option<u64> {
        match side {
            OrderSide::Buy => self.last_buy_entry_ms,
            OrderSide::Sell => self.last_sell_entry_ms,
        }
    }

    fn position(&self) -> PositionSnapshot {
        self.account
            .as_ref()
            .and_then(|a| a.position_for(&self.config.symbol))
            .cloned()
            .unwrap_or_else(|| PositionSnapshot::flat(self.config.symbol.clone()))
    }

    fn price_guard(&self, position: &PositionSnapshot, bid: Price, ask: Price) -> PriceGuard {
        let mark = position
            .mark_price
            .or_else(|| self.ticker.map(|t| t.last_price));
        PriceGuard {
            mark_price: mark,
            top_bid: Some(bid),
            top_ask: Some(ask),
            max_close_slippage_pct: self.config.max_close_slippage_pct,
        }
    }

    fn precision(&self) -> Precision {
        Precision {
            price_tick: Price::new(self.config.price_tick),
            qty_step: Size::new(self.config.qty_step),
            exact_limit_at_stop: self.config.mode == StrategyMode::OffsetMaker,
        }
    }

    fn emit_snapshot(&self) {
        let tob = self.depth.top_of_book();
        let position = self.position();
        let pnl = tob
            .map(|(bid, ask)| position.pnl_against(bid, ask))
            .unwrap_or(Decimal::ZERO);
        let offset_maker = self.config.mode == StrategyMode::OffsetMaker;
        let snapshot = EngineSnapshot {
            ready: self.is_ready(),
            top_bid: tob.map(|(bid, _)| bid),
            top_ask: tob.map(|(_, ask)| ask),
            spread: tob.map(|(bid, ask)| ask - bid),
            position: (!position.is_flat()).then_some(position),
            pnl,
            account_unrealized: self
                .account
                .as_ref()
                .map(|a| a.total_unrealized_profit)
                .unwrap_or(Decimal::ZERO),
            session_volume: self.session_volume,
            open_orders: self.open_orders.clone(),
            desired_orders: self.last_desired.clone(),
            trade_log: self.trade_log.snapshot(),
            feed_status: self.feeds,
            depth_imbalance: offset_maker.then_some(self.last_imbalance).flatten(),
            skip_buy_side: offset_maker && self.skip_buy_side,
            skip_sell_side: offset_maker && self.skip_sell_side,
        };
        if self.snapshot_tx.receiver_count() > 0 {
            if let Err(e) = self.snapshot_tx.send(snapshot) {
                debug!(error = %e, "Snapshot delivery failed");
            }
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
