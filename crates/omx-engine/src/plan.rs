//! Quote plan reconciliation.
//!
//! Diffs the desired quote set against live open orders. Callers pre-filter
//! terminal, stop-like, and pending-cancel orders out of `current_open`.

use omx_core::{DesiredOrder, OpenOrder, OrderSide, Price, Size};

/// Diff between the book we have and the book we want.
#[derive(Debug, Clone, Default)]
pub struct OrderPlan {
    /// Open orders with no desired counterpart, oldest first.
    pub to_cancel: Vec<OpenOrder>,
    /// Desired orders with no live counterpart, in the order given.
    pub to_place: Vec<DesiredOrder>,
}

impl OrderPlan {
    pub fn is_empty(&self) -> bool {
        self.to_cancel.is_empty() && self.to_place.is_empty()
    }
}

/// Matching key: side, tick-rounded price, reduce-only flag.
fn key(side: OrderSide, price: Price, reduce_only: bool, tick: Price) -> (OrderSide, Price, bool) {
    (side, price.snap_to_tick(tick), reduce_only)
}

/// Compute `(to_cancel, to_place)` for one tick.
///
/// Each desired order greedily consumes at most one matching open order;
/// amounts must agree within one quantity step. Applying the plan and
/// rerunning against a stable book yields an empty plan.
pub fn make_order_plan(
    current_open: &[OpenOrder],
    desired: &[DesiredOrder],
    price_tick: Price,
    qty_step: Size,
) -> OrderPlan {
    let mut consumed = vec![false; current_open.len()];
    let mut to_place = Vec::new();

    for want in desired {
        let want_key = key(want.side, want.price, want.reduce_only, price_tick);
        let matched = current_open.iter().enumerate().find(|(i, open)| {
            !consumed[*i]
                && key(open.side, open.price, open.reduce_only, price_tick) == want_key
                && open.orig_qty.within_step(want.amount, qty_step)
        });
        match matched {
            Some((i, _)) => consumed[i] = true,
            None => to_place.push(*want),
        }
    }

    let mut to_cancel: Vec<OpenOrder> = current_open
        .iter()
        .enumerate()
        .filter(|(i, _)| !consumed[*i])
        .map(|(_, o)| o.clone())
        .collect();
    to_cancel.sort_by_key(|o| o.update_time);

    OrderPlan { to_cancel, to_place }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::{ClientOrderId, OrderStatus, OrderType};
    use rust_decimal_macros::dec;

    fn open(id: &str, side: OrderSide, price: Price, qty: Size, update_time: u64) -> OpenOrder {
        OpenOrder {
            order_id: id.into(),
            client_order_id: ClientOrderId::from_string(format!("c{id}")),
            symbol: "BTCUSDT".into(),
            side,
            order_type: OrderType::Limit,
            status: OrderStatus::New,
            price,
            orig_qty: qty,
            executed_qty: Size::ZERO,
            stop_price: Price::ZERO,
            reduce_only: false,
            close_position: false,
            update_time,
            time: update_time,
        }
    }

    const TICK: Price = Price(dec!(0.1));
    const STEP: Size = Size(dec!(0.001));

    #[test]
    fn test_stable_book_yields_empty_plan() {
        let opens = vec![
            open("1", OrderSide::Buy, Price::new(dec!(99.9)), Size::new(dec!(0.5)), 10),
            open("2", OrderSide::Sell, Price::new(dec!(100.1)), Size::new(dec!(0.5)), 11),
        ];
        let desired = vec![
            DesiredOrder::entry(OrderSide::Buy, Price::new(dec!(99.9)), Size::new(dec!(0.5))),
            DesiredOrder::entry(OrderSide::Sell, Price::new(dec!(100.1)), Size::new(dec!(0.5))),
        ];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_price_change_cancels_and_places() {
        let opens = vec![open(
            "1",
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.5)),
            10,
        )];
        let desired = vec![DesiredOrder::entry(
            OrderSide::Buy,
            Price::new(dec!(99.8)),
            Size::new(dec!(0.5)),
        )];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        assert_eq!(plan.to_cancel.len(), 1);
        assert_eq!(plan.to_place.len(), 1);
        assert_eq!(plan.to_place[0].price.inner(), dec!(99.8));
    }

    #[test]
    fn test_qty_within_step_matches() {
        let opens = vec![open(
            "1",
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.5005)),
            10,
        )];
        let desired = vec![DesiredOrder::entry(
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.5)),
        )];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_qty_beyond_step_replaces() {
        let opens = vec![open(
            "1",
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.6)),
            10,
        )];
        let desired = vec![DesiredOrder::entry(
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.5)),
        )];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        assert_eq!(plan.to_cancel.len(), 1);
        assert_eq!(plan.to_place.len(), 1);
    }

    #[test]
    fn test_reduce_only_is_part_of_the_key() {
        let opens = vec![open(
            "1",
            OrderSide::Sell,
            Price::new(dec!(100.1)),
            Size::new(dec!(0.5)),
            10,
        )];
        let desired = vec![DesiredOrder::close(
            OrderSide::Sell,
            Price::new(dec!(100.1)),
            Size::new(dec!(0.5)),
        )];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        // Entry on the book, reduce-only wanted: replace.
        assert_eq!(plan.to_cancel.len(), 1);
        assert_eq!(plan.to_place.len(), 1);
    }

    #[test]
    fn test_cancels_ordered_oldest_first() {
        let opens = vec![
            open("1", OrderSide::Buy, Price::new(dec!(99.0)), Size::new(dec!(0.5)), 30),
            open("2", OrderSide::Buy, Price::new(dec!(99.1)), Size::new(dec!(0.5)), 10),
            open("3", OrderSide::Buy, Price::new(dec!(99.2)), Size::new(dec!(0.5)), 20),
        ];
        let plan = make_order_plan(&opens, &[], TICK, STEP);
        let ids: Vec<&str> = plan.to_cancel.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_greedy_consumes_each_open_once() {
        let opens = vec![open(
            "1",
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.5)),
            10,
        )];
        let desired = vec![
            DesiredOrder::entry(OrderSide::Buy, Price::new(dec!(99.9)), Size::new(dec!(0.5))),
            DesiredOrder::entry(OrderSide::Buy, Price::new(dec!(99.9)), Size::new(dec!(0.5))),
        ];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        assert!(plan.to_cancel.is_empty());
        assert_eq!(plan.to_place.len(), 1);
    }

    #[test]
    fn test_near_tick_prices_snap_to_same_key() {
        // Float-ish drift off the tick grid still matches.
        let opens = vec![open(
            "1",
            OrderSide::Buy,
            Price::new(dec!(99.9000001)),
            Size::new(dec!(0.5)),
            10,
        )];
        let desired = vec![DesiredOrder::entry(
            OrderSide::Buy,
            Price::new(dec!(99.9)),
            Size::new(dec!(0.5)),
        )];
        let plan = make_order_plan(&opens, &desired, TICK, STEP);
        assert!(plan.is_empty());
    }
}
