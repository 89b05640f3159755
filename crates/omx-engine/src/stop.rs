//! Protective-stop pricing and replacement policy.
//!
//! A protective stop is a reduce-only stop order on the closing side of an
//! open position. The engine calls `assess` each tick to decide whether to
//! place, replace, or keep the current stop.

use omx_core::{OpenOrder, OrderSide, PositionSnapshot, Price, Size};
use rust_decimal::Decimal;

/// Stop trigger that caps the position loss at `loss_limit` USDT.
///
/// Long positions stop below entry, shorts above. Returns `None` when the
/// quantity is zero or the computed trigger is not positive.
pub fn calc_stop_loss_price(
    entry: Price,
    qty: Size,
    close_side: OrderSide,
    loss_limit: Decimal,
) -> Option<Price> {
    if !qty.is_positive() || loss_limit <= Decimal::ZERO {
        return None;
    }
    let per_unit = loss_limit / qty.inner();
    let stop = match close_side {
        // Closing a long sells below entry.
        OrderSide::Sell => entry.inner() - per_unit,
        // Closing a short buys above entry.
        OrderSide::Buy => entry.inner() + per_unit,
    };
    if stop <= Decimal::ZERO {
        return None;
    }
    Some(Price::new(stop))
}

/// Whether the loss limit has been breached at the current quotes.
pub fn should_stop_loss(
    position: &PositionSnapshot,
    bid: Price,
    ask: Price,
    loss_limit: Decimal,
) -> bool {
    if position.is_flat() || loss_limit <= Decimal::ZERO {
        return false;
    }
    position.pnl_against(bid, ask) <= -loss_limit
}

/// A stop trigger is placeable only on the correct side of the last price:
/// SELL stops at least one tick below, BUY stops at least one tick above.
pub fn stop_price_valid(stop: Price, close_side: OrderSide, last_price: Price, tick: Price) -> bool {
    match close_side {
        OrderSide::Sell => stop <= last_price - tick,
        OrderSide::Buy => stop >= last_price + tick,
    }
}

/// The stop-like order currently protecting the closing side, if any.
pub fn find_protective_stop<'a>(
    open_orders: &'a [OpenOrder],
    close_side: OrderSide,
) -> Option<&'a OpenOrder> {
    open_orders
        .iter()
        .find(|o| !o.is_terminal() && o.side == close_side && o.is_stop_like())
}

/// Decision for the protective stop this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum StopAction {
    /// No stop resting: place the desired one.
    Place,
    /// Current stop is stale (invalid placement or looser than desired):
    /// cancel it, then place the new one.
    Replace { cancel_order_id: String },
    /// Current stop is fine.
    Keep,
}

/// Compare the resting stop against the desired trigger.
///
/// "Tighter" means strictly closer to the market: higher for SELL stops,
/// lower for BUY stops.
pub fn assess(
    current: Option<&OpenOrder>,
    desired: Price,
    close_side: OrderSide,
    last_price: Price,
    tick: Price,
) -> StopAction {
    let current = match current {
        Some(order) => order,
        None => return StopAction::Place,
    };
    let current_trigger = if current.stop_price.is_positive() {
        current.stop_price
    } else {
        current.price
    };

    let invalid_placement = !stop_price_valid(current_trigger, close_side, last_price, tick);
    let tighter = match close_side {
        OrderSide::Sell => desired > current_trigger,
        OrderSide::Buy => desired < current_trigger,
    };

    if invalid_placement || tighter {
        StopAction::Replace {
            cancel_order_id: current.order_id.clone(),
        }
    } else {
        StopAction::Keep
    }
}

/// Offset-Maker refresh: move the stop to the current quote anchor when it
/// differs by at least one tick and the placement constraint still holds.
pub fn wants_exact_refresh(
    current_trigger: Price,
    anchor: Price,
    close_side: OrderSide,
    last_price: Price,
    tick: Price,
) -> bool {
    anchor.ticks_from(current_trigger, tick) >= Decimal::ONE
        && stop_price_valid(anchor, close_side, last_price, tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::{ClientOrderId, OrderStatus, OrderType};
    use rust_decimal_macros::dec;

    const TICK: Price = Price(dec!(0.1));

    fn stop_order(id: &str, close_side: OrderSide, trigger: Decimal) -> OpenOrder {
        OpenOrder {
            order_id: id.into(),
            client_order_id: ClientOrderId::from_string(format!("c{id}")),
            symbol: "BTCUSDT".into(),
            side: close_side,
            order_type: OrderType::StopMarket,
            status: OrderStatus::New,
            price: Price::ZERO,
            orig_qty: Size::new(dec!(0.5)),
            executed_qty: Size::ZERO,
            stop_price: Price::new(trigger),
            reduce_only: true,
            close_position: false,
            update_time: 0,
            time: 0,
        }
    }

    fn long(amt: Decimal, entry: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            symbol: "BTCUSDT".into(),
            position_amt: amt,
            entry_price: Price::new(entry),
            mark_price: None,
            unrealized_profit: Decimal::ZERO,
        }
    }

    #[test]
    fn test_calc_stop_long() {
        // 5 USDT budget on 0.5 units: 10 per unit below entry.
        let stop =
            calc_stop_loss_price(Price::new(dec!(100)), Size::new(dec!(0.5)), OrderSide::Sell, dec!(5));
        assert_eq!(stop.unwrap().inner(), dec!(90));
    }

    #[test]
    fn test_calc_stop_short() {
        let stop =
            calc_stop_loss_price(Price::new(dec!(100)), Size::new(dec!(0.5)), OrderSide::Buy, dec!(5));
        assert_eq!(stop.unwrap().inner(), dec!(110));
    }

    #[test]
    fn test_calc_stop_degenerate_inputs() {
        assert!(calc_stop_loss_price(Price::new(dec!(100)), Size::ZERO, OrderSide::Sell, dec!(5))
            .is_none());
        // Budget wider than entry: trigger would be negative.
        assert!(calc_stop_loss_price(
            Price::new(dec!(10)),
            Size::new(dec!(0.1)),
            OrderSide::Sell,
            dec!(5)
        )
        .is_none());
    }

    #[test]
    fn test_should_stop_loss_fires_on_breach() {
        let pos = long(dec!(0.1), dec!(100));
        // pnl at bid 90 = -1
        assert!(should_stop_loss(&pos, Price::new(dec!(90)), Price::new(dec!(91)), dec!(1)));
        assert!(!should_stop_loss(&pos, Price::new(dec!(95)), Price::new(dec!(96)), dec!(1)));
        assert!(!should_stop_loss(
            &long(dec!(0), dec!(100)),
            Price::new(dec!(1)),
            Price::new(dec!(2)),
            dec!(1)
        ));
    }

    #[test]
    fn test_stop_price_valid_boundaries() {
        let last = Price::new(dec!(100));
        assert!(stop_price_valid(Price::new(dec!(99.9)), OrderSide::Sell, last, TICK));
        assert!(!stop_price_valid(Price::new(dec!(100)), OrderSide::Sell, last, TICK));
        assert!(stop_price_valid(Price::new(dec!(100.1)), OrderSide::Buy, last, TICK));
        assert!(!stop_price_valid(Price::new(dec!(100)), OrderSide::Buy, last, TICK));
    }

    #[test]
    fn test_assess_places_when_absent() {
        let action = assess(None, Price::new(dec!(95)), OrderSide::Sell, Price::new(dec!(100)), TICK);
        assert_eq!(action, StopAction::Place);
    }

    #[test]
    fn test_assess_keeps_valid_equal_or_tighter_current() {
        let current = stop_order("7", OrderSide::Sell, dec!(96));
        // Desired looser than current: keep.
        let action = assess(
            Some(&current),
            Price::new(dec!(95)),
            OrderSide::Sell,
            Price::new(dec!(100)),
            TICK,
        );
        assert_eq!(action, StopAction::Keep);
    }

    #[test]
    fn test_assess_replaces_tighter_desired() {
        let current = stop_order("7", OrderSide::Sell, dec!(92));
        let action = assess(
            Some(&current),
            Price::new(dec!(95)),
            OrderSide::Sell,
            Price::new(dec!(100)),
            TICK,
        );
        assert_eq!(
            action,
            StopAction::Replace {
                cancel_order_id: "7".into()
            }
        );
    }

    #[test]
    fn test_assess_replaces_invalid_placement() {
        // SELL stop above the last price can never trigger correctly.
        let current = stop_order("9", OrderSide::Sell, dec!(101));
        let action = assess(
            Some(&current),
            Price::new(dec!(95)),
            OrderSide::Sell,
            Price::new(dec!(100)),
            TICK,
        );
        assert!(matches!(action, StopAction::Replace { .. }));
    }

    #[test]
    fn test_find_protective_stop_ignores_wrong_side() {
        let orders = vec![
            stop_order("1", OrderSide::Buy, dec!(105)),
            stop_order("2", OrderSide::Sell, dec!(95)),
        ];
        let found = find_protective_stop(&orders, OrderSide::Sell).unwrap();
        assert_eq!(found.order_id, "2");
    }

    #[test]
    fn test_wants_exact_refresh() {
        let last = Price::new(dec!(100));
        // One tick of drift and a valid anchor: refresh.
        assert!(wants_exact_refresh(
            Price::new(dec!(99.5)),
            Price::new(dec!(99.6)),
            OrderSide::Sell,
            last,
            TICK
        ));
        // Sub-tick drift: leave it alone.
        assert!(!wants_exact_refresh(
            Price::new(dec!(99.55)),
            Price::new(dec!(99.6)),
            OrderSide::Sell,
            last,
            TICK
        ));
        // Anchor on the wrong side of last: no refresh.
        assert!(!wants_exact_refresh(
            Price::new(dec!(99.5)),
            Price::new(dec!(100.5)),
            OrderSide::Sell,
            last,
            TICK
        ));
    }
}
