//! Orphan-position reconciliation.
//!
//! A position with no reduce-only or stop-like order working on its closing
//! side is naked. This module detects that state and places a single
//! protective reduce-only limit at the top of the book. Idempotent: once
//! protection rests, subsequent calls take no action.

use omx_core::{
    DesiredOrder, OpenOrder, OrderSide, PositionSnapshot, Price, TimeInForce,
};
use tracing::{debug, info};

use crate::coordinator::{OrderCoordinator, Precision, PriceGuard};
use crate::error::EngineResult;

/// Decide whether a protective close is needed, and at what price.
///
/// Returns `None` when flat, when protection already rests on the closing
/// side, or when no usable price exists.
pub fn orphan_close_intent(
    position: &PositionSnapshot,
    open_orders: &[OpenOrder],
    top_bid: Option<Price>,
    top_ask: Option<Price>,
    last_price: Option<Price>,
) -> Option<DesiredOrder> {
    let close_side = position.close_side()?;

    if open_orders
        .iter()
        .any(|o| !o.is_terminal() && o.protects_close_side(close_side))
    {
        debug!(side = %close_side, "Position already protected");
        return None;
    }

    let price = match close_side {
        OrderSide::Sell => top_ask.or(last_price),
        OrderSide::Buy => top_bid.or(last_price),
    }?;
    if !price.is_positive() {
        return None;
    }

    Some(DesiredOrder::close(close_side, price, position.abs_amount()))
}

/// Place the protective close when one is needed.
///
/// Returns the placed order when action was taken, `None` otherwise. The
/// order is IOC when the caller asks for it or `strict_limit_only` is
/// configured.
#[allow(clippy::too_many_arguments)]
pub async fn reconcile_orphaned_position(
    coordinator: &mut OrderCoordinator,
    now_ms: u64,
    position: &PositionSnapshot,
    open_orders: &[OpenOrder],
    top_bid: Option<Price>,
    top_ask: Option<Price>,
    last_price: Option<Price>,
    ioc: bool,
    strict_limit_only: bool,
    guard: &PriceGuard,
    precision: &Precision,
) -> EngineResult<Option<OpenOrder>> {
    let intent = match orphan_close_intent(position, open_orders, top_bid, top_ask, last_price) {
        Some(intent) => intent,
        None => return Ok(None),
    };

    let tif = (ioc || strict_limit_only).then_some(TimeInForce::ImmediateOrCancel);
    let order = coordinator
        .place_order(
            now_ms,
            intent.side,
            intent.price,
            intent.amount,
            true,
            tif,
            guard,
            precision,
        )
        .await?;
    info!(
        side = %intent.side,
        price = %intent.price,
        qty = %intent.amount,
        order_id = %order.order_id,
        "Orphaned position closed out"
    );
    Ok(Some(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use omx_core::{ClientOrderId, OrderStatus, OrderType, Size};
    use omx_exchange::MockExchange;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn pos(amt: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            symbol: "BTCUSDT".into(),
            position_amt: amt,
            entry_price: Price::new(dec!(100)),
            mark_price: Some(Price::new(dec!(100))),
            unrealized_profit: Decimal::ZERO,
        }
    }

    fn reduce_only_order(side: OrderSide, price: Decimal, qty: Decimal) -> OpenOrder {
        OpenOrder {
            order_id: "11".into(),
            client_order_id: ClientOrderId::from_string("c11".into()),
            symbol: "BTCUSDT".into(),
            side,
            order_type: OrderType::Limit,
            status: OrderStatus::New,
            price: Price::new(price),
            orig_qty: Size::new(qty),
            executed_qty: Size::ZERO,
            stop_price: Price::ZERO,
            reduce_only: true,
            close_position: false,
            update_time: 0,
            time: 0,
        }
    }

    fn precision() -> Precision {
        Precision {
            price_tick: Price::new(dec!(0.1)),
            qty_step: Size::new(dec!(0.001)),
            exact_limit_at_stop: false,
        }
    }

    fn guard() -> PriceGuard {
        PriceGuard {
            mark_price: Some(Price::new(dec!(100))),
            top_bid: Some(Price::new(dec!(99.9))),
            top_ask: Some(Price::new(dec!(100.1))),
            max_close_slippage_pct: dec!(0.05),
        }
    }

    #[test]
    fn test_flat_position_no_intent() {
        let intent = orphan_close_intent(
            &pos(dec!(0)),
            &[],
            Some(Price::new(dec!(99.9))),
            Some(Price::new(dec!(100.1))),
            None,
        );
        assert!(intent.is_none());
    }

    #[test]
    fn test_long_closes_at_ask() {
        let intent = orphan_close_intent(
            &pos(dec!(0.5)),
            &[],
            Some(Price::new(dec!(99.9))),
            Some(Price::new(dec!(100.1))),
            None,
        )
        .unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.price.inner(), dec!(100.1));
        assert_eq!(intent.amount.inner(), dec!(0.5));
        assert!(intent.reduce_only);
    }

    #[test]
    fn test_short_closes_at_bid() {
        let intent = orphan_close_intent(
            &pos(dec!(-0.2)),
            &[],
            Some(Price::new(dec!(99.9))),
            Some(Price::new(dec!(100.1))),
            None,
        )
        .unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.price.inner(), dec!(99.9));
    }

    #[test]
    fn test_existing_protection_suppresses_intent() {
        let orders = vec![reduce_only_order(OrderSide::Buy, dec!(99.9), dec!(0.2))];
        let intent = orphan_close_intent(
            &pos(dec!(-0.2)),
            &orders,
            Some(Price::new(dec!(99.9))),
            Some(Price::new(dec!(100.1))),
            None,
        );
        assert!(intent.is_none());
    }

    #[test]
    fn test_falls_back_to_last_price() {
        let intent = orphan_close_intent(
            &pos(dec!(0.5)),
            &[],
            None,
            None,
            Some(Price::new(dec!(100))),
        )
        .unwrap();
        assert_eq!(intent.price.inner(), dec!(100));
    }

    #[test]
    fn test_no_price_no_intent() {
        let intent = orphan_close_intent(&pos(dec!(0.5)), &[], None, None, None);
        assert!(intent.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_sends_ioc_close_then_is_idempotent() {
        let mock = Arc::new(MockExchange::new());
        let mut coord = OrderCoordinator::new(mock.clone(), "BTCUSDT", 4000);
        let position = pos(dec!(0.5));

        let took = reconcile_orphaned_position(
            &mut coord,
            0,
            &position,
            &[],
            Some(Price::new(dec!(99.9))),
            Some(Price::new(dec!(100.1))),
            None,
            true,
            false,
            &guard(),
            &precision(),
        )
        .await
        .unwrap();
        assert!(took.is_some());

        let req = mock.last_order().unwrap();
        assert_eq!(req.side, OrderSide::Sell);
        assert_eq!(req.price.as_deref(), Some("100.1"));
        assert_eq!(req.quantity.unwrap().inner(), dec!(0.5));
        assert!(req.reduce_only);
        assert_eq!(req.time_in_force, Some(TimeInForce::ImmediateOrCancel));

        // The placed order now rests on the closing side: second pass is a
        // no-op.
        let resting = reduce_only_order(OrderSide::Sell, dec!(100.1), dec!(0.5));
        let took_again = reconcile_orphaned_position(
            &mut coord,
            1000,
            &position,
            std::slice::from_ref(&resting),
            Some(Price::new(dec!(99.9))),
            Some(Price::new(dec!(100.1))),
            None,
            true,
            false,
            &guard(),
            &precision(),
        )
        .await
        .unwrap();
        assert!(took_again.is_none());
        assert_eq!(mock.placed_orders().len(), 1);
    }
}
