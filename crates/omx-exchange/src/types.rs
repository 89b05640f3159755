//! Wire-shaped order submission type.

use omx_core::{ClientOrderId, OrderSide, OrderType, Size, TimeInForce};
use serde::{Deserialize, Serialize};

/// Order submission payload.
///
/// Prices travel as strings, already rounded to tick, so the adapter never
/// re-serializes a float representation at the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub client_order_id: ClientOrderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Size>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub close_position: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    /// A plain limit order.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: String,
        quantity: Size,
        reduce_only: bool,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            client_order_id: ClientOrderId::new(),
            price: Some(price),
            quantity: Some(quantity),
            stop_price: None,
            reduce_only,
            close_position: false,
            time_in_force: None,
        }
    }

    /// A market order.
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Size) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            client_order_id: ClientOrderId::new(),
            price: None,
            quantity: Some(quantity),
            stop_price: None,
            reduce_only: true,
            close_position: false,
            time_in_force: None,
        }
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }
}
