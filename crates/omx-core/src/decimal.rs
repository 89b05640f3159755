//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Prices are serialized
//! to strings after tick rounding at the API boundary; internal comparisons
//! operate on integer tick counts where possible.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

use crate::order::OrderSide;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with sizes in calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the nearest tick multiple.
    #[inline]
    pub fn floor_to_tick(&self, tick: Price) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick.0).floor() * tick.0)
    }

    /// Round up to the nearest tick multiple.
    #[inline]
    pub fn ceil_to_tick(&self, tick: Price) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick.0).ceil() * tick.0)
    }

    /// Round to tick size toward the book-favourable side:
    /// BUY rounds down, SELL rounds up.
    #[inline]
    pub fn round_to_tick(&self, tick: Price, side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => self.floor_to_tick(tick),
            OrderSide::Sell => self.ceil_to_tick(tick),
        }
    }

    /// Round to the nearest tick, side-agnostic. Used for plan matching keys.
    #[inline]
    pub fn snap_to_tick(&self, tick: Price) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self((self.0 / tick.0).round() * tick.0)
    }

    /// Number of whole ticks between two prices.
    #[inline]
    pub fn ticks_from(&self, other: Price, tick: Price) -> Decimal {
        if tick.is_zero() {
            return Decimal::ZERO;
        }
        ((self.0 - other.0) / tick.0).abs()
    }

    /// Relative distance from a reference price: `|self − ref| / ref`.
    #[inline]
    pub fn slippage_from(&self, reference: Price) -> Option<Decimal> {
        if reference.is_zero() {
            return None;
        }
        Some((self.0 - reference.0).abs() / reference.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl Neg for Price {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

/// Size/quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the quantity step.
    #[inline]
    pub fn round_to_step(&self, step: Size) -> Self {
        if step.is_zero() {
            return *self;
        }
        Self((self.0 / step.0).floor() * step.0)
    }

    /// Whether two quantities are equal within one step.
    #[inline]
    pub fn within_step(&self, other: Size, step: Size) -> bool {
        (self.0 - other.0).abs() <= step.0
    }

    /// Notional value: size × price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_tick_buy_floors() {
        let p = Price::new(dec!(100.17));
        let tick = Price::new(dec!(0.1));
        assert_eq!(p.round_to_tick(tick, OrderSide::Buy).inner(), dec!(100.1));
    }

    #[test]
    fn test_round_to_tick_sell_ceils() {
        let p = Price::new(dec!(100.11));
        let tick = Price::new(dec!(0.1));
        assert_eq!(p.round_to_tick(tick, OrderSide::Sell).inner(), dec!(100.2));
    }

    #[test]
    fn test_round_to_tick_exact_multiple_unchanged() {
        let p = Price::new(dec!(100.3));
        let tick = Price::new(dec!(0.1));
        assert_eq!(p.round_to_tick(tick, OrderSide::Buy).inner(), dec!(100.3));
        assert_eq!(p.round_to_tick(tick, OrderSide::Sell).inner(), dec!(100.3));
    }

    #[test]
    fn test_snap_to_tick() {
        let tick = Price::new(dec!(0.5));
        assert_eq!(Price::new(dec!(100.2)).snap_to_tick(tick).inner(), dec!(100.0));
        assert_eq!(Price::new(dec!(100.3)).snap_to_tick(tick).inner(), dec!(100.5));
    }

    #[test]
    fn test_ticks_from() {
        let tick = Price::new(dec!(0.1));
        let a = Price::new(dec!(100.0));
        let b = Price::new(dec!(100.3));
        assert_eq!(b.ticks_from(a, tick), dec!(3));
        assert_eq!(a.ticks_from(b, tick), dec!(3));
    }

    #[test]
    fn test_slippage_from() {
        let mark = Price::new(dec!(100));
        let p = Price::new(dec!(101));
        assert_eq!(p.slippage_from(mark).unwrap(), dec!(0.01));
        assert!(p.slippage_from(Price::ZERO).is_none());
    }

    #[test]
    fn test_size_round_to_step() {
        let s = Size::new(dec!(0.1299));
        let step = Size::new(dec!(0.01));
        assert_eq!(s.round_to_step(step).inner(), dec!(0.12));
    }

    #[test]
    fn test_size_within_step() {
        let step = Size::new(dec!(0.01));
        assert!(Size::new(dec!(0.50)).within_step(Size::new(dec!(0.51)), step));
        assert!(!Size::new(dec!(0.50)).within_step(Size::new(dec!(0.52)), step));
    }

    #[test]
    fn test_price_display_normalized() {
        let p = Price::new(dec!(100.100));
        assert_eq!(p.to_string(), "100.1");
    }
}
