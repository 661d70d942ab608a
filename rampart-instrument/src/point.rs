//! `Point` and `Side`: the atomic unit every Limiter trades around.
use rampart_integration::error::Error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// A single limit point: `size` to trade at `price`, auto-cancelling once the ticker leaves
/// `[price, cancel)` (BUY) or `(cancel, price]` (SELL).
///
/// Invariants (enforced by [`Point::new`]): `size`, `price`, `cancel` are all positive, and
/// `cancel != price`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Point {
    pub size: Decimal,
    pub price: Decimal,
    pub cancel: Decimal,
}

impl Point {
    pub fn new(size: Decimal, price: Decimal, cancel: Decimal) -> Result<Self, Error> {
        if size <= Decimal::ZERO {
            return Err(Error::invalid("Point.size must be positive"));
        }
        if price <= Decimal::ZERO {
            return Err(Error::invalid("Point.price must be positive"));
        }
        if cancel <= Decimal::ZERO {
            return Err(Error::invalid("Point.cancel must be positive"));
        }
        if cancel == price {
            return Err(Error::invalid("Point.cancel must not equal Point.price"));
        }
        Ok(Self { size, price, cancel })
    }

    pub fn side(&self) -> Side {
        if self.cancel > self.price {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    /// `price <= ticker < cancel` for BUY, `cancel < ticker <= price` for SELL.
    pub fn in_range(&self, ticker: Decimal) -> bool {
        match self.side() {
            Side::Buy => self.price <= ticker && ticker < self.cancel,
            Side::Sell => self.cancel < ticker && ticker <= self.price,
        }
    }

    pub fn value(&self) -> Decimal {
        self.size * self.price
    }

    pub fn fee_at(&self, pct: Decimal) -> Decimal {
        self.value() * pct / Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_rejects_non_positive_fields_and_a_cancel_equal_to_price() {
        assert!(Point::new(dec!(0), dec!(100), dec!(110)).is_err());
        assert!(Point::new(dec!(1), dec!(0), dec!(110)).is_err());
        assert!(Point::new(dec!(1), dec!(100), dec!(0)).is_err());
        assert!(Point::new(dec!(1), dec!(100), dec!(100)).is_err());
    }

    #[test]
    fn side_is_derived_from_whether_cancel_is_above_or_below_price() {
        let buy = Point::new(dec!(1), dec!(100), dec!(110)).unwrap();
        assert_eq!(buy.side(), Side::Buy);

        let sell = Point::new(dec!(1), dec!(100), dec!(90)).unwrap();
        assert_eq!(sell.side(), Side::Sell);
    }

    #[test]
    fn in_range_is_half_open_on_the_cancel_edge_for_buy() {
        let p = Point::new(dec!(1), dec!(100), dec!(110)).unwrap();
        assert!(!p.in_range(dec!(99.99)));
        assert!(p.in_range(dec!(100)));
        assert!(p.in_range(dec!(109.99)));
        assert!(!p.in_range(dec!(110)));
    }

    #[test]
    fn in_range_is_half_open_on_the_cancel_edge_for_sell() {
        let p = Point::new(dec!(1), dec!(100), dec!(90)).unwrap();
        assert!(!p.in_range(dec!(90)));
        assert!(p.in_range(dec!(90.01)));
        assert!(p.in_range(dec!(100)));
        assert!(!p.in_range(dec!(100.01)));
    }

    #[test]
    fn value_and_fee_at_are_simple_products() {
        let p = Point::new(dec!(2), dec!(100), dec!(110)).unwrap();
        assert_eq!(p.value(), dec!(200));
        assert_eq!(p.fee_at(dec!(0.5)), dec!(1));
    }
}
