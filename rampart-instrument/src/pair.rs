//! `Pair`: a BUY point and a SELL point whose sizes and sides are consistent, and the margin
//! adjustment that keeps a Pair's profit constant once exchange fees are taken into account.
use crate::point::{Point, Side};
use rampart_integration::error::Error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A BUY point and a SELL point; the atomic unit of a Waller's grid.
///
/// Invariants (enforced by [`Pair::new`]): `buy.side() == Side::Buy`, `sell.side() == Side::Sell`,
/// `sell.size <= buy.size`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
pub struct Pair {
    pub buy: Point,
    pub sell: Point,
}

impl Pair {
    pub fn new(buy: Point, sell: Point) -> Result<Self, Error> {
        if buy.side() != Side::Buy {
            return Err(Error::invalid("Pair.buy must be a BUY Point"));
        }
        if sell.side() != Side::Sell {
            return Err(Error::invalid("Pair.sell must be a SELL Point"));
        }
        if sell.size > buy.size {
            return Err(Error::invalid("Pair.sell.size must not exceed Pair.buy.size"));
        }
        Ok(Self { buy, sell })
    }

    pub fn price_margin(&self) -> Decimal {
        self.sell.price - self.buy.price
    }

    pub fn value_margin(&self) -> Decimal {
        self.sell.value() - self.buy.value()
    }

    pub fn fees_at(&self, pct: Decimal) -> Decimal {
        self.buy.fee_at(pct) + self.sell.fee_at(pct)
    }

    /// Raises the sell point's price and cancel by the same delta such that
    /// `sellValue*(1 - f/100) - buyValue - buyFee == valueMargin` still holds after the exchange
    /// charges `fee_pct` on both legs. The buy point is unchanged.
    ///
    /// Derivation: for unadjusted sell value `v0` and delta `d`, preserving the original
    /// (fee-free) `valueMargin = v0 - buyValue` requires
    /// `size*d*(1 - f/100) = feesAt(f)` (computed against the unadjusted pair), i.e.
    /// `d = feesAt(f) / (size * (1 - f/100))`.
    pub fn adjust_for_margin(&self, fee_pct: Decimal) -> Result<Self, Error> {
        let fees = self.fees_at(fee_pct);
        let denom = self.sell.size * (Decimal::ONE - fee_pct / Decimal::from(100));
        if denom <= Decimal::ZERO {
            return Err(Error::invalid(
                "adjust_for_margin: fee_pct leaves no sell size headroom",
            ));
        }
        let delta = fees / denom;

        let sell = Point::new(self.sell.size, self.sell.price + delta, self.sell.cancel + delta)?;
        Ok(Self { buy: self.buy, sell })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair(buy_price: Decimal, sell_price: Decimal) -> Pair {
        let buy = Point::new(dec!(1), buy_price, buy_price + dec!(5)).unwrap();
        let sell = Point::new(dec!(1), sell_price, sell_price - dec!(5)).unwrap();
        Pair::new(buy, sell).unwrap()
    }

    #[test]
    fn margin_adjustment_preserves_value_margin_after_fees() {
        let p = pair(dec!(100), dec!(200));
        let f = dec!(0.25);

        let adjusted = p.adjust_for_margin(f).unwrap();

        let fees_after = adjusted.fees_at(f);
        let value_margin_after = adjusted.value_margin();

        assert_eq!(value_margin_after - fees_after, p.value_margin());
    }

    #[test]
    fn margin_adjustment_matches_worked_example() {
        let p = pair(dec!(100), dec!(200));
        let adjusted = p.adjust_for_margin(dec!(0.25)).unwrap();

        // 200 + 0.75/0.9975 ~= 200.7519
        let expected = dec!(200) + (dec!(0.75) / dec!(0.9975));
        assert!((adjusted.sell.price - expected).abs() < dec!(0.0001));
    }
}
