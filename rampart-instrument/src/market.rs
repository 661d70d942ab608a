//! `Exchange` and `Product` (market) identifiers that key every per-(exchange, product) adapter
//! and topic the core creates.
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::{Display, Formatter};

/// A unique identifier for a supported exchange, eg/ `binance`, `coinbase`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct ExchangeId(pub SmolStr);

impl ExchangeId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Into<SmolStr>> From<T> for ExchangeId {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// A tradeable product (market) on an exchange, eg/ `BTC-USD`. Products are the unit the Product
/// Adapter (§4.3) and the topic bus are keyed on.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Product(pub SmolStr);

impl Product {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }
}

impl Display for Product {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Into<SmolStr>> From<T> for Product {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// A unique `(exchange, product)` combination; the key every `ProductAdapter` and its topics are
/// registered under.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Market {
    pub exchange: ExchangeId,
    pub product: Product,
}

impl Market {
    pub fn new(exchange: impl Into<ExchangeId>, product: impl Into<Product>) -> Self {
        Self {
            exchange: exchange.into(),
            product: product.into(),
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_displays_as_exchange_colon_product() {
        let market = Market::new("binance", "BTC-USD");
        assert_eq!(market.to_string(), "binance:BTC-USD");
    }

    #[test]
    fn markets_with_the_same_exchange_and_product_are_equal_and_hash_equal() {
        use std::collections::HashSet;

        let a = Market::new("binance", "BTC-USD");
        let b = Market::new("binance", "BTC-USD");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn markets_on_different_exchanges_are_distinct() {
        let a = Market::new("binance", "BTC-USD");
        let b = Market::new("coinbase", "BTC-USD");
        assert_ne!(a, b);
    }
}
