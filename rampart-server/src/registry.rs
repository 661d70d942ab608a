//! The product registry (§2 "Server glue"): `exchange`/`product` are capability sets represented
//! as a registry keyed by exchange name (§9 "Dynamic polymorphism"), backed by `dashmap` for the
//! same sharded-concurrent-map reasons the Product Adapter itself uses it.
use dashmap::DashMap;
use rampart_execution::ProductAdapter;
use rampart_instrument::market::Market;
use rampart_integration::error::Error;
use std::sync::Arc;

/// `(exchange, product) -> ProductAdapter`. One adapter per market, shared by every trader job
/// running against it.
#[derive(Default)]
pub struct ProductRegistry {
    adapters: DashMap<Market, Arc<ProductAdapter>>,
}

impl std::fmt::Debug for ProductRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductRegistry").field("markets", &self.adapters.len()).finish()
    }
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, market: Market, adapter: Arc<ProductAdapter>) {
        self.adapters.insert(market, adapter);
    }

    pub fn get(&self, market: &Market) -> Result<Arc<ProductAdapter>, Error> {
        self.adapters
            .get(market)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| Error::not_exist(format!("no product adapter registered for {market}")))
    }

    pub fn markets(&self) -> Vec<Market> {
        self.adapters.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn close_all(&self) {
        for entry in self.adapters.iter() {
            let _ = entry.value().close().await;
        }
    }
}
