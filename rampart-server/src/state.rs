//! The server's own durable record (§6 keyspace `/server/state`): which exchanges are enabled,
//! which products each watches, and the alert thresholds that gate [`crate::alerts`].
use rampart_instrument::market::{ExchangeId, Product};
use rampart_integration::{error::Error, kv::Kv};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Below this balance, [`crate::alerts::check_low_balance`] fires a message.
    pub low_balance_threshold: Decimal,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { low_balance_threshold: Decimal::ZERO }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServerState {
    pub enabled_exchanges: Vec<ExchangeId>,
    pub watchlists: HashMap<ExchangeId, Vec<Product>>,
    pub alerts: AlertConfig,
}

const KEY: &[u8] = b"/server/state";

impl ServerState {
    pub fn load(kv: &Arc<dyn Kv>) -> Result<Self, Error> {
        let mut found = None;
        kv.with_reader(&mut |tx| {
            found = tx
                .get(KEY)?
                .map(|bytes| serde_json::from_slice(&bytes).map_err(|err| Error::internal(err.to_string())))
                .transpose()?;
            Ok(())
        })?;
        Ok(found.unwrap_or_default())
    }

    pub fn store(&self, kv: &Arc<dyn Kv>) -> Result<(), Error> {
        let bytes = serde_json::to_vec(self).map_err(|err| Error::internal(err.to_string()))?;
        kv.with_read_writer(&mut |tx| tx.set(KEY, &bytes))
    }

    pub fn is_watched(&self, exchange: &ExchangeId, product: &Product) -> bool {
        self.watchlists
            .get(exchange)
            .map(|products| products.contains(product))
            .unwrap_or(false)
    }
}
