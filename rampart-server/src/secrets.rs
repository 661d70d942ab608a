//! Exchange API credentials (§2 "Server glue"). Read once from the process environment at
//! startup and never persisted to the KV: credential storage is a collaborator out of scope, but
//! the core still needs somewhere to get them from to construct an `ExchangeClient`.
use rampart_instrument::market::ExchangeId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// `exchange -> credentials`, keyed by the same `ExchangeId` an `AdapterOptions`/`ProductAdapter`
/// is constructed with.
#[derive(Debug, Default)]
pub struct SecretStore {
    credentials: HashMap<ExchangeId, Credentials>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `RAMPART_<EXCHANGE>_API_KEY` / `RAMPART_<EXCHANGE>_API_SECRET` for every exchange in
    /// `exchanges`, skipping any exchange whose pair isn't fully set.
    pub fn from_env(exchanges: &[ExchangeId]) -> Self {
        let mut credentials = HashMap::new();
        for exchange in exchanges {
            let prefix = exchange.0.to_uppercase().replace('-', "_");
            let key = std::env::var(format!("RAMPART_{prefix}_API_KEY"));
            let secret = std::env::var(format!("RAMPART_{prefix}_API_SECRET"));
            if let (Ok(api_key), Ok(api_secret)) = (key, secret) {
                credentials.insert(exchange.clone(), Credentials { api_key, api_secret });
            }
        }
        Self { credentials }
    }

    pub fn get(&self, exchange: &ExchangeId) -> Option<&Credentials> {
        self.credentials.get(exchange)
    }

    pub fn insert(&mut self, exchange: ExchangeId, credentials: Credentials) {
        self.credentials.insert(exchange, credentials);
    }
}
