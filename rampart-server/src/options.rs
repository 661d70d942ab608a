//! Option sets (§6 "Options (enumerated)"), `serde`-deserializable with the spec's stated
//! defaults so a deployment can override just the fields it cares about from TOML.
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn millis(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Tunables for an [`rampart_execution::client::ExchangeClient`] implementation. The core only
/// specifies their meaning; a concrete client reads them at construction.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeClientOptions {
    #[serde(with = "duration_secs")]
    pub http_client_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub max_time_adjustment: Duration,
    #[serde(with = "duration_millis")]
    pub max_fetch_time_latency: Duration,
    #[serde(with = "duration_secs")]
    pub websocket_ping_interval: Duration,
    #[serde(with = "duration_secs")]
    pub refresh_orders_interval: Duration,
    pub batch_query_orders_size: usize,
}

impl Default for ExchangeClientOptions {
    fn default() -> Self {
        Self {
            http_client_timeout: secs(5),
            max_time_adjustment: secs(5 * 60),
            max_fetch_time_latency: millis(500),
            websocket_ping_interval: secs(30),
            refresh_orders_interval: secs(30),
            batch_query_orders_size: 25,
        }
    }
}

/// Server-wide tunables.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerOptions {
    pub run_fixes: bool,
    pub no_resume: bool,
    pub no_fetch_candles: bool,
    #[serde(with = "duration_secs")]
    pub max_http_client_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub max_fetch_time_latency: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            run_fixes: false,
            no_resume: false,
            no_fetch_candles: false,
            max_http_client_timeout: secs(10),
            max_fetch_time_latency: secs(1),
        }
    }
}

/// Top-level config file shape, loaded via `toml` + `serde` at the binary's outermost edge; every
/// field has a spec-mandated default so an empty or partial file is valid.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerOptions,
    pub exchange_client: ExchangeClientOptions,
    pub kv_path: Option<String>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(de)?))
    }
}
