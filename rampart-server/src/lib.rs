#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]
//! Server glue: secrets, the product registry, low-balance alerts, startup fix passes, and the
//! CLI-equivalent command API over the Job Runner (§2, §6).
pub mod alerts;
pub mod command;
pub mod fixes;
pub mod options;
pub mod registry;
pub mod secrets;
pub mod server;
pub mod state;

pub use options::{Config, ExchangeClientOptions, ServerOptions};
pub use registry::ProductRegistry;
pub use secrets::{Credentials, SecretStore};
pub use server::Server;
pub use state::{AlertConfig, ServerState};
