//! The `rampartd` binary: the outermost edge that loads config, wires logging, constructs a
//! [`Server`] over a durable KV store, runs the startup resume pass, and waits for shutdown.
//! `anyhow` is confined to this file; every library crate stays on its own `Error` taxonomy.
use anyhow::{Context, Result};
use rampart_integration::{kv::SledKv, messenger::NullMessenger};
use rampart_server::{Config, SecretStore, Server};
use std::sync::Arc;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(cfg!(debug_assertions))
        .json()
        .init();
}

fn load_config() -> Result<Config> {
    let Ok(path) = std::env::var("RAMPART_CONFIG") else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(&path).with_context(|| format!("reading config file {path}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let config = load_config()?;

    let kv_path = config.kv_path.clone().unwrap_or_else(|| "./rampart-data".to_string());
    let kv = Arc::new(SledKv::open(&kv_path).with_context(|| format!("opening KV store at {kv_path}"))?);

    // Telegram/email dispatch is a collaborator out of scope; NullMessenger satisfies the contract
    // until one is wired in.
    let messenger = Arc::new(NullMessenger);

    let server = Server::new(kv, messenger, SecretStore::new(), config.server);
    server.start().context("startup resume pass failed")?;

    tracing::info!("rampartd started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown signal received, stopping");

    server.stop().await;
    tracing::info!("rampartd stopped cleanly");

    Ok(())
}
