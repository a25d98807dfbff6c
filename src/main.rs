//! Web cache (v1)
//!
//! A caching HTTP proxy built with Tokio. Browsers point at it as their HTTP
//! proxy; GET responses are stored as timestamped frames so later requests
//! can be answered from the cache or from history.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                    WEB CACHE                     │
//!                        │                                                  │
//!   Browser request      │  ┌──────────┐   ┌─────────┐   ┌──────────────┐   │
//!   ─────────────────────┼─▶│ listener │──▶│ adapter │──▶│   request    │   │
//!                        │  └──────────┘   └─────────┘   └──────┬───────┘   │
//!                        │                                      ▼           │
//!                        │                               ┌──────────────┐   │
//!                        │          ┌───────────────────▶│   handler    │   │
//!                        │          │                    └──┬────────┬──┘   │
//!                        │   ┌──────┴──────┐                │        │      │
//!                        │   │    store    │◀───────────────┘        ▼      │
//!                        │   │ (+ archive) │                  ┌──────────┐  │
//!   Browser response     │   └─────────────┘                  │ response │◀─┼── Origin
//!   ◀────────────────────┼────────────────────────────────────┴──────────┘  │
//!                        └──────────────────────────────────────────────────┘
//! ```

use web_cache::config::loader::{read_config, ConfigError};
use web_cache::config::validation::validate_config;
use web_cache::config::{Cli, ProxyConfig};
use web_cache::lifecycle::signals::shutdown_signal;
use web_cache::observability::{logging, metrics};
use web_cache::Server;

use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!("web-cache v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        store = %config.store.address,
        cache_frames = config.store.cache_frames,
        archive_frames = config.store.archive_frames(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = Server::build(&config).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run().await?;
    Ok(())
}
