//! PRTG Connector - PRTG Network Monitor data source
//!
//! Serves PRTG time series, live streams and object properties as data frames
//! over a small HTTP API.

mod config;
mod connector;
mod frame;
mod observer;
mod prtg;
mod query;
mod stream;
mod timeparse;
mod web;

#[cfg(test)]
mod testing;

use config::ServerConfig;
use connector::Connector;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("prtg_connector=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    let settings = cfg.settings()?;
    tracing::info!("Starting PRTG connector on port {}...", cfg.http_port);
    tracing::info!(
        "Using PRTG server at {} (timezone {}, cache {}s)",
        settings.base_url,
        settings.timezone.name(),
        settings.cache_time.as_secs()
    );

    let connector = Arc::new(Connector::new(&settings)?);

    // Start web server
    let server = Server::new(&cfg, connector);
    server.start().await?;

    Ok(())
}
