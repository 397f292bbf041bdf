//! Pet messenger - Entry Point
//!
//! Loads configuration, seeds the in-memory store and starts accepting
//! connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paws_messenger::{server, AppError, Manager, MemoryStore, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // e.g., RUST_LOG=debug or RUST_LOG=paws_messenger=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paws_messenger=info")),
        )
        .init();

    let mut config = ServerConfig::from_env().map_err(AppError::from)?;

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.addr = addr;
    }

    let store = Arc::new(MemoryStore::new());
    for (identifier, owner) in &config.pets {
        store.register_owner(*identifier, owner.clone());
    }
    info!("Seeded {} pets", config.pets.len());

    let listener = TcpListener::bind(&config.addr).await?;
    let config = Arc::new(config);
    let manager = Manager::new(store, config.clone());

    server::run(listener, manager, config).await;
    Ok(())
}
