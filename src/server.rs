//! Accept loop
//!
//! Spawns one task per incoming TCP connection; each task runs
//! `handle_connection` with a clone of the shared manager.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::manager::Manager;

/// Accept connections forever
pub async fn run(listener: TcpListener, manager: Manager, config: Arc<ServerConfig>) {
    info!("Messenger listening on {:?}", listener.local_addr().ok());

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let manager = manager.clone();
                let config = config.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, manager, config).await {
                        error!("Connection handler error for {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
