//! Boardcast server binary.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin boardcast-server
//!
//! # Run on custom address
//! cargo run --bin boardcast-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! BOARDCAST_ADDR=127.0.0.1:8080 cargo run --bin boardcast-server
//! ```

use std::sync::Arc;

use boardcast_server::activity::MemoryActivitySink;
use boardcast_server::auth::StaticTokenVerifier;
use boardcast_server::config::{CliArgs, ServerConfig};
use boardcast_server::gateway::{self, AppState};
use boardcast_server::store::{MemoryTaskStore, MemoryUserDirectory};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting boardcast server");

    // The dev binary runs on in-memory collaborators; production embeds the
    // library and injects real ones via `AppState::new`.
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(
        config.clone(),
        Arc::new(MemoryTaskStore::new()),
        Arc::new(MemoryUserDirectory::new()),
        Arc::new(StaticTokenVerifier::new(config.token_ttl)),
        Arc::new(MemoryActivitySink::new()),
    );

    match gateway::start_server_with_state(&bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "boardcast server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
