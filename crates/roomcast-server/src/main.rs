//! # roomcast
//!
//! Room-scoped realtime chat broadcast server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! roomcast
//!
//! # Run with a config file in the working directory
//! # (roomcast.toml, /etc/roomcast/roomcast.toml, ~/.config/roomcast/roomcast.toml)
//! roomcast
//!
//! # Run with environment variables
//! ROOMCAST_PORT=8080 ROOMCAST_HOST=0.0.0.0 roomcast
//! ```

mod config;
mod dispatch;
mod handlers;
mod metrics;

use std::sync::Arc;

use anyhow::Result;
use roomcast_core::{MemoryStore, MemoryTokens, UserIdentity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting roomcast on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Collaborators: in-memory store and token table for the standalone demo.
    // A deployment embeds the hub next to its own implementations.
    let tokens = MemoryTokens::new();
    for seed in &config.dev_tokens {
        tokens.insert(
            seed.token.clone(),
            UserIdentity::new(&seed.user_id, &seed.nickname),
        );
    }
    if !tokens.is_empty() {
        tracing::info!("Seeded {} dev tokens", tokens.len());
    }

    let state = Arc::new(handlers::AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(tokens),
    ));

    // Start the server
    handlers::run_server(state).await?;

    Ok(())
}
