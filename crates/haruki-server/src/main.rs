//! # haruki-server
//!
//! Backend of the Haruki toolbox.
//!
//! This binary provides:
//! - **Upload surfaces** (manual, HarukiProxy envelope, account inherit, iOS
//!   script chunks and the iOS game API relay) feeding one ingestion pipeline
//! - **Read API** for public, owner, OAuth2 and private callers, with compact
//!   record restoration and a short-lived response cache
//! - **iOS module generator** for Surge, Loon, Quantumult X and Stash
//! - **Fan-out** of accepted uploads to third-party sinks and webhooks

mod api;
mod auth;
mod cache;
mod chunks;
mod config;
mod envelope;
mod error;
mod ingest;
mod ios;
mod patterns;
mod public;
mod sync;
mod upload;
mod webhook;

use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use haruki_shared::constants::CHUNK_SWEEP_INTERVAL_SECS;
use haruki_shared::CompactSchema;
use haruki_store::Database;

use crate::api::AppState;
use crate::auth::now_unix;
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Load configuration (a broken file is fatal)
    // -----------------------------------------------------------------------
    let config_path = Config::path_from_env();
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // -----------------------------------------------------------------------
    // 2. Initialize tracing (RUST_LOG wins over backend.log_level)
    // -----------------------------------------------------------------------
    let fallback = match &config.backend.log_level {
        Some(level) => format!("info,haruki_server=debug,{level}"),
        None => "info,haruki_server=debug".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();

    info!("Starting Haruki toolbox backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config = %config_path.display(),
        public_keys = config.backend.public_api_allowed_keys.len(),
        account_check_enabled = !config.sekai_client.sekai_api_endpoint.is_empty(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.backend.database_path)?;

    let schema = match &config.backend.compact_schema_path {
        Some(path) => CompactSchema::from_file(path)
            .with_context(|| format!("loading compact schema {}", path.display()))?,
        None => {
            warn!("No compact schema configured, positional records stay compact");
            CompactSchema::default()
        }
    };

    let http_addr = config.backend.http_addr();
    let app_state = AppState::new(config, db, schema)?;

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Abandoned chunk buffers
    let chunks = app_state.chunks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CHUNK_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            chunks.sweep().await;
        }
    });

    // Expired public read cache entries
    let cache = app_state.cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cache.purge_expired().await;
        }
    });

    // Expired OAuth2 tokens (hourly)
    let db = app_state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match db.lock().await.purge_expired_oauth_tokens(now_unix()) {
                Ok(0) => {}
                Ok(n) => debug!(purged = n, "Purged expired OAuth2 tokens"),
                Err(e) => warn!(error = %e, "OAuth2 token purge failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
