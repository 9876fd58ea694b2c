//! # parley-server
//!
//! HTTP server for Parley chats.
//!
//! This binary provides:
//! - **REST API** (axum) for users, conversations, groups, messages,
//!   reactions and typing indicators
//! - **WebSocket change feed** telling each subscriber which queries to rerun
//! - **Gateway authentication** via a trusted `X-User-Id` header
//! - **Per-client rate limiting** to protect against abuse

mod api;
mod auth;
mod config;
mod error;
mod rate_limit;
mod subscribe;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_core::{ChatService, ChatSettings, SystemClock};
use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.gateway_token.is_none() {
        warn!("GATEWAY_TOKEN not set, trusting X-User-Id from any client");
    }

    // -----------------------------------------------------------------------
    // 3. Open the store and the chat service
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database opened");
    }
    let chat = Arc::new(ChatService::new(
        db,
        Arc::new(SystemClock),
        ChatSettings::default(),
    )?);

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        chat: chat.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Expired typing indicators are invisible already; this only reclaims rows.
    let sweep_chat = chat.clone();
    let sweep_every = std::time::Duration::from_secs(config.typing_sweep_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let chat = sweep_chat.clone();
            match tokio::task::spawn_blocking(move || chat.purge_expired_typing()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "typing sweep failed"),
                Err(e) => warn!(error = %e, "typing sweep task panicked"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
