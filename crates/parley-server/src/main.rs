//! # parley-server
//!
//! Real-time chat relay.
//!
//! This binary provides:
//! - **WebSocket sessions** (`/ws`) for presence, room membership, chat
//!   messages, delivery/seen receipts and typing indicators
//! - **Presence tracking** with heartbeats and a background sweep that
//!   demotes silent users
//! - **Room logs** persisted as one JSON file per room
//! - **REST API** (axum) for history, attachments, edits, deletions,
//!   block lists, abuse reports and report review

mod api;
mod blocks;
mod bus;
mod config;
mod directory;
mod error;
mod hub;
mod presence;
mod sweeper;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_store::{ReportStore, RoomLogStore, UploadStore};

use crate::api::AppState;
use crate::blocks::BlockRegistry;
use crate::config::ServerConfig;
use crate::directory::{MemoryDirectory, UserDirectory};
use crate::hub::ChatHub;
use crate::presence::PresenceTracker;

const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

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

    info!("Starting Parley chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize storage and shared state
    // -----------------------------------------------------------------------
    let logs = Arc::new(RoomLogStore::open(config.messages_dir()).await?);
    let uploads = Arc::new(UploadStore::new(config.uploads_dir(), config.max_upload_size).await?);
    let reports = Arc::new(ReportStore::open(config.reports_dir()).await?);

    let directory: Arc<dyn UserDirectory> = match &config.users_file {
        Some(path) => Arc::new(MemoryDirectory::from_file(path).await?),
        None => {
            warn!("USERS_FILE not set, user directory starts empty");
            Arc::new(MemoryDirectory::new())
        }
    };

    let presence = Arc::new(PresenceTracker::new());
    let hub = Arc::new(ChatHub::new(
        presence.clone(),
        Arc::new(BlockRegistry::new()),
        logs.clone(),
        directory,
    ));

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    hub.spawn_status_relay();
    sweeper::spawn_sweeper(presence, config.heartbeat_interval, config.presence_timeout);

    // Room locks are created on demand; drop the ones nobody holds.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LOCK_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            logs.prune_idle_locks().await;
        }
    });

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        uploads,
        reports,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
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
