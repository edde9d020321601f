//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_HTTP_PORT, HEARTBEAT_INTERVAL_MS, MAX_UPLOAD_SIZE, PRESENCE_TIMEOUT_MS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Root of all on-disk state (`messages/`, `messages_uploads/`, `reports/`).
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Period of the inactivity sweep.
    /// Env: `HEARTBEAT_INTERVAL_MS`
    pub heartbeat_interval: Duration,

    /// Heartbeat age after which a user is forced offline.
    /// Env: `PRESENCE_TIMEOUT_MS`
    pub presence_timeout: Duration,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Optional JSON array of user profiles to seed the directory with.
    /// Env: `USERS_FILE`
    pub users_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            data_dir: PathBuf::from("./data"),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            presence_timeout: Duration::from_millis(PRESENCE_TIMEOUT_MS),
            max_upload_size: MAX_UPLOAD_SIZE,
            users_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(ms) = parse_number::<u64>(&lookup, "HEARTBEAT_INTERVAL_MS") {
            if ms > 0 {
                config.heartbeat_interval = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = parse_number::<u64>(&lookup, "PRESENCE_TIMEOUT_MS") {
            config.presence_timeout = Duration::from_millis(ms);
        }

        if let Some(size) = parse_number::<usize>(&lookup, "MAX_UPLOAD_SIZE") {
            config.max_upload_size = size;
        }

        if let Some(path) = lookup("USERS_FILE") {
            if !path.is_empty() {
                config.users_file = Some(PathBuf::from(path));
            }
        }

        config
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.data_dir.join("messages")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("messages_uploads")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}
