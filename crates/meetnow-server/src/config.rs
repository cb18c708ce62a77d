//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use meetnow_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_TEXT_LEN};
use meetnow_store::Database;

const DB_FILE_NAME: &str = "meetnow-server.db";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite file holding messages and participants.
    /// Env: `DATABASE_PATH`
    /// Default: `<platform data dir>/meetnow-server.db`, else `./meetnow-server.db`
    pub database_path: PathBuf,

    /// Admin API bearer token. Required for /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: unset (admin API disabled).
    pub admin_token: Option<String>,

    /// Largest page a client may request.
    /// Env: `MAX_PAGE_SIZE`
    /// Default: `100`
    pub max_page_size: u32,

    /// Env: `MAX_TEXT_LEN`
    /// Default: `4000`
    pub max_text_len: usize,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("max_page_size", &self.max_page_size)
            .field("max_text_len", &self.max_text_len)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: Database::default_path(DB_FILE_NAME)
                .unwrap_or_else(|_| PathBuf::from(DB_FILE_NAME)),
            admin_token: None,
            max_page_size: 100,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
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
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("MAX_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.max_page_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_PAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("MAX_TEXT_LEN") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_text_len = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_TEXT_LEN, using default"),
            }
        }

        config
    }
}
