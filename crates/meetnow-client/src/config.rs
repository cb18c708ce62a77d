//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the terminal client can start against a
//! local server with only `MEETNOW_USER_ID` set.

use std::path::PathBuf;
use std::time::Duration;

use meetnow_shared::constants::{
    DEFAULT_MAX_TEXT_LEN, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS,
};
use meetnow_shared::UserId;
use meetnow_store::Database;

use crate::session::SyncSettings;

const CACHE_FILE_NAME: &str = "meetnow-cache.db";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the message server.
    /// Env: `MEETNOW_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// Identity sent with every request.
    /// Env: `MEETNOW_USER_ID`
    pub user_id: Option<UserId>,

    /// Env: `MEETNOW_POLL_INTERVAL_MS`
    /// Default: `2500`
    pub poll_interval: Duration,

    /// Env: `MEETNOW_PAGE_SIZE`
    /// Default: `30`
    pub page_size: u32,

    /// Extra pages a single poll may pull when a page comes back full.
    /// Env: `MEETNOW_MAX_CATCHUP_PAGES`
    /// Default: `5`
    pub max_catchup_pages: u32,

    /// Env: `MEETNOW_REQUEST_TIMEOUT_SECS`
    /// Default: `15`
    pub request_timeout: Duration,

    /// SQLite file holding cached chat logs. `None` disables the cache.
    /// Env: `MEETNOW_CACHE_PATH` (empty value disables)
    /// Default: `<platform data dir>/meetnow-cache.db`
    pub cache_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let cache_path = Database::default_path(CACHE_FILE_NAME)
            .unwrap_or_else(|_| PathBuf::from(CACHE_FILE_NAME));

        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            user_id: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            page_size: DEFAULT_PAGE_SIZE,
            max_catchup_pages: 5,
            request_timeout: Duration::from_secs(15),
            cache_path: Some(cache_path),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("MEETNOW_SERVER_URL") {
            config.server_url = url;
        }

        if let Some(user) = lookup("MEETNOW_USER_ID") {
            if !user.trim().is_empty() {
                config.user_id = Some(UserId(user.trim().to_string()));
            }
        }

        if let Some(ms) = parse_positive::<u64, _>(&lookup, "MEETNOW_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(n) = parse_positive::<u32, _>(&lookup, "MEETNOW_PAGE_SIZE") {
            config.page_size = n;
        }

        if let Some(val) = lookup("MEETNOW_MAX_CATCHUP_PAGES") {
            match val.parse::<u32>() {
                Ok(n) => config.max_catchup_pages = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MEETNOW_MAX_CATCHUP_PAGES, using default"),
            }
        }

        if let Some(secs) = parse_positive::<u64, _>(&lookup, "MEETNOW_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(path) = lookup("MEETNOW_CACHE_PATH") {
            config.cache_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        config
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: self.poll_interval,
            page_size: self.page_size,
            max_catchup_pages: self.max_catchup_pages,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }
}

fn parse_positive<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(key)?;
    match val.parse::<T>() {
        Ok(n) if n > T::default() => Some(n),
        _ => {
            tracing::warn!(key, value = %val, "Invalid value, using default");
            None
        }
    }
}
