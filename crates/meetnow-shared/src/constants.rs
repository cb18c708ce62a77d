/// Default number of messages per fetched page
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Default interval between poll ticks while a chat is open, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2500;

/// Default cap on the number of characters in a message
pub const DEFAULT_MAX_TEXT_LEN: usize = 4000;

/// Header carrying the caller identity, set by the upstream auth layer
pub const USER_HEADER: &str = "x-meetnow-user";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
