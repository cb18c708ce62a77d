//! # meetnow-client
//!
//! Client-side chat synchronization for MeetNow.
//!
//! A [`ChatClient`] opens at most one [`ChatSession`] at a time. The session
//! rehydrates the chat's cached log from the [`LogStore`], polls the server
//! through a [`MessageGateway`] while it is open, merges every fetched page
//! into a deduplicated, time-ordered log and sends messages optimistically.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod log_store;
pub mod merge;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::ClientConfig;
pub use error::{GatewayError, SyncError};
pub use events::SessionEvent;
pub use gateway::{HttpGateway, MessageGateway};
pub use log_store::LogStore;
pub use session::{ChatClient, ChatSession, Draft, LogEntry, RefreshOutcome, SyncSettings};
