//! # meetnow-store
//!
//! SQLite storage for MeetNow, shared by both sides of the chat:
//!
//! - the client keeps a JSON cache of each chat's merged message log
//!   (see [`cache`]) so a reopened chat renders before the first fetch;
//! - the message server keeps the authoritative `messages` and
//!   `chat_participants` tables (see [`messages`] and [`participants`]).
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for each table.

pub mod cache;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod participants;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use messages::CursorPosition;
