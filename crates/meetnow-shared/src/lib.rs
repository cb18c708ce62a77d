//! # meetnow-shared
//!
//! Types shared by the MeetNow chat client and the message server: identifier
//! newtypes, the JSON wire protocol and protocol-level validation.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{CreateMessageRequest, FetchMessagesQuery, MediaRef, Message};
pub use types::{ChatId, MessageId, ParticipantStatus, UserId};
