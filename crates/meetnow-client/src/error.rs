use thiserror::Error;
use uuid::Uuid;

use meetnow_shared::ProtocolError;

/// Failures talking to the message server.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The caller is not an accepted participant of the chat (401/403).
    #[error("Not authorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Server unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Invalid message: {0}")]
    Invalid(#[from] ProtocolError),

    /// The draft stays in the log as failed and can be retried.
    #[error("Sending draft {local_id} failed: {source}")]
    Send {
        local_id: Uuid,
        #[source]
        source: GatewayError,
    },

    #[error("Chat session is closed")]
    SessionClosed,

    #[error("No failed draft with id {0}")]
    UnknownDraft(Uuid),
}
