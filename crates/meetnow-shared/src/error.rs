use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message has neither text nor media")]
    EmptyMessage,

    #[error("Message text too long: {len} chars (max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("Unknown participant status: {0}")]
    UnknownStatus(String),
}
