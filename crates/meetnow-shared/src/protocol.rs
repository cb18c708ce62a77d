//! JSON wire protocol between the chat client and the message server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ChatId, MessageId, UserId};

/// A chat message as persisted by the server.
///
/// Messages are immutable once created: the server never edits a stored
/// record, so two copies carrying the same `id` are interchangeable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub author_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// Reference to an uploaded attachment. The bytes live in external storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Query string of `GET /chats/:chat_id/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchMessagesQuery {
    /// Newest message already known to the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Body of `POST /chats/:chat_id/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
}

impl CreateMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Reject messages with nothing to show and overly long text.
    pub fn validate(&self, max_text_len: usize) -> Result<(), ProtocolError> {
        let text = self.text.as_deref().map(str::trim).unwrap_or("");
        if text.is_empty() && self.media.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > max_text_len {
            return Err(ProtocolError::TextTooLong {
                len,
                max: max_text_len,
            });
        }
        Ok(())
    }
}
