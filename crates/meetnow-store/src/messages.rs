use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use meetnow_shared::{ChatId, MediaRef, Message, MessageId};

use crate::database::Database;
use crate::error::Result;

const MESSAGE_COLUMNS: &str = "id, chat_id, author_id, text, media, reply_to_id, created_at";

/// Position of a message in a chat's server order: `(created_at, seq)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPosition {
    pub created_at: String,
    pub seq: i64,
}

/// Fixed-width RFC-3339 so that text comparison matches time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let media = serde_json::to_string(&message.media)?;
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, author_id, text, media, reply_to_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.as_str(),
                message.chat_id.as_str(),
                message.author_id.as_str(),
                message.text,
                media,
                message.reply_to_id.as_ref().map(MessageId::as_str),
                format_timestamp(&message.created_at),
            ],
        )?;
        Ok(())
    }

    /// Where `id` sits in `chat_id`, or `None` if no such message exists in
    /// that chat.
    pub fn message_position(
        &self,
        chat_id: &ChatId,
        id: &MessageId,
    ) -> Result<Option<CursorPosition>> {
        let pos = self
            .conn()
            .query_row(
                "SELECT created_at, seq FROM messages WHERE chat_id = ?1 AND id = ?2",
                params![chat_id.as_str(), id.as_str()],
                |row| {
                    Ok(CursorPosition {
                        created_at: row.get(0)?,
                        seq: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(pos)
    }

    /// One page of `chat_id`, newest first.
    ///
    /// With `after`, only messages strictly newer than that position are
    /// returned; `offset` then walks further back inside that window.
    pub fn get_messages_page(
        &self,
        chat_id: &ChatId,
        after: Option<&CursorPosition>,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        match after {
            Some(pos) => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages
                     WHERE chat_id = ?1
                       AND (created_at > ?2 OR (created_at = ?2 AND seq > ?3))
                     ORDER BY created_at DESC, seq DESC
                     LIMIT ?4 OFFSET ?5"
                ))?;
                let rows = stmt.query_map(
                    params![chat_id.as_str(), pos.created_at, pos.seq, limit, offset],
                    row_to_message,
                )?;
                for row in rows {
                    messages.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages
                     WHERE chat_id = ?1
                     ORDER BY created_at DESC, seq DESC
                     LIMIT ?2 OFFSET ?3"
                ))?;
                let rows =
                    stmt.query_map(params![chat_id.as_str(), limit, offset], row_to_message)?;
                for row in rows {
                    messages.push(row?);
                }
            }
        }

        Ok(messages)
    }

}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let author_id: String = row.get(2)?;
    let text: Option<String> = row.get(3)?;
    let media_json: String = row.get(4)?;
    let reply_to_id: Option<String> = row.get(5)?;
    let ts_str: String = row.get(6)?;

    let media: Vec<MediaRef> = serde_json::from_str(&media_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(id),
        chat_id: ChatId(chat_id),
        author_id: author_id.into(),
        text,
        media,
        reply_to_id: reply_to_id.map(MessageId),
        created_at,
    })
}
