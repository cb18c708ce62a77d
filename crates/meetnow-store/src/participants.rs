use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use meetnow_shared::{ChatId, ParticipantStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or update the membership row of `user_id` in `chat_id`.
    pub fn upsert_participant(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
        status: ParticipantStatus,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_participants (chat_id, user_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id, user_id)
             DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            params![
                chat_id.as_str(),
                user_id.as_str(),
                status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn participant_status(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
    ) -> Result<Option<ParticipantStatus>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.as_str(), user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|s| {
            s.parse::<ParticipantStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .transpose()
    }
}
