//! Message persistence collaborator: private messages, history pages and
//! the per-viewer roster query.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::db::models::{PrivateMessage, RosterRow};
use crate::db::{self, SqliteStore};
use crate::error::StoreError;

pub trait MessageStore: Send + Sync {
    /// Durably store a message and return its id.
    fn persist_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String, StoreError>;

    /// Messages exchanged between `user_a` and `user_b`.
    /// `offset` counts back from the newest message; the page is returned oldest first.
    fn fetch_history(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PrivateMessage>, StoreError>;

    /// Every registered user with the latest message they exchanged with `viewer_id`.
    fn fetch_roster(&self, viewer_id: &str) -> Result<Vec<RosterRow>, StoreError>;

    fn nickname(&self, user_id: &str) -> Result<String, StoreError>;
}

impl MessageStore for SqliteStore {
    fn persist_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let conn = self.conn()?;
        let message_id = Uuid::now_v7().to_string();

        conn.execute(
            "INSERT INTO private_messages (message_id, sender_id, recipient_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                message_id,
                sender_id,
                recipient_id,
                content,
                db::format_timestamp(&created_at),
            ],
        )?;

        Ok(message_id)
    }

    fn fetch_history(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PrivateMessage>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.message_id, m.sender_id, m.recipient_id, m.content, m.created_at,
                    COALESCE(u.nickname, 'Unknown')
             FROM private_messages m
             LEFT JOIN users u ON u.user_id = m.sender_id
             WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                OR (m.sender_id = ?2 AND m.recipient_id = ?1)
             ORDER BY m.created_at DESC, m.message_id DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let mut messages = stmt
            .query_map(
                rusqlite::params![user_a, user_b, limit as i64, offset as i64],
                |row| {
                    let created_at: String = row.get(4)?;
                    Ok(PrivateMessage {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        recipient_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: db::parse_timestamp(&created_at)?,
                        sender_nickname: row.get(5)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        messages.reverse();
        Ok(messages)
    }

    fn fetch_roster(&self, viewer_id: &str) -> Result<Vec<RosterRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.user_id, u.nickname, last.content, last.created_at
             FROM users u
             LEFT JOIN private_messages last ON last.message_id = (
                 SELECT m.message_id
                 FROM private_messages m
                 WHERE (m.sender_id = u.user_id AND m.recipient_id = ?1)
                    OR (m.sender_id = ?1 AND m.recipient_id = u.user_id)
                 ORDER BY m.created_at DESC, m.message_id DESC
                 LIMIT 1
             )
             ORDER BY u.nickname ASC",
        )?;

        let rows = stmt
            .query_map([viewer_id], |row| {
                let last_timestamp = row
                    .get::<_, Option<String>>(3)?
                    .map(|raw| db::parse_timestamp(&raw))
                    .transpose()?;
                Ok(RosterRow {
                    user_id: row.get(0)?,
                    nickname: row.get(1)?,
                    last_message: row.get(2)?,
                    last_timestamp,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn nickname(&self, user_id: &str) -> Result<String, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT nickname FROM users WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }
}
