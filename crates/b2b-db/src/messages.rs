use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};

use crate::Database;
use crate::conversations::conversation_exists;
use crate::models::{AttachmentRow, MessageRow, NewMessage};

impl Database {
    /// Append a message and fold it into its conversation atomically: the
    /// last-message summary is replaced, every member other than the sender
    /// gets `unread_count + 1`, and `updated_at` moves to the message time.
    ///
    /// Returns `false` (and writes nothing) if the conversation does not exist.
    pub fn send_message(&self, msg: &NewMessage<'_>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !conversation_exists(&tx, msg.conversation_id)? {
                return Ok(false);
            }

            append_message(&tx, msg)?;

            tx.execute(
                "UPDATE conversations
                 SET last_text = ?2, last_sender_id = ?3, last_has_attachment = ?4,
                     last_created_at = ?5, updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    msg.conversation_id,
                    msg.text,
                    msg.sender_id,
                    !msg.attachments.is_empty(),
                    msg.created_at,
                ],
            )?;

            // Incremented in SQL, never read-modify-write, so concurrent
            // senders cannot lose each other's increments.
            tx.execute(
                "UPDATE conversation_participants
                 SET unread_count = unread_count + 1
                 WHERE conversation_id = ?1 AND participant_id != ?2",
                (msg.conversation_id, msg.sender_id),
            )?;

            tx.commit()?;
            Ok(true)
        })
    }

    /// All messages of a conversation, oldest first. Messages sharing a
    /// timestamp come back in insertion order.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id))
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

/// Plain insert into the message log. Does not touch the conversation row.
fn append_message(conn: &Connection, msg: &NewMessage<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, text, read, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        (msg.id, msg.conversation_id, msg.sender_id, msg.text, msg.created_at),
    )?;

    for (position, a) in msg.attachments.iter().enumerate() {
        conn.execute(
            "INSERT INTO attachments (message_id, position, id, name, content_type, size, url, thumbnail_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                msg.id,
                position as i64,
                a.id,
                a.name,
                a.content_type,
                a.size,
                a.url,
                a.thumbnail_url,
            ],
        )?;
    }

    Ok(())
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sender_id, text, read, created_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at ASC, seq ASC",
    )?;

    let mut rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                text: row.get(3)?,
                read: row.get(4)?,
                created_at: row.get(5)?,
                attachments: vec![],
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // One query for all attachments of the conversation (avoids N+1)
    let mut stmt = conn.prepare(
        "SELECT a.message_id, a.id, a.name, a.content_type, a.size, a.url, a.thumbnail_url
         FROM attachments a
         JOIN messages m ON m.id = a.message_id
         WHERE m.conversation_id = ?1
         ORDER BY a.message_id, a.position",
    )?;

    let mut by_message: HashMap<String, Vec<AttachmentRow>> = HashMap::new();
    let attachment_rows = stmt.query_map([conversation_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            AttachmentRow {
                id: row.get(1)?,
                name: row.get(2)?,
                content_type: row.get(3)?,
                size: row.get(4)?,
                url: row.get(5)?,
                thumbnail_url: row.get(6)?,
            },
        ))
    })?;
    for entry in attachment_rows {
        let (message_id, attachment) = entry?;
        by_message.entry(message_id).or_default().push(attachment);
    }

    for row in &mut rows {
        if let Some(attachments) = by_message.remove(&row.id) {
            row.attachments = attachments;
        }
    }

    Ok(rows)
}
