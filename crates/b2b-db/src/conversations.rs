use anyhow::Result;
use rusqlite::{Connection, TransactionBehavior};

use crate::models::{ConversationRow, CreateOutcome, MemberRow, NewConversation};
use crate::{Database, OptionalExt};

/// ASCII unit separator; cannot appear in a participant id.
const KEY_SEPARATOR: &str = "\u{1f}";

/// Deterministic key for a participant set. Order-independent, duplicates collapse.
pub fn participant_key(participants: &[String]) -> String {
    let mut sorted: Vec<&str> = participants.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(KEY_SEPARATOR)
}

impl Database {
    /// Insert a conversation unless an active one with the same participant set
    /// already exists, in which case its id is returned and nothing is written.
    pub fn create_conversation_if_absent(&self, new: &NewConversation<'_>) -> Result<CreateOutcome> {
        let key = participant_key(new.participants);

        self.with_conn_mut(|conn| {
            // IMMEDIATE takes the write lock before the lookup, so the
            // check-then-insert cannot interleave with another writer.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if let Some(existing) = active_conversation_by_key(&tx, &key)? {
                return Ok(CreateOutcome::Existing(existing));
            }

            tx.execute(
                "INSERT INTO conversations (id, participant_key, kind, subject, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
                rusqlite::params![new.id, key, new.kind, new.subject, new.now],
            )?;

            for participant_id in new.participants {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, participant_id, unread_count)
                     VALUES (?1, ?2, 0)",
                    (new.id, participant_id),
                )?;
            }

            for (position, business_id) in new.business_ids.iter().enumerate() {
                tx.execute(
                    "INSERT INTO conversation_businesses (conversation_id, position, business_id)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![new.id, position as i64, business_id],
                )?;
            }

            tx.commit()?;
            Ok(CreateOutcome::Created(new.id.to_string()))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Conversations the participant belongs to, most recently updated first.
    pub fn list_conversations_for(
        &self,
        participant_id: &str,
        include_archived: bool,
    ) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.participant_key, c.kind, c.subject, c.status, c.last_text,
                        c.last_sender_id, c.last_has_attachment, c.last_created_at,
                        c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.participant_id = ?1
                   AND (?2 OR c.status = 'active')
                 ORDER BY c.updated_at DESC, c.id",
            )?;

            let mut rows = stmt
                .query_map(rusqlite::params![participant_id, include_archived], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for row in &mut rows {
                load_relations(conn, row)?;
            }

            Ok(rows)
        })
    }

    /// Reset one participant's unread counter to zero.
    ///
    /// Returns the previous count, or `None` if the participant is not a member
    /// of the conversation (or the conversation does not exist).
    pub fn mark_conversation_read(
        &self,
        conversation_id: &str,
        participant_id: &str,
        now: &str,
    ) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let previous: Option<i64> = tx
                .query_row(
                    "SELECT unread_count FROM conversation_participants
                     WHERE conversation_id = ?1 AND participant_id = ?2",
                    (conversation_id, participant_id),
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(count) = previous.filter(|c| *c > 0) {
                tx.execute(
                    "UPDATE conversation_participants SET unread_count = 0
                     WHERE conversation_id = ?1 AND participant_id = ?2",
                    (conversation_id, participant_id),
                )?;
                tx.execute(
                    "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                    (conversation_id, now),
                )?;
                tx.commit()?;
                return Ok(Some(count));
            }

            Ok(previous)
        })
    }

    /// Returns `false` if no such conversation exists.
    pub fn archive_conversation(&self, id: &str, now: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET status = 'archived', updated_at = ?2 WHERE id = ?1",
                (id, now),
            )?;
            Ok(changed > 0)
        })
    }
}

fn active_conversation_by_key(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM conversations WHERE participant_key = ?1 AND status = 'active'",
        [key],
        |row| row.get(0),
    )
    .optional()
}

pub(crate) fn conversation_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM conversations WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, participant_key, kind, subject, status, last_text, last_sender_id,
                last_has_attachment, last_created_at, created_at, updated_at
         FROM conversations WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], conversation_from_row).optional()?;

    match row {
        Some(mut row) => {
            load_relations(conn, &mut row)?;
            Ok(Some(row))
        }
        None => Ok(None),
    }
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_key: row.get(1)?,
        kind: row.get(2)?,
        subject: row.get(3)?,
        status: row.get(4)?,
        last_text: row.get(5)?,
        last_sender_id: row.get(6)?,
        last_has_attachment: row.get(7)?,
        last_created_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        members: vec![],
        business_ids: vec![],
    })
}

fn load_relations(conn: &Connection, row: &mut ConversationRow) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT participant_id, unread_count FROM conversation_participants
         WHERE conversation_id = ?1
         ORDER BY participant_id",
    )?;
    row.members = stmt
        .query_map([&row.id], |r| {
            Ok(MemberRow {
                participant_id: r.get(0)?,
                unread_count: r.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT business_id FROM conversation_businesses
         WHERE conversation_id = ?1
         ORDER BY position",
    )?;
    row.business_ids = stmt
        .query_map([&row.id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(())
}
