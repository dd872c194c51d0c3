use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (directory + messaging schema)");
        conn.execute_batch(
            "
            CREATE TABLE businesses (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                org_number  TEXT NOT NULL,
                logo_url    TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_businesses_name ON businesses(name COLLATE NOCASE);

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                first_name  TEXT NOT NULL,
                last_name   TEXT NOT NULL,
                email       TEXT NOT NULL,
                photo_url   TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE conversations (
                id                   TEXT PRIMARY KEY,
                participant_key      TEXT NOT NULL,
                kind                 TEXT NOT NULL DEFAULT 'general',
                subject              TEXT,
                status               TEXT NOT NULL DEFAULT 'active',
                last_text            TEXT,
                last_sender_id       TEXT,
                last_has_attachment  INTEGER NOT NULL DEFAULT 0,
                last_created_at      TEXT,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL
            );

            -- At most one active conversation per participant set
            CREATE UNIQUE INDEX idx_conversations_active_key
                ON conversations(participant_key) WHERE status = 'active';

            CREATE TABLE conversation_participants (
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                participant_id   TEXT NOT NULL,
                unread_count     INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
                PRIMARY KEY (conversation_id, participant_id)
            );

            CREATE INDEX idx_conversation_participants_member
                ON conversation_participants(participant_id);

            CREATE TABLE conversation_businesses (
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                position         INTEGER NOT NULL,
                business_id      TEXT NOT NULL,
                PRIMARY KEY (conversation_id, position)
            );

            CREATE TABLE messages (
                seq              INTEGER PRIMARY KEY AUTOINCREMENT,
                id               TEXT NOT NULL UNIQUE,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        TEXT NOT NULL,
                text             TEXT NOT NULL,
                read             INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at, seq);

            CREATE TABLE attachments (
                message_id     TEXT NOT NULL REFERENCES messages(id),
                position       INTEGER NOT NULL,
                id             TEXT NOT NULL,
                name           TEXT NOT NULL,
                content_type   TEXT NOT NULL,
                size           INTEGER NOT NULL,
                url            TEXT NOT NULL,
                thumbnail_url  TEXT,
                PRIMARY KEY (message_id, position)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
