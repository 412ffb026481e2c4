use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Idempotent schema setup. Ids are stored as TEXT, timestamps as RFC 3339
/// strings with millisecond precision (lexicographic order == time order).
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Local mirror of identities verified by the auth service
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_username
            ON users(username COLLATE NOCASE);

        -- Directional: (A, B) means A blocked B
        CREATE TABLE IF NOT EXISTS blocked_users (
            user_id         TEXT NOT NULL,
            blocked_user_id TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            PRIMARY KEY (user_id, blocked_user_id)
        );

        CREATE TABLE IF NOT EXISTS message_requests (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            pair_key    TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            accepted    INTEGER NOT NULL DEFAULT 0
        );

        -- At most one outstanding request per unordered pair
        CREATE UNIQUE INDEX IF NOT EXISTS idx_message_requests_pending
            ON message_requests(pair_key) WHERE accepted = 0;

        CREATE INDEX IF NOT EXISTS idx_message_requests_receiver
            ON message_requests(receiver_id, accepted);

        CREATE TABLE IF NOT EXISTS group_chats (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            picture     TEXT,
            created_by  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL REFERENCES group_chats(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            is_admin    INTEGER NOT NULL DEFAULT 0,
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            conversation_key    TEXT NOT NULL,
            sender_id           TEXT NOT NULL,
            receiver_id         TEXT,
            group_id            TEXT REFERENCES group_chats(id) ON DELETE CASCADE,
            content             TEXT NOT NULL,
            kind                TEXT NOT NULL DEFAULT 'text',
            created_at          TEXT NOT NULL,
            edited_at           TEXT,
            is_read             INTEGER NOT NULL DEFAULT 0,
            is_pinned           INTEGER NOT NULL DEFAULT 0,
            reply_to_id         TEXT REFERENCES messages(id) ON DELETE SET NULL,
            forwarded_from_id   TEXT REFERENCES messages(id) ON DELETE SET NULL,
            CHECK ((receiver_id IS NULL) <> (group_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_key, seq);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, is_read);

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, seq);

        -- Metadata written by the blob store when an upload completes
        CREATE TABLE IF NOT EXISTS attachments (
            id              TEXT PRIMARY KEY,
            uploader_id     TEXT NOT NULL,
            filename        TEXT NOT NULL,
            content_type    TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL,
            url             TEXT,
            created_at      TEXT NOT NULL
        );

        -- Links copy the reference so forwarded files survive the original
        CREATE TABLE IF NOT EXISTS message_attachments (
            message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            attachment_id   TEXT NOT NULL,
            position        INTEGER NOT NULL,
            filename        TEXT NOT NULL,
            content_type    TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL,
            url             TEXT,
            PRIMARY KEY (message_id, attachment_id)
        );

        -- One reaction per (message, user)
        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id      TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL,
            reaction_type   TEXT NOT NULL,
            emoji           TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        -- Group read state; absence means unread
        CREATE TABLE IF NOT EXISTS message_read_markers (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read_at     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_read_markers_user
            ON message_read_markers(user_id);

        CREATE TABLE IF NOT EXISTS message_mentions (
            message_id          TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            mentioned_user_id   TEXT NOT NULL,
            PRIMARY KEY (message_id, mentioned_user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
