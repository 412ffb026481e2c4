use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::uuid_at;
use crate::models::format_ts;

/// Flip every unread message `partner_id` sent to `reader_id`. Returns the
/// number of rows flipped by this call.
pub fn mark_private_read(conn: &Connection, reader_id: Uuid, partner_id: Uuid) -> Result<u64> {
    let changed = conn.execute(
        "UPDATE messages SET is_read = 1
         WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
        (partner_id.to_string(), reader_id.to_string()),
    )?;
    Ok(changed as u64)
}

/// Flip one private message. Returns false if it was already read.
pub fn mark_message_read(conn: &Connection, message_id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET is_read = 1 WHERE id = ?1 AND receiver_id IS NOT NULL AND is_read = 0",
        [message_id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Create a read marker for every message in the group written by someone
/// else that `reader_id` has no marker for yet. Returns the number created.
pub fn mark_group_read(
    conn: &Connection,
    group_id: Uuid,
    reader_id: Uuid,
    read_at: &DateTime<Utc>,
) -> Result<u64> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO message_read_markers (message_id, user_id, read_at)
         SELECT id, ?2, ?3 FROM messages WHERE group_id = ?1 AND sender_id != ?2",
        (group_id.to_string(), reader_id.to_string(), format_ts(read_at)),
    )?;
    Ok(changed as u64)
}

/// Exactly-once marker for a single message.
pub fn insert_marker(
    conn: &Connection,
    message_id: Uuid,
    reader_id: Uuid,
    read_at: &DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO message_read_markers (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
        (message_id.to_string(), reader_id.to_string(), format_ts(read_at)),
    )?;
    Ok(changed > 0)
}

pub fn readers_of(conn: &Connection, message_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM message_read_markers WHERE message_id = ?1 ORDER BY read_at, rowid",
    )?;
    let ids = stmt
        .query_map([message_id.to_string()], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Unread private messages addressed to `user_id`, grouped by sender.
pub fn unread_private(conn: &Connection, user_id: Uuid) -> Result<Vec<(Uuid, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT sender_id, COUNT(*) FROM messages
         WHERE receiver_id = ?1 AND is_read = 0
         GROUP BY sender_id",
    )?;
    let rows = stmt
        .query_map([user_id.to_string()], |row| {
            Ok((uuid_at(row, 0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Messages without a read marker for `user_id` in every group they belong
/// to, grouped by group.
pub fn unread_groups(conn: &Connection, user_id: Uuid) -> Result<Vec<(Uuid, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT m.group_id, COUNT(*) FROM messages m
         JOIN group_members gm ON gm.group_id = m.group_id AND gm.user_id = ?1
         WHERE m.sender_id != ?1
           AND NOT EXISTS (
               SELECT 1 FROM message_read_markers r
               WHERE r.message_id = m.id AND r.user_id = ?1)
         GROUP BY m.group_id",
    )?;
    let rows = stmt
        .query_map([user_id.to_string()], |row| {
            Ok((uuid_at(row, 0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
