use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use alumnet_types::ids::ConversationKey;

use super::{OptionalExt, ts_at, uuid_at};
use crate::models::{MessageRequestRow, format_ts};

const REQUEST_SELECT: &str = "
    SELECT r.id, r.sender_id, COALESCE(u.username, 'unknown'), r.receiver_id, r.content, r.created_at, r.accepted
    FROM message_requests r
    LEFT JOIN users u ON u.id = r.sender_id";

fn map_request(row: &Row<'_>) -> rusqlite::Result<MessageRequestRow> {
    Ok(MessageRequestRow {
        id: uuid_at(row, 0)?,
        sender_id: uuid_at(row, 1)?,
        sender_username: row.get(2)?,
        receiver_id: uuid_at(row, 3)?,
        content: row.get(4)?,
        created_at: ts_at(row, 5)?,
        accepted: row.get(6)?,
    })
}

/// Insert a pending request unless one is already outstanding for the pair in
/// either direction. Returns whether a row was written.
pub fn insert_pending(
    conn: &Connection,
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: &str,
    created_at: &DateTime<Utc>,
) -> Result<bool> {
    let pair_key = ConversationKey::direct(sender_id, receiver_id).to_string();
    let changed = conn.execute(
        "INSERT OR IGNORE INTO message_requests (id, sender_id, receiver_id, pair_key, content, created_at, accepted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        (
            id.to_string(),
            sender_id.to_string(),
            receiver_id.to_string(),
            pair_key,
            content,
            format_ts(created_at),
        ),
    )?;
    Ok(changed > 0)
}

/// The outstanding request between two users, whichever side sent it.
pub fn pending_for_pair(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<MessageRequestRow>> {
    let sql = format!("{} WHERE r.pair_key = ?1 AND r.accepted = 0", REQUEST_SELECT);
    conn.query_row(&sql, [ConversationKey::direct(a, b).to_string()], map_request)
        .optional()
}

pub fn accepted_exists(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM message_requests WHERE pair_key = ?1 AND accepted = 1)",
        [ConversationKey::direct(a, b).to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn get_request(conn: &Connection, id: Uuid) -> Result<Option<MessageRequestRow>> {
    let sql = format!("{} WHERE r.id = ?1", REQUEST_SELECT);
    conn.query_row(&sql, [id.to_string()], map_request).optional()
}

/// Flip a pending request to accepted. Returns false if it was not pending.
pub fn mark_accepted(conn: &Connection, id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE message_requests SET accepted = 1 WHERE id = ?1 AND accepted = 0",
        [id.to_string()],
    )?;
    Ok(changed > 0)
}

pub fn delete_request(conn: &Connection, id: Uuid) -> Result<bool> {
    let changed = conn.execute("DELETE FROM message_requests WHERE id = ?1", [id.to_string()])?;
    Ok(changed > 0)
}

/// Pending requests addressed to `receiver_id`, oldest first.
pub fn pending_for_receiver(conn: &Connection, receiver_id: Uuid) -> Result<Vec<MessageRequestRow>> {
    let sql = format!(
        "{} WHERE r.receiver_id = ?1 AND r.accepted = 0 ORDER BY r.created_at",
        REQUEST_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([receiver_id.to_string()], map_request)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
