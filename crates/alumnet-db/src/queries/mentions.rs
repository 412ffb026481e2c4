use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use super::{placeholders, uuid_at};

pub fn insert_mention(conn: &Connection, message_id: Uuid, user_id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO message_mentions (message_id, mentioned_user_id) VALUES (?1, ?2)",
        (message_id.to_string(), user_id.to_string()),
    )?;
    Ok(changed > 0)
}

pub fn mentions_for(conn: &Connection, message_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT mentioned_user_id FROM message_mentions WHERE message_id = ?1 ORDER BY rowid",
    )?;
    let ids = stmt
        .query_map([message_id.to_string()], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// (message_id, mentioned_user_id) pairs for a page of messages.
pub fn mentions_for_messages(conn: &Connection, message_ids: &[Uuid]) -> Result<Vec<(Uuid, Uuid)>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT message_id, mentioned_user_id FROM message_mentions
         WHERE message_id IN ({}) ORDER BY rowid",
        placeholders(message_ids.len())
    );
    let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), |row| {
            Ok((uuid_at(row, 0)?, uuid_at(row, 1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
