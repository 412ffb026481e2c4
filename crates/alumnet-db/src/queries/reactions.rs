use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use alumnet_types::models::ReactionType;

use super::{OptionalExt, parsed_at, placeholders, ts_at, uuid_at};
use crate::models::{ReactionRow, format_ts};

const REACTION_SELECT: &str = "
    SELECT r.message_id, r.user_id, COALESCE(u.username, 'unknown'), r.reaction_type, r.emoji,
           r.created_at, r.updated_at
    FROM message_reactions r
    LEFT JOIN users u ON u.id = r.user_id";

fn map_reaction(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        message_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        username: row.get(2)?,
        reaction_type: parsed_at(row, 3)?,
        emoji: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated { previous: ReactionType },
    Unchanged,
}

/// Set the user's single reaction on a message, replacing any previous type.
/// The (message, user) primary key makes this one row no matter how many
/// devices race on it.
pub fn upsert_reaction(
    conn: &Connection,
    message_id: Uuid,
    user_id: Uuid,
    reaction_type: ReactionType,
    now: &DateTime<Utc>,
) -> Result<UpsertOutcome> {
    let previous = current_reaction(conn, message_id, user_id)?;
    if previous == Some(reaction_type) {
        return Ok(UpsertOutcome::Unchanged);
    }

    let ts = format_ts(now);
    conn.execute(
        "INSERT INTO message_reactions (message_id, user_id, reaction_type, emoji, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(message_id, user_id) DO UPDATE SET
            reaction_type = excluded.reaction_type,
            emoji = excluded.emoji,
            updated_at = excluded.updated_at",
        (
            message_id.to_string(),
            user_id.to_string(),
            reaction_type.as_str(),
            reaction_type.emoji(),
            ts,
        ),
    )?;

    Ok(match previous {
        Some(previous) => UpsertOutcome::Updated { previous },
        None => UpsertOutcome::Inserted,
    })
}

pub fn current_reaction(
    conn: &Connection,
    message_id: Uuid,
    user_id: Uuid,
) -> Result<Option<ReactionType>> {
    conn.query_row(
        "SELECT reaction_type FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
        (message_id.to_string(), user_id.to_string()),
        |row| parsed_at(row, 0),
    )
    .optional()
}

/// Remove the user's reaction. Returns the removed type, or None if there
/// was nothing to remove.
pub fn delete_reaction(
    conn: &Connection,
    message_id: Uuid,
    user_id: Uuid,
) -> Result<Option<ReactionType>> {
    let previous = current_reaction(conn, message_id, user_id)?;
    if previous.is_some() {
        conn.execute(
            "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
            (message_id.to_string(), user_id.to_string()),
        )?;
    }
    Ok(previous)
}

/// Reactions on one message in the order users settled on them.
pub fn reactions_for_message(conn: &Connection, message_id: Uuid) -> Result<Vec<ReactionRow>> {
    let sql = format!(
        "{} WHERE r.message_id = ?1 ORDER BY r.updated_at, r.rowid",
        REACTION_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([message_id.to_string()], map_reaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch reactions for a set of message IDs.
pub fn reactions_for_messages(conn: &Connection, message_ids: &[Uuid]) -> Result<Vec<ReactionRow>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }

    let sql = format!(
        "{} WHERE r.message_id IN ({}) ORDER BY r.updated_at, r.rowid",
        REACTION_SELECT,
        placeholders(message_ids.len())
    );
    let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), map_reaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
