use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use super::{OptionalExt, ts_at, uuid_at};
use crate::models::{GroupMemberRow, GroupRow, format_ts};

fn map_group(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        picture: row.get(2)?,
        created_by: uuid_at(row, 3)?,
        created_at: ts_at(row, 4)?,
    })
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<GroupMemberRow> {
    Ok(GroupMemberRow {
        group_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        username: row.get(2)?,
        is_admin: row.get(3)?,
        joined_at: ts_at(row, 4)?,
    })
}

pub fn insert_group(
    conn: &Connection,
    id: Uuid,
    name: &str,
    picture: Option<&str>,
    created_by: Uuid,
    created_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_chats (id, name, picture, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            id.to_string(),
            name,
            picture,
            created_by.to_string(),
            format_ts(created_at),
        ),
    )?;
    Ok(())
}

pub fn get_group(conn: &Connection, id: Uuid) -> Result<Option<GroupRow>> {
    conn.query_row(
        "SELECT id, name, picture, created_by, created_at FROM group_chats WHERE id = ?1",
        [id.to_string()],
        map_group,
    )
    .optional()
}

/// Drops the group together with its memberships and messages.
pub fn delete_group(conn: &Connection, id: Uuid) -> Result<bool> {
    let changed = conn.execute("DELETE FROM group_chats WHERE id = ?1", [id.to_string()])?;
    Ok(changed > 0)
}

/// Returns false if the user already was a member.
pub fn add_member(
    conn: &Connection,
    group_id: Uuid,
    user_id: Uuid,
    is_admin: bool,
    joined_at: &DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, user_id, is_admin, joined_at) VALUES (?1, ?2, ?3, ?4)",
        (
            group_id.to_string(),
            user_id.to_string(),
            is_admin,
            format_ts(joined_at),
        ),
    )?;
    Ok(changed > 0)
}

/// Remove a membership. Returns whether the removed member was an admin, or
/// None if there was no membership.
pub fn remove_member(conn: &Connection, group_id: Uuid, user_id: Uuid) -> Result<Option<bool>> {
    let was_admin = membership(conn, group_id, user_id)?;
    if was_admin.is_some() {
        conn.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            (group_id.to_string(), user_id.to_string()),
        )?;
    }
    Ok(was_admin)
}

/// `Some(is_admin)` if the user belongs to the group.
pub fn membership(conn: &Connection, group_id: Uuid, user_id: Uuid) -> Result<Option<bool>> {
    conn.query_row(
        "SELECT is_admin FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        (group_id.to_string(), user_id.to_string()),
        |row| row.get(0),
    )
    .optional()
}

/// Members in join order.
pub fn members(conn: &Connection, group_id: Uuid) -> Result<Vec<GroupMemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT gm.group_id, gm.user_id, COALESCE(u.username, 'unknown'), gm.is_admin, gm.joined_at
         FROM group_members gm
         LEFT JOIN users u ON u.id = gm.user_id
         WHERE gm.group_id = ?1
         ORDER BY gm.joined_at, gm.rowid",
    )?;
    let rows = stmt
        .query_map([group_id.to_string()], map_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn member_ids(conn: &Connection, group_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at, rowid",
    )?;
    let ids = stmt
        .query_map([group_id.to_string()], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn set_admin(conn: &Connection, group_id: Uuid, user_id: Uuid, is_admin: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE group_members SET is_admin = ?3 WHERE group_id = ?1 AND user_id = ?2",
        (group_id.to_string(), user_id.to_string(), is_admin),
    )?;
    Ok(changed > 0)
}

pub fn admin_count(conn: &Connection, group_id: Uuid) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND is_admin = 1",
        [group_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// The longest-standing member, if any remain.
pub fn oldest_member(conn: &Connection, group_id: Uuid) -> Result<Option<Uuid>> {
    conn.query_row(
        "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at, rowid LIMIT 1",
        [group_id.to_string()],
        |row| uuid_at(row, 0),
    )
    .optional()
}

pub fn groups_for_user(conn: &Connection, user_id: Uuid) -> Result<Vec<GroupRow>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, g.picture, g.created_by, g.created_at
         FROM group_chats g
         JOIN group_members gm ON gm.group_id = g.id
         WHERE gm.user_id = ?1
         ORDER BY g.created_at",
    )?;
    let rows = stmt
        .query_map([user_id.to_string()], map_group)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
