use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use super::{OptionalExt, ts_at, uuid_at};
use crate::Database;
use crate::models::{UserRow, format_ts, timestamp_now};

impl Database {
    /// Mirror an identity verified by the auth service.
    pub fn upsert_user(&self, id: Uuid, username: &str, display_name: &str) -> Result<()> {
        self.with_conn(|conn| upsert_user(conn, id, username, display_name))
    }
}

pub fn upsert_user(conn: &Connection, id: Uuid, username: &str, display_name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, display_name, created_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            username = excluded.username,
            display_name = excluded.display_name
         WHERE username != excluded.username OR display_name != excluded.display_name",
        (
            id.to_string(),
            username,
            display_name,
            format_ts(&timestamp_now()),
        ),
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, display_name, created_at FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok(UserRow {
                id: uuid_at(row, 0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                created_at: ts_at(row, 3)?,
            })
        })
        .optional()?;

    Ok(row)
}

pub fn username_of(conn: &Connection, id: Uuid) -> Result<Option<String>> {
    conn.query_row(
        "SELECT username FROM users WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    )
    .optional()
}
