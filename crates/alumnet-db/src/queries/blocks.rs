use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use super::uuid_at;
use crate::models::{format_ts, timestamp_now};

/// Record that `user_id` blocks `blocked_user_id`. Returns false if the row
/// already existed.
pub fn block(conn: &Connection, user_id: Uuid, blocked_user_id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO blocked_users (user_id, blocked_user_id, created_at) VALUES (?1, ?2, ?3)",
        (
            user_id.to_string(),
            blocked_user_id.to_string(),
            format_ts(&timestamp_now()),
        ),
    )?;
    Ok(changed > 0)
}

pub fn unblock(conn: &Connection, user_id: Uuid, blocked_user_id: Uuid) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM blocked_users WHERE user_id = ?1 AND blocked_user_id = ?2",
        (user_id.to_string(), blocked_user_id.to_string()),
    )?;
    Ok(changed > 0)
}

/// Directional: has `user_id` blocked `other`?
pub fn has_blocked(conn: &Connection, user_id: Uuid, other: Uuid) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM blocked_users WHERE user_id = ?1 AND blocked_user_id = ?2)",
        (user_id.to_string(), other.to_string()),
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn blocked_by(conn: &Connection, user_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT blocked_user_id FROM blocked_users WHERE user_id = ?1 ORDER BY created_at",
    )?;
    let ids = stmt
        .query_map([user_id.to_string()], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::conn;

    #[test]
    fn blocks_are_directional_and_idempotent() {
        let conn = conn();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(block(&conn, a, b).unwrap());
        assert!(!block(&conn, a, b).unwrap());
        assert!(has_blocked(&conn, a, b).unwrap());
        assert!(!has_blocked(&conn, b, a).unwrap());
        assert_eq!(blocked_by(&conn, a).unwrap(), vec![b]);

        assert!(unblock(&conn, a, b).unwrap());
        assert!(!unblock(&conn, a, b).unwrap());
        assert!(!has_blocked(&conn, a, b).unwrap());
    }
}
