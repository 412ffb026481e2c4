use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use alumnet_types::ids::ConversationKey;

use super::{OptionalExt, opt_ts_at, opt_uuid_at, parsed_at, ts_at, uuid_at};
use crate::models::{MessageRow, NewMessage, format_ts};

// JOIN users to fetch sender_username in the same query
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.conversation_key, m.sender_id, COALESCE(u.username, 'unknown'),
           m.receiver_id, m.group_id, m.content, m.kind, m.created_at, m.edited_at,
           m.is_read, m.is_pinned, m.reply_to_id, m.forwarded_from_id
    FROM messages m
    LEFT JOIN users u ON u.id = m.sender_id";

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: uuid_at(row, 0)?,
        conversation: parsed_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        sender_username: row.get(3)?,
        receiver_id: opt_uuid_at(row, 4)?,
        group_id: opt_uuid_at(row, 5)?,
        content: row.get(6)?,
        kind: parsed_at(row, 7)?,
        created_at: ts_at(row, 8)?,
        edited_at: opt_ts_at(row, 9)?,
        is_read: row.get(10)?,
        is_pinned: row.get(11)?,
        reply_to_id: opt_uuid_at(row, 12)?,
        forwarded_from_id: opt_uuid_at(row, 13)?,
    })
}

fn collect(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_message(conn: &Connection, msg: &NewMessage<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, conversation_key, sender_id, receiver_id, group_id, content, kind,
                               created_at, reply_to_id, forwarded_from_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            msg.id.to_string(),
            msg.conversation.to_string(),
            msg.sender_id.to_string(),
            msg.receiver_id.map(|id| id.to_string()),
            msg.group_id.map(|id| id.to_string()),
            msg.content,
            msg.kind.as_str(),
            format_ts(&msg.created_at),
            msg.reply_to_id.map(|id| id.to_string()),
            msg.forwarded_from_id.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

pub fn get_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>> {
    let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
    conn.query_row(&sql, [id.to_string()], map_message).optional()
}

pub fn get_messages(conn: &Connection, ids: &[Uuid]) -> Result<Vec<MessageRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "{} WHERE m.id IN ({}) ORDER BY m.seq",
        MESSAGE_SELECT,
        super::placeholders(ids.len())
    );
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    collect(conn, &sql, rusqlite::params_from_iter(ids))
}

/// Whether any message exists in the conversation.
pub fn conversation_has_messages(conn: &Connection, key: &ConversationKey) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE conversation_key = ?1)",
        [key.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn update_content(
    conn: &Connection,
    id: Uuid,
    content: &str,
    edited_at: &DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
        (id.to_string(), content, format_ts(edited_at)),
    )?;
    Ok(changed > 0)
}

pub fn set_pinned(conn: &Connection, id: Uuid, pinned: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
        (id.to_string(), pinned),
    )?;
    Ok(changed > 0)
}

/// Hard delete. Reactions, read markers, mentions and attachment links
/// cascade; replies keep existing with a cleared `reply_to_id`.
pub fn delete_message(conn: &Connection, id: Uuid) -> Result<bool> {
    let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()])?;
    Ok(changed > 0)
}

/// A page of a conversation in ascending order. `before` is the id of the
/// oldest message of the previous page.
pub fn list_conversation(
    conn: &Connection,
    key: &ConversationKey,
    before: Option<Uuid>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{} WHERE m.conversation_key = ?1
            AND (?2 IS NULL OR m.seq < (SELECT seq FROM messages WHERE id = ?2))
          ORDER BY m.seq DESC
          LIMIT ?3",
        MESSAGE_SELECT
    );
    let mut rows = collect(
        conn,
        &sql,
        rusqlite::params![key.to_string(), before.map(|id| id.to_string()), limit],
    )?;
    rows.reverse();
    Ok(rows)
}

pub fn pinned_in_conversation(conn: &Connection, key: &ConversationKey) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{} WHERE m.conversation_key = ?1 AND m.is_pinned = 1 ORDER BY m.seq",
        MESSAGE_SELECT
    );
    collect(conn, &sql, [key.to_string()])
}

/// Latest message of every private conversation `user_id` takes part in.
pub fn last_private_messages(conn: &Connection, user_id: Uuid) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "{} WHERE m.seq IN (
              SELECT MAX(seq) FROM messages
              WHERE group_id IS NULL AND (sender_id = ?1 OR receiver_id = ?1)
              GROUP BY conversation_key)
          ORDER BY m.seq DESC",
        MESSAGE_SELECT
    );
    collect(conn, &sql, [user_id.to_string()])
}

pub fn last_group_message(conn: &Connection, group_id: Uuid) -> Result<Option<MessageRow>> {
    let sql = format!(
        "{} WHERE m.group_id = ?1 ORDER BY m.seq DESC LIMIT 1",
        MESSAGE_SELECT
    );
    conn.query_row(&sql, [group_id.to_string()], map_message)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timestamp_now;
    use crate::queries::test_support::{conn, user};
    use alumnet_types::models::MessageKind;

    fn send(conn: &Connection, from: Uuid, to: Uuid, content: &str, reply_to: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        insert_message(
            conn,
            &NewMessage {
                id,
                conversation: ConversationKey::direct(from, to),
                sender_id: from,
                receiver_id: Some(to),
                group_id: None,
                content,
                kind: MessageKind::Text,
                created_at: timestamp_now(),
                reply_to_id: reply_to,
                forwarded_from_id: None,
            },
        )
        .unwrap();
        id
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let id = send(&conn, a, b, "hello", None);

        let row = get_message(&conn, id).unwrap().unwrap();
        assert_eq!(row.content, "hello");
        assert_eq!(row.sender_username, "ann");
        assert_eq!(row.conversation, ConversationKey::direct(b, a));
        assert_eq!(row.receiver_id, Some(b));
        assert!(!row.is_read);
        assert!(row.edited_at.is_none());
        assert!(conversation_has_messages(&conn, &ConversationKey::direct(a, b)).unwrap());
    }

    #[test]
    fn deleting_a_message_clears_replies_reference() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let original = send(&conn, a, b, "first", None);
        let reply = send(&conn, b, a, "reply", Some(original));

        assert!(delete_message(&conn, original).unwrap());
        let reply = get_message(&conn, reply).unwrap().unwrap();
        assert_eq!(reply.reply_to_id, None);
    }

    #[test]
    fn pages_are_ascending_and_cursorable() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let ids: Vec<Uuid> = (0..5)
            .map(|i| send(&conn, a, b, &format!("m{}", i), None))
            .collect();
        let key = ConversationKey::direct(a, b);

        let latest = list_conversation(&conn, &key, None, 2).unwrap();
        assert_eq!(latest.iter().map(|m| m.id).collect::<Vec<_>>(), ids[3..].to_vec());

        let older = list_conversation(&conn, &key, Some(ids[3]), 10).unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), ids[..3].to_vec());
    }

    #[test]
    fn last_private_messages_picks_one_per_partner() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let c = user(&conn, "cid");
        send(&conn, a, b, "1", None);
        let last_ab = send(&conn, b, a, "2", None);
        let last_ac = send(&conn, a, c, "3", None);

        let last = last_private_messages(&conn, a).unwrap();
        assert_eq!(last.iter().map(|m| m.id).collect::<Vec<_>>(), vec![last_ac, last_ab]);
    }

    #[test]
    fn pin_and_edit_update_in_place() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let id = send(&conn, a, b, "draft", None);
        let edited_at = timestamp_now();

        assert!(update_content(&conn, id, "final", &edited_at).unwrap());
        assert!(set_pinned(&conn, id, true).unwrap());

        let row = get_message(&conn, id).unwrap().unwrap();
        assert_eq!(row.content, "final");
        assert_eq!(row.edited_at, Some(edited_at));
        assert!(row.is_pinned);
        assert_eq!(
            pinned_in_conversation(&conn, &ConversationKey::direct(a, b))
                .unwrap()
                .len(),
            1
        );
    }
}
