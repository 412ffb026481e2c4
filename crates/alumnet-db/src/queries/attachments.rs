use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use alumnet_types::models::Attachment;

use super::{placeholders, uuid_at};
use crate::Database;
use crate::models::{AttachmentRow, format_ts, timestamp_now};

impl Database {
    /// Record metadata for an upload that has landed in blob storage.
    pub fn register_attachment(&self, row: &AttachmentRow) -> Result<()> {
        self.with_conn(|conn| insert_attachment(conn, row))
    }

    pub fn uploads_by(&self, uploader_id: Uuid, ids: &[String]) -> Result<Vec<AttachmentRow>> {
        self.with_conn(|conn| uploads_by(conn, uploader_id, ids))
    }
}

pub fn insert_attachment(conn: &Connection, row: &AttachmentRow) -> Result<()> {
    conn.execute(
        "INSERT INTO attachments (id, uploader_id, filename, content_type, size_bytes, url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        (
            &row.id,
            row.uploader_id.to_string(),
            &row.filename,
            &row.content_type,
            row.size_bytes,
            &row.url,
            format_ts(&timestamp_now()),
        ),
    )?;
    Ok(())
}

/// Uploads owned by `uploader_id` among `ids`. Unknown or foreign ids are
/// absent from the result.
pub fn uploads_by(conn: &Connection, uploader_id: Uuid, ids: &[String]) -> Result<Vec<AttachmentRow>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT id, uploader_id, filename, content_type, size_bytes, url
         FROM attachments WHERE uploader_id = ?1 AND id IN ({})",
        (2..ids.len() + 2)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut params = Vec::with_capacity(ids.len() + 1);
    params.push(uploader_id.to_string());
    params.extend(ids.iter().cloned());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(AttachmentRow {
                id: row.get(0)?,
                uploader_id: uuid_at(row, 1)?,
                filename: row.get(2)?,
                content_type: row.get(3)?,
                size_bytes: row.get(4)?,
                url: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Link attachments to a message, preserving the order given.
pub fn link_attachments(conn: &Connection, message_id: Uuid, attachments: &[Attachment]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO message_attachments
            (message_id, attachment_id, position, filename, content_type, size_bytes, url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (position, a) in attachments.iter().enumerate() {
        stmt.execute((
            message_id.to_string(),
            &a.id,
            position as i64,
            &a.filename,
            &a.content_type,
            a.size_bytes,
            &a.url,
        ))?;
    }
    Ok(())
}

/// (message_id, attachment) pairs for a page of messages, in link order.
pub fn attachments_for_messages(
    conn: &Connection,
    message_ids: &[Uuid],
) -> Result<Vec<(Uuid, Attachment)>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT message_id, attachment_id, filename, content_type, size_bytes, url
         FROM message_attachments
         WHERE message_id IN ({})
         ORDER BY message_id, position",
        placeholders(message_ids.len())
    );
    let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), |row| {
            Ok((
                uuid_at(row, 0)?,
                Attachment {
                    id: row.get(1)?,
                    filename: row.get(2)?,
                    content_type: row.get(3)?,
                    size_bytes: row.get(4)?,
                    url: row.get(5)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use crate::queries::messages::{delete_message, insert_message};
    use crate::queries::test_support::{conn, user};
    use alumnet_types::ids::ConversationKey;
    use alumnet_types::models::MessageKind;

    fn upload(conn: &Connection, uploader: Uuid, name: &str) -> AttachmentRow {
        let row = AttachmentRow {
            id: format!("blob-{}", name),
            uploader_id: uploader,
            filename: name.into(),
            content_type: "image/png".into(),
            size_bytes: 42,
            url: None,
        };
        insert_attachment(conn, &row).unwrap();
        row
    }

    fn as_ref(row: &AttachmentRow) -> Attachment {
        Attachment {
            id: row.id.clone(),
            filename: row.filename.clone(),
            content_type: row.content_type.clone(),
            size_bytes: row.size_bytes,
            url: row.url.clone(),
        }
    }

    #[test]
    fn uploads_are_scoped_to_uploader() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let mine = upload(&conn, a, "a.png");
        let theirs = upload(&conn, b, "b.png");

        let found = uploads_by(
            &conn,
            a,
            &[mine.id.clone(), theirs.id.clone(), "missing".to_string()],
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);
    }

    #[test]
    fn links_preserve_order_and_cascade() {
        let conn = conn();
        let a = user(&conn, "ann");
        let b = user(&conn, "bob");
        let second = upload(&conn, a, "b.png");
        let first = upload(&conn, a, "a.png");

        let m = Uuid::new_v4();
        insert_message(
            &conn,
            &NewMessage {
                id: m,
                conversation: ConversationKey::direct(a, b),
                sender_id: a,
                receiver_id: Some(b),
                group_id: None,
                content: "",
                kind: MessageKind::Text,
                created_at: timestamp_now(),
                reply_to_id: None,
                forwarded_from_id: None,
            },
        )
        .unwrap();
        link_attachments(&conn, m, &[as_ref(&second), as_ref(&first)]).unwrap();

        let linked = attachments_for_messages(&conn, &[m]).unwrap();
        let names: Vec<_> = linked.iter().map(|(_, a)| a.filename.as_str()).collect();
        assert_eq!(names, vec!["b.png", "a.png"]);

        delete_message(&conn, m).unwrap();
        assert!(attachments_for_messages(&conn, &[m]).unwrap().is_empty());
    }
}
