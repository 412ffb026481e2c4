//! Store rows to client payloads.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use alumnet_db::models::{MessageRequestRow, MessageRow, ReactionRow};
use alumnet_db::queries::{attachments, groups, mentions, messages, reactions};
use alumnet_types::models::{
    Attachment, GroupMember, GroupSnapshot, MessagePayload, MessageRequestPayload, ReplyPreview,
};

use super::reactions::aggregate;

/// Build payloads for a page of messages with four batched lookups instead
/// of four per message.
pub(crate) fn hydrate(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<MessagePayload>> {
    if rows.is_empty() {
        return Ok(vec![]);
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let reply_ids: Vec<Uuid> = rows.iter().filter_map(|r| r.reply_to_id).collect();

    let replies: HashMap<Uuid, ReplyPreview> = messages::get_messages(conn, &reply_ids)?
        .into_iter()
        .map(|m| {
            (
                m.id,
                ReplyPreview {
                    id: m.id,
                    sender_id: m.sender_id,
                    sender_username: m.sender_username,
                    content: m.content,
                },
            )
        })
        .collect();

    let mut files: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
    for (message_id, attachment) in attachments::attachments_for_messages(conn, &ids)? {
        files.entry(message_id).or_default().push(attachment);
    }

    let mut mentioned: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (message_id, user_id) in mentions::mentions_for_messages(conn, &ids)? {
        mentioned.entry(message_id).or_default().push(user_id);
    }

    let mut reacted: HashMap<Uuid, Vec<ReactionRow>> = HashMap::new();
    for row in reactions::reactions_for_messages(conn, &ids)? {
        reacted.entry(row.message_id).or_default().push(row);
    }

    Ok(rows
        .into_iter()
        .map(|row| MessagePayload {
            reply_to: row.reply_to_id.and_then(|id| replies.get(&id).cloned()),
            attachments: files.remove(&row.id).unwrap_or_default(),
            mentions: mentioned.remove(&row.id).unwrap_or_default(),
            reactions: aggregate(reacted.get(&row.id).map(Vec::as_slice).unwrap_or_default()),
            id: row.id,
            conversation: row.conversation,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            receiver_id: row.receiver_id,
            group_id: row.group_id,
            content: row.content,
            kind: row.kind,
            created_at: row.created_at,
            edited_at: row.edited_at,
            is_read: row.is_read,
            is_pinned: row.is_pinned,
            forwarded_from: row.forwarded_from_id,
        })
        .collect())
}

pub(crate) fn hydrate_one(conn: &Connection, row: MessageRow) -> Result<MessagePayload> {
    let id = row.id;
    hydrate(conn, vec![row])?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("message {} vanished while hydrating", id))
}

pub(crate) fn request_payload(row: MessageRequestRow) -> MessageRequestPayload {
    MessageRequestPayload {
        id: row.id,
        sender_id: row.sender_id,
        sender_username: row.sender_username,
        receiver_id: row.receiver_id,
        content: row.content,
        created_at: row.created_at,
        accepted: row.accepted,
    }
}

pub(crate) fn group_snapshot(conn: &Connection, group_id: Uuid) -> Result<Option<GroupSnapshot>> {
    let Some(group) = groups::get_group(conn, group_id)? else {
        return Ok(None);
    };
    let members = groups::members(conn, group_id)?
        .into_iter()
        .map(|m| GroupMember {
            user_id: m.user_id,
            username: m.username,
            is_admin: m.is_admin,
            joined_at: m.joined_at,
        })
        .collect();

    Ok(Some(GroupSnapshot {
        id: group.id,
        name: group.name,
        picture: group.picture,
        created_by: group.created_by,
        created_at: group.created_at,
        members,
    }))
}
