//! Conversation gate: strangers go through a message request before they can
//! exchange private messages. Blocks in either direction always win.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use alumnet_db::models::{NewMessage, timestamp_now};
use alumnet_db::queries::{blocks, messages, requests};
use alumnet_types::api::Identity;
use alumnet_types::events::{BlockReason, ServerEvent};
use alumnet_types::ids::ConversationKey;
use alumnet_types::models::{MessageKind, MessagePayload, MessageRequestPayload, RequestStatus};

use super::payload::{hydrate_one, request_payload};
use super::{ChatError, ChatResult, ChatService, denied, require_message, require_user};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// No history and no request.
    None,
    /// An unanswered request exists, from either side.
    Pending,
    /// A message exists, or a request was accepted.
    Open,
}

pub(super) fn check_blocks(conn: &Connection, actor: Uuid, other: Uuid) -> ChatResult<()> {
    if blocks::has_blocked(conn, actor, other)? {
        return Err(ChatError::Blocked(BlockReason::YouBlocked));
    }
    if blocks::has_blocked(conn, other, actor)? {
        return Err(ChatError::Blocked(BlockReason::BlockedByThem));
    }
    Ok(())
}

pub(super) fn state_of(conn: &Connection, a: Uuid, b: Uuid) -> ChatResult<GateState> {
    let key = ConversationKey::direct(a, b);
    if messages::conversation_has_messages(conn, &key)? || requests::accepted_exists(conn, a, b)? {
        return Ok(GateState::Open);
    }
    if requests::pending_for_pair(conn, a, b)?.is_some() {
        return Ok(GateState::Pending);
    }
    Ok(GateState::None)
}

/// Send attempt while the gate is not open. Creates the request in `None`,
/// returns the outstanding one in `Pending`. The boolean reports whether this
/// call wrote it; a concurrent send from the other side that won the unique
/// index is returned as not created.
pub(super) fn request_or_pending(
    conn: &Connection,
    sender: Uuid,
    receiver: Uuid,
    content: &str,
    has_attachments: bool,
    now: &DateTime<Utc>,
) -> ChatResult<(MessageRequestPayload, bool)> {
    if has_attachments {
        return Err(ChatError::validation(
            "attachments can be sent once the message request is accepted",
        ));
    }

    let created = match requests::pending_for_pair(conn, sender, receiver)? {
        Some(_) => false,
        None => requests::insert_pending(conn, Uuid::new_v4(), sender, receiver, content, now)?,
    };

    let pending = requests::pending_for_pair(conn, sender, receiver)?
        .ok_or_else(|| anyhow::anyhow!("pending request missing after insert"))?;
    Ok((request_payload(pending), created))
}

impl ChatService {
    pub fn conversation_state(&self, a: Uuid, b: Uuid) -> ChatResult<GateState> {
        self.read(|conn| state_of(conn, a, b))
    }

    /// Requests waiting on `actor`, oldest first.
    pub fn pending_requests(&self, actor: &Identity) -> ChatResult<Vec<MessageRequestPayload>> {
        self.read(|conn| {
            Ok(requests::pending_for_receiver(conn, actor.user_id)?
                .into_iter()
                .map(request_payload)
                .collect())
        })
    }

    /// Receiver accepts: the request flips to accepted and its content
    /// becomes the first message of the conversation.
    pub fn accept_request(&self, actor: &Identity, request_id: Uuid) -> ChatResult<MessagePayload> {
        let me = actor.user_id;
        let (request, message) = self.inner.db.write(
            |tx| {
                let row = requests::get_request(tx, request_id)?
                    .ok_or(ChatError::NotFound("message request"))?;
                if row.receiver_id != me {
                    return Err(denied(me, "only the receiver can answer a message request"));
                }
                if row.accepted || !requests::mark_accepted(tx, request_id)? {
                    return Err(ChatError::conflict("message request already accepted"));
                }
                check_blocks(tx, me, row.sender_id)?;

                let id = Uuid::new_v4();
                messages::insert_message(
                    tx,
                    &NewMessage {
                        id,
                        conversation: ConversationKey::direct(row.sender_id, me),
                        sender_id: row.sender_id,
                        receiver_id: Some(me),
                        group_id: None,
                        content: &row.content,
                        kind: MessageKind::Text,
                        created_at: timestamp_now(),
                        reply_to_id: None,
                        forwarded_from_id: None,
                    },
                )?;
                let message = hydrate_one(tx, require_message(tx, id)?)?;

                let mut request = request_payload(row);
                request.accepted = true;
                Ok((request, message))
            },
            |_, (request, message)| {
                let d = &self.inner.dispatcher;
                self.inner.caches.invalidate_for(
                    &message.conversation,
                    &[request.sender_id, request.receiver_id],
                );
                d.send_to_user(
                    request.sender_id,
                    ServerEvent::MessageRequest {
                        request: request.clone(),
                        status: RequestStatus::Accepted,
                    },
                );
                d.send_to_user(
                    request.sender_id,
                    ServerEvent::ChatMessage {
                        message: message.clone(),
                    },
                );
                self.adjust_badge(request.receiver_id, message.conversation, 1);
            },
        )?;

        info!(request = %request.id, "{} accepted a message request from {}", actor.username, request.sender_username);
        Ok(message)
    }

    /// Receiver declines: the request is deleted and the pair is back to no
    /// state at all.
    pub fn decline_request(
        &self,
        actor: &Identity,
        request_id: Uuid,
    ) -> ChatResult<MessageRequestPayload> {
        let me = actor.user_id;
        self.inner.db.write(
            |tx| {
                let row = requests::get_request(tx, request_id)?
                    .ok_or(ChatError::NotFound("message request"))?;
                if row.receiver_id != me {
                    return Err(denied(me, "only the receiver can answer a message request"));
                }
                if row.accepted {
                    return Err(ChatError::conflict("message request already accepted"));
                }
                requests::delete_request(tx, request_id)?;
                Ok(request_payload(row))
            },
            |_, request| {
                self.inner.dispatcher.send_to_user(
                    request.sender_id,
                    ServerEvent::MessageRequest {
                        request: request.clone(),
                        status: RequestStatus::Declined,
                    },
                );
            },
        )
    }

    /// Returns false if the block already existed.
    pub fn block_user(&self, actor: &Identity, other: Uuid) -> ChatResult<bool> {
        if other == actor.user_id {
            return Err(ChatError::validation("cannot block yourself"));
        }
        let created = self.inner.db.write(
            |tx| {
                require_user(tx, other)?;
                Ok::<_, ChatError>(blocks::block(tx, actor.user_id, other)?)
            },
            |_, _| {},
        )?;
        if created {
            info!("{} blocked {}", actor.username, other);
        }
        Ok(created)
    }

    pub fn unblock_user(&self, actor: &Identity, other: Uuid) -> ChatResult<bool> {
        self.inner.db.write(
            |tx| Ok::<_, ChatError>(blocks::unblock(tx, actor.user_id, other)?),
            |_, _| {},
        )
    }

    pub fn blocked_users(&self, actor: &Identity) -> ChatResult<Vec<Uuid>> {
        self.read(|conn| Ok(blocks::blocked_by(conn, actor.user_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alumnet_db::Database;

    #[test]
    fn gate_moves_from_none_to_pending_to_open() {
        let db = Database::open_in_memory().unwrap();
        let ann = Uuid::new_v4();
        let bob = Uuid::new_v4();

        db.with_conn(|conn| -> ChatResult<()> {
            assert_eq!(state_of(conn, ann, bob)?, GateState::None);

            let (request, created) =
                request_or_pending(conn, ann, bob, "hi", false, &timestamp_now())?;
            assert!(created);
            assert_eq!(state_of(conn, bob, ann)?, GateState::Pending);

            // a second attempt from the other side returns the same request
            let (again, created) =
                request_or_pending(conn, bob, ann, "hey", false, &timestamp_now())?;
            assert!(!created);
            assert_eq!(again.id, request.id);
            assert_eq!(again.sender_id, ann);

            requests::mark_accepted(conn, request.id)?;
            assert_eq!(state_of(conn, ann, bob)?, GateState::Open);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn attachments_wait_for_acceptance() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                request_or_pending(conn, Uuid::new_v4(), Uuid::new_v4(), "", true, &timestamp_now())
            })
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn own_block_is_reported_first() {
        let db = Database::open_in_memory().unwrap();
        let ann = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.with_conn(|conn| -> ChatResult<()> {
            blocks::block(conn, ann, bob)?;
            blocks::block(conn, bob, ann)?;
            assert!(matches!(
                check_blocks(conn, ann, bob),
                Err(ChatError::Blocked(BlockReason::YouBlocked))
            ));
            blocks::unblock(conn, ann, bob)?;
            assert!(matches!(
                check_blocks(conn, ann, bob),
                Err(ChatError::Blocked(BlockReason::BlockedByThem))
            ));
            Ok(())
        })
        .unwrap();
    }
}
