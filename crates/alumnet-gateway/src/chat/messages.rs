use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use alumnet_db::models::{NewMessage, timestamp_now};
use alumnet_db::queries::{attachments, blocks, groups, messages, receipts};
use alumnet_types::api::Identity;
use alumnet_types::events::{PinAction, ServerEvent};
use alumnet_types::ids::{ConversationKey, Target};
use alumnet_types::models::{
    Attachment, BUMP_MARKER, MessageKind, MessagePayload, MessageRequestPayload, RequestStatus,
};

use super::gate::{GateState, check_blocks, request_or_pending, state_of};
use super::payload::hydrate_one;
use super::{
    ChatError, ChatResult, ChatService, denied, mentions, participants, require_access,
    require_member, require_message, require_user, validate_content,
};

/// A new message as the client asked for it.
#[derive(Debug, Clone)]
pub struct Draft {
    pub target: Target,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub attachment_ids: Vec<String>,
}

impl Draft {
    pub fn text(target: Target, content: impl Into<String>) -> Self {
        Self {
            target,
            content: content.into(),
            reply_to: None,
            attachment_ids: vec![],
        }
    }
}

/// What a send produced. A send into a conversation that is not open yet
/// stops at the message request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered {
        message: MessagePayload,
    },
    RequestPending {
        request: MessageRequestPayload,
        /// False when an outstanding request already existed.
        created: bool,
    },
}

impl SendOutcome {
    pub fn message(&self) -> Option<&MessagePayload> {
        match self {
            Self::Delivered { message } => Some(message),
            Self::RequestPending { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub message_id: Uuid,
    pub conversation: ConversationKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinOutcome {
    pub message_id: Uuid,
    pub conversation: ConversationKey,
    pub is_pinned: bool,
    pub action: PinAction,
}

struct Outgoing<'a> {
    target: Target,
    content: &'a str,
    kind: MessageKind,
    reply_to: Option<Uuid>,
    attachments: Vec<Attachment>,
    forwarded_from: Option<Uuid>,
}

enum Committed {
    Request {
        request: MessageRequestPayload,
        created: bool,
    },
    Message {
        message: MessagePayload,
        recipients: Vec<Uuid>,
        mentioned: Vec<Uuid>,
        group_name: Option<String>,
    },
}

impl ChatService {
    pub fn send_message(&self, actor: &Identity, draft: Draft) -> ChatResult<SendOutcome> {
        validate_content(&draft.content, draft.attachment_ids.len())?;
        let attachments = self.resolve_attachments(actor.user_id, &draft.attachment_ids)?;

        self.deliver(
            actor,
            Outgoing {
                target: draft.target,
                content: &draft.content,
                kind: MessageKind::Text,
                reply_to: draft.reply_to,
                attachments,
                forwarded_from: None,
            },
        )
    }

    /// Look the ids up in the blob store, keeping the order the client gave.
    fn resolve_attachments(&self, uploader: Uuid, ids: &[String]) -> ChatResult<Vec<Attachment>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut seen = HashSet::new();
        if !ids.iter().all(|id| seen.insert(id.as_str())) {
            return Err(ChatError::validation("duplicate attachment id"));
        }

        let mut found = self.inner.blobs.resolve(uploader, ids)?;
        ids.iter()
            .map(|id| -> ChatResult<Attachment> {
                let pos = found
                    .iter()
                    .position(|a| &a.id == id)
                    .ok_or(ChatError::NotFound("attachment"))?;
                Ok(found.swap_remove(pos))
            })
            .collect()
    }

    /// The shared send path of send, bump and forward.
    fn deliver(&self, actor: &Identity, out: Outgoing<'_>) -> ChatResult<SendOutcome> {
        let me = actor.user_id;
        if out.target == Target::Direct(me) {
            return Err(ChatError::validation("cannot message yourself"));
        }
        let conversation = out.target.conversation_for(me);

        let committed = self.inner.db.write(
            |tx| {
                let now = timestamp_now();
                let (receiver_id, group_id) = match out.target {
                    Target::Direct(other) => {
                        require_user(tx, other)?;
                        check_blocks(tx, me, other)?;
                        if state_of(tx, me, other)? != GateState::Open {
                            let (request, created) = request_or_pending(
                                tx,
                                me,
                                other,
                                out.content,
                                !out.attachments.is_empty(),
                                &now,
                            )?;
                            return Ok(Committed::Request { request, created });
                        }
                        (Some(other), None)
                    }
                    Target::Group(group_id) => {
                        require_member(tx, group_id, me)?;
                        (None, Some(group_id))
                    }
                };

                if let Some(parent_id) = out.reply_to {
                    let parent = require_message(tx, parent_id)?;
                    if parent.conversation != conversation {
                        return Err(ChatError::validation(
                            "referenced message belongs to another conversation",
                        ));
                    }
                }

                let id = Uuid::new_v4();
                messages::insert_message(
                    tx,
                    &NewMessage {
                        id,
                        conversation,
                        sender_id: me,
                        receiver_id,
                        group_id,
                        content: out.content,
                        kind: out.kind,
                        created_at: now,
                        reply_to_id: out.reply_to,
                        forwarded_from_id: out.forwarded_from,
                    },
                )?;
                attachments::link_attachments(tx, id, &out.attachments)?;

                let (mentioned, group_name) = match group_id {
                    Some(group_id) => {
                        let mentioned = if out.kind == MessageKind::Text {
                            mentions::record(tx, id, group_id, me, out.content)?
                        } else {
                            vec![]
                        };
                        let name = groups::get_group(tx, group_id)?.map(|g| g.name);
                        (mentioned, name)
                    }
                    None => (vec![], None),
                };

                let message = hydrate_one(tx, require_message(tx, id)?)?;
                let recipients = participants(tx, &conversation)?
                    .into_iter()
                    .filter(|&u| u != me)
                    .collect();

                Ok(Committed::Message {
                    message,
                    recipients,
                    mentioned,
                    group_name,
                })
            },
            |_, committed| self.publish_send(actor, committed),
        )?;

        Ok(match committed {
            Committed::Request { request, created } => {
                SendOutcome::RequestPending { request, created }
            }
            Committed::Message { message, .. } => SendOutcome::Delivered { message },
        })
    }

    fn publish_send(&self, actor: &Identity, committed: &Committed) {
        match committed {
            Committed::Request { request, created } => {
                if !*created {
                    debug!(request = %request.id, "Message request already pending");
                    return;
                }
                info!(request = %request.id, "{} sent a message request to {}", actor.username, request.receiver_id);
                self.inner.dispatcher.send_to_user(
                    request.receiver_id,
                    ServerEvent::MessageRequest {
                        request: request.clone(),
                        status: RequestStatus::Pending,
                    },
                );
            }
            Committed::Message {
                message,
                recipients,
                mentioned,
                group_name,
            } => {
                self.publish_message(actor.user_id, message, recipients);

                let (Some(group_id), Some(group_name)) = (message.group_id, group_name) else {
                    return;
                };
                for &user_id in mentioned {
                    self.inner.dispatcher.send_to_user(
                        user_id,
                        ServerEvent::MentionNotification {
                            message_id: message.id,
                            group_id,
                            group_name: group_name.clone(),
                            mentioned_by: actor.user_id,
                            mentioned_by_username: actor.username.clone(),
                            content: message.content.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Fan a freshly committed message out to everyone but its author and
    /// bump their unread badges.
    pub(super) fn publish_message(&self, author: Uuid, message: &MessagePayload, recipients: &[Uuid]) {
        let mut everyone = recipients.to_vec();
        everyone.push(author);
        self.inner.caches.invalidate_for(&message.conversation, &everyone);

        let event = ServerEvent::ChatMessage {
            message: message.clone(),
        };
        self.inner
            .dispatcher
            .send_to_users(recipients, &event, Some(author));
        for &user_id in recipients {
            if user_id != author {
                self.adjust_badge(user_id, message.conversation, 1);
            }
        }
    }

    /// Sender-only. System and bump messages are immutable.
    pub fn edit_message(
        &self,
        actor: &Identity,
        message_id: Uuid,
        content: &str,
    ) -> ChatResult<MessagePayload> {
        let me = actor.user_id;

        let (message, recipients) = self.inner.db.write(
            |tx| {
                let row = require_message(tx, message_id)?;
                require_access(tx, me, &row.conversation)?;
                if row.sender_id != me {
                    return Err(denied(me, "only the sender can edit a message"));
                }
                if row.kind != MessageKind::Text {
                    return Err(ChatError::validation("only text messages can be edited"));
                }
                // attachments stay, so a file message may lose its caption
                let files = attachments::attachments_for_messages(tx, &[message_id])?.len();
                validate_content(content, files)?;

                messages::update_content(tx, message_id, content, &timestamp_now())?;
                let message = hydrate_one(tx, require_message(tx, message_id)?)?;
                let recipients: Vec<Uuid> = participants(tx, &row.conversation)?;
                Ok((message, recipients))
            },
            |_, (message, recipients)| {
                self.inner.caches.invalidate_for(&message.conversation, recipients);
                let Some(edited_at) = message.edited_at else {
                    return;
                };
                self.inner.dispatcher.send_to_users(
                    recipients,
                    &ServerEvent::MessageEdited {
                        message_id: message.id,
                        conversation: message.conversation,
                        content: message.content.clone(),
                        edited_at,
                        edited_by: me,
                    },
                    Some(me),
                );
            },
        )?;

        debug!(message = %message.id, "Edited by {} ({} participants)", actor.username, recipients.len());
        Ok(message)
    }

    /// Sender-only hard delete. Whoever still had it unread gets their badge
    /// decremented.
    pub fn delete_message(&self, actor: &Identity, message_id: Uuid) -> ChatResult<Deleted> {
        let me = actor.user_id;

        let (deleted, recipients, _) = self.inner.db.write(
            |tx| {
                let row = require_message(tx, message_id)?;
                require_access(tx, me, &row.conversation)?;
                if row.sender_id != me {
                    return Err(denied(me, "only the sender can delete a message"));
                }

                let recipients = participants(tx, &row.conversation)?;
                let unread_by: Vec<Uuid> = match row.group_id {
                    Some(_) => {
                        let readers = receipts::readers_of(tx, message_id)?;
                        recipients
                            .iter()
                            .copied()
                            .filter(|u| *u != row.sender_id && !readers.contains(u))
                            .collect()
                    }
                    None if row.is_read => vec![],
                    None => row.receiver_id.into_iter().collect(),
                };

                messages::delete_message(tx, message_id)?;
                let deleted = Deleted {
                    message_id,
                    conversation: row.conversation,
                };
                Ok((deleted, recipients, unread_by))
            },
            |_, (deleted, recipients, unread_by)| {
                self.inner
                    .caches
                    .invalidate_for(&deleted.conversation, recipients);
                self.inner.dispatcher.send_to_users(
                    recipients,
                    &ServerEvent::MessageDeleted {
                        message_id: deleted.message_id,
                        conversation: deleted.conversation,
                        deleted_by: me,
                    },
                    Some(me),
                );
                for &user_id in unread_by {
                    self.adjust_badge(user_id, deleted.conversation, -1);
                }
            },
        )?;

        info!(message = %message_id, "{} deleted a message ({} participants)", actor.username, recipients.len());
        Ok(deleted)
    }

    /// Flip the pin state. Any participant may pin.
    pub fn toggle_pin(&self, actor: &Identity, message_id: Uuid) -> ChatResult<PinOutcome> {
        let me = actor.user_id;

        let (outcome, recipients) = self.inner.db.write(
            |tx| -> ChatResult<_> {
                let row = require_message(tx, message_id)?;
                require_access(tx, me, &row.conversation)?;

                let is_pinned = !row.is_pinned;
                messages::set_pinned(tx, message_id, is_pinned)?;
                let outcome = PinOutcome {
                    message_id,
                    conversation: row.conversation,
                    is_pinned,
                    action: if is_pinned {
                        PinAction::Pinned
                    } else {
                        PinAction::Unpinned
                    },
                };
                Ok((outcome, participants(tx, &row.conversation)?))
            },
            |_, (outcome, recipients)| {
                self.inner
                    .caches
                    .invalidate_for(&outcome.conversation, recipients);
                self.inner.dispatcher.send_to_users(
                    recipients,
                    &ServerEvent::MessagePinned {
                        message_id: outcome.message_id,
                        conversation: outcome.conversation,
                        is_pinned: outcome.is_pinned,
                        action: outcome.action,
                        by: me,
                    },
                    Some(me),
                );
            },
        )?;

        debug!(message = %message_id, pinned = outcome.is_pinned, "Pin toggled ({} participants)", recipients.len());
        Ok(outcome)
    }

    /// Re-surface a message with a new marker message replying to it. The
    /// original row is left untouched. `target`, when given, must name the
    /// conversation the original lives in.
    pub fn bump_message(
        &self,
        actor: &Identity,
        message_id: Uuid,
        target: Option<Target>,
    ) -> ChatResult<SendOutcome> {
        let me = actor.user_id;
        let original = self.read(|conn| {
            let row = require_message(conn, message_id)?;
            require_access(conn, me, &row.conversation)?;
            Ok(row)
        })?;

        if let Some(target) = target {
            if target.conversation_for(me) != original.conversation {
                return Err(ChatError::validation(
                    "cannot bump a message from another conversation",
                ));
            }
        }
        let target = match original.conversation {
            ConversationKey::Group(group_id) => Target::Group(group_id),
            ConversationKey::Direct(..) => original
                .conversation
                .partner_of(me)
                .map(Target::Direct)
                .ok_or_else(|| denied(me, "not a participant of this conversation"))?,
        };

        self.deliver(
            actor,
            Outgoing {
                target,
                content: BUMP_MARKER,
                kind: MessageKind::Bump,
                reply_to: Some(message_id),
                attachments: vec![],
                forwarded_from: None,
            },
        )
    }

    /// Copy a visible message, attachments included, into another
    /// conversation through the normal send path.
    pub fn forward_message(
        &self,
        actor: &Identity,
        message_id: Uuid,
        target: Target,
    ) -> ChatResult<SendOutcome> {
        let me = actor.user_id;
        let (original, files) = self.read(|conn| {
            let row = require_message(conn, message_id)?;
            require_access(conn, me, &row.conversation)?;
            let files: Vec<Attachment> = attachments::attachments_for_messages(conn, &[message_id])?
                .into_iter()
                .map(|(_, a)| a)
                .collect();
            Ok((row, files))
        })?;

        if original.kind != MessageKind::Text {
            return Err(ChatError::validation("only text messages can be forwarded"));
        }
        validate_content(&original.content, files.len())?;

        self.deliver(
            actor,
            Outgoing {
                target,
                content: &original.content,
                kind: MessageKind::Text,
                reply_to: None,
                attachments: files,
                forwarded_from: Some(message_id),
            },
        )
    }

    /// Relay a typing indicator. Ephemeral: nothing is stored, and nothing is
    /// relayed across a block.
    pub fn typing(&self, actor: &Identity, target: Target, started: bool) -> ChatResult<()> {
        let me = actor.user_id;
        let recipients = match target {
            Target::Direct(other) if other == me => {
                return Err(ChatError::validation("cannot message yourself"));
            }
            Target::Direct(other) => {
                let blocked = self.read(|conn| {
                    Ok(blocks::has_blocked(conn, me, other)? || blocks::has_blocked(conn, other, me)?)
                })?;
                if blocked {
                    return Ok(());
                }
                vec![other]
            }
            Target::Group(group_id) => self.read(|conn| {
                require_member(conn, group_id, me)?;
                Ok(groups::member_ids(conn, group_id)?)
            })?,
        };

        let conversation = target.conversation_for(me);
        let username = actor.username.clone();
        let event = if started {
            ServerEvent::UserTyping {
                conversation,
                user_id: me,
                username,
            }
        } else {
            ServerEvent::UserStopTyping {
                conversation,
                user_id: me,
                username,
            }
        };
        self.inner
            .dispatcher
            .send_to_users(&recipients, &event, Some(me));
        Ok(())
    }
}
