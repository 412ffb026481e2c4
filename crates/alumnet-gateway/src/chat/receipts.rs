use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use alumnet_db::models::timestamp_now;
use alumnet_db::queries::{groups, receipts};
use alumnet_types::api::Identity;
use alumnet_types::events::ServerEvent;
use alumnet_types::ids::{ConversationKey, Target};

use super::{ChatError, ChatResult, ChatService, require_access, require_member, require_message};

/// A single-message read that flipped state.
struct ReadMark {
    message_id: Uuid,
    conversation: ConversationKey,
    author: Uuid,
    read_at: DateTime<Utc>,
}

impl ChatService {
    /// Mark everything the other side wrote as read. Returns the number of
    /// messages this call flipped; the reader's badge drops by exactly that.
    pub fn mark_conversation_read(&self, actor: &Identity, target: Target) -> ChatResult<u64> {
        let me = actor.user_id;
        let conversation = target.conversation_for(me);

        let count = match target {
            Target::Direct(partner) if partner == me => {
                return Err(ChatError::validation("cannot read a conversation with yourself"));
            }
            Target::Direct(partner) => self.inner.db.write(
                |tx| Ok::<_, ChatError>(receipts::mark_private_read(tx, me, partner)?),
                |_, &count| {
                    if count == 0 {
                        return;
                    }
                    self.inner.caches.invalidate_for(&conversation, &[me, partner]);
                    self.inner.dispatcher.send_to_user(
                        partner,
                        ServerEvent::MessagesRead {
                            conversation,
                            reader_id: me,
                            count,
                        },
                    );
                    self.adjust_badge(me, conversation, -(count as i64));
                },
            )?,
            Target::Group(group_id) => self.inner.db.write(
                |tx| {
                    require_member(tx, group_id, me)?;
                    let count = receipts::mark_group_read(tx, group_id, me, &timestamp_now())?;
                    Ok::<_, ChatError>((count, groups::member_ids(tx, group_id)?))
                },
                |_, (count, members)| {
                    let count = *count;
                    if count == 0 {
                        return;
                    }
                    self.inner.caches.invalidate_for(&conversation, &[me]);
                    self.inner.dispatcher.send_to_users(
                        members,
                        &ServerEvent::GroupMessagesRead {
                            group_id,
                            reader_id: me,
                            count,
                        },
                        Some(me),
                    );
                    self.adjust_badge(me, conversation, -(count as i64));
                },
            )?
            .0,
        };

        debug!(%conversation, "{} marked {} messages read", actor.username, count);
        Ok(count)
    }

    /// Mark one message read. Returns false when it already was, or when the
    /// actor wrote it.
    pub fn mark_message_read(&self, actor: &Identity, message_id: Uuid) -> ChatResult<bool> {
        let me = actor.user_id;
        let mark = self.inner.db.write(
            |tx| -> ChatResult<_> {
                let row = require_message(tx, message_id)?;
                require_access(tx, me, &row.conversation)?;
                if row.sender_id == me {
                    return Ok(None);
                }

                let read_at = timestamp_now();
                let flipped = match row.group_id {
                    Some(_) => receipts::insert_marker(tx, message_id, me, &read_at)?,
                    None => receipts::mark_message_read(tx, message_id)?,
                };
                Ok(flipped.then_some(ReadMark {
                    message_id,
                    conversation: row.conversation,
                    author: row.sender_id,
                    read_at,
                }))
            },
            |_, mark| {
                let Some(mark) = mark else {
                    return;
                };
                self.inner
                    .caches
                    .invalidate_for(&mark.conversation, &[me, mark.author]);
                self.inner.dispatcher.send_to_user(
                    mark.author,
                    ServerEvent::MessageReadUpdate {
                        message_id: mark.message_id,
                        conversation: mark.conversation,
                        reader_id: me,
                        read_at: mark.read_at,
                    },
                );
                self.adjust_badge(me, mark.conversation, -1);
            },
        )?;
        Ok(mark.is_some())
    }
}
