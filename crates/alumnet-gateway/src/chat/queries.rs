//! Read paths behind the TTL caches. A cache miss is loaded and stored while
//! the store is still held, the same lock writers invalidate under, so a
//! value loaded before a commit can never land after that commit's
//! invalidation.

use std::collections::HashMap;

use rusqlite::Connection;
use uuid::Uuid;

use alumnet_db::queries::{groups, messages, receipts, users};
use alumnet_types::api::Identity;
use alumnet_types::ids::ConversationKey;
use alumnet_types::models::{ConversationSummary, MessagePayload, UnreadCounts};

use super::payload::hydrate;
use super::{ChatResult, ChatService, require_access};
use crate::cache::{conversation_list_key, messages_key, unread_counts_key};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

fn load_conversations(conn: &Connection, me: Uuid) -> ChatResult<Vec<ConversationSummary>> {
    let unread_private: HashMap<Uuid, u64> = receipts::unread_private(conn, me)?.into_iter().collect();
    let unread_groups: HashMap<Uuid, u64> = receipts::unread_groups(conn, me)?.into_iter().collect();

    let mut summaries = Vec::new();

    for last in hydrate(conn, messages::last_private_messages(conn, me)?)? {
        let Some(partner) = last.conversation.partner_of(me) else {
            continue;
        };
        let title = users::username_of(conn, partner)?.unwrap_or_else(|| "unknown".to_string());
        summaries.push(ConversationSummary {
            conversation: last.conversation,
            title,
            partner_id: Some(partner),
            group_id: None,
            picture: None,
            unread_count: unread_private.get(&partner).copied().unwrap_or(0),
            last_activity: last.created_at,
            last_message: Some(last),
        });
    }

    let group_rows = groups::groups_for_user(conn, me)?;
    let mut lasts = Vec::new();
    for group in &group_rows {
        lasts.extend(messages::last_group_message(conn, group.id)?);
    }
    let mut lasts: HashMap<Uuid, MessagePayload> = hydrate(conn, lasts)?
        .into_iter()
        .filter_map(|m| m.group_id.map(|g| (g, m)))
        .collect();

    for group in group_rows {
        let last = lasts.remove(&group.id);
        summaries.push(ConversationSummary {
            conversation: ConversationKey::Group(group.id),
            title: group.name,
            partner_id: None,
            group_id: Some(group.id),
            picture: group.picture,
            unread_count: unread_groups.get(&group.id).copied().unwrap_or(0),
            last_activity: last.as_ref().map_or(group.created_at, |m| m.created_at),
            last_message: last,
        });
    }

    summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    Ok(summaries)
}

fn load_unread(conn: &Connection, me: Uuid) -> ChatResult<UnreadCounts> {
    let mut counts = UnreadCounts::default();
    for (sender, n) in receipts::unread_private(conn, me)? {
        counts
            .conversations
            .insert(ConversationKey::direct(me, sender).to_string(), n);
        counts.total += n;
    }
    for (group_id, n) in receipts::unread_groups(conn, me)? {
        counts
            .conversations
            .insert(ConversationKey::Group(group_id).to_string(), n);
        counts.total += n;
    }
    Ok(counts)
}

impl ChatService {
    /// Private partners and groups, most recent activity first.
    pub fn list_conversations(&self, actor: &Identity) -> ChatResult<Vec<ConversationSummary>> {
        let me = actor.user_id;
        let cache = &self.inner.caches.conversation_lists;
        self.read(|conn| {
            cache.get_or_try_insert_with(conversation_list_key(me), || load_conversations(conn, me))
        })
    }

    /// One page in ascending order. Only the latest default-sized page is
    /// cached; cursor pages always hit the store.
    pub fn list_messages(
        &self,
        actor: &Identity,
        conversation: ConversationKey,
        before: Option<Uuid>,
        limit: u32,
    ) -> ChatResult<Vec<MessagePayload>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let cache = &self.inner.caches.messages;

        self.read(|conn| {
            require_access(conn, actor.user_id, &conversation)?;
            let load = || -> ChatResult<Vec<MessagePayload>> {
                let rows = messages::list_conversation(conn, &conversation, before, limit)?;
                Ok(hydrate(conn, rows)?)
            };
            if before.is_none() && limit == DEFAULT_PAGE_SIZE {
                cache.get_or_try_insert_with(messages_key(&conversation), load)
            } else {
                load()
            }
        })
    }

    pub fn pinned_messages(
        &self,
        actor: &Identity,
        conversation: ConversationKey,
    ) -> ChatResult<Vec<MessagePayload>> {
        self.read(|conn| {
            require_access(conn, actor.user_id, &conversation)?;
            Ok(hydrate(conn, messages::pinned_in_conversation(conn, &conversation)?)?)
        })
    }

    pub fn unread_counts(&self, actor: &Identity) -> ChatResult<UnreadCounts> {
        let me = actor.user_id;
        let cache = &self.inner.caches.unread_counts;
        self.read(|conn| cache.get_or_try_insert_with(unread_counts_key(me), || load_unread(conn, me)))
    }
}
