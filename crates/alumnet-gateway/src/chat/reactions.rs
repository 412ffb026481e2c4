use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use alumnet_db::models::{ReactionRow, timestamp_now};
use alumnet_db::queries::reactions::{self, UpsertOutcome};
use alumnet_types::api::Identity;
use alumnet_types::events::{ReactionAction, ServerEvent};
use alumnet_types::ids::ConversationKey;
use alumnet_types::models::{ReactingUser, ReactionBucket, ReactionStats, ReactionType};

use super::{ChatError, ChatResult, ChatService, participants, require_access, require_message};

#[derive(Debug, Clone, Serialize)]
pub struct ReactionChange {
    pub message_id: Uuid,
    pub conversation: ConversationKey,
    pub reaction_type: Option<ReactionType>,
    pub action: ReactionAction,
    /// False when the same reaction was already set; nothing is broadcast.
    pub changed: bool,
    pub stats: ReactionStats,
}

/// Statistics for one message: buckets in the fixed reaction order, empty
/// buckets left out, users in the order they settled on the type.
pub fn aggregate(rows: &[ReactionRow]) -> ReactionStats {
    let by_type: Vec<ReactionBucket> = ReactionType::ALL
        .into_iter()
        .filter_map(|reaction_type| {
            let users: Vec<ReactingUser> = rows
                .iter()
                .filter(|r| r.reaction_type == reaction_type)
                .map(|r| ReactingUser {
                    user_id: r.user_id,
                    username: r.username.clone(),
                })
                .collect();
            (!users.is_empty()).then(|| ReactionBucket {
                reaction_type,
                emoji: reaction_type.emoji().to_string(),
                count: users.len(),
                users,
            })
        })
        .collect();

    ReactionStats {
        total: by_type.iter().map(|b| b.count).sum(),
        by_type,
    }
}

impl ChatService {
    /// One reaction per user and message: a different type replaces the
    /// previous one.
    pub fn add_reaction(
        &self,
        actor: &Identity,
        message_id: Uuid,
        reaction_type: ReactionType,
    ) -> ChatResult<ReactionChange> {
        let me = actor.user_id;
        let (change, recipients) = self.inner.db.write(
            |tx| -> ChatResult<_> {
                let row = require_message(tx, message_id)?;
                require_access(tx, me, &row.conversation)?;

                let outcome =
                    reactions::upsert_reaction(tx, message_id, me, reaction_type, &timestamp_now())?;
                let (action, changed) = match outcome {
                    UpsertOutcome::Inserted => (ReactionAction::Added, true),
                    UpsertOutcome::Updated { .. } => (ReactionAction::Updated, true),
                    UpsertOutcome::Unchanged => (ReactionAction::Added, false),
                };

                let change = ReactionChange {
                    message_id,
                    conversation: row.conversation,
                    reaction_type: Some(reaction_type),
                    action,
                    changed,
                    stats: aggregate(&reactions::reactions_for_message(tx, message_id)?),
                };
                Ok((change, participants(tx, &row.conversation)?))
            },
            |_, (change, recipients)| self.publish_reaction(actor, change, recipients),
        )?;

        debug!(message = %message_id, reaction = %reaction_type, "Reaction {:?} ({} participants)", change.action, recipients.len());
        Ok(change)
    }

    /// Removing a reaction that does not exist is a `NotFound`.
    pub fn remove_reaction(&self, actor: &Identity, message_id: Uuid) -> ChatResult<ReactionChange> {
        let me = actor.user_id;
        let (change, _) = self.inner.db.write(
            |tx| -> ChatResult<_> {
                let row = require_message(tx, message_id)?;
                require_access(tx, me, &row.conversation)?;

                let removed = reactions::delete_reaction(tx, message_id, me)?
                    .ok_or(ChatError::NotFound("reaction"))?;
                let change = ReactionChange {
                    message_id,
                    conversation: row.conversation,
                    reaction_type: Some(removed),
                    action: ReactionAction::Removed,
                    changed: true,
                    stats: aggregate(&reactions::reactions_for_message(tx, message_id)?),
                };
                Ok((change, participants(tx, &row.conversation)?))
            },
            |_, (change, recipients)| self.publish_reaction(actor, change, recipients),
        )?;
        Ok(change)
    }

    pub fn reaction_stats(&self, actor: &Identity, message_id: Uuid) -> ChatResult<ReactionStats> {
        self.read(|conn| {
            let row = require_message(conn, message_id)?;
            require_access(conn, actor.user_id, &row.conversation)?;
            Ok(aggregate(&reactions::reactions_for_message(conn, message_id)?))
        })
    }

    fn publish_reaction(&self, actor: &Identity, change: &ReactionChange, recipients: &[Uuid]) {
        if !change.changed {
            return;
        }
        self.inner
            .caches
            .invalidate_for(&change.conversation, recipients);

        let emoji = match change.action {
            ReactionAction::Removed => None,
            _ => change.reaction_type.map(|r| r.emoji().to_string()),
        };
        self.inner.dispatcher.send_to_users(
            recipients,
            &ServerEvent::MessageReaction {
                message_id: change.message_id,
                conversation: change.conversation,
                user_id: actor.user_id,
                username: actor.username.clone(),
                reaction_type: change.reaction_type,
                emoji,
                action: change.action,
                stats: change.stats.clone(),
            },
            Some(actor.user_id),
        );
    }
}
