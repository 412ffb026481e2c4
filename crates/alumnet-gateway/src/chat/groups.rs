//! Group membership. Every change except an admin-role change leaves a
//! system message authored by the actor, so the history doubles as an audit
//! trail.

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use alumnet_db::models::{NewMessage, timestamp_now};
use alumnet_db::queries::{groups, messages, users};
use alumnet_types::api::Identity;
use alumnet_types::events::ServerEvent;
use alumnet_types::ids::ConversationKey;
use alumnet_types::models::{GroupSnapshot, MessageKind, MessagePayload};

use super::payload::{group_snapshot, hydrate_one};
use super::{
    ChatError, ChatResult, ChatService, MAX_GROUP_NAME_CHARS, require_admin, require_member,
    require_message, require_user,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LeaveOutcome {
    /// The group lives on. `promoted` is set when the leaver was the last
    /// admin and the longest-standing member took over.
    Left { promoted: Option<Uuid> },
    /// The leaver was the last member.
    GroupDeleted,
}

fn insert_system_message(
    conn: &Connection,
    group_id: Uuid,
    author: Uuid,
    content: &str,
) -> ChatResult<MessagePayload> {
    let id = Uuid::new_v4();
    messages::insert_message(
        conn,
        &NewMessage {
            id,
            conversation: ConversationKey::Group(group_id),
            sender_id: author,
            receiver_id: None,
            group_id: Some(group_id),
            content,
            kind: MessageKind::System,
            created_at: timestamp_now(),
            reply_to_id: None,
            forwarded_from_id: None,
        },
    )?;
    Ok(hydrate_one(conn, require_message(conn, id)?)?)
}

fn require_snapshot(conn: &Connection, group_id: Uuid) -> ChatResult<GroupSnapshot> {
    group_snapshot(conn, group_id)?.ok_or(ChatError::NotFound("group"))
}

fn validate_name(name: &str) -> ChatResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("group name is required"));
    }
    if name.chars().count() > MAX_GROUP_NAME_CHARS {
        return Err(ChatError::validation(format!(
            "group name exceeds {} characters",
            MAX_GROUP_NAME_CHARS
        )));
    }
    Ok(name)
}

impl ChatService {
    /// The creator becomes the first admin. Initial members must be known
    /// users; duplicates and the creator are ignored.
    pub fn create_group(
        &self,
        actor: &Identity,
        name: &str,
        picture: Option<&str>,
        member_ids: &[Uuid],
    ) -> ChatResult<GroupSnapshot> {
        let name = validate_name(name)?;
        let me = actor.user_id;
        let group_id = Uuid::new_v4();

        let mut invited: Vec<Uuid> = Vec::with_capacity(member_ids.len());
        for &id in member_ids {
            if id != me && !invited.contains(&id) {
                invited.push(id);
            }
        }

        let (group, _) = self.inner.db.write(
            |tx| -> ChatResult<_> {
                for &id in &invited {
                    require_user(tx, id)?;
                }
                let now = timestamp_now();
                groups::insert_group(tx, group_id, name, picture, me, &now)?;
                groups::add_member(tx, group_id, me, true, &now)?;
                for &id in &invited {
                    groups::add_member(tx, group_id, id, false, &now)?;
                }

                let note = format!("{} created the group \"{}\"", actor.username, name);
                let system = insert_system_message(tx, group_id, me, &note)?;
                Ok((require_snapshot(tx, group_id)?, system))
            },
            |_, (group, system)| {
                let members: Vec<Uuid> = group.members.iter().map(|m| m.user_id).collect();
                self.inner.dispatcher.send_to_users(
                    &members,
                    &ServerEvent::GroupCreated {
                        group: group.clone(),
                    },
                    Some(me),
                );
                self.publish_message(me, system, &members);
            },
        )?;

        info!(group = %group_id, "{} created group {} with {} members", actor.username, name, group.members.len());
        Ok(group)
    }

    /// Admin-only. The new member receives the full snapshot; everyone else
    /// learns about the addition.
    pub fn add_member(
        &self,
        actor: &Identity,
        group_id: Uuid,
        user_id: Uuid,
    ) -> ChatResult<GroupSnapshot> {
        let me = actor.user_id;
        let (group, added_name, _) = self.inner.db.write(
            |tx| {
                require_admin(tx, group_id, me)?;
                let added_name = require_user(tx, user_id)?;
                if !groups::add_member(tx, group_id, user_id, false, &timestamp_now())? {
                    return Err(ChatError::conflict(format!(
                        "{} is already a member",
                        added_name
                    )));
                }

                let note = format!("{} added {}", actor.username, added_name);
                let system = insert_system_message(tx, group_id, me, &note)?;
                Ok((require_snapshot(tx, group_id)?, added_name, system))
            },
            |_, (group, added_name, system)| {
                let d = &self.inner.dispatcher;
                let members: Vec<Uuid> = group.members.iter().map(|m| m.user_id).collect();

                d.send_to_user(
                    user_id,
                    ServerEvent::GroupAddedNotification {
                        group: group.clone(),
                        added_by: me,
                    },
                );
                let others: Vec<Uuid> = members.iter().copied().filter(|&u| u != user_id).collect();
                d.send_to_users(
                    &others,
                    &ServerEvent::GroupMemberAdded {
                        group_id,
                        user_id,
                        username: added_name.clone(),
                        added_by: me,
                    },
                    Some(me),
                );
                self.publish_message(me, system, &members);
            },
        )?;

        info!(group = %group_id, "{} added {}", actor.username, added_name);
        Ok(group)
    }

    /// Admin-only. Removing yourself goes through `leave_group`.
    pub fn remove_member(&self, actor: &Identity, group_id: Uuid, user_id: Uuid) -> ChatResult<()> {
        let me = actor.user_id;
        if user_id == me {
            return Err(ChatError::validation("use leave to remove yourself"));
        }

        let removed_name = self.inner.db.write(
            |tx| {
                require_admin(tx, group_id, me)?;
                if groups::remove_member(tx, group_id, user_id)?.is_none() {
                    return Err(ChatError::NotFound("member"));
                }
                let removed_name =
                    users::username_of(tx, user_id)?.unwrap_or_else(|| user_id.to_string());

                let note = format!("{} removed {}", actor.username, removed_name);
                let system = insert_system_message(tx, group_id, me, &note)?;
                let remaining = groups::member_ids(tx, group_id)?;
                Ok((removed_name, system, remaining))
            },
            |_, (removed_name, system, remaining)| {
                let d = &self.inner.dispatcher;
                let conversation = ConversationKey::Group(group_id);
                self.inner.caches.invalidate_for(&conversation, &[user_id]);

                d.send_to_user(
                    user_id,
                    ServerEvent::GroupRemoved {
                        group_id,
                        removed_by: Some(me),
                    },
                );
                d.send_to_users(
                    remaining,
                    &ServerEvent::GroupMemberLeft {
                        group_id,
                        user_id,
                        username: removed_name.clone(),
                        removed_by: Some(me),
                    },
                    Some(me),
                );
                self.publish_message(me, system, remaining);
            },
        )?
        .0;

        info!(group = %group_id, "{} removed {}", actor.username, removed_name);
        Ok(())
    }

    /// Self-service for any member. The last admin leaving hands the role to
    /// the longest-standing member; the last member leaving deletes the group.
    pub fn leave_group(&self, actor: &Identity, group_id: Uuid) -> ChatResult<LeaveOutcome> {
        let me = actor.user_id;
        let (outcome, _, _) = self.inner.db.write(
            |tx| -> ChatResult<_> {
                require_member(tx, group_id, me)?;
                let was_admin = groups::remove_member(tx, group_id, me)?.unwrap_or(false);

                let remaining = groups::member_ids(tx, group_id)?;
                if remaining.is_empty() {
                    groups::delete_group(tx, group_id)?;
                    return Ok((LeaveOutcome::GroupDeleted, None, remaining));
                }

                let promoted = if was_admin && groups::admin_count(tx, group_id)? == 0 {
                    let heir = groups::oldest_member(tx, group_id)?;
                    if let Some(heir) = heir {
                        groups::set_admin(tx, group_id, heir, true)?;
                    }
                    heir
                } else {
                    None
                };

                let note = format!("{} left the group", actor.username);
                let system = insert_system_message(tx, group_id, me, &note)?;
                Ok((LeaveOutcome::Left { promoted }, Some(system), remaining))
            },
            |_, (outcome, system, remaining)| {
                let d = &self.inner.dispatcher;
                let conversation = ConversationKey::Group(group_id);
                self.inner.caches.invalidate_for(&conversation, &[me]);
                self.inner.caches.invalidate_for(&conversation, remaining);

                d.send_to_user(
                    me,
                    ServerEvent::GroupRemoved {
                        group_id,
                        removed_by: None,
                    },
                );
                d.send_to_users(
                    remaining,
                    &ServerEvent::GroupMemberLeft {
                        group_id,
                        user_id: me,
                        username: actor.username.clone(),
                        removed_by: None,
                    },
                    None,
                );
                if let Some(system) = system {
                    self.publish_message(me, system, remaining);
                }
                if let LeaveOutcome::Left {
                    promoted: Some(heir),
                } = *outcome
                {
                    d.send_to_users(
                        remaining,
                        &ServerEvent::GroupAdminChanged {
                            group_id,
                            user_id: heir,
                            is_admin: true,
                            changed_by: None,
                        },
                        None,
                    );
                }
            },
        )?;

        info!(group = %group_id, "{} left ({:?})", actor.username, outcome);
        Ok(outcome)
    }

    /// Admin-only promote/demote. Returns false when the role already had the
    /// requested value. Demoting the last admin is refused.
    pub fn set_admin(
        &self,
        actor: &Identity,
        group_id: Uuid,
        user_id: Uuid,
        is_admin: bool,
    ) -> ChatResult<bool> {
        let me = actor.user_id;
        let (changed, _) = self.inner.db.write(
            |tx| {
                require_admin(tx, group_id, me)?;
                let current = groups::membership(tx, group_id, user_id)?
                    .ok_or(ChatError::NotFound("member"))?;
                if current == is_admin {
                    return Ok((false, vec![]));
                }
                if !is_admin && groups::admin_count(tx, group_id)? <= 1 {
                    return Err(ChatError::conflict("a group needs at least one admin"));
                }
                groups::set_admin(tx, group_id, user_id, is_admin)?;
                Ok((true, groups::member_ids(tx, group_id)?))
            },
            |_, (changed, members)| {
                if !*changed {
                    return;
                }
                self.inner.dispatcher.send_to_users(
                    members,
                    &ServerEvent::GroupAdminChanged {
                        group_id,
                        user_id,
                        is_admin,
                        changed_by: Some(me),
                    },
                    Some(me),
                );
            },
        )?;

        if changed {
            info!(group = %group_id, %user_id, is_admin, "Admin role changed by {}", actor.username);
        }
        Ok(changed)
    }

    /// Members only.
    pub fn group_snapshot(&self, actor: &Identity, group_id: Uuid) -> ChatResult<GroupSnapshot> {
        self.read(|conn| {
            require_member(conn, group_id, actor.user_id)?;
            require_snapshot(conn, group_id)
        })
    }
}
