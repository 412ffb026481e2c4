use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::ConversationKey;

/// Content stored on every bump message.
pub const BUMP_MARKER: &str = "[bump]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    /// Membership audit entry authored by the acting user.
    System,
    Bump,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
            Self::Bump => "bump",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "system" => Ok(Self::System),
            "bump" => Ok(Self::Bump),
            other => Err(format!("unknown message kind: {}", other)),
        }
    }
}

/// The fixed set of reactions a message accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    Like,
    Love,
    Laugh,
    Wow,
    Sad,
    Angry,
}

impl ReactionType {
    pub const ALL: [ReactionType; 6] = [
        Self::Like,
        Self::Love,
        Self::Laugh,
        Self::Wow,
        Self::Sad,
        Self::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Laugh => "laugh",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Like => "\u{1F44D}",
            Self::Love => "\u{2764}\u{FE0F}",
            Self::Laugh => "\u{1F602}",
            Self::Wow => "\u{1F62E}",
            Self::Sad => "\u{1F622}",
            Self::Angry => "\u{1F621}",
        }
    }
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown reaction type: {}", s))
    }
}

/// Reference to a file held by the external blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactingUser {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBucket {
    pub reaction_type: ReactionType,
    pub emoji: String,
    pub count: usize,
    /// Users in the order they reacted.
    pub users: Vec<ReactingUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionStats {
    pub total: usize,
    pub by_type: Vec<ReactionBucket>,
}

impl ReactionStats {
    pub fn count_of(&self, reaction_type: ReactionType) -> usize {
        self.by_type
            .iter()
            .find(|b| b.reaction_type == reaction_type)
            .map_or(0, |b| b.count)
    }
}

/// A message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub conversation: ConversationKey,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub receiver_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_pinned: bool,
    pub reply_to: Option<ReplyPreview>,
    pub forwarded_from: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<Uuid>,
    #[serde(default)]
    pub reactions: ReactionStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequestPayload {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// Everything a client needs to materialize a group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: Uuid,
    pub name: String,
    pub picture: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub members: Vec<GroupMember>,
}

impl GroupSnapshot {
    pub fn admin_ids(&self) -> Vec<Uuid> {
        self.members
            .iter()
            .filter(|m| m.is_admin)
            .map(|m| m.user_id)
            .collect()
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: ConversationKey,
    /// Display title: partner username or group name.
    pub title: String,
    pub partner_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub picture: Option<String>,
    pub last_message: Option<MessagePayload>,
    pub unread_count: u64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    pub total: u64,
    pub conversations: BTreeMap<String, u64>,
}

impl UnreadCounts {
    pub fn get(&self, key: &ConversationKey) -> u64 {
        self.conversations.get(&key.to_string()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_types_round_trip_through_names() {
        for r in ReactionType::ALL {
            assert_eq!(r.as_str().parse::<ReactionType>().unwrap(), r);
            assert_eq!(
                serde_json::to_value(r).unwrap(),
                serde_json::Value::String(r.as_str().to_string())
            );
        }
        assert!("thumbs".parse::<ReactionType>().is_err());
    }

    #[test]
    fn stats_count_of_missing_bucket_is_zero() {
        let stats = ReactionStats::default();
        assert_eq!(stats.count_of(ReactionType::Sad), 0);
    }
}
