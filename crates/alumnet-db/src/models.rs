/// Database row types. These map directly to SQLite rows.
/// Distinct from alumnet-types wire payloads to keep the DB layer independent.
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use uuid::Uuid;

use alumnet_types::ids::ConversationKey;
use alumnet_types::models::{MessageKind, ReactionType};

pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

pub struct MessageRequestRow {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
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
    pub reply_to_id: Option<Uuid>,
    pub forwarded_from_id: Option<Uuid>,
}

/// Insert parameters for a message.
pub struct NewMessage<'a> {
    pub id: Uuid,
    pub conversation: ConversationKey,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub content: &'a str,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<Uuid>,
    pub forwarded_from_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub reaction_type: ReactionType,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub picture: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GroupMemberRow {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub id: String,
    pub uploader_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub url: Option<String>,
}

/// Current time truncated to what the store keeps (milliseconds), so a value
/// handed to clients equals the value read back later.
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime('now') shape: "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
}
