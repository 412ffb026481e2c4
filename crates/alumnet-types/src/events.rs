use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::ConversationKey;
use crate::models::{
    GroupSnapshot, MessagePayload, MessageRequestPayload, PresenceStatus, ReactionStats,
    ReactionType, RequestStatus,
};

/// Why a direct send was refused by the conversation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// The sender has blocked the receiver.
    YouBlocked,
    /// The receiver has blocked the sender.
    BlockedByThem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinAction {
    Pinned,
    Unpinned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Added,
    Updated,
    Removed,
}

/// Frames sent from the server to a client. Every id is serialized as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection authenticated and registered
    Ready { user_id: Uuid, username: String },

    /// Direct reply to the initiating connection
    Ack {
        request_id: Option<String>,
        action: String,
        data: serde_json::Value,
    },

    /// Direct rejection to the initiating connection; never broadcast
    Error {
        request_id: Option<String>,
        action: Option<String>,
        code: String,
        message: String,
        reason: Option<BlockReason>,
    },

    Pong { at: DateTime<Utc> },

    ChatMessage { message: MessagePayload },

    MessageRequest {
        request: MessageRequestPayload,
        status: RequestStatus,
    },

    MessageEdited {
        message_id: Uuid,
        conversation: ConversationKey,
        content: String,
        edited_at: DateTime<Utc>,
        edited_by: Uuid,
    },

    MessageDeleted {
        message_id: Uuid,
        conversation: ConversationKey,
        deleted_by: Uuid,
    },

    MessagePinned {
        message_id: Uuid,
        conversation: ConversationKey,
        is_pinned: bool,
        action: PinAction,
        by: Uuid,
    },

    MessageReaction {
        message_id: Uuid,
        conversation: ConversationKey,
        user_id: Uuid,
        username: String,
        reaction_type: Option<ReactionType>,
        emoji: Option<String>,
        action: ReactionAction,
        stats: ReactionStats,
    },

    /// A single message was read
    MessageReadUpdate {
        message_id: Uuid,
        conversation: ConversationKey,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },

    /// A private conversation was read in one batch
    MessagesRead {
        conversation: ConversationKey,
        reader_id: Uuid,
        count: u64,
    },

    /// A group conversation was read in one batch
    GroupMessagesRead {
        group_id: Uuid,
        reader_id: Uuid,
        count: u64,
    },

    UserTyping {
        conversation: ConversationKey,
        user_id: Uuid,
        username: String,
    },

    UserStopTyping {
        conversation: ConversationKey,
        user_id: Uuid,
        username: String,
    },

    /// A user came online or went offline
    StatusUpdate {
        user_id: Uuid,
        username: String,
        status: PresenceStatus,
        last_activity: DateTime<Utc>,
    },

    /// Unread badge change for one conversation
    NotificationUpdate {
        conversation: ConversationKey,
        delta: i64,
    },

    MentionNotification {
        message_id: Uuid,
        group_id: Uuid,
        group_name: String,
        mentioned_by: Uuid,
        mentioned_by_username: String,
        content: String,
    },

    GroupCreated { group: GroupSnapshot },

    /// Sent to a user who was just added to an existing group
    GroupAddedNotification { group: GroupSnapshot, added_by: Uuid },

    GroupMemberAdded {
        group_id: Uuid,
        user_id: Uuid,
        username: String,
        added_by: Uuid,
    },

    GroupMemberLeft {
        group_id: Uuid,
        user_id: Uuid,
        username: String,
        removed_by: Option<Uuid>,
    },

    /// Sent to a user who is no longer a member; the client drops the conversation
    GroupRemoved {
        group_id: Uuid,
        removed_by: Option<Uuid>,
    },

    GroupAdminChanged {
        group_id: Uuid,
        user_id: Uuid,
        is_admin: bool,
        changed_by: Option<Uuid>,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Ack { .. } => "ack",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
            Self::ChatMessage { .. } => "chat_message",
            Self::MessageRequest { .. } => "message_request",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::MessagePinned { .. } => "message_pinned",
            Self::MessageReaction { .. } => "message_reaction",
            Self::MessageReadUpdate { .. } => "message_read_update",
            Self::MessagesRead { .. } => "messages_read",
            Self::GroupMessagesRead { .. } => "group_messages_read",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::StatusUpdate { .. } => "status_update",
            Self::NotificationUpdate { .. } => "notification_update",
            Self::MentionNotification { .. } => "mention_notification",
            Self::GroupCreated { .. } => "group_created",
            Self::GroupAddedNotification { .. } => "group_added_notification",
            Self::GroupMemberAdded { .. } => "group_member_added",
            Self::GroupMemberLeft { .. } => "group_member_left",
            Self::GroupRemoved { .. } => "group_removed",
            Self::GroupAdminChanged { .. } => "group_admin_changed",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    SendMessage {
        receiver_id: Option<Uuid>,
        group_id: Option<Uuid>,
        #[serde(default, alias = "message")]
        content: String,
        reply_to: Option<Uuid>,
        #[serde(default)]
        attachment_ids: Vec<String>,
    },

    BumpMessage {
        message_id: Uuid,
        receiver_id: Option<Uuid>,
        group_id: Option<Uuid>,
    },

    ForwardMessage {
        message_id: Uuid,
        receiver_id: Option<Uuid>,
        group_id: Option<Uuid>,
    },

    AddReaction {
        message_id: Uuid,
        reaction_type: ReactionType,
    },

    RemoveReaction { message_id: Uuid },

    EditMessage { message_id: Uuid, content: String },

    DeleteMessage { message_id: Uuid },

    /// Toggles the pin state
    PinMessage { message_id: Uuid },

    /// Exactly one of the three fields selects what is marked read
    MarkAsRead {
        partner_id: Option<Uuid>,
        group_id: Option<Uuid>,
        message_id: Option<Uuid>,
    },

    Typing {
        receiver_id: Option<Uuid>,
        group_id: Option<Uuid>,
    },

    StopTyping {
        receiver_id: Option<Uuid>,
        group_id: Option<Uuid>,
    },

    /// Client heartbeat; refreshes last-activity
    Ping,
}

impl ClientAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::BumpMessage { .. } => "bump_message",
            Self::ForwardMessage { .. } => "forward_message",
            Self::AddReaction { .. } => "add_reaction",
            Self::RemoveReaction { .. } => "remove_reaction",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::PinMessage { .. } => "pin_message",
            Self::MarkAsRead { .. } => "mark_as_read",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::Ping => "ping",
        }
    }
}

/// One text frame from a client: an action plus an optional correlation id
/// echoed back in the `ack` / `error` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub action: ClientAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_message_frame_parses_with_request_id() {
        let receiver = Uuid::new_v4();
        let raw = json!({
            "action": "send_message",
            "request_id": "r-1",
            "receiver_id": receiver.to_string(),
            "message": "hello",
            "attachment_ids": ["blob-1"],
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.request_id.as_deref(), Some("r-1"));
        match frame.action {
            ClientAction::SendMessage {
                receiver_id,
                group_id,
                content,
                reply_to,
                attachment_ids,
            } => {
                assert_eq!(receiver_id, Some(receiver));
                assert_eq!(group_id, None);
                assert_eq!(content, "hello");
                assert_eq!(reply_to, None);
                assert_eq!(attachment_ids, vec!["blob-1".to_string()]);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        let raw = json!({ "action": "launch_rockets" });
        assert!(serde_json::from_value::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn ping_has_no_payload() {
        let frame: ClientFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(frame.action, ClientAction::Ping);
        assert_eq!(frame.action.name(), "ping");
    }

    #[test]
    fn server_events_carry_type_tag_and_string_ids() {
        let group_id = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let event = ServerEvent::GroupMessagesRead {
            group_id,
            reader_id: reader,
            count: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "group_messages_read");
        assert_eq!(value["type"], event.kind());
        assert_eq!(value["group_id"], json!(group_id.to_string()));
        assert!(value["reader_id"].is_string());
    }

    #[test]
    fn conversation_keys_serialize_as_strings() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let event = ServerEvent::NotificationUpdate {
            conversation: ConversationKey::direct(a, b),
            delta: -2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value["conversation"],
            json!(ConversationKey::direct(b, a).to_string())
        );
        let back: ServerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn block_reason_is_machine_readable() {
        assert_eq!(
            serde_json::to_value(BlockReason::BlockedByThem).unwrap(),
            json!("blocked_by_them")
        );
        assert_eq!(serde_json::to_value(BlockReason::YouBlocked).unwrap(), json!("you_blocked"));
    }
}
