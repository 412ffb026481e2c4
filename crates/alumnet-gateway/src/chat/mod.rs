//! The messaging core. Every mutating operation is one store transaction;
//! cache invalidation and fan-out run in the commit hook, while the store is
//! still held, so what a participant observes for one conversation follows
//! commit order.

mod error;
mod gate;
mod groups;
mod mentions;
mod messages;
mod payload;
mod queries;
mod reactions;
mod receipts;

use std::sync::Arc;

use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use alumnet_db::Database;
use alumnet_db::models::MessageRow;
use alumnet_db::queries::{groups as group_rows, messages as message_rows, users as user_rows};
use alumnet_types::api::Identity;
use alumnet_types::ids::ConversationKey;

use crate::blobs::{BlobStore, DbBlobStore};
use crate::cache::{CacheConfig, Caches};
use crate::dispatcher::Dispatcher;
use crate::notify::{self, BadgeService, GatewayBadges};

pub use error::{ChatError, ChatResult};
pub use gate::GateState;
pub use groups::LeaveOutcome;
pub use mentions::extract_mentions;
pub use messages::{Deleted, Draft, PinOutcome, SendOutcome};
pub use queries::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use reactions::{ReactionChange, aggregate};

pub const MAX_CONTENT_CHARS: usize = 5000;
pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_GROUP_NAME_CHARS: usize = 100;

#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    caches: Caches,
    badges: Arc<dyn BadgeService>,
    blobs: Arc<dyn BlobStore>,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        caches: Caches,
        badges: Arc<dyn BadgeService>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                dispatcher,
                caches,
                badges,
                blobs,
            }),
        }
    }

    /// In-process badge pushes and the metadata-table blob store.
    pub fn with_defaults(db: Arc<Database>, dispatcher: Dispatcher, cache: CacheConfig) -> Self {
        let badges = Arc::new(GatewayBadges::new(dispatcher.clone()));
        let blobs = Arc::new(DbBlobStore::new(db.clone()));
        Self::new(db, dispatcher, Caches::new(cache), badges, blobs)
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    /// Mirror a verified identity so usernames resolve locally.
    pub fn register_identity(&self, identity: &Identity) -> ChatResult<()> {
        self.inner
            .db
            .upsert_user(identity.user_id, &identity.username, &identity.display_name)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> ChatResult<T>) -> ChatResult<T> {
        self.inner.db.with_conn(f)
    }

    fn adjust_badge(&self, user_id: Uuid, conversation: ConversationKey, delta: i64) {
        notify::spawn_adjust(&self.inner.badges, user_id, conversation, delta);
    }
}

/// Logged for audit before it goes back to the caller.
fn denied(actor: Uuid, msg: &str) -> ChatError {
    warn!(%actor, "Permission denied: {}", msg);
    ChatError::permission(msg)
}

/// A user the store has seen authenticate. Returns their username.
fn require_user(conn: &Connection, id: Uuid) -> ChatResult<String> {
    user_rows::username_of(conn, id)?.ok_or(ChatError::NotFound("user"))
}

fn require_message(conn: &Connection, id: Uuid) -> ChatResult<MessageRow> {
    message_rows::get_message(conn, id)?.ok_or(ChatError::NotFound("message"))
}

/// Membership check. Returns whether the member is an admin.
fn require_member(conn: &Connection, group_id: Uuid, actor: Uuid) -> ChatResult<bool> {
    if group_rows::get_group(conn, group_id)?.is_none() {
        return Err(ChatError::NotFound("group"));
    }
    group_rows::membership(conn, group_id, actor)?
        .ok_or_else(|| denied(actor, "not a member of this group"))
}

fn require_admin(conn: &Connection, group_id: Uuid, actor: Uuid) -> ChatResult<()> {
    if require_member(conn, group_id, actor)? {
        Ok(())
    } else {
        Err(denied(actor, "only group admins can do this"))
    }
}

/// Participant of a private pair, or current member of a group. Re-read on
/// every call; membership changes between calls.
fn require_access(conn: &Connection, actor: Uuid, conversation: &ConversationKey) -> ChatResult<()> {
    match *conversation {
        ConversationKey::Direct(a, b) if actor == a || actor == b => Ok(()),
        ConversationKey::Direct(..) => Err(denied(actor, "not a participant of this conversation")),
        ConversationKey::Group(group_id) => require_member(conn, group_id, actor).map(|_| ()),
    }
}

/// Everyone who sees a conversation.
fn participants(conn: &Connection, conversation: &ConversationKey) -> ChatResult<Vec<Uuid>> {
    Ok(match *conversation {
        ConversationKey::Direct(a, b) => vec![a, b],
        ConversationKey::Group(group_id) => group_rows::member_ids(conn, group_id)?,
    })
}

fn validate_content(content: &str, attachments: usize) -> ChatResult<()> {
    if content.trim().is_empty() && attachments == 0 {
        return Err(ChatError::validation(
            "message must have content or at least one attachment",
        ));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::validation(format!(
            "message exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    if attachments > MAX_ATTACHMENTS {
        return Err(ChatError::validation(format!(
            "at most {} attachments per message",
            MAX_ATTACHMENTS
        )));
    }
    Ok(())
}
