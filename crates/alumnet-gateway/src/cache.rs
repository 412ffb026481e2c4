use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use alumnet_types::ids::ConversationKey;
use alumnet_types::models::{ConversationSummary, MessagePayload, UnreadCounts};

/// Read-through cache with a fixed time-to-live.
///
/// Entries exist for latency only. Writers invalidate the affected keys
/// explicitly; the TTL is a backstop, not the convergence mechanism.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: DashMap<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let hit = {
            let entry = self.entries.get(key)?;
            let (stored_at, value) = entry.value();
            (stored_at.elapsed() < self.ttl).then(|| value.clone())
        };
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    pub fn insert(&self, key: String, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Serve `key` from the cache, or compute it with `load` and store the
    /// result. Errors are not cached.
    pub fn get_or_try_insert_with<E, F>(&self, key: String, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = load()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn conversation_list_key(user_id: Uuid) -> String {
    format!("conversation_list:{}", user_id)
}

pub fn messages_key(conversation: &ConversationKey) -> String {
    format!("messages:{}", conversation)
}

pub fn unread_counts_key(user_id: Uuid) -> String {
    format!("unread_counts:{}", user_id)
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub conversation_list_ttl: Duration,
    pub messages_ttl: Duration,
    pub unread_counts_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            conversation_list_ttl: Duration::from_secs(10),
            messages_ttl: Duration::from_secs(30),
            unread_counts_ttl: Duration::from_secs(30),
        }
    }
}

/// The three read caches of the messaging core.
pub struct Caches {
    pub conversation_lists: TtlCache<Vec<ConversationSummary>>,
    pub messages: TtlCache<Vec<MessagePayload>>,
    pub unread_counts: TtlCache<UnreadCounts>,
}

impl Caches {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            conversation_lists: TtlCache::new(config.conversation_list_ttl),
            messages: TtlCache::new(config.messages_ttl),
            unread_counts: TtlCache::new(config.unread_counts_ttl),
        }
    }

    /// Drop a user's conversation list and unread counts.
    pub fn invalidate_user(&self, user_id: Uuid) {
        self.conversation_lists
            .invalidate(&conversation_list_key(user_id));
        self.unread_counts.invalidate(&unread_counts_key(user_id));
    }

    pub fn invalidate_conversation(&self, conversation: &ConversationKey) {
        self.messages.invalidate(&messages_key(conversation));
    }

    /// A conversation changed: its message page and the lists of everyone in it.
    pub fn invalidate_for(&self, conversation: &ConversationKey, users: &[Uuid]) {
        self.invalidate_conversation(conversation);
        for &user_id in users {
            self.invalidate_user(user_id);
        }
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
