use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use alumnet_types::events::ServerEvent;
use alumnet_types::models::PresenceStatus;

use crate::presence::{PresenceTracker, status_event};

/// Live sockets of one user, keyed by connection id.
struct UserSockets {
    username: String,
    sockets: HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>,
}

/// A freshly registered connection.
pub struct Registration {
    pub conn_id: Uuid,
    /// Targeted events for this connection.
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
    /// Replies (acks, errors, pongs) go straight into this connection's
    /// own queue so they are ordered with the targeted events.
    pub reply: mpsc::UnboundedSender<ServerEvent>,
    /// True if this connection took the user from offline to online.
    pub came_online: bool,
}

/// Connection registry and fan-out.
///
/// The registry maps each user to the set of their live connections. Every
/// presence transition happens while that user's map entry is held, so the
/// online/offline broadcasts for one user can never interleave out of order.
/// Presence is broadcast to every connected client; everything else is
/// delivered per user to each of their sockets.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Presence broadcasts; every connected client receives them
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// user_id -> live sockets
    users: DashMap<Uuid, UserSockets>,

    presence: PresenceTracker,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                users: DashMap::new(),
                presence: PresenceTracker::new(),
            }),
        }
    }

    /// Subscribe to presence broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Best effort: with no subscribers the event is dropped and connection
    /// accounting carries on regardless.
    fn broadcast(&self, event: ServerEvent) {
        if self.inner.broadcast_tx.send(event).is_err() {
            debug!("No presence subscribers, status update dropped");
        }
    }

    /// Add a connection for `user_id`. The first connection of a user flips
    /// them online and broadcasts the transition.
    pub fn register(&self, user_id: Uuid, username: &str) -> Registration {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let reply = tx.clone();
        let at = self.inner.presence.touch(user_id);

        let mut entry = self
            .inner
            .users
            .entry(user_id)
            .or_insert_with(|| UserSockets {
                username: username.to_string(),
                sockets: HashMap::new(),
            });
        let came_online = entry.sockets.is_empty();
        entry.username = username.to_string();
        entry.sockets.insert(conn_id, tx);

        if came_online {
            self.broadcast(status_event(user_id, username, PresenceStatus::Online, at));
        }
        drop(entry);

        Registration {
            conn_id,
            rx,
            reply,
            came_online,
        }
    }

    /// Remove one connection. Returns true if it was the user's last, in which
    /// case the offline transition has been broadcast. Otherwise only the
    /// last-activity timestamp moves.
    pub fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let at = self.inner.presence.touch(user_id);

        match self.inner.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().sockets.remove(&conn_id);
                if !entry.get().sockets.is_empty() {
                    return false;
                }
                self.broadcast(status_event(
                    user_id,
                    &entry.get().username,
                    PresenceStatus::Offline,
                    at,
                ));
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Heartbeat: refresh last-activity without touching presence.
    pub fn touch(&self, user_id: Uuid) -> DateTime<Utc> {
        self.inner.presence.touch(user_id)
    }

    pub fn last_activity(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.presence.last_activity(user_id)
    }

    /// Deliver an event to every socket of one user. Returns how many
    /// sockets accepted it.
    pub fn send_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        let Some(entry) = self.inner.users.get(&user_id) else {
            return 0;
        };
        entry
            .sockets
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Deliver one event to several users, skipping `exclude`.
    pub fn send_to_users(&self, user_ids: &[Uuid], event: &ServerEvent, exclude: Option<Uuid>) {
        for &user_id in user_ids {
            if Some(user_id) == exclude {
                continue;
            }
            self.send_to_user(user_id, event.clone());
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.users.contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .users
            .get(&user_id)
            .map_or(0, |entry| entry.sockets.len())
    }

    /// Online users with their last activity.
    pub fn online_users(&self) -> Vec<(Uuid, String, DateTime<Utc>)> {
        let snapshot: Vec<(Uuid, String)> = self
            .inner
            .users
            .iter()
            .map(|entry| (*entry.key(), entry.username.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(id, name)| {
                let at = self.last_activity(id).unwrap_or_else(Utc::now);
                (id, name, at)
            })
            .collect()
    }
}
