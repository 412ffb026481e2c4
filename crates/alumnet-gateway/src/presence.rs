use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use alumnet_types::events::ServerEvent;
use alumnet_types::models::PresenceStatus;

/// Last-activity bookkeeping. Online/offline itself is derived from the
/// connection registry; this only remembers when a user was last seen.
#[derive(Default)]
pub struct PresenceTracker {
    last_activity: DashMap<Uuid, DateTime<Utc>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh a user's last-activity timestamp and return it.
    pub fn touch(&self, user_id: Uuid) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_activity.insert(user_id, now);
        now
    }

    pub fn last_activity(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.last_activity.get(&user_id).map(|at| *at)
    }
}

pub fn status_event(
    user_id: Uuid,
    username: &str,
    status: PresenceStatus,
    last_activity: DateTime<Utc>,
) -> ServerEvent {
    ServerEvent::StatusUpdate {
        user_id,
        username: username.to_string(),
        status,
        last_activity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_moves_forward() {
        let tracker = PresenceTracker::new();
        let user = Uuid::new_v4();
        assert!(tracker.last_activity(user).is_none());

        let first = tracker.touch(user);
        let second = tracker.touch(user);
        assert!(second >= first);
        assert_eq!(tracker.last_activity(user), Some(second));
    }
}
