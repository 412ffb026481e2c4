use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use alumnet_types::events::ServerEvent;
use alumnet_types::ids::ConversationKey;

use crate::dispatcher::Dispatcher;

const MAX_ATTEMPTS: u32 = 3;
const FIRST_BACKOFF: Duration = Duration::from_millis(50);

/// Per-user unread badge counters kept outside the messaging core.
#[async_trait]
pub trait BadgeService: Send + Sync + 'static {
    async fn adjust_unread(
        &self,
        user_id: Uuid,
        conversation: ConversationKey,
        delta: i64,
    ) -> Result<()>;
}

/// Pushes badge changes to the user's own sockets as `notification_update`.
pub struct GatewayBadges {
    dispatcher: Dispatcher,
}

impl GatewayBadges {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl BadgeService for GatewayBadges {
    async fn adjust_unread(
        &self,
        user_id: Uuid,
        conversation: ConversationKey,
        delta: i64,
    ) -> Result<()> {
        self.dispatcher
            .send_to_user(user_id, ServerEvent::NotificationUpdate { conversation, delta });
        Ok(())
    }
}

#[derive(Serialize)]
struct BadgeUpdate {
    user_id: Uuid,
    conversation: ConversationKey,
    delta: i64,
}

/// Posts badge changes to an external notification service.
pub struct WebhookBadges {
    client: reqwest::Client,
    url: String,
}

impl WebhookBadges {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BadgeService for WebhookBadges {
    async fn adjust_unread(
        &self,
        user_id: Uuid,
        conversation: ConversationKey,
        delta: i64,
    ) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&BadgeUpdate {
                user_id,
                conversation,
                delta,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("badge service returned {}", resp.status());
        }
        Ok(())
    }
}

/// Fire a badge change as a best-effort background task: a few attempts with
/// doubling backoff, then the update is dropped with a warning. The caller's
/// write has already committed and never waits on this.
pub fn spawn_adjust(
    badges: &Arc<dyn BadgeService>,
    user_id: Uuid,
    conversation: ConversationKey,
    delta: i64,
) {
    if delta == 0 {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(%user_id, delta, "No runtime for badge update, dropped");
        return;
    };

    let badges = Arc::clone(badges);
    runtime.spawn(async move {
        let mut backoff = FIRST_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            match badges.adjust_unread(user_id, conversation, delta).await {
                Ok(()) => return,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    debug!(%user_id, attempt, "Badge update failed: {}, retrying", e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    warn!(
                        %user_id, %conversation, delta,
                        "Badge update dropped after {} attempts: {}", MAX_ATTEMPTS, e
                    );
                }
            }
        }
    });
}
