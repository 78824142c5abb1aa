//! Redis Pub/Sub sink for campaign events.
//!
//! Every [`CampaignEvent`] is published as JSON on one channel so that any
//! number of dashboards or relays can follow campaign progress.

use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::PubsubInterface;
use herald_common::{AppError, AppResult};
use herald_core::{CampaignEvent, CampaignEventPublisher};
use tracing::debug;

/// Channel name for campaign events under `prefix`.
#[must_use]
pub fn campaign_channel(prefix: &str) -> String {
    format!("{prefix}:events:campaigns")
}

/// Publishes campaign events to Redis.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Arc<RedisClient>,
    channel: String,
}

impl RedisPubSub {
    /// Create a publisher for the channel under `prefix`.
    #[must_use]
    pub fn new(publisher: Arc<RedisClient>, prefix: &str) -> Self {
        Self {
            publisher,
            channel: campaign_channel(prefix),
        }
    }

    /// The channel events are published on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl CampaignEventPublisher for RedisPubSub {
    async fn publish(&self, event: CampaignEvent) -> AppResult<()> {
        let payload = serde_json::to_string(&event)
            .map_err(|e| AppError::Internal(format!("Serialization error: {e}")))?;
        let receivers: i64 = self
            .publisher
            .publish(self.channel.as_str(), payload)
            .await?;
        debug!(
            channel = %self.channel,
            campaign_id = %event.campaign_id(),
            receivers,
            "Published campaign event"
        );
        Ok(())
    }
}
