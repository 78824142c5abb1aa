//! Campaign event publisher.
//!
//! Status, progress and completion events are fire-and-forget. The Redis
//! implementation lives in the queue crate; the channel implementation here
//! is for embedding and tests.

use async_trait::async_trait;
use herald_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::{CampaignStatus, Progress};

/// Events published while campaigns run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CampaignEvent {
    /// Campaign status changed.
    #[serde(rename = "campaign-status-update")]
    StatusUpdate {
        campaign_id: String,
        status: CampaignStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<Progress>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// One contact of a dispatch pass was processed.
    #[serde(rename = "campaign-progress-update")]
    ProgressUpdate {
        campaign_id: String,
        progress: Progress,
        /// 1-based position of the contact just processed.
        current_index: u32,
        total_contacts: u32,
    },
    /// A dispatch pass finished.
    #[serde(rename = "campaign-completed")]
    Completed {
        campaign_id: String,
        progress: Progress,
    },
}

impl CampaignEvent {
    /// Campaign the event belongs to.
    #[must_use]
    pub fn campaign_id(&self) -> &str {
        match self {
            Self::StatusUpdate { campaign_id, .. }
            | Self::ProgressUpdate { campaign_id, .. }
            | Self::Completed { campaign_id, .. } => campaign_id,
        }
    }
}

/// Trait for publishing campaign events.
#[async_trait]
pub trait CampaignEventPublisher: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: CampaignEvent) -> AppResult<()>;
}

/// No-op event publisher for when no sink is configured.
pub struct NoOpEventPublisher;

#[async_trait]
impl CampaignEventPublisher for NoOpEventPublisher {
    async fn publish(&self, _event: CampaignEvent) -> AppResult<()> {
        Ok(())
    }
}

/// Publisher that forwards events into an unbounded channel.
#[derive(Clone)]
pub struct ChannelEventPublisher {
    tx: mpsc::UnboundedSender<CampaignEvent>,
}

impl ChannelEventPublisher {
    /// Create a publisher and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CampaignEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CampaignEventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: CampaignEvent) -> AppResult<()> {
        self.tx
            .send(event)
            .map_err(|_| AppError::Internal("Event receiver dropped".to_string()))
    }
}

/// Wrapper for boxed `CampaignEventPublisher` trait object.
pub type EventPublisherService = Arc<dyn CampaignEventPublisher>;

/// Publish without propagating failures.
pub async fn emit(publisher: &dyn CampaignEventPublisher, event: CampaignEvent) {
    if let Err(e) = publisher.publish(event).await {
        tracing::warn!(error = %e, "Failed to publish campaign event");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_event_wire_format() {
        let event = CampaignEvent::ProgressUpdate {
            campaign_id: "camp1".to_string(),
            progress: Progress::starting(3),
            current_index: 1,
            total_contacts: 3,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "campaign-progress-update");
        assert_eq!(value["campaignId"], "camp1");
        assert_eq!(value["currentIndex"], 1);
        assert_eq!(value["totalContacts"], 3);
        assert_eq!(value["progress"]["total"], 3);
    }

    #[test]
    fn test_status_event_omits_empty_fields() {
        let event = CampaignEvent::StatusUpdate {
            campaign_id: "camp1".to_string(),
            status: CampaignStatus::Sending,
            progress: None,
            error: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "campaign-status-update", "campaignId": "camp1", "status": "sending"})
        );
    }

    #[tokio::test]
    async fn test_channel_publisher() {
        let (publisher, mut rx) = ChannelEventPublisher::new();
        let event = CampaignEvent::Completed {
            campaign_id: "camp1".to_string(),
            progress: Progress::default(),
        };

        publisher.publish(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_emit_swallows_errors() {
        let (publisher, rx) = ChannelEventPublisher::new();
        drop(rx);

        emit(
            &publisher,
            CampaignEvent::Completed {
                campaign_id: "camp1".to_string(),
                progress: Progress::default(),
            },
        )
        .await;
    }
}
