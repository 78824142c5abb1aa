//! Status ingestion.
//!
//! Folds delivery receipts back into message state and campaign counters.
//! Receipts for one campaign are applied one at a time; counters move
//! through the store's atomic transfer so concurrent dispatch writes are
//! never lost.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use herald_common::AppResult;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::MessageStatus;
use crate::store::{CampaignStoreService, MessageStoreService};

/// One delivery receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub provider_message_id: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// What happened to a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Message status changed and counters moved.
    Applied {
        campaign_id: String,
        from: MessageStatus,
        to: MessageStatus,
    },
    /// Status was already current; nothing but first-seen timestamps changed.
    Unchanged,
    /// No message carries this provider ID.
    UnknownMessage,
    /// The message's campaign no longer exists.
    UnknownCampaign,
}

/// Applies receipts to stored messages and campaign progress.
#[derive(Clone)]
pub struct StatusIngestion {
    campaigns: CampaignStoreService,
    messages: MessageStoreService,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl StatusIngestion {
    /// Create a new ingestion service.
    #[must_use]
    pub fn new(campaigns: CampaignStoreService, messages: MessageStoreService) -> Self {
        Self {
            campaigns,
            messages,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn campaign_lock(&self, campaign_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(campaign_id.to_string())
            .or_default()
            .clone()
    }

    fn release_lock(&self, campaign_id: &str) {
        self.locks
            .remove_if(campaign_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Apply one receipt.
    pub async fn ingest(&self, event: &StatusEvent) -> AppResult<IngestOutcome> {
        let Some(message) = self
            .messages
            .find_by_provider_message_id(&event.provider_message_id)
            .await?
        else {
            debug!(provider_message_id = %event.provider_message_id, "Receipt for unknown message");
            return Ok(IngestOutcome::UnknownMessage);
        };

        let campaign_id = message.campaign_id.clone();
        let lock = self.campaign_lock(&campaign_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.apply_locked(event).await
        };
        drop(lock);
        self.release_lock(&campaign_id);

        outcome
    }

    async fn apply_locked(&self, event: &StatusEvent) -> AppResult<IngestOutcome> {
        // Re-read under the lock: a concurrent receipt may have moved it
        let Some(mut message) = self
            .messages
            .find_by_provider_message_id(&event.provider_message_id)
            .await?
        else {
            return Ok(IngestOutcome::UnknownMessage);
        };

        if self.campaigns.find_campaign(&message.campaign_id).await?.is_none() {
            warn!(
                message_id = %message.id,
                campaign_id = %message.campaign_id,
                "Receipt for message of a deleted campaign"
            );
            return Ok(IngestOutcome::UnknownCampaign);
        }

        let before = message.clone();
        let from = message.apply_receipt(event.status, event.timestamp, event.error.clone());
        let to = message.status();

        if message != before {
            self.messages.update_message(&message).await?;
        }

        if from == to {
            return Ok(IngestOutcome::Unchanged);
        }

        let progress = self
            .campaigns
            .transfer_progress(&message.campaign_id, from, to)
            .await?;
        info!(
            message_id = %message.id,
            campaign_id = %message.campaign_id,
            from = ?from,
            to = ?to,
            delivered = progress.delivered,
            read = progress.read,
            "Message status updated"
        );

        Ok(IngestOutcome::Applied {
            campaign_id: message.campaign_id,
            from,
            to,
        })
    }

    /// Apply a batch, logging and skipping receipts that error.
    ///
    /// Returns how many receipts changed a message status.
    pub async fn ingest_all(&self, events: &[StatusEvent]) -> usize {
        let mut applied = 0;
        for event in events {
            match self.ingest(event).await {
                Ok(IngestOutcome::Applied { .. }) => applied += 1,
                Ok(_) => {}
                Err(e) => warn!(
                    provider_message_id = %event.provider_message_id,
                    error = %e,
                    "Failed to apply receipt"
                ),
            }
        }
        applied
    }
}
