//! Campaign control commands.
//!
//! Everything an operator can do to a campaign's lifecycle goes through
//! [`CampaignScheduler`]: queueing it, cancelling, rescheduling, pausing
//! and resuming. Pause and cancel only change the stored status; a pass
//! that is already running is not interrupted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use herald_core::services::event_publisher::{CampaignEvent, EventPublisherService, emit};
use herald_core::{Campaign, CampaignStatus, CampaignStoreService};
use tracing::{debug, info, instrument, warn};

use crate::queue::CampaignQueue;

/// Operator-facing campaign lifecycle commands.
#[derive(Clone)]
pub struct CampaignScheduler {
    campaigns: CampaignStoreService,
    queue: Arc<CampaignQueue>,
    events: EventPublisherService,
}

impl CampaignScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub fn new(
        campaigns: CampaignStoreService,
        queue: Arc<CampaignQueue>,
        events: EventPublisherService,
    ) -> Self {
        Self {
            campaigns,
            queue,
            events,
        }
    }

    async fn load(&self, campaign_id: &str) -> AppResult<Campaign> {
        self.campaigns
            .find_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::CampaignNotFound(campaign_id.to_string()))
    }

    async fn announce(&self, campaign: &Campaign) {
        emit(
            self.events.as_ref(),
            CampaignEvent::StatusUpdate {
                campaign_id: campaign.id.clone(),
                status: campaign.status,
                progress: Some(campaign.progress),
                error: None,
            },
        )
        .await;
    }

    /// Queue a scheduled campaign to run at its `scheduled_at` and record the job.
    #[instrument(skip(self))]
    pub async fn schedule(&self, campaign_id: &str) -> AppResult<Campaign> {
        let mut campaign = self.load(campaign_id).await?;
        if campaign.status != CampaignStatus::Scheduled {
            return Err(AppError::BadRequest(format!(
                "Only scheduled campaigns can be queued, campaign is {}",
                campaign.status
            )));
        }

        let job_id = self.queue.enqueue(&campaign.id, campaign.scheduled_at).await?;
        self.campaigns.set_job_id(&campaign.id, Some(&job_id)).await?;
        campaign.job_id = Some(job_id);
        Ok(campaign)
    }

    /// Cancel a campaign and drop its job if it has not started.
    #[instrument(skip(self))]
    pub async fn cancel(&self, campaign_id: &str) -> AppResult<Campaign> {
        let campaign = self.load(campaign_id).await?;
        let Some(job_id) = campaign.job_id.clone() else {
            return Err(AppError::BadRequest(format!(
                "Campaign {campaign_id} has no scheduled job"
            )));
        };

        let cancelled = self
            .campaigns
            .transition_status(
                &campaign.id,
                &CampaignStatus::CANCELLABLE,
                CampaignStatus::Cancelled,
            )
            .await?;
        if !cancelled {
            return Err(AppError::BadRequest(format!(
                "Cannot cancel a {} campaign",
                campaign.status
            )));
        }

        if !self.queue.cancel(&job_id).await? {
            info!(job_id = %job_id, "Job already started, running pass continues");
        }
        self.campaigns.set_job_id(&campaign.id, None).await?;

        let campaign = self.load(campaign_id).await?;
        info!("Campaign cancelled");
        self.announce(&campaign).await;
        Ok(campaign)
    }

    /// Move a campaign back to scheduled at `at` with a fresh job.
    #[instrument(skip(self))]
    pub async fn reschedule(&self, campaign_id: &str, at: DateTime<Utc>) -> AppResult<Campaign> {
        let campaign = self.load(campaign_id).await?;
        if matches!(
            campaign.status,
            CampaignStatus::Sending | CampaignStatus::Paused
        ) {
            return Err(AppError::BadRequest(format!(
                "Cannot reschedule a {} campaign",
                campaign.status
            )));
        }

        if let Some(job_id) = &campaign.job_id {
            if !self.queue.cancel(job_id).await? {
                debug!(job_id = %job_id, "Previous job was not pending");
            }
        }
        if let Some(live) = self.queue.job_for_campaign(&campaign.id).await? {
            warn!(job_id = %live.id, "Previous job already started");
            return Err(AppError::BadRequest(format!(
                "Campaign {campaign_id} has a job in progress"
            )));
        }

        let mut campaign = self.campaigns.reschedule(&campaign.id, at).await?;
        let job_id = self.queue.enqueue(&campaign.id, at).await?;
        self.campaigns.set_job_id(&campaign.id, Some(&job_id)).await?;
        campaign.job_id = Some(job_id);

        info!(scheduled_at = %at, "Campaign rescheduled");
        self.announce(&campaign).await;
        Ok(campaign)
    }

    /// Mark a sending campaign paused.
    #[instrument(skip(self))]
    pub async fn pause(&self, campaign_id: &str) -> AppResult<Campaign> {
        self.switch(
            campaign_id,
            CampaignStatus::Sending,
            CampaignStatus::Paused,
            "Can only pause sending campaigns",
        )
        .await
    }

    /// Mark a paused campaign sending again.
    #[instrument(skip(self))]
    pub async fn resume(&self, campaign_id: &str) -> AppResult<Campaign> {
        self.switch(
            campaign_id,
            CampaignStatus::Paused,
            CampaignStatus::Sending,
            "Can only resume paused campaigns",
        )
        .await
    }

    async fn switch(
        &self,
        campaign_id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
        refusal: &str,
    ) -> AppResult<Campaign> {
        let moved = self
            .campaigns
            .transition_status(campaign_id, &[from], to)
            .await?;
        let campaign = self.load(campaign_id).await?;
        if !moved {
            return Err(AppError::BadRequest(refusal.to_string()));
        }

        info!(status = %to, "Campaign status changed");
        self.announce(&campaign).await;
        Ok(campaign)
    }

    /// Drop a campaign's pending job ahead of deleting the campaign.
    ///
    /// Returns whether a pending job was removed.
    #[instrument(skip(self))]
    pub async fn forget(&self, campaign_id: &str) -> AppResult<bool> {
        let Some(campaign) = self.campaigns.find_campaign(campaign_id).await? else {
            return Ok(false);
        };
        match (&campaign.status, &campaign.job_id) {
            (CampaignStatus::Scheduled, Some(job_id)) => self.queue.cancel(job_id).await,
            _ => Ok(false),
        }
    }
}
