//! Rate-limited campaign dispatch.
//!
//! A pass walks the campaign's eligible contacts in order, one send at a
//! time, sleeping `60s / rate` between contacts. Per-contact failures are
//! recorded and never abort the pass.

use std::time::Duration;

use chrono::Utc;
use herald_common::{AppError, AppResult, IdGenerator};
use tracing::{info, instrument, warn};

use super::event_publisher::{CampaignEvent, EventPublisherService, emit};
use super::providers::{MessageSender, SendOutcome};
use super::template;
use crate::models::{Campaign, CampaignStatus, Contact, Message, MessageStatus, Progress, Template};
use crate::store::{CampaignStoreService, MessageStoreService};

/// Rate used when neither the campaign nor configuration sets one.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

/// Delay between two consecutive sends at `rate` messages per minute.
///
/// Rounded up so the achieved rate never exceeds the configured one.
#[must_use]
pub fn pacing_interval(rate_per_minute: u32) -> Duration {
    Duration::from_nanos(60_000_000_000_u64.div_ceil(u64::from(rate_per_minute.max(1))))
}

/// Runs dispatch passes.
#[derive(Clone)]
pub struct Dispatcher {
    campaigns: CampaignStoreService,
    messages: MessageStoreService,
    events: EventPublisherService,
    id_gen: IdGenerator,
    default_rate: u32,
}

impl Dispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        campaigns: CampaignStoreService,
        messages: MessageStoreService,
        events: EventPublisherService,
    ) -> Self {
        Self {
            campaigns,
            messages,
            events,
            id_gen: IdGenerator::new(),
            default_rate: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }

    /// Override the rate used for campaigns that carry zero.
    #[must_use]
    pub fn with_default_rate(mut self, rate_per_minute: u32) -> Self {
        if rate_per_minute > 0 {
            self.default_rate = rate_per_minute;
        }
        self
    }

    fn effective_rate(&self, campaign: &Campaign) -> u32 {
        if campaign.rate_limit_per_minute == 0 {
            self.default_rate
        } else {
            campaign.rate_limit_per_minute
        }
    }

    /// Run one full pass over the campaign's eligible contacts.
    ///
    /// Fails before sending anything when the template is missing or no
    /// contact is eligible. Otherwise the campaign ends `completed`, however
    /// many sends failed.
    #[instrument(skip_all, fields(campaign_id = %campaign.id, provider = %sender.kind()))]
    pub async fn dispatch(
        &self,
        campaign: &Campaign,
        sender: &dyn MessageSender,
    ) -> AppResult<Progress> {
        let template = self
            .campaigns
            .find_template(&campaign.template_id)
            .await?
            .ok_or_else(|| AppError::TemplateNotFound(campaign.template_id.clone()))?;

        let contacts = self.campaigns.eligible_contacts(&campaign.contact_ids).await?;
        if contacts.is_empty() {
            return Err(AppError::Validation(format!(
                "Campaign {} has no eligible contacts",
                campaign.id
            )));
        }

        let total = contacts.len() as u32;
        let mut progress = self.campaigns.start_pass(&campaign.id, total).await?;
        let interval = pacing_interval(self.effective_rate(campaign));

        info!(total, interval_ms = interval.as_millis() as u64, "Dispatch pass started");

        for (index, contact) in contacts.iter().enumerate() {
            progress = match self.deliver(campaign, &template, contact, sender).await {
                Ok(progress) => progress,
                Err(e) => {
                    warn!(contact_id = %contact.id, error = %e, "Failed to process contact");
                    self.record_failure(&campaign.id, MessageStatus::Pending, progress)
                        .await
                }
            };

            emit(
                self.events.as_ref(),
                CampaignEvent::ProgressUpdate {
                    campaign_id: campaign.id.clone(),
                    progress,
                    current_index: index as u32 + 1,
                    total_contacts: total,
                },
            )
            .await;

            if index + 1 < contacts.len() {
                tokio::time::sleep(interval).await;
            }
        }

        self.campaigns
            .set_status(&campaign.id, CampaignStatus::Completed, None)
            .await?;
        emit(
            self.events.as_ref(),
            CampaignEvent::Completed {
                campaign_id: campaign.id.clone(),
                progress,
            },
        )
        .await;

        info!(
            attempted = progress.attempted(),
            sent = progress.sent,
            failed = progress.failed,
            "Dispatch pass completed"
        );
        Ok(progress)
    }

    async fn deliver(
        &self,
        campaign: &Campaign,
        template: &Template,
        contact: &Contact,
        sender: &dyn MessageSender,
    ) -> AppResult<Progress> {
        let content = template::render(&template.body, &campaign.variables, contact);
        let mut message = Message::pending(
            self.id_gen.generate(),
            &campaign.id,
            &contact.id,
            content,
            sender.kind(),
        );
        self.messages.insert_message(&message).await?;

        match sender.send(&contact.phone, &message.content).await {
            SendOutcome::Sent {
                provider_message_id,
            } => message.mark_sent(provider_message_id, Utc::now()),
            SendOutcome::Failed { error } => {
                warn!(contact_id = %contact.id, error = %error, "Send failed");
                message.mark_failed(error);
            }
        }

        // Counters move before the provider ID is visible to receipts
        let status = message.status();
        let progress = self
            .campaigns
            .transfer_progress(&campaign.id, MessageStatus::Pending, status)
            .await?;

        if let Err(e) = self.messages.update_message(&message).await {
            warn!(contact_id = %contact.id, error = %e, "Failed to persist send result");
            if status != MessageStatus::Failed {
                return Ok(self.record_failure(&campaign.id, status, progress).await);
            }
        }
        Ok(progress)
    }

    /// Count a contact as failed after an error outside the send itself.
    async fn record_failure(
        &self,
        campaign_id: &str,
        from: MessageStatus,
        last_known: Progress,
    ) -> Progress {
        match self
            .campaigns
            .transfer_progress(campaign_id, from, MessageStatus::Failed)
            .await
        {
            Ok(progress) => progress,
            Err(e) => {
                warn!(error = %e, "Failed to record contact failure");
                let mut progress = last_known;
                progress.transfer(from, MessageStatus::Failed);
                progress
            }
        }
    }
}
