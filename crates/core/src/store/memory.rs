//! In-memory store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use tokio::sync::Mutex;

use super::{CampaignStore, MessageStore};
use crate::models::{Campaign, CampaignStatus, Contact, Message, MessageStatus, Progress, Template};

#[derive(Default)]
struct Inner {
    campaigns: HashMap<String, Campaign>,
    templates: HashMap<String, Template>,
    contacts: HashMap<String, Contact>,
    ineligible: HashSet<String>,
    messages: Vec<Message>,
    failing_contacts: HashSet<String>,
}

/// Store held entirely in memory. One mutex guards all state, so every
/// operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        self.inner
            .lock()
            .await
            .campaigns
            .insert(campaign.id.clone(), campaign);
    }

    pub async fn remove_campaign(&self, id: &str) {
        self.inner.lock().await.campaigns.remove(id);
    }

    pub async fn insert_template(&self, template: Template) {
        self.inner
            .lock()
            .await
            .templates
            .insert(template.id.clone(), template);
    }

    pub async fn remove_template(&self, id: &str) {
        self.inner.lock().await.templates.remove(id);
    }

    /// Add an active, not opted-out contact.
    pub async fn insert_contact(&self, contact: Contact) {
        self.inner
            .lock()
            .await
            .contacts
            .insert(contact.id.clone(), contact);
    }

    /// Mark a contact as opted out (or otherwise ineligible).
    pub async fn opt_out(&self, contact_id: &str) {
        self.inner
            .lock()
            .await
            .ineligible
            .insert(contact_id.to_string());
    }

    /// Make message inserts for this contact fail.
    pub async fn fail_inserts_for(&self, contact_id: &str) {
        self.inner
            .lock()
            .await
            .failing_contacts
            .insert(contact_id.to_string());
    }

    /// Snapshot of a campaign.
    pub async fn campaign(&self, id: &str) -> Option<Campaign> {
        self.inner.lock().await.campaigns.get(id).cloned()
    }

    /// All stored messages in insertion order.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }
}

fn campaign_mut<'a>(inner: &'a mut Inner, id: &str) -> AppResult<&'a mut Campaign> {
    inner
        .campaigns
        .get_mut(id)
        .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn find_campaign(&self, id: &str) -> AppResult<Option<Campaign>> {
        Ok(self.campaign(id).await)
    }

    async fn find_template(&self, id: &str) -> AppResult<Option<Template>> {
        Ok(self.inner.lock().await.templates.get(id).cloned())
    }

    async fn eligible_contacts(&self, ids: &[String]) -> AppResult<Vec<Contact>> {
        let inner = self.inner.lock().await;
        let mut seen = HashSet::new();

        Ok(ids
            .iter()
            .filter(|id| !inner.ineligible.contains(*id) && seen.insert(id.as_str()))
            .filter_map(|id| inner.contacts.get(id).cloned())
            .collect())
    }

    async fn campaigns_awaiting_job(&self) -> AppResult<Vec<Campaign>> {
        let inner = self.inner.lock().await;
        let mut campaigns: Vec<_> = inner
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Scheduled && c.job_id.is_none())
            .cloned()
            .collect();
        campaigns.sort_by_key(|c| c.scheduled_at);
        Ok(campaigns)
    }

    async fn set_status(
        &self,
        id: &str,
        status: CampaignStatus,
        error: Option<&str>,
    ) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let campaign = campaign_mut(&mut inner, id)?;
        campaign.status = status;
        campaign.error = error.map(ToString::to_string);
        Ok(())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.campaigns.get_mut(id) {
            Some(campaign) if from.contains(&campaign.status) => {
                campaign.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_job_id(&self, id: &str, job_id: Option<&str>) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(campaign) = inner.campaigns.get_mut(id) {
            campaign.job_id = job_id.map(ToString::to_string);
        }
        Ok(())
    }

    async fn reschedule(&self, id: &str, at: DateTime<Utc>) -> AppResult<Campaign> {
        let mut inner = self.inner.lock().await;
        let campaign = campaign_mut(&mut inner, id)?;
        campaign.scheduled_at = at;
        campaign.status = CampaignStatus::Scheduled;
        campaign.job_id = None;
        campaign.error = None;
        Ok(campaign.clone())
    }

    async fn start_pass(&self, id: &str, total: u32) -> AppResult<Progress> {
        let mut inner = self.inner.lock().await;
        let campaign = campaign_mut(&mut inner, id)?;
        campaign.progress = Progress::starting(total);
        Ok(campaign.progress)
    }

    async fn transfer_progress(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<Progress> {
        let mut inner = self.inner.lock().await;
        let campaign = campaign_mut(&mut inner, id)?;
        campaign.progress.transfer(from, to);
        Ok(campaign.progress)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.failing_contacts.contains(&message.contact_id) {
            return Err(AppError::Database(format!(
                "insert rejected for contact {}",
                message.contact_id
            )));
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message.id)))?;
        *stored = message.clone();
        Ok(())
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> AppResult<Option<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .iter()
            .find(|m| {
                m.receipt()
                    .is_some_and(|r| r.provider_message_id == provider_message_id)
            })
            .cloned())
    }
}
