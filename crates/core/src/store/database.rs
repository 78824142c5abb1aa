//! sea-orm backed store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use herald_db::{
    entities::{campaign, contact, message, template},
    repositories::{CampaignRepository, ContactRepository, MessageRepository, TemplateRepository},
};
use sea_orm::{DatabaseConnection, Set};
use serde_json::Value;

use super::{CampaignStore, MessageStore};
use crate::models::{
    Campaign, CampaignStatus, Contact, Message, MessageState, MessageStatus, Progress,
    ProviderChoice, ProviderKind, Receipt, Template,
};

/// Store over the Postgres repositories.
#[derive(Clone)]
pub struct DatabaseStore {
    campaigns: CampaignRepository,
    contacts: ContactRepository,
    templates: TemplateRepository,
    messages: MessageRepository,
}

impl DatabaseStore {
    /// Create a store sharing one connection pool.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            campaigns: CampaignRepository::new(db.clone()),
            contacts: ContactRepository::new(db.clone()),
            templates: TemplateRepository::new(db.clone()),
            messages: MessageRepository::new(db),
        }
    }
}

// === Conversions ===

const fn campaign_status_to_db(status: CampaignStatus) -> campaign::CampaignStatus {
    match status {
        CampaignStatus::Scheduled => campaign::CampaignStatus::Scheduled,
        CampaignStatus::Sending => campaign::CampaignStatus::Sending,
        CampaignStatus::Paused => campaign::CampaignStatus::Paused,
        CampaignStatus::Completed => campaign::CampaignStatus::Completed,
        CampaignStatus::Cancelled => campaign::CampaignStatus::Cancelled,
        CampaignStatus::Failed => campaign::CampaignStatus::Failed,
    }
}

const fn campaign_status_from_db(status: campaign::CampaignStatus) -> CampaignStatus {
    match status {
        campaign::CampaignStatus::Scheduled => CampaignStatus::Scheduled,
        campaign::CampaignStatus::Sending => CampaignStatus::Sending,
        campaign::CampaignStatus::Paused => CampaignStatus::Paused,
        campaign::CampaignStatus::Completed => CampaignStatus::Completed,
        campaign::CampaignStatus::Cancelled => CampaignStatus::Cancelled,
        campaign::CampaignStatus::Failed => CampaignStatus::Failed,
    }
}

const fn message_status_to_db(status: MessageStatus) -> message::MessageStatus {
    match status {
        MessageStatus::Pending => message::MessageStatus::Pending,
        MessageStatus::Sent => message::MessageStatus::Sent,
        MessageStatus::Delivered => message::MessageStatus::Delivered,
        MessageStatus::Read => message::MessageStatus::Read,
        MessageStatus::Failed => message::MessageStatus::Failed,
    }
}

const fn provider_to_db(kind: ProviderKind) -> message::MessageProvider {
    match kind {
        ProviderKind::Whatsapp => message::MessageProvider::Whatsapp,
        ProviderKind::Twilio => message::MessageProvider::Twilio,
    }
}

const fn provider_from_db(provider: message::MessageProvider) -> ProviderKind {
    match provider {
        message::MessageProvider::Whatsapp => ProviderKind::Whatsapp,
        message::MessageProvider::Twilio => ProviderKind::Twilio,
    }
}

fn counter(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn progress_of(model: &campaign::Model) -> Progress {
    Progress {
        total: counter(model.progress_total),
        sent: counter(model.progress_sent),
        delivered: counter(model.progress_delivered),
        read: counter(model.progress_read),
        failed: counter(model.progress_failed),
    }
}

/// Flatten a JSON object into string values; non-string values keep their JSON text.
fn string_map(value: Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn campaign_from_model(model: campaign::Model) -> AppResult<Campaign> {
    let progress = progress_of(&model);
    let contact_ids: Vec<String> = serde_json::from_value(model.contact_ids).map_err(|e| {
        AppError::Internal(format!("Campaign {} has malformed contact ids: {e}", model.id))
    })?;

    Ok(Campaign {
        id: model.id,
        name: model.name,
        template_id: model.template_id,
        contact_ids,
        variables: string_map(model.variables),
        scheduled_at: model.scheduled_at.with_timezone(&Utc),
        status: campaign_status_from_db(model.status),
        progress,
        rate_limit_per_minute: u32::try_from(model.rate_limit_per_minute).unwrap_or(0),
        provider: match model.provider {
            campaign::CampaignProvider::Whatsapp => ProviderChoice::Whatsapp,
            campaign::CampaignProvider::Twilio => ProviderChoice::Twilio,
            campaign::CampaignProvider::Auto => ProviderChoice::Auto,
        },
        job_id: model.job_id,
        error: model.error_message,
    })
}

fn template_from_model(model: template::Model) -> Template {
    Template {
        id: model.id,
        name: model.name,
        body: model.body,
        variables: serde_json::from_value(model.variables).unwrap_or_default(),
    }
}

fn contact_from_model(model: contact::Model) -> Contact {
    Contact {
        id: model.id,
        name: model.name,
        phone: model.phone,
        email: model.email,
        metadata: string_map(model.metadata),
    }
}

fn message_from_model(model: message::Model) -> AppResult<Message> {
    let receipt = match (model.provider_message_id, model.sent_at) {
        (Some(provider_message_id), Some(sent_at)) => Some(Receipt {
            provider_message_id,
            sent_at: sent_at.with_timezone(&Utc),
            delivered_at: model.delivered_at.map(|t| t.with_timezone(&Utc)),
            read_at: model.read_at.map(|t| t.with_timezone(&Utc)),
        }),
        _ => None,
    };

    let accepted = |receipt: Option<Receipt>| {
        receipt.ok_or_else(|| {
            AppError::Internal(format!(
                "Message {} is {:?} without a provider receipt",
                model.id, model.status
            ))
        })
    };

    let state = match model.status {
        message::MessageStatus::Pending => MessageState::Pending,
        message::MessageStatus::Sent => MessageState::Sent(accepted(receipt)?),
        message::MessageStatus::Delivered => MessageState::Delivered(accepted(receipt)?),
        message::MessageStatus::Read => MessageState::Read(accepted(receipt)?),
        message::MessageStatus::Failed => MessageState::Failed {
            error: model.error_message,
            receipt,
        },
    };

    Ok(Message {
        id: model.id,
        campaign_id: model.campaign_id,
        contact_id: model.contact_id,
        content: model.content,
        provider: model.provider.map(provider_from_db),
        state,
        retry_count: counter(model.retry_count),
        max_retries: counter(model.max_retries),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn message_to_active(message: &Message) -> message::ActiveModel {
    let receipt = message.receipt();

    message::ActiveModel {
        id: Set(message.id.clone()),
        campaign_id: Set(message.campaign_id.clone()),
        contact_id: Set(message.contact_id.clone()),
        content: Set(message.content.clone()),
        status: Set(message_status_to_db(message.status())),
        provider: Set(message.provider.map(provider_to_db)),
        provider_message_id: Set(receipt.map(|r| r.provider_message_id.clone())),
        sent_at: Set(receipt.map(|r| r.sent_at.into())),
        delivered_at: Set(receipt.and_then(|r| r.delivered_at).map(Into::into)),
        read_at: Set(receipt.and_then(|r| r.read_at).map(Into::into)),
        error_message: Set(message.error().map(ToString::to_string)),
        retry_count: Set(message.retry_count as i32),
        max_retries: Set(message.max_retries as i32),
        created_at: Set(message.created_at.into()),
        updated_at: Set(Some(Utc::now().into())),
    }
}

#[async_trait]
impl CampaignStore for DatabaseStore {
    async fn find_campaign(&self, id: &str) -> AppResult<Option<Campaign>> {
        self.campaigns
            .find_by_id(id)
            .await?
            .map(campaign_from_model)
            .transpose()
    }

    async fn find_template(&self, id: &str) -> AppResult<Option<Template>> {
        Ok(self.templates.find_by_id(id).await?.map(template_from_model))
    }

    async fn eligible_contacts(&self, ids: &[String]) -> AppResult<Vec<Contact>> {
        let mut by_id: HashMap<String, Contact> = self
            .contacts
            .find_eligible_by_ids(ids)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), contact_from_model(m)))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn campaigns_awaiting_job(&self) -> AppResult<Vec<Campaign>> {
        self.campaigns
            .find_scheduled_without_job()
            .await?
            .into_iter()
            .map(campaign_from_model)
            .collect()
    }

    async fn set_status(
        &self,
        id: &str,
        status: CampaignStatus,
        error: Option<&str>,
    ) -> AppResult<()> {
        self.campaigns
            .set_status(id, campaign_status_to_db(status), error)
            .await?;
        Ok(())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> AppResult<bool> {
        let from: Vec<_> = from.iter().copied().map(campaign_status_to_db).collect();
        self.campaigns
            .transition_status(id, &from, campaign_status_to_db(to))
            .await
    }

    async fn set_job_id(&self, id: &str, job_id: Option<&str>) -> AppResult<()> {
        self.campaigns.set_job_id(id, job_id).await
    }

    async fn reschedule(&self, id: &str, at: DateTime<Utc>) -> AppResult<Campaign> {
        campaign_from_model(self.campaigns.reschedule(id, at).await?)
    }

    async fn start_pass(&self, id: &str, total: u32) -> AppResult<Progress> {
        let total = i32::try_from(total)
            .map_err(|_| AppError::Validation(format!("Too many contacts: {total}")))?;
        let model = self.campaigns.start_pass(id, total).await?;
        Ok(progress_of(&model))
    }

    async fn transfer_progress(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<Progress> {
        let model = self
            .campaigns
            .transfer_progress(id, message_status_to_db(from), message_status_to_db(to))
            .await?;
        Ok(progress_of(&model))
    }
}

#[async_trait]
impl MessageStore for DatabaseStore {
    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        self.messages.create(message_to_active(message)).await?;
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> AppResult<()> {
        self.messages.update(message_to_active(message)).await?;
        Ok(())
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> AppResult<Option<Message>> {
        self.messages
            .find_by_provider_message_id(provider_message_id)
            .await?
            .map(message_from_model)
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    fn campaign_model() -> campaign::Model {
        campaign::Model {
            id: "camp1".to_string(),
            name: "Launch".to_string(),
            template_id: "tpl1".to_string(),
            contact_ids: json!(["c2", "c1", "c3"]),
            variables: json!({"code": "SAVE10", "tier": 2}),
            scheduled_at: Utc::now().into(),
            status: campaign::CampaignStatus::Scheduled,
            provider: campaign::CampaignProvider::Twilio,
            rate_limit_per_minute: 30,
            progress_total: 3,
            progress_sent: 1,
            progress_delivered: 1,
            progress_read: 0,
            progress_failed: 0,
            job_id: Some("job_1".to_string()),
            error_message: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn contact_model(id: &str) -> contact::Model {
        contact::Model {
            id: id.to_string(),
            name: format!("Contact {id}"),
            phone: "+15550100".to_string(),
            email: None,
            tags: json!([]),
            status: contact::ContactStatus::Active,
            opted_out: false,
            metadata: json!({}),
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[test]
    fn test_campaign_conversion() {
        let campaign = campaign_from_model(campaign_model()).unwrap();

        assert_eq!(campaign.contact_ids, vec!["c2", "c1", "c3"]);
        assert_eq!(campaign.variables.get("code").unwrap(), "SAVE10");
        assert_eq!(campaign.variables.get("tier").unwrap(), "2");
        assert_eq!(campaign.provider, ProviderChoice::Twilio);
        assert_eq!(campaign.progress.delivered, 1);
    }

    #[test]
    fn test_message_round_trip_keeps_receipt() {
        let mut message = Message::pending(
            "m1".to_string(),
            "camp1",
            "c1",
            "Hi".to_string(),
            ProviderKind::Whatsapp,
        );
        message.mark_sent("wamid.1".to_string(), Utc::now());
        message.apply_receipt(MessageStatus::Delivered, Utc::now(), None);

        let active = message_to_active(&message);
        let model = message::Model {
            id: active.id.unwrap(),
            campaign_id: active.campaign_id.unwrap(),
            contact_id: active.contact_id.unwrap(),
            content: active.content.unwrap(),
            status: active.status.unwrap(),
            provider: active.provider.unwrap(),
            provider_message_id: active.provider_message_id.unwrap(),
            sent_at: active.sent_at.unwrap(),
            delivered_at: active.delivered_at.unwrap(),
            read_at: active.read_at.unwrap(),
            error_message: active.error_message.unwrap(),
            retry_count: active.retry_count.unwrap(),
            max_retries: active.max_retries.unwrap(),
            created_at: active.created_at.unwrap(),
            updated_at: active.updated_at.unwrap(),
        };

        let restored = message_from_model(model).unwrap();
        assert_eq!(restored.status(), MessageStatus::Delivered);
        assert_eq!(restored.receipt().unwrap().provider_message_id, "wamid.1");
        assert!(restored.receipt().unwrap().delivered_at.is_some());
    }

    #[test]
    fn test_sent_message_without_receipt_is_rejected() {
        let model = message::Model {
            id: "m1".to_string(),
            campaign_id: "camp1".to_string(),
            contact_id: "c1".to_string(),
            content: "Hi".to_string(),
            status: message::MessageStatus::Sent,
            provider: None,
            provider_message_id: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now().into(),
            updated_at: None,
        };

        assert!(matches!(message_from_model(model), Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_eligible_contacts_follow_campaign_order() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[contact_model("c1"), contact_model("c3")]])
                .into_connection(),
        );

        let store = DatabaseStore::new(db);
        let ids = vec!["c3".to_string(), "c2".to_string(), "c1".to_string()];
        let contacts = store.eligible_contacts(&ids).await.unwrap();

        let order: Vec<_> = contacts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c3", "c1"]);
    }

    #[tokio::test]
    async fn test_find_campaign() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[campaign_model()]])
                .into_connection(),
        );

        let store = DatabaseStore::new(db);
        let campaign = store.find_campaign("camp1").await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);
        assert_eq!(campaign.job_id.as_deref(), Some("job_1"));
    }
}
