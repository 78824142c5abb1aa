//! Test utilities: fixtures and a scripted provider.
//!
//! Shared by the unit tests here and the integration tests of the queue
//! and api crates.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{AppError, AppResult};
use tokio::sync::Mutex;

use crate::models::{Campaign, CampaignStatus, Contact, Progress, ProviderChoice, ProviderKind, Template};
use crate::services::providers::{MessageSender, SendOutcome, SenderFactory};
use crate::services::selector::ProviderAvailability;

/// A scheduled campaign at 60 messages per minute.
#[must_use]
pub fn campaign(id: &str, template_id: &str, contact_ids: &[&str]) -> Campaign {
    Campaign {
        id: id.to_string(),
        name: format!("Campaign {id}"),
        template_id: template_id.to_string(),
        contact_ids: contact_ids.iter().map(ToString::to_string).collect(),
        variables: BTreeMap::new(),
        scheduled_at: Utc::now(),
        status: CampaignStatus::Scheduled,
        progress: Progress::default(),
        rate_limit_per_minute: 60,
        provider: ProviderChoice::Auto,
        job_id: None,
        error: None,
    }
}

#[must_use]
pub fn contact(id: &str, name: &str, phone: &str) -> Contact {
    Contact {
        id: id.to_string(),
        name: name.to_string(),
        phone: phone.to_string(),
        email: None,
        metadata: BTreeMap::new(),
    }
}

#[must_use]
pub fn template(id: &str, body: &str) -> Template {
    Template {
        id: id.to_string(),
        name: format!("template-{id}"),
        body: body.to_string(),
        variables: Vec::new(),
    }
}

/// Sender that replays queued outcomes, then succeeds with generated IDs.
pub struct ScriptedSender {
    kind: ProviderKind,
    script: Mutex<VecDeque<SendOutcome>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedSender {
    #[must_use]
    pub fn new(outcomes: Vec<SendOutcome>) -> Self {
        Self {
            kind: ProviderKind::Whatsapp,
            script: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// `(phone, body)` of every send so far.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(&self, phone: &str, body: &str) -> SendOutcome {
        let mut calls = self.calls.lock().await;
        calls.push((phone.to_string(), body.to_string()));
        let n = calls.len();
        drop(calls);

        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| SendOutcome::Sent {
                provider_message_id: format!("{}.{n}", self.kind),
            })
    }
}

/// Factory handing out one shared sender for every available provider.
pub struct StaticSenderFactory {
    sender: Arc<ScriptedSender>,
    available: ProviderAvailability,
}

impl StaticSenderFactory {
    #[must_use]
    pub const fn new(sender: Arc<ScriptedSender>, available: ProviderAvailability) -> Self {
        Self { sender, available }
    }
}

impl SenderFactory for StaticSenderFactory {
    fn availability(&self) -> ProviderAvailability {
        self.available
    }

    fn sender(&self, kind: ProviderKind) -> AppResult<Arc<dyn MessageSender>> {
        if self.available.has(kind) {
            Ok(self.sender.clone() as Arc<dyn MessageSender>)
        } else {
            Err(AppError::Config(format!("Provider {kind} is not configured")))
        }
    }
}
