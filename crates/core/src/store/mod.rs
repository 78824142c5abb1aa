//! Persistence seams for the dispatch engine.
//!
//! The engine never touches repositories directly. [`DatabaseStore`] adapts
//! the sea-orm repositories; [`MemoryStore`] backs tests and local runs.
//! Progress counters are only changed through [`CampaignStore::start_pass`]
//! and [`CampaignStore::transfer_progress`], which both implementations
//! apply atomically.

mod database;
mod memory;

pub use database::DatabaseStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::AppResult;

use crate::models::{Campaign, CampaignStatus, Contact, Message, MessageStatus, Progress, Template};

/// Campaign, template and contact access.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn find_campaign(&self, id: &str) -> AppResult<Option<Campaign>>;

    async fn find_template(&self, id: &str) -> AppResult<Option<Template>>;

    /// Active, not opted-out contacts among `ids`, in the order of `ids`.
    async fn eligible_contacts(&self, ids: &[String]) -> AppResult<Vec<Contact>>;

    /// Scheduled campaigns without a live job.
    async fn campaigns_awaiting_job(&self) -> AppResult<Vec<Campaign>>;

    /// Set status and error text unconditionally.
    async fn set_status(
        &self,
        id: &str,
        status: CampaignStatus,
        error: Option<&str>,
    ) -> AppResult<()>;

    /// Compare-and-set on status. Returns whether the campaign moved.
    async fn transition_status(
        &self,
        id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> AppResult<bool>;

    async fn set_job_id(&self, id: &str, job_id: Option<&str>) -> AppResult<()>;

    /// Back to scheduled at `at`, clearing job and error.
    async fn reschedule(&self, id: &str, at: DateTime<Utc>) -> AppResult<Campaign>;

    /// Reset counters for a pass over `total` contacts.
    async fn start_pass(&self, id: &str, total: u32) -> AppResult<Progress>;

    /// Move one message's worth of progress from `from` to `to`.
    async fn transfer_progress(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<Progress>;
}

/// Per-recipient message access.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> AppResult<()>;

    async fn update_message(&self, message: &Message) -> AppResult<()>;

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> AppResult<Option<Message>>;
}

/// Shared campaign store.
pub type CampaignStoreService = Arc<dyn CampaignStore>;

/// Shared message store.
pub type MessageStoreService = Arc<dyn MessageStore>;
