//! Campaign dispatch engine for herald.
//!
//! - [`services::template`]: placeholder substitution
//! - [`services::providers`]: WhatsApp and Twilio clients behind [`MessageSender`]
//! - [`services::selector`]: provider resolution
//! - [`services::dispatcher`]: rate-limited dispatch passes
//! - [`services::ingestion`]: delivery receipts into message state and counters
//! - [`store`]: persistence seams with database and in-memory implementations

#![allow(missing_docs)]

pub mod models;
pub mod services;
pub mod store;
pub mod testing;

pub use models::*;
pub use services::dispatcher::Dispatcher;
pub use services::event_publisher::{
    CampaignEvent, CampaignEventPublisher, EventPublisherService, NoOpEventPublisher,
};
pub use services::ingestion::{IngestOutcome, StatusEvent, StatusIngestion};
pub use services::providers::{MessageSender, Providers, SendOutcome, SenderFactory};
pub use store::{CampaignStore, CampaignStoreService, MessageStore, MessageStoreService};
