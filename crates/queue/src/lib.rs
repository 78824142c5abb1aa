//! Delayed job queue for herald campaigns.
//!
//! - **Queue**: time-ordered campaign jobs with dedupe, cancel and retry
//! - **Backends**: Redis (fred) for production, in-memory for tests
//! - **Worker**: runs a campaign's dispatch pass when its job fires
//! - **Scheduler**: operator commands (schedule, cancel, reschedule, pause, resume)
//! - **Pub/Sub**: campaign events to Redis
//! - **Retry**: exponential backoff with dead letter entries

#![allow(missing_docs)]

pub mod backend;
pub mod error;
pub mod jobs;
pub mod pubsub;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod workers;

pub use backend::{MemoryBackend, QueueBackend, QueueBackendService, RedisBackend};
pub use error::{QueueError, QueueResult};
pub use jobs::*;
pub use pubsub::{RedisPubSub, campaign_channel};
pub use queue::CampaignQueue;
pub use retry::{DeadLetterEntry, RetryConfig};
pub use scheduler::CampaignScheduler;
pub use workers::{CampaignWorker, JobHandler, JobHandlerService};
