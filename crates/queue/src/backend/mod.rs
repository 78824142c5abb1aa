//! Queue storage backends.
//!
//! A job is either *pending* (waiting for its due time, removable) or
//! *active* (claimed by the runner). Each campaign has at most one live
//! job across both states.

mod memory;
mod redis;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueResult;
use crate::jobs::JobRecord;
use crate::retry::DeadLetterEntry;

/// Durable job storage.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store `record` as pending unless its campaign already has a live job.
    ///
    /// Returns the live job, which is `record` itself when it was stored.
    async fn push(&self, record: JobRecord) -> QueueResult<JobRecord>;

    /// Drop a pending job. Returns `false` for claimed or unknown jobs.
    async fn remove(&self, job_id: &str) -> QueueResult<bool>;

    /// Claim up to `limit` pending jobs due at `now`, earliest first.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<JobRecord>>;

    /// Put an active job back as pending with its updated attempts and due time.
    async fn retry(&self, record: &JobRecord) -> QueueResult<()>;

    /// Return every active job to pending, keeping its attempts and due time.
    ///
    /// Jobs stay active when their runner stops mid-job. Call before any
    /// runner on this queue starts. Returns how many jobs were released.
    async fn release_active(&self) -> QueueResult<usize>;

    /// Forget an active job that finished.
    async fn complete(&self, job_id: &str) -> QueueResult<()>;

    /// Forget an active job and keep it in the dead set.
    async fn bury(&self, entry: DeadLetterEntry<JobRecord>) -> QueueResult<()>;

    /// The live job of a campaign, if any.
    async fn job_for_campaign(&self, campaign_id: &str) -> QueueResult<Option<JobRecord>>;

    /// Jobs that exhausted their attempts.
    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetterEntry<JobRecord>>>;
}

/// Shared queue backend.
pub type QueueBackendService = Arc<dyn QueueBackend>;
