//! Redis backend.
//!
//! Layout under `{prefix}:queue:`
//! - `due`: sorted set of pending job IDs scored by due time in milliseconds
//! - `jobs`: hash of job ID to serialized [`JobRecord`], pending and active
//! - `campaigns`: hash of campaign ID to its live job ID
//! - `dead`: hash of job ID to serialized [`DeadLetterEntry`]
//!
//! Claiming removes the ID from `due`; whoever gets `ZREM` = 1 owns the job.
//! A job in `jobs` but not in `due` is active.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::clients::Client as RedisClient;
use fred::interfaces::{HashesInterface, SortedSetsInterface};
use tracing::debug;

use super::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::jobs::JobRecord;
use crate::retry::DeadLetterEntry;

#[derive(Debug, Clone)]
struct Keys {
    due: String,
    jobs: String,
    campaigns: String,
    dead: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        Self {
            due: format!("{prefix}:queue:due"),
            jobs: format!("{prefix}:queue:jobs"),
            campaigns: format!("{prefix}:queue:campaigns"),
            dead: format!("{prefix}:queue:dead"),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

/// Queue backend stored in Redis.
#[derive(Clone)]
pub struct RedisBackend {
    client: Arc<RedisClient>,
    keys: Keys,
}

impl RedisBackend {
    /// Create a backend using keys under `prefix`.
    #[must_use]
    pub fn new(client: Arc<RedisClient>, prefix: &str) -> Self {
        Self {
            client,
            keys: Keys::new(prefix),
        }
    }

    async fn load(&self, job_id: &str) -> QueueResult<Option<JobRecord>> {
        let payload: Option<String> = self.client.hget(&self.keys.jobs, job_id).await?;
        payload
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .map_err(QueueError::from)
    }

    async fn store(&self, record: &JobRecord) -> QueueResult<()> {
        let payload = serde_json::to_string(record)?;
        let _: () = self
            .client
            .hset(&self.keys.jobs, (record.id.as_str(), payload))
            .await?;
        Ok(())
    }

    async fn schedule(&self, record: &JobRecord) -> QueueResult<()> {
        let _: () = self
            .client
            .zadd(
                &self.keys.due,
                None,
                None,
                false,
                false,
                (score(record.run_at), record.id.as_str()),
            )
            .await?;
        Ok(())
    }

    async fn forget(&self, job_id: &str) -> QueueResult<Option<JobRecord>> {
        let record = self.load(job_id).await?;
        let _: i64 = self.client.zrem(&self.keys.due, job_id).await?;
        let _: i64 = self.client.hdel(&self.keys.jobs, job_id).await?;

        if let Some(record) = &record {
            let indexed: Option<String> = self
                .client
                .hget(&self.keys.campaigns, record.campaign_id())
                .await?;
            if indexed.as_deref() == Some(job_id) {
                let _: i64 = self
                    .client
                    .hdel(&self.keys.campaigns, record.campaign_id())
                    .await?;
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn push(&self, record: JobRecord) -> QueueResult<JobRecord> {
        let indexed: bool = self
            .client
            .hsetnx(&self.keys.campaigns, record.campaign_id(), record.id.as_str())
            .await?;

        if !indexed {
            let existing_id: Option<String> = self
                .client
                .hget(&self.keys.campaigns, record.campaign_id())
                .await?;
            if let Some(existing_id) = existing_id {
                if let Some(existing) = self.load(&existing_id).await? {
                    return Ok(existing);
                }
            }

            // Index pointed at a job that no longer exists
            debug!(campaign_id = %record.campaign_id(), "Replacing stale campaign job index");
            let _: () = self
                .client
                .hset(&self.keys.campaigns, (record.campaign_id(), record.id.as_str()))
                .await?;
        }

        self.store(&record).await?;
        self.schedule(&record).await?;
        Ok(record)
    }

    async fn remove(&self, job_id: &str) -> QueueResult<bool> {
        let removed: i64 = self.client.zrem(&self.keys.due, job_id).await?;
        if removed == 0 {
            return Ok(false);
        }
        self.forget(job_id).await?;
        Ok(true)
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = self
            .client
            .zrangebyscore(
                &self.keys.due,
                "-inf",
                score(now),
                false,
                Some((0, limit as i64)),
            )
            .await?;

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let won: i64 = self.client.zrem(&self.keys.due, id.as_str()).await?;
            if won == 0 {
                continue;
            }
            match self.load(&id).await? {
                Some(record) => claimed.push(record),
                None => debug!(job_id = %id, "Claimed job has no record"),
            }
        }
        Ok(claimed)
    }

    async fn retry(&self, record: &JobRecord) -> QueueResult<()> {
        let pending: Option<f64> = self.client.zscore(&self.keys.due, record.id.as_str()).await?;
        let known: bool = self
            .client
            .hexists(&self.keys.jobs, record.id.as_str())
            .await?;
        if pending.is_some() || !known {
            return Err(QueueError::NotActive(record.id.clone()));
        }

        self.store(record).await?;
        self.schedule(record).await
    }

    async fn release_active(&self) -> QueueResult<usize> {
        let payloads: Vec<String> = self.client.hvals(&self.keys.jobs).await?;
        let mut released = 0;
        for payload in payloads {
            let record: JobRecord = serde_json::from_str(&payload)?;
            let pending: Option<f64> = self.client.zscore(&self.keys.due, record.id.as_str()).await?;
            if pending.is_none() {
                debug!(job_id = %record.id, "Releasing active job");
                self.schedule(&record).await?;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn complete(&self, job_id: &str) -> QueueResult<()> {
        self.forget(job_id).await?;
        Ok(())
    }

    async fn bury(&self, entry: DeadLetterEntry<JobRecord>) -> QueueResult<()> {
        self.forget(&entry.job.id).await?;
        let payload = serde_json::to_string(&entry)?;
        let _: () = self
            .client
            .hset(&self.keys.dead, (entry.job.id.as_str(), payload))
            .await?;
        Ok(())
    }

    async fn job_for_campaign(&self, campaign_id: &str) -> QueueResult<Option<JobRecord>> {
        let job_id: Option<String> = self.client.hget(&self.keys.campaigns, campaign_id).await?;
        match job_id {
            Some(job_id) => self.load(&job_id).await,
            None => Ok(None),
        }
    }

    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetterEntry<JobRecord>>> {
        let payloads: Vec<String> = self.client.hvals(&self.keys.dead).await?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(QueueError::from))
            .collect()
    }
}
