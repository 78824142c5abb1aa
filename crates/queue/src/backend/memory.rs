//! In-memory backend for tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::QueueBackend;
use crate::error::{QueueError, QueueResult};
use crate::jobs::JobRecord;
use crate::retry::DeadLetterEntry;

#[derive(Debug)]
struct Slot {
    record: JobRecord,
    claimed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, Slot>,
    /// campaign ID -> live job ID
    campaigns: HashMap<String, String>,
    dead: Vec<DeadLetterEntry<JobRecord>>,
}

impl Inner {
    fn forget(&mut self, job_id: &str) -> Option<JobRecord> {
        let slot = self.jobs.remove(job_id)?;
        if self.campaigns.get(slot.record.campaign_id()).map(String::as_str) == Some(job_id) {
            self.campaigns.remove(slot.record.campaign_id());
        }
        Some(slot.record)
    }
}

/// Queue backend held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending and active jobs.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn push(&self, record: JobRecord) -> QueueResult<JobRecord> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner
            .campaigns
            .get(record.campaign_id())
            .and_then(|job_id| inner.jobs.get(job_id))
        {
            return Ok(existing.record.clone());
        }

        inner
            .campaigns
            .insert(record.campaign_id().to_string(), record.id.clone());
        inner.jobs.insert(
            record.id.clone(),
            Slot {
                record: record.clone(),
                claimed: false,
            },
        );
        Ok(record)
    }

    async fn remove(&self, job_id: &str) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        let pending = inner.jobs.get(job_id).is_some_and(|slot| !slot.claimed);
        if !pending {
            return Ok(false);
        }
        Ok(inner.forget(job_id).is_some())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<JobRecord>> {
        let mut inner = self.inner.lock().await;

        let mut due: Vec<&mut Slot> = inner
            .jobs
            .values_mut()
            .filter(|slot| !slot.claimed && slot.record.is_due(now))
            .collect();
        due.sort_by(|a, b| {
            a.record
                .run_at
                .cmp(&b.record.run_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });

        Ok(due
            .into_iter()
            .take(limit)
            .map(|slot| {
                slot.claimed = true;
                slot.record.clone()
            })
            .collect())
    }

    async fn retry(&self, record: &JobRecord) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .jobs
            .get_mut(&record.id)
            .filter(|slot| slot.claimed)
            .ok_or_else(|| QueueError::NotActive(record.id.clone()))?;

        slot.record = record.clone();
        slot.claimed = false;
        Ok(())
    }

    async fn release_active(&self) -> QueueResult<usize> {
        let mut inner = self.inner.lock().await;
        let mut released = 0;
        for slot in inner.jobs.values_mut().filter(|slot| slot.claimed) {
            slot.claimed = false;
            released += 1;
        }
        Ok(released)
    }

    async fn complete(&self, job_id: &str) -> QueueResult<()> {
        self.inner.lock().await.forget(job_id);
        Ok(())
    }

    async fn bury(&self, entry: DeadLetterEntry<JobRecord>) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner.forget(&entry.job.id);
        inner.dead.push(entry);
        Ok(())
    }

    async fn job_for_campaign(&self, campaign_id: &str) -> QueueResult<Option<JobRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .campaigns
            .get(campaign_id)
            .and_then(|job_id| inner.jobs.get(job_id))
            .map(|slot| slot.record.clone()))
    }

    async fn dead_letters(&self) -> QueueResult<Vec<DeadLetterEntry<JobRecord>>> {
        Ok(self.inner.lock().await.dead.clone())
    }
}
