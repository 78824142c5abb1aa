//! Campaign job queue service.
//!
//! Owns the backend and the retry policy. [`CampaignQueue::run`] polls for
//! due jobs and hands them to a [`JobHandler`], at most `concurrency` at a
//! time. A failing job is retried with exponential backoff, then buried
//! and reported through [`JobHandler::on_dead`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_common::config::QueueConfig;
use herald_common::{AppResult, IdGenerator};
use herald_core::CampaignStore;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::backend::QueueBackendService;
use crate::jobs::{DispatchCampaignJob, JobRecord};
use crate::retry::{DeadLetterEntry, RetryConfig};
use crate::workers::JobHandlerService;

/// Delayed queue of campaign dispatch jobs.
pub struct CampaignQueue {
    backend: QueueBackendService,
    retry: RetryConfig,
    poll_interval: Duration,
    concurrency: usize,
    id_gen: IdGenerator,
    shutdown: watch::Sender<bool>,
}

impl CampaignQueue {
    /// Create a queue over `backend` using the `[queue]` settings.
    #[must_use]
    pub fn new(backend: QueueBackendService, config: &QueueConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            retry: RetryConfig::from_config(config),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            concurrency: config.concurrency.max(1),
            id_gen: IdGenerator::new(),
            shutdown,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Schedule a dispatch for `campaign_id` no earlier than `not_before`.
    ///
    /// A campaign with a live job keeps it; its ID is returned instead.
    #[instrument(skip(self), fields(campaign_id = %campaign_id))]
    pub async fn enqueue(&self, campaign_id: &str, not_before: DateTime<Utc>) -> AppResult<String> {
        let record = JobRecord::new(
            self.id_gen.generate_prefixed("job"),
            DispatchCampaignJob::new(campaign_id),
            not_before,
        );
        let requested = record.id.clone();
        let live = self.backend.push(record).await?;

        if live.id == requested {
            info!(job_id = %live.id, run_at = %live.run_at, "Campaign job enqueued");
        } else {
            debug!(job_id = %live.id, "Campaign already has a live job");
        }
        Ok(live.id)
    }

    /// Remove a job that has not started. Returns `false` once it was claimed.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: &str) -> AppResult<bool> {
        let removed = self.backend.remove(job_id).await?;
        if removed {
            info!("Campaign job cancelled");
        } else {
            debug!("Job already claimed or unknown");
        }
        Ok(removed)
    }

    /// The live job of a campaign, if any.
    pub async fn job_for_campaign(&self, campaign_id: &str) -> AppResult<Option<JobRecord>> {
        Ok(self.backend.job_for_campaign(campaign_id).await?)
    }

    /// Jobs that exhausted their attempts.
    pub async fn dead_letters(&self) -> AppResult<Vec<DeadLetterEntry<JobRecord>>> {
        Ok(self.backend.dead_letters().await?)
    }

    /// Release jobs left active by a stopped runner, then enqueue every
    /// scheduled campaign that has no job and record the job IDs.
    ///
    /// Must run before [`CampaignQueue::run`].
    #[instrument(skip_all)]
    pub async fn recover(&self, campaigns: &dyn CampaignStore) -> AppResult<usize> {
        let released = self.backend.release_active().await?;
        if released > 0 {
            warn!(released, "Released jobs left active by a previous runner");
        }

        let awaiting = campaigns.campaigns_awaiting_job().await?;
        let mut recovered = 0;

        for campaign in awaiting {
            let job_id = self.enqueue(&campaign.id, campaign.scheduled_at).await?;
            campaigns.set_job_id(&campaign.id, Some(&job_id)).await?;
            recovered += 1;
        }

        info!(recovered, "Scheduled campaigns recovered");
        Ok(recovered)
    }

    /// Claim the jobs due now and run them to completion.
    ///
    /// Returns how many jobs ran.
    pub async fn process_due(&self, handler: &JobHandlerService) -> AppResult<usize> {
        let records = self.backend.claim_due(Utc::now(), self.concurrency).await?;
        let count = records.len();

        futures::future::join_all(records.into_iter().map(|record| {
            execute(
                self.backend.clone(),
                handler.clone(),
                self.retry.clone(),
                record,
            )
        }))
        .await;

        Ok(count)
    }

    /// Poll for due jobs until [`CampaignQueue::shutdown`] is called.
    ///
    /// Running jobs are awaited before this returns.
    pub async fn run(&self, handler: JobHandlerService) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        info!(
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Campaign queue started"
        );

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            while in_flight.try_join_next().is_some() {}

            let free = self.concurrency.saturating_sub(in_flight.len());
            if free == 0 {
                continue;
            }

            match self.backend.claim_due(Utc::now(), free).await {
                Ok(records) => {
                    for record in records {
                        in_flight.spawn(execute(
                            self.backend.clone(),
                            handler.clone(),
                            self.retry.clone(),
                            record,
                        ));
                    }
                }
                Err(e) => error!(error = %e, "Failed to claim due jobs"),
            }
        }

        info!(running = in_flight.len(), "Campaign queue stopping");
        while in_flight.join_next().await.is_some() {}
        info!("Campaign queue stopped");
    }

    /// Stop [`CampaignQueue::run`] after the running jobs finish.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn execute(
    backend: QueueBackendService,
    handler: JobHandlerService,
    retry: RetryConfig,
    mut record: JobRecord,
) {
    let attempt = record.attempts + 1;
    let span = info_span!(
        "campaign_job",
        job_id = %record.id,
        campaign_id = %record.campaign_id(),
        attempt
    );

    async move {
        match handler.handle(&record.job).await {
            Ok(()) => {
                if let Err(e) = backend.complete(&record.id).await {
                    error!(error = %e, "Failed to mark job complete");
                }
            }
            Err(e) if retry.should_retry(attempt) => {
                let delay = retry.delay_after(attempt);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Job failed, will retry");

                record.attempts = attempt;
                record.run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                record.last_error = Some(e.to_string());
                if let Err(e) = backend.retry(&record).await {
                    error!(error = %e, "Failed to reschedule job");
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Job failed permanently");

                let job = record.job.clone();
                if let Err(e) = backend
                    .bury(DeadLetterEntry::new(record, attempt, message.clone()))
                    .await
                {
                    error!(error = %e, "Failed to move job to dead letters");
                }
                handler.on_dead(&job, &message).await;
            }
        }
    }
    .instrument(span)
    .await;
}
