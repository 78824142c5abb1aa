//! Queue integration tests.
//!
//! These run the queue, worker and scheduler together over the in-memory
//! backend and store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::config::QueueConfig;
use herald_common::{AppError, AppResult};
use herald_core::services::selector::ProviderAvailability;
use herald_core::store::MemoryStore;
use herald_core::testing::{ScriptedSender, StaticSenderFactory, campaign, contact, template};
use herald_core::{CampaignStatus, Dispatcher, NoOpEventPublisher, Progress, SendOutcome};
use herald_queue::{
    CampaignQueue, CampaignScheduler, CampaignWorker, DispatchCampaignJob, JobHandler,
    JobHandlerService, MemoryBackend, QueueBackend, RetryConfig,
};
use tokio::sync::Mutex;

const WHATSAPP: ProviderAvailability = ProviderAvailability {
    whatsapp: true,
    twilio: false,
};

struct Harness {
    store: Arc<MemoryStore>,
    backend: Arc<MemoryBackend>,
    queue: Arc<CampaignQueue>,
    sender: Arc<ScriptedSender>,
    worker: JobHandlerService,
    scheduler: CampaignScheduler,
}

async fn harness(sender: ScriptedSender) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.insert_template(template("tpl1", "Hi {{name}}")).await;
    for (id, name, phone) in [
        ("c1", "Ann", "+15550001"),
        ("c2", "Bob", "+15550002"),
        ("c3", "Cy", "+15550003"),
    ] {
        store.insert_contact(contact(id, name, phone)).await;
    }

    let backend = Arc::new(MemoryBackend::new());
    let queue = Arc::new(CampaignQueue::new(backend.clone(), &QueueConfig::default()));
    let sender = Arc::new(sender);
    let events = Arc::new(NoOpEventPublisher);
    let dispatcher = Dispatcher::new(store.clone(), store.clone(), events.clone());
    let worker: JobHandlerService = Arc::new(CampaignWorker::new(
        store.clone(),
        dispatcher,
        Arc::new(StaticSenderFactory::new(sender.clone(), WHATSAPP)),
        events.clone(),
    ));
    let scheduler = CampaignScheduler::new(store.clone(), queue.clone(), events);

    Harness {
        store,
        backend,
        queue,
        sender,
        worker,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn test_due_campaign_dispatched_and_paced() {
    let h = harness(ScriptedSender::always_ok()).await;
    h.store
        .insert_campaign(campaign("camp1", "tpl1", &["c1", "c2", "c3"]))
        .await;
    h.scheduler.schedule("camp1").await.unwrap();

    let started = tokio::time::Instant::now();
    let ran = h.queue.process_due(&h.worker).await.unwrap();

    assert_eq!(ran, 1);
    assert!(started.elapsed() >= Duration::from_millis(2000));

    let stored = h.store.campaign("camp1").await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(
        stored.progress,
        Progress {
            total: 3,
            sent: 3,
            ..Progress::default()
        }
    );
    assert_eq!(h.sender.calls().await.len(), 3);
    assert!(h.backend.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_first_send_fails_pass_completes() {
    let h = harness(ScriptedSender::new(vec![SendOutcome::Failed {
        error: "invalid number".to_string(),
    }]))
    .await;
    h.store
        .insert_campaign(campaign("camp1", "tpl1", &["c1", "c2"]))
        .await;
    h.scheduler.schedule("camp1").await.unwrap();

    h.queue.process_due(&h.worker).await.unwrap();

    let stored = h.store.campaign("camp1").await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(
        (stored.progress.total, stored.progress.sent, stored.progress.failed),
        (2, 1, 1)
    );
}

#[tokio::test]
async fn test_future_job_not_claimed() {
    let h = harness(ScriptedSender::always_ok()).await;
    let mut later = campaign("camp1", "tpl1", &["c1"]);
    later.scheduled_at = Utc::now() + chrono::Duration::hours(1);
    h.store.insert_campaign(later).await;
    h.scheduler.schedule("camp1").await.unwrap();

    assert_eq!(h.queue.process_due(&h.worker).await.unwrap(), 0);
    assert_eq!(
        h.store.campaign("camp1").await.unwrap().status,
        CampaignStatus::Scheduled
    );
}

#[tokio::test]
async fn test_enqueue_returns_existing_job() {
    let h = harness(ScriptedSender::always_ok()).await;

    let first = h.queue.enqueue("camp1", Utc::now()).await.unwrap();
    let second = h
        .queue
        .enqueue("camp1", Utc::now() + chrono::Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.backend.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_dispatch_does_not_interrupt() {
    let h = harness(ScriptedSender::always_ok()).await;
    h.store
        .insert_campaign(campaign("camp1", "tpl1", &["c1", "c2"]))
        .await;
    let job_id = h.scheduler.schedule("camp1").await.unwrap().job_id.unwrap();

    let queue = h.queue.clone();
    let worker = h.worker.clone();
    let running = tokio::spawn(async move { queue.process_due(&worker).await });

    // First contact is sent, the pass is waiting out the pacing interval
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.sender.calls().await.len(), 1);

    assert!(!h.queue.cancel(&job_id).await.unwrap());
    let cancelled = h.scheduler.cancel("camp1").await.unwrap();
    assert_eq!(cancelled.status, CampaignStatus::Cancelled);

    running.await.unwrap().unwrap();

    assert_eq!(h.sender.calls().await.len(), 2);
    let stored = h.store.campaign("camp1").await.unwrap();
    assert_eq!(stored.progress.sent, 2);
}

#[tokio::test]
async fn test_recover_enqueues_scheduled_campaigns() {
    let h = harness(ScriptedSender::always_ok()).await;
    h.store.insert_campaign(campaign("camp1", "tpl1", &["c1"])).await;
    let mut queued = campaign("camp2", "tpl1", &["c1"]);
    queued.job_id = Some("job_existing".to_string());
    h.store.insert_campaign(queued).await;
    let mut done = campaign("camp3", "tpl1", &["c1"]);
    done.status = CampaignStatus::Completed;
    h.store.insert_campaign(done).await;

    let recovered = h.queue.recover(h.store.as_ref()).await.unwrap();

    assert_eq!(recovered, 1);
    let job = h.backend.job_for_campaign("camp1").await.unwrap().unwrap();
    assert_eq!(h.store.campaign("camp1").await.unwrap().job_id, Some(job.id));
    assert!(h.backend.job_for_campaign("camp3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_recover_runs_job_orphaned_by_stopped_runner() {
    let h = harness(ScriptedSender::always_ok()).await;
    h.store.insert_campaign(campaign("camp1", "tpl1", &["c1"])).await;
    h.queue.recover(h.store.as_ref()).await.unwrap();
    // Claimed by a runner that never finished it
    assert_eq!(h.backend.claim_due(Utc::now(), 10).await.unwrap().len(), 1);
    assert_eq!(h.queue.process_due(&h.worker).await.unwrap(), 0);

    h.queue.recover(h.store.as_ref()).await.unwrap();
    assert_eq!(h.queue.process_due(&h.worker).await.unwrap(), 1);

    let stored = h.store.campaign("camp1").await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(h.sender.calls().await.len(), 1);
}

#[tokio::test]
async fn test_job_for_deleted_campaign_dropped() {
    let h = harness(ScriptedSender::always_ok()).await;
    h.queue.enqueue("ghost", Utc::now()).await.unwrap();

    assert_eq!(h.queue.process_due(&h.worker).await.unwrap(), 1);
    assert!(h.backend.is_empty().await);
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
}

/// Handler failing a fixed number of times before succeeding.
struct FlakyHandler {
    failures_left: AtomicU32,
    calls: AtomicU32,
    dead: Mutex<Vec<(String, String)>>,
}

impl FlakyHandler {
    fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            dead: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, _job: &DispatchCampaignJob) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(AppError::Database("connection reset".to_string()));
        }
        Ok(())
    }

    async fn on_dead(&self, job: &DispatchCampaignJob, error: &str) {
        self.dead
            .lock()
            .await
            .push((job.campaign_id.clone(), error.to_string()));
    }
}

fn immediate_retry_queue(backend: Arc<MemoryBackend>) -> CampaignQueue {
    CampaignQueue::new(backend, &QueueConfig::default()).with_retry(RetryConfig {
        initial_delay: Duration::ZERO,
        ..RetryConfig::default()
    })
}

#[tokio::test]
async fn test_failed_job_retried_then_succeeds() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = immediate_retry_queue(backend.clone());
    let flaky = Arc::new(FlakyHandler::new(1));
    let handler: JobHandlerService = flaky.clone();

    queue.enqueue("camp1", Utc::now()).await.unwrap();
    queue.process_due(&handler).await.unwrap();

    let pending = backend.job_for_campaign("camp1").await.unwrap().unwrap();
    assert_eq!(pending.attempts, 1);
    assert_eq!(
        pending.last_error.as_deref(),
        Some("Database error: connection reset")
    );

    queue.process_due(&handler).await.unwrap();

    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    assert!(backend.is_empty().await);
    assert!(flaky.dead.lock().await.is_empty());
}

#[tokio::test]
async fn test_job_dead_after_three_attempts() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = immediate_retry_queue(backend.clone());
    let flaky = Arc::new(FlakyHandler::new(u32::MAX));
    let handler: JobHandlerService = flaky.clone();

    queue.enqueue("camp1", Utc::now()).await.unwrap();
    for _ in 0..5 {
        queue.process_due(&handler).await.unwrap();
    }

    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert!(backend.is_empty().await);

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].job.campaign_id(), "camp1");

    let reported = flaky.dead.lock().await;
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0, "camp1");
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_processes_until_shutdown() {
    let h = harness(ScriptedSender::always_ok()).await;
    h.store.insert_campaign(campaign("camp1", "tpl1", &["c1"])).await;

    let queue = h.queue.clone();
    let worker = h.worker.clone();
    let runner = tokio::spawn(async move { queue.run(worker).await });

    h.scheduler.schedule("camp1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        h.store.campaign("camp1").await.unwrap().status,
        CampaignStatus::Completed
    );

    h.queue.shutdown();
    runner.await.unwrap();
    assert!(h.backend.is_empty().await);
}
