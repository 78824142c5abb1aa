//! Campaign dispatch worker.

use std::time::Duration;

use async_trait::async_trait;
use herald_common::AppResult;
use herald_core::services::event_publisher::{CampaignEvent, EventPublisherService, emit};
use herald_core::services::providers::SenderFactoryService;
use herald_core::services::selector::select_provider;
use herald_core::{Campaign, CampaignStatus, CampaignStoreService, Dispatcher, Progress};
use tracing::{debug, error, info, instrument, warn};

use super::JobHandler;
use crate::jobs::DispatchCampaignJob;

const FAILURE_WRITE_ATTEMPTS: u32 = 3;
const FAILURE_WRITE_DELAY: Duration = Duration::from_millis(500);

/// Moves a scheduled campaign through `sending` to `completed` or `failed`.
#[derive(Clone)]
pub struct CampaignWorker {
    campaigns: CampaignStoreService,
    dispatcher: Dispatcher,
    senders: SenderFactoryService,
    events: EventPublisherService,
}

impl CampaignWorker {
    /// Create a new campaign worker.
    #[must_use]
    pub fn new(
        campaigns: CampaignStoreService,
        dispatcher: Dispatcher,
        senders: SenderFactoryService,
        events: EventPublisherService,
    ) -> Self {
        Self {
            campaigns,
            dispatcher,
            senders,
            events,
        }
    }

    async fn run_pass(&self, campaign: &Campaign) -> AppResult<Progress> {
        let kind = select_provider(campaign.provider, self.senders.availability())?;
        let sender = self.senders.sender(kind)?;
        info!(provider = %kind, "Provider selected");

        self.dispatcher.dispatch(campaign, sender.as_ref()).await
    }

    /// Mark the campaign failed and announce it.
    ///
    /// The status write is retried a few times; a queue retry could not
    /// repair it, since the campaign is no longer scheduled.
    async fn fail(&self, campaign_id: &str, error: &str) {
        let mut attempt = 1;
        while let Err(e) = self
            .campaigns
            .set_status(campaign_id, CampaignStatus::Failed, Some(error))
            .await
        {
            if attempt >= FAILURE_WRITE_ATTEMPTS {
                error!(error = %e, attempt, "Giving up marking campaign failed");
                return;
            }
            warn!(error = %e, attempt, "Failed to mark campaign failed, retrying");
            tokio::time::sleep(FAILURE_WRITE_DELAY).await;
            attempt += 1;
        }

        emit(
            self.events.as_ref(),
            CampaignEvent::StatusUpdate {
                campaign_id: campaign_id.to_string(),
                status: CampaignStatus::Failed,
                progress: None,
                error: Some(error.to_string()),
            },
        )
        .await;
    }
}

#[async_trait]
impl JobHandler for CampaignWorker {
    #[instrument(skip_all, fields(campaign_id = %job.campaign_id))]
    async fn handle(&self, job: &DispatchCampaignJob) -> AppResult<()> {
        let Some(campaign) = self.campaigns.find_campaign(&job.campaign_id).await? else {
            warn!("Campaign no longer exists, dropping job");
            return Ok(());
        };

        if campaign.status != CampaignStatus::Scheduled {
            debug!(status = %campaign.status, "Stale job, campaign is not scheduled");
            return Ok(());
        }

        let started = self
            .campaigns
            .transition_status(&campaign.id, &[CampaignStatus::Scheduled], CampaignStatus::Sending)
            .await?;
        if !started {
            debug!("Campaign left scheduled state before the job started");
            return Ok(());
        }

        info!("Campaign sending");
        emit(
            self.events.as_ref(),
            CampaignEvent::StatusUpdate {
                campaign_id: campaign.id.clone(),
                status: CampaignStatus::Sending,
                progress: None,
                error: None,
            },
        )
        .await;

        match self.run_pass(&campaign).await {
            Ok(progress) => {
                info!(
                    sent = progress.sent,
                    failed = progress.failed,
                    "Campaign completed"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Campaign failed");
                if e.is_not_found() {
                    match self.campaigns.find_campaign(&campaign.id).await {
                        Ok(None) => {
                            warn!("Campaign deleted during the pass, dropping job");
                            return Ok(());
                        }
                        Ok(Some(_)) => {}
                        Err(lookup) => warn!(error = %lookup, "Failed to re-read campaign"),
                    }
                }
                self.fail(&campaign.id, &e.to_string()).await;
                Ok(())
            }
        }
    }

    #[instrument(skip_all, fields(campaign_id = %job.campaign_id))]
    async fn on_dead(&self, job: &DispatchCampaignJob, error: &str) {
        match self.campaigns.find_campaign(&job.campaign_id).await {
            Ok(Some(_)) => {
                self.fail(&job.campaign_id, error).await;
                if let Err(e) = self.campaigns.set_job_id(&job.campaign_id, None).await {
                    warn!(error = %e, "Failed to clear campaign job");
                }
            }
            Ok(None) => debug!("Dead job for a deleted campaign"),
            Err(e) => error!(error = %e, "Failed to load campaign for dead job"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use herald_common::AppError;
    use herald_core::services::event_publisher::ChannelEventPublisher;
    use herald_core::services::selector::ProviderAvailability;
    use herald_core::store::MemoryStore;
    use herald_core::testing::{ScriptedSender, StaticSenderFactory, campaign, contact, template};
    use herald_core::{
        CampaignStore, Contact, MessageStatus, ProviderChoice, ProviderKind, Template,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    const WHATSAPP_ONLY: ProviderAvailability = ProviderAvailability {
        whatsapp: true,
        twilio: false,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        sender: Arc<ScriptedSender>,
        worker: CampaignWorker,
        events: UnboundedReceiver<CampaignEvent>,
    }

    async fn fixture(available: ProviderAvailability) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_template(template("tpl1", "Hi {{name}}")).await;
        store.insert_contact(contact("c1", "Ann", "+15550001")).await;
        store.insert_campaign(campaign("camp1", "tpl1", &["c1"])).await;

        let (publisher, events) = ChannelEventPublisher::new();
        let events_service: EventPublisherService = Arc::new(publisher);
        let sender = Arc::new(ScriptedSender::always_ok());
        let dispatcher = Dispatcher::new(store.clone(), store.clone(), events_service.clone());
        let worker = CampaignWorker::new(
            store.clone(),
            dispatcher,
            Arc::new(StaticSenderFactory::new(sender.clone(), available)),
            events_service,
        );

        Fixture {
            store,
            sender,
            worker,
            events,
        }
    }

    fn drain(events: &mut UnboundedReceiver<CampaignEvent>) -> Vec<CampaignEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test]
    async fn test_scheduled_campaign_completes() {
        let mut f = fixture(WHATSAPP_ONLY).await;

        f.worker
            .handle(&DispatchCampaignJob::new("camp1"))
            .await
            .unwrap();

        let stored = f.store.campaign("camp1").await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.progress.sent, 1);
        assert_eq!(f.sender.calls().await[0].1, "Hi Ann");

        let events = drain(&mut f.events);
        assert!(matches!(
            events.first(),
            Some(CampaignEvent::StatusUpdate {
                status: CampaignStatus::Sending,
                ..
            })
        ));
        assert!(matches!(events.last(), Some(CampaignEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn test_stale_job_is_noop() {
        let mut f = fixture(WHATSAPP_ONLY).await;
        f.store
            .set_status("camp1", CampaignStatus::Cancelled, None)
            .await
            .unwrap();

        f.worker
            .handle(&DispatchCampaignJob::new("camp1"))
            .await
            .unwrap();

        assert_eq!(
            f.store.campaign("camp1").await.unwrap().status,
            CampaignStatus::Cancelled
        );
        assert!(f.sender.calls().await.is_empty());
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn test_missing_campaign_dropped() {
        let f = fixture(WHATSAPP_ONLY).await;

        let result = f.worker.handle(&DispatchCampaignJob::new("gone")).await;

        assert!(result.is_ok());
        assert!(f.sender.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_provider_fails_before_send() {
        let mut f = fixture(ProviderAvailability::default()).await;

        f.worker
            .handle(&DispatchCampaignJob::new("camp1"))
            .await
            .unwrap();

        let stored = f.store.campaign("camp1").await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert!(stored.error.unwrap().contains("No messaging provider"));
        assert!(f.sender.calls().await.is_empty());
        assert!(matches!(
            drain(&mut f.events).last(),
            Some(CampaignEvent::StatusUpdate {
                status: CampaignStatus::Failed,
                error: Some(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_explicit_provider_without_credentials_fails() {
        let f = fixture(WHATSAPP_ONLY).await;
        let mut twilio_campaign = campaign("camp2", "tpl1", &["c1"]);
        twilio_campaign.provider = ProviderChoice::Twilio;
        f.store.insert_campaign(twilio_campaign).await;

        f.worker
            .handle(&DispatchCampaignJob::new("camp2"))
            .await
            .unwrap();

        let stored = f.store.campaign("camp2").await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert!(
            stored
                .error
                .unwrap()
                .contains(&ProviderKind::Twilio.to_string())
        );
        assert!(f.sender.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_marks_failed() {
        let f = fixture(WHATSAPP_ONLY).await;
        f.store.remove_template("tpl1").await;

        f.worker
            .handle(&DispatchCampaignJob::new("camp1"))
            .await
            .unwrap();

        assert_eq!(
            f.store.campaign("camp1").await.unwrap().status,
            CampaignStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_dead_job_fails_campaign() {
        let f = fixture(WHATSAPP_ONLY).await;
        f.store.set_job_id("camp1", Some("job_1")).await.unwrap();

        f.worker
            .on_dead(&DispatchCampaignJob::new("camp1"), "Redis error: timeout")
            .await;

        let stored = f.store.campaign("camp1").await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("Redis error: timeout"));
        assert!(stored.job_id.is_none());
    }

    /// Campaign store that rejects writes of `failed` a number of times and
    /// can delete the campaign as its pass starts.
    struct FlakyCampaigns {
        store: Arc<MemoryStore>,
        failed_writes_to_reject: AtomicU32,
        delete_on_pass: bool,
    }

    #[async_trait]
    impl CampaignStore for FlakyCampaigns {
        async fn find_campaign(&self, id: &str) -> AppResult<Option<Campaign>> {
            self.store.find_campaign(id).await
        }

        async fn find_template(&self, id: &str) -> AppResult<Option<Template>> {
            self.store.find_template(id).await
        }

        async fn eligible_contacts(&self, ids: &[String]) -> AppResult<Vec<Contact>> {
            self.store.eligible_contacts(ids).await
        }

        async fn campaigns_awaiting_job(&self) -> AppResult<Vec<Campaign>> {
            self.store.campaigns_awaiting_job().await
        }

        async fn set_status(
            &self,
            id: &str,
            status: CampaignStatus,
            error: Option<&str>,
        ) -> AppResult<()> {
            let rejected = status == CampaignStatus::Failed
                && self
                    .failed_writes_to_reject
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if rejected {
                return Err(AppError::Database("connection reset".to_string()));
            }
            self.store.set_status(id, status, error).await
        }

        async fn transition_status(
            &self,
            id: &str,
            from: &[CampaignStatus],
            to: CampaignStatus,
        ) -> AppResult<bool> {
            self.store.transition_status(id, from, to).await
        }

        async fn set_job_id(&self, id: &str, job_id: Option<&str>) -> AppResult<()> {
            self.store.set_job_id(id, job_id).await
        }

        async fn reschedule(&self, id: &str, at: DateTime<Utc>) -> AppResult<Campaign> {
            self.store.reschedule(id, at).await
        }

        async fn start_pass(&self, id: &str, total: u32) -> AppResult<Progress> {
            if self.delete_on_pass {
                self.store.remove_campaign(id).await;
            }
            self.store.start_pass(id, total).await
        }

        async fn transfer_progress(
            &self,
            id: &str,
            from: MessageStatus,
            to: MessageStatus,
        ) -> AppResult<Progress> {
            self.store.transfer_progress(id, from, to).await
        }
    }

    async fn flaky_fixture(
        available: ProviderAvailability,
        failed_writes_to_reject: u32,
        delete_on_pass: bool,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_template(template("tpl1", "Hi {{name}}")).await;
        store.insert_contact(contact("c1", "Ann", "+15550001")).await;
        store.insert_campaign(campaign("camp1", "tpl1", &["c1"])).await;

        let campaigns: CampaignStoreService = Arc::new(FlakyCampaigns {
            store: store.clone(),
            failed_writes_to_reject: AtomicU32::new(failed_writes_to_reject),
            delete_on_pass,
        });
        let (publisher, events) = ChannelEventPublisher::new();
        let events_service: EventPublisherService = Arc::new(publisher);
        let sender = Arc::new(ScriptedSender::always_ok());
        let dispatcher = Dispatcher::new(campaigns.clone(), store.clone(), events_service.clone());
        let worker = CampaignWorker::new(
            campaigns,
            dispatcher,
            Arc::new(StaticSenderFactory::new(sender.clone(), available)),
            events_service,
        );

        Fixture {
            store,
            sender,
            worker,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_write_is_retried() {
        let mut f = flaky_fixture(ProviderAvailability::default(), 2, false).await;

        f.worker
            .handle(&DispatchCampaignJob::new("camp1"))
            .await
            .unwrap();

        assert_eq!(
            f.store.campaign("camp1").await.unwrap().status,
            CampaignStatus::Failed
        );
        assert!(matches!(
            drain(&mut f.events).last(),
            Some(CampaignEvent::StatusUpdate {
                status: CampaignStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_failure_does_not_requeue() {
        let mut f = flaky_fixture(ProviderAvailability::default(), u32::MAX, false).await;

        let result = f.worker.handle(&DispatchCampaignJob::new("camp1")).await;

        assert!(result.is_ok());
        assert_eq!(
            f.store.campaign("camp1").await.unwrap().status,
            CampaignStatus::Sending
        );
        assert!(!drain(&mut f.events).iter().any(|event| matches!(
            event,
            CampaignEvent::StatusUpdate {
                status: CampaignStatus::Failed,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_campaign_deleted_mid_pass_is_dropped() {
        let mut f = flaky_fixture(WHATSAPP_ONLY, 0, true).await;

        let result = f.worker.handle(&DispatchCampaignJob::new("camp1")).await;

        assert!(result.is_ok());
        assert!(f.store.campaign("camp1").await.is_none());
        assert!(f.sender.calls().await.is_empty());
        let events = drain(&mut f.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            CampaignEvent::StatusUpdate {
                status: CampaignStatus::Sending,
                ..
            }
        ));
    }
}
