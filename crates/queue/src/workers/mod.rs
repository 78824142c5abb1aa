//! Job handlers.

mod campaign;

pub use campaign::CampaignWorker;

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::AppResult;

use crate::jobs::DispatchCampaignJob;

/// Processes claimed jobs for [`crate::CampaignQueue`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run a job. An error schedules a retry or, after the last attempt,
    /// buries the job.
    async fn handle(&self, job: &DispatchCampaignJob) -> AppResult<()>;

    /// Called once a job has exhausted its attempts.
    async fn on_dead(&self, job: &DispatchCampaignJob, error: &str);
}

/// Shared job handler.
pub type JobHandlerService = Arc<dyn JobHandler>;
