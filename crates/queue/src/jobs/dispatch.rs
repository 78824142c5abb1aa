//! Campaign dispatch job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run one dispatch pass for a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCampaignJob {
    /// Campaign to dispatch.
    pub campaign_id: String,
}

impl DispatchCampaignJob {
    /// Create a new dispatch job.
    #[must_use]
    pub fn new(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
        }
    }
}

/// A job as stored by a queue backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID handed back to callers.
    pub id: String,
    /// The job payload.
    pub job: DispatchCampaignJob,
    /// Attempts made so far.
    pub attempts: u32,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
    /// Error of the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobRecord {
    /// A fresh job due at `run_at`.
    #[must_use]
    pub fn new(id: String, job: DispatchCampaignJob, run_at: DateTime<Utc>) -> Self {
        Self {
            id,
            job,
            attempts: 0,
            run_at,
            last_error: None,
        }
    }

    /// Campaign the job belongs to.
    #[must_use]
    pub fn campaign_id(&self) -> &str {
        &self.job.campaign_id
    }

    /// Whether the job may run at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }
}
