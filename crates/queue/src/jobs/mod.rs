//! Job definitions.

mod dispatch;

pub use dispatch::{DispatchCampaignJob, JobRecord};
