//! Campaign repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IdenStatic, QueryFilter,
    QueryOrder, Set,
    sea_query::{Expr, SimpleExpr},
};

use crate::entities::{
    Campaign, campaign,
    campaign::CampaignStatus,
    message::MessageStatus,
};

/// Campaign repository for database operations.
#[derive(Clone)]
pub struct CampaignRepository {
    db: Arc<DatabaseConnection>,
}

/// Progress column tracking messages in `status`, if any.
const fn counter_column(status: MessageStatus) -> Option<campaign::Column> {
    match status {
        MessageStatus::Pending => None,
        MessageStatus::Sent => Some(campaign::Column::ProgressSent),
        MessageStatus::Delivered => Some(campaign::Column::ProgressDelivered),
        MessageStatus::Read => Some(campaign::Column::ProgressRead),
        MessageStatus::Failed => Some(campaign::Column::ProgressFailed),
    }
}

fn decrement_floor_zero(column: campaign::Column) -> SimpleExpr {
    Expr::cust(format!("GREATEST({} - 1, 0)", column.as_str()))
}

impl CampaignRepository {
    /// Create a new campaign repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a campaign by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<campaign::Model>> {
        Campaign::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a campaign by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<campaign::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))
    }

    /// Scheduled campaigns that have lost (or never received) their queue job.
    pub async fn find_scheduled_without_job(&self) -> AppResult<Vec<campaign::Model>> {
        Campaign::find()
            .filter(campaign::Column::Status.eq(CampaignStatus::Scheduled))
            .filter(campaign::Column::JobId.is_null())
            .order_by_asc(campaign::Column::ScheduledAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new campaign.
    pub async fn create(&self, model: campaign::ActiveModel) -> AppResult<campaign::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update a campaign.
    pub async fn update(&self, model: campaign::ActiveModel) -> AppResult<campaign::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Set status and error message unconditionally.
    pub async fn set_status(
        &self,
        id: &str,
        status: CampaignStatus,
        error_message: Option<&str>,
    ) -> AppResult<campaign::Model> {
        let campaign = self.get_by_id(id).await?;
        let mut active: campaign::ActiveModel = campaign.into();
        active.status = Set(status);
        active.error_message = Set(error_message.map(ToString::to_string));
        active.updated_at = Set(Some(Utc::now().into()));
        self.update(active).await
    }

    /// Move the campaign to `to` only if it is currently in one of `from`.
    ///
    /// Returns `false` when the campaign is missing or in another status.
    pub async fn transition_status(
        &self,
        id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> AppResult<bool> {
        let result = Campaign::update_many()
            .col_expr(campaign::Column::Status, Expr::value(to))
            .col_expr(campaign::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(campaign::Column::Id.eq(id))
            .filter(campaign::Column::Status.is_in(from.iter().copied()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Record (or clear) the live queue job.
    pub async fn set_job_id(&self, id: &str, job_id: Option<&str>) -> AppResult<()> {
        Campaign::update_many()
            .col_expr(campaign::Column::JobId, Expr::value(job_id.map(ToString::to_string)))
            .col_expr(campaign::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(campaign::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Move the campaign back to scheduled at a new time.
    pub async fn reschedule(
        &self,
        id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> AppResult<campaign::Model> {
        let campaign = self.get_by_id(id).await?;
        let mut active: campaign::ActiveModel = campaign.into();
        active.scheduled_at = Set(scheduled_at.into());
        active.status = Set(CampaignStatus::Scheduled);
        active.job_id = Set(None);
        active.error_message = Set(None);
        active.updated_at = Set(Some(Utc::now().into()));
        self.update(active).await
    }

    /// Reset progress for a new dispatch pass over `total` contacts.
    pub async fn start_pass(&self, id: &str, total: i32) -> AppResult<campaign::Model> {
        let updated = Campaign::update_many()
            .col_expr(campaign::Column::ProgressTotal, Expr::value(total))
            .col_expr(campaign::Column::ProgressSent, Expr::value(0))
            .col_expr(campaign::Column::ProgressDelivered, Expr::value(0))
            .col_expr(campaign::Column::ProgressRead, Expr::value(0))
            .col_expr(campaign::Column::ProgressFailed, Expr::value(0))
            .col_expr(campaign::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(campaign::Column::Id.eq(id))
            .exec_with_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))
    }

    /// Move one message's worth of progress from `from` to `to` in a single
    /// UPDATE, flooring the decremented counter at zero.
    ///
    /// Returns the counters as written.
    pub async fn transfer_progress(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
    ) -> AppResult<campaign::Model> {
        let mut update = Campaign::update_many()
            .col_expr(campaign::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(campaign::Column::Id.eq(id));

        if from != to {
            if let Some(column) = counter_column(from) {
                update = update.col_expr(column, decrement_floor_zero(column));
            }
            if let Some(column) = counter_column(to) {
                update = update.col_expr(column, Expr::col(column).add(1));
            }
        }

        let updated = update
            .exec_with_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))
    }

    /// Delete a campaign.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        Campaign::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
