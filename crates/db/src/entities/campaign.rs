//! Campaign entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CampaignStatus {
    /// Waiting for its queue job to fire.
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    /// Dispatch pass in progress.
    #[sea_orm(string_value = "sending")]
    Sending,
    /// Paused by an operator.
    #[sea_orm(string_value = "paused")]
    Paused,
    /// Dispatch pass finished.
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Cancelled by an operator.
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    /// Could not be dispatched.
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Provider requested by the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum CampaignProvider {
    #[sea_orm(string_value = "whatsapp")]
    Whatsapp,
    #[sea_orm(string_value = "twilio")]
    Twilio,
    #[sea_orm(string_value = "auto")]
    Auto,
}

/// A scheduled broadcast of one template to a set of contacts.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "campaign")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub name: String,

    /// Template rendered for every contact.
    #[sea_orm(indexed)]
    pub template_id: String,

    /// Resolved contact IDs, in dispatch order.
    #[sea_orm(column_type = "JsonBinary")]
    pub contact_ids: Json,

    /// Campaign-level template variables (string to string).
    #[sea_orm(column_type = "JsonBinary")]
    pub variables: Json,

    #[sea_orm(indexed)]
    pub scheduled_at: DateTimeWithTimeZone,

    pub status: CampaignStatus,

    pub provider: CampaignProvider,

    /// Messages per minute; zero means the configured default.
    pub rate_limit_per_minute: i32,

    pub progress_total: i32,
    pub progress_sent: i32,
    pub progress_delivered: i32,
    pub progress_read: i32,
    pub progress_failed: i32,

    /// Live queue job, if any.
    #[sea_orm(nullable)]
    pub job_id: Option<String>,

    /// Error captured when the campaign failed.
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::template::Entity",
        from = "Column::TemplateId",
        to = "super::template::Column::Id",
        on_delete = "Restrict"
    )]
    Template,
    #[sea_orm(has_many = "super::message::Entity")]
    Message,
}

impl Related<super::template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Template.def()
    }
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
