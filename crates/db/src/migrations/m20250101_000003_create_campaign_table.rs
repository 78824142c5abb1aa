//! Create `campaign` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Campaign::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Campaign::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Campaign::Name).string_len(256).not_null())
                    .col(
                        ColumnDef::new(Campaign::TemplateId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Campaign::ContactIds)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Campaign::Variables)
                            .json_binary()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(Campaign::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Campaign::Status)
                            .string_len(16)
                            .not_null()
                            .default("scheduled"),
                    )
                    .col(
                        ColumnDef::new(Campaign::Provider)
                            .string_len(16)
                            .not_null()
                            .default("auto"),
                    )
                    .col(
                        ColumnDef::new(Campaign::RateLimitPerMinute)
                            .integer()
                            .not_null()
                            .default(60),
                    )
                    .col(counter(Campaign::ProgressTotal))
                    .col(counter(Campaign::ProgressSent))
                    .col(counter(Campaign::ProgressDelivered))
                    .col(counter(Campaign::ProgressRead))
                    .col(counter(Campaign::ProgressFailed))
                    .col(ColumnDef::new(Campaign::JobId).string_len(64))
                    .col(ColumnDef::new(Campaign::ErrorMessage).text())
                    .col(
                        ColumnDef::new(Campaign::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Campaign::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_campaign_template")
                            .from(Campaign::Table, Campaign::TemplateId)
                            .to(Template::Table, Template::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Recovery scans scheduled campaigns
        manager
            .create_index(
                Index::create()
                    .name("idx_campaign_status_scheduled_at")
                    .table(Campaign::Table)
                    .col(Campaign::Status)
                    .col(Campaign::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_campaign_template_id")
                    .table(Campaign::Table)
                    .col(Campaign::TemplateId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Campaign::Table).to_owned())
            .await
    }
}

fn counter(column: Campaign) -> ColumnDef {
    ColumnDef::new(column)
        .integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[derive(Iden)]
enum Campaign {
    Table,
    Id,
    Name,
    TemplateId,
    ContactIds,
    Variables,
    ScheduledAt,
    Status,
    Provider,
    RateLimitPerMinute,
    ProgressTotal,
    ProgressSent,
    ProgressDelivered,
    ProgressRead,
    ProgressFailed,
    JobId,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Template {
    Table,
    Id,
}
