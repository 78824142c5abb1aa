//! Create `message` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Message::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Message::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Message::CampaignId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Message::ContactId).string_len(32).not_null())
                    .col(ColumnDef::new(Message::Content).text().not_null())
                    .col(
                        ColumnDef::new(Message::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Message::Provider).string_len(16))
                    .col(ColumnDef::new(Message::ProviderMessageId).string_len(128))
                    .col(ColumnDef::new(Message::SentAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::DeliveredAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::ReadAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::ErrorMessage).text())
                    .col(
                        ColumnDef::new(Message::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Message::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(Message::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Message::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_campaign")
                            .from(Message::Table, Message::CampaignId)
                            .to(Campaign::Table, Campaign::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_contact")
                            .from(Message::Table, Message::ContactId)
                            .to(Contact::Table, Contact::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_campaign_id")
                    .table(Message::Table)
                    .col(Message::CampaignId)
                    .to_owned(),
            )
            .await?;

        // Delivery receipts look messages up by provider ID
        manager
            .create_index(
                Index::create()
                    .name("idx_message_provider_message_id")
                    .table(Message::Table)
                    .col(Message::ProviderMessageId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Message::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Message {
    Table,
    Id,
    CampaignId,
    ContactId,
    Content,
    Status,
    Provider,
    ProviderMessageId,
    SentAt,
    DeliveredAt,
    ReadAt,
    ErrorMessage,
    RetryCount,
    MaxRetries,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Campaign {
    Table,
    Id,
}

#[derive(Iden)]
enum Contact {
    Table,
    Id,
}
